//! Local-forward TCP tunnel through an SSH server.
//!
//! A [`TunnelListener`] accepts connections on a local endpoint. For each one
//! a [`ConnectionForwarder`] opens its own SSH session, dials the remote
//! endpoint through it and splices bytes both ways until both sides are done.

pub mod cli;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod forwarder;
pub mod host_key;
pub mod key_management;
pub mod listener;
pub mod logging;
pub mod relay;
pub mod ssh_transport;
pub mod ssh_transport_adapter;
pub mod transport_adapter;


pub use config::{FailurePolicy, TunnelConfig};
pub use endpoint::Endpoint;
pub use error::{Result, TunnelError};
pub use forwarder::{ConnectionForwarder, ForwarderState};
pub use host_key::{AcceptAnyHostKey, HostKey, HostKeyVerifier};
pub use key_management::AuthCredentials;
pub use listener::TunnelListener;
pub use ssh_transport::{SecureSessionFactory, SshSessionFactory};
pub use ssh_transport_adapter::SshChannelDialer;
pub use transport_adapter::{ChannelDialer, ForwardedChannel, HalfClose};

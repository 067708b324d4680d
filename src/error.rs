use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::endpoint::Endpoint;

#[derive(Error, Debug)]
pub enum TunnelError {
    #[error("reading key {path}: {source}")]
    KeyRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing key {path}: {message}")]
    KeyParse { path: PathBuf, message: String },

    #[error("listening on {endpoint}: {source}")]
    Bind {
        endpoint: Endpoint,
        #[source]
        source: std::io::Error,
    },

    #[error("accepting connection: {0}")]
    Accept(#[source] std::io::Error),

    #[error("dialing ssh server {endpoint}: {message}")]
    SshConnect { endpoint: Endpoint, message: String },

    #[error("ssh handshake with {endpoint} failed: {message}")]
    Handshake { endpoint: Endpoint, message: String },

    #[error("host key of {endpoint} rejected: {reason}")]
    HostKeyRejected { endpoint: Endpoint, reason: String },

    #[error("ssh authentication as {user} on {endpoint} failed: {message}")]
    Auth {
        endpoint: Endpoint,
        user: String,
        message: String,
    },

    #[error("connecting to ssh server {endpoint} timed out after {timeout:?}")]
    Timeout { endpoint: Endpoint, timeout: Duration },

    #[error("dialing remote server {endpoint}: {message}")]
    ChannelOpen { endpoint: Endpoint, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TunnelError>;

impl TunnelError {
    /// Whether the error came from bringing up a session or its channel,
    /// as opposed to relaying or local socket handling.
    pub fn is_connect_failure(&self) -> bool {
        matches!(
            self,
            TunnelError::SshConnect { .. }
                | TunnelError::Handshake { .. }
                | TunnelError::HostKeyRejected { .. }
                | TunnelError::Auth { .. }
                | TunnelError::Timeout { .. }
                | TunnelError::ChannelOpen { .. }
        )
    }
}

use std::fmt;
use std::io;
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;

use tracing::{debug, info, info_span};

use crate::config::TunnelConfig;
use crate::error::Result;
use crate::relay::{self, SpliceReport};
use crate::ssh_transport::SecureSessionFactory;
use crate::transport_adapter::ChannelDialer;

/// Everything a forwarder needs besides its own connection. Shared
/// read-only by every forwarder of one listener.
pub struct ForwardContext<F, D> {
    pub config: TunnelConfig,
    pub factory: F,
    pub dialer: D,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwarderState {
    Connecting,
    Relaying,
    Closed,
}

impl fmt::Display for ForwarderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForwarderState::Connecting => write!(f, "connecting"),
            ForwarderState::Relaying => write!(f, "relaying"),
            ForwarderState::Closed => write!(f, "closed"),
        }
    }
}

/// Owns one accepted local connection from session setup to the end of
/// relaying.
pub struct ConnectionForwarder<F, D> {
    id: u64,
    peer: SocketAddr,
    local: Option<TcpStream>,
    context: Arc<ForwardContext<F, D>>,
    state: ForwarderState,
}

impl<F, D> ConnectionForwarder<F, D>
where
    F: SecureSessionFactory,
    D: ChannelDialer<F::Session>,
{
    pub fn new(
        id: u64,
        local: TcpStream,
        peer: SocketAddr,
        context: Arc<ForwardContext<F, D>>,
    ) -> Self {
        Self {
            id,
            peer,
            local: Some(local),
            context,
            state: ForwarderState::Connecting,
        }
    }

    pub fn state(&self) -> ForwarderState {
        self.state
    }

    /// Establish the session and channel, then relay until both directions
    /// end. The forwarder is [`ForwarderState::Closed`] afterwards whatever
    /// the outcome. Copy errors are logged and reported in the returned
    /// [`SpliceReport`].
    pub fn run(&mut self) -> Result<SpliceReport> {
        let span = info_span!("forward", id = self.id, peer = %self.peer);
        let _entered = span.enter();

        info!("connecting");
        scopeguard::defer! {
            info!("disconnecting");
        }

        let outcome = self.forward();
        self.transition(ForwarderState::Closed);
        outcome
    }

    fn forward(&mut self) -> Result<SpliceReport> {
        let local = self.local.take().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotConnected, "connection already forwarded")
        })?;

        let context = Arc::clone(&self.context);
        let config = &context.config;
        let session = context
            .factory
            .connect(&config.server, &config.credentials, config.dial_timeout)?;
        let channel = context.dialer.open(&session, &config.remote)?;

        self.transition(ForwarderState::Relaying);
        let report = relay::splice(local, channel)?;
        drop(session);

        debug!(
            sent = report.local_to_remote.bytes,
            received = report.remote_to_local.bytes,
            "relay finished"
        );
        Ok(report)
    }

    fn transition(&mut self, next: ForwarderState) {
        debug!(from = %self.state, to = %next, "state change");
        self.state = next;
    }
}

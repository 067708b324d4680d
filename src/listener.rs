use std::convert::Infallible;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::config::{FailurePolicy, TunnelConfig};
use crate::error::{Result, TunnelError};
use crate::forwarder::{ConnectionForwarder, ForwardContext};
use crate::ssh_transport::SecureSessionFactory;
use crate::transport_adapter::ChannelDialer;

/// Accepts local connections and hands each one to its own forwarder.
pub struct TunnelListener<F, D> {
    listener: TcpListener,
    context: Arc<ForwardContext<F, D>>,
}

impl<F, D> TunnelListener<F, D>
where
    F: SecureSessionFactory,
    D: ChannelDialer<F::Session>,
{
    pub async fn bind(config: TunnelConfig, factory: F, dialer: D) -> Result<Self> {
        let listener = TcpListener::bind(config.local.to_string())
            .await
            .map_err(|source| TunnelError::Bind {
                endpoint: config.local.clone(),
                source,
            })?;
        Ok(Self {
            listener,
            context: Arc::new(ForwardContext {
                config,
                factory,
                dialer,
            }),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Run the accept loop. Only returns on an accept error or, under
    /// [`FailurePolicy::FailFast`], on the first forwarder whose session or
    /// channel could not be established.
    pub async fn serve(self) -> Result<Infallible> {
        if let Ok(addr) = self.local_addr() {
            info!(%addr, "listening for connections");
        }

        let (fatal_tx, mut fatal_rx) = mpsc::unbounded_channel();
        let mut next_id: u64 = 0;

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, peer) = accepted.map_err(TunnelError::Accept)?;
                    next_id += 1;
                    info!(%peer, id = next_id, "accept connection");
                    self.dispatch(next_id, stream, peer, fatal_tx.clone());
                }
                Some(err) = fatal_rx.recv() => return Err(err),
            }
        }
    }

    fn dispatch(
        &self,
        id: u64,
        stream: TcpStream,
        peer: SocketAddr,
        fatal_tx: mpsc::UnboundedSender<TunnelError>,
    ) {
        let local = match stream.into_std().and_then(|s| {
            s.set_nonblocking(false)?;
            Ok(s)
        }) {
            Ok(local) => local,
            Err(e) => {
                warn!(%peer, error = %e, "dropping connection");
                return;
            }
        };

        let context = Arc::clone(&self.context);
        let spawned = thread::Builder::new()
            .name(format!("forward-{id}"))
            .spawn(move || {
                let policy = context.config.on_connect_error;
                let mut forwarder = ConnectionForwarder::new(id, local, peer, context);
                let Err(err) = forwarder.run() else { return };
                match policy {
                    FailurePolicy::FailFast if err.is_connect_failure() => {
                        error!(%peer, error = %err, "forwarding failed, stopping tunnel");
                        let _ = fatal_tx.send(err);
                    }
                    _ => warn!(%peer, error = %err, "forwarding failed, closing connection"),
                }
            });
        if let Err(e) = spawned {
            warn!(%peer, error = %e, "could not start forwarder");
        }
    }
}

/// Bind `config.local` and serve forever.
pub async fn start<F, D>(config: TunnelConfig, factory: F, dialer: D) -> Result<Infallible>
where
    F: SecureSessionFactory,
    D: ChannelDialer<F::Session>,
{
    TunnelListener::bind(config, factory, dialer).await?.serve().await
}

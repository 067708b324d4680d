use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use ssh2::{BlockDirections, Channel, Session};
use tracing::debug;

use crate::endpoint::Endpoint;
use crate::error::{Result, TunnelError};
use crate::ssh_transport::SshSession;
use crate::transport_adapter::{ChannelDialer, ForwardedChannel, HalfClose};

const CLOSE_TIMEOUT_MS: u32 = 5_000;

/// Opens `direct-tcpip` channels on an [`SshSession`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SshChannelDialer;

impl ChannelDialer<SshSession> for SshChannelDialer {
    type Channel = SshChannel;

    fn open(&self, session: &SshSession, remote: &Endpoint) -> Result<SshChannel> {
        let channel = session
            .session()
            .channel_direct_tcpip(remote.host(), remote.port(), None)
            .map_err(|e| TunnelError::ChannelOpen {
                endpoint: remote.clone(),
                message: e.to_string(),
            })?;
        debug!(remote = %remote, "direct-tcpip channel open");
        Ok(SshChannel::new(
            session.session().clone(),
            session.socket(),
            channel,
        )?)
    }
}

/// An SSH channel exposed as a raw byte stream.
///
/// libssh2 serialises every call on a session behind one lock, so a blocking
/// read would stall the opposite direction. The session is switched to
/// non-blocking mode and each half waits for socket readiness on its own.
pub struct SshChannel {
    shared: Arc<Shared>,
}

struct Shared {
    session: Session,
    channel: Mutex<Channel>,
    readiness: Readiness,
}

impl SshChannel {
    fn new(session: Session, socket: RawFd, channel: Channel) -> io::Result<Self> {
        let readiness = Readiness::new(socket)?;
        session.set_blocking(false);
        Ok(Self {
            shared: Arc::new(Shared {
                session,
                channel: Mutex::new(channel),
                readiness,
            }),
        })
    }
}

impl Shared {
    fn lock(&self) -> io::Result<MutexGuard<'_, Channel>> {
        self.channel
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "ssh channel lock poisoned"))
    }

    fn retry<T>(&self, mut op: impl FnMut(&mut Channel) -> io::Result<T>) -> io::Result<T> {
        loop {
            let outcome = {
                let mut channel = self.lock()?;
                match op(&mut *channel) {
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                        Err(self.session.block_directions())
                    }
                    other => Ok(other),
                }
            };
            match outcome {
                Ok(result) => {
                    self.readiness.notify();
                    return result;
                }
                Err(blocked) => self.readiness.wait(blocked)?,
            }
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.session.set_blocking(true);
        self.session.set_timeout(CLOSE_TIMEOUT_MS);
        if let Ok(channel) = self.channel.get_mut() {
            let _ = channel.close();
            let _ = channel.wait_close();
        }
        let _ = self.session.disconnect(None, "tunnel closed", None);
    }
}

impl ForwardedChannel for SshChannel {
    type Reader = SshChannelReader;
    type Writer = SshChannelWriter;

    fn split(self) -> io::Result<(SshChannelReader, SshChannelWriter)> {
        Ok((
            SshChannelReader {
                shared: Arc::clone(&self.shared),
            },
            SshChannelWriter {
                shared: self.shared,
            },
        ))
    }
}

pub struct SshChannelReader {
    shared: Arc<Shared>,
}

impl Read for SshChannelReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.shared.retry(|channel| channel.read(buf))
    }
}

pub struct SshChannelWriter {
    shared: Arc<Shared>,
}

impl Write for SshChannelWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.shared.retry(|channel| channel.write(buf))
    }

    // libssh2's channel flush discards unread inbound data; writes are
    // already handed to the transport when `write` returns.
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl HalfClose for SshChannelWriter {
    fn close_write(&mut self) -> io::Result<()> {
        self.shared
            .retry(|channel| channel.send_eof().map_err(io::Error::from))
    }
}

/// Parks a channel half until the session socket is ready in the direction
/// libssh2 last blocked on, or until the other half has made progress.
struct Readiness {
    socket: RawFd,
    wake_tx: UnixStream,
    wake_rx: UnixStream,
}

impl Readiness {
    /// Bound on one wait. The other half can pull this half's packets into
    /// libssh2's buffers while itself blocking, which no wakeup reports.
    const MAX_WAIT: Duration = Duration::from_millis(200);

    fn new(socket: RawFd) -> io::Result<Self> {
        let (wake_tx, wake_rx) = UnixStream::pair()?;
        wake_tx.set_nonblocking(true)?;
        wake_rx.set_nonblocking(true)?;
        Ok(Self {
            socket,
            wake_tx,
            wake_rx,
        })
    }

    fn notify(&self) {
        // A full pipe already has a wakeup pending.
        let _ = (&self.wake_tx).write(&[1]);
    }

    fn wait(&self, blocked: BlockDirections) -> io::Result<()> {
        let events = match blocked {
            BlockDirections::Outbound => libc::POLLOUT,
            BlockDirections::Both => libc::POLLIN | libc::POLLOUT,
            BlockDirections::Inbound | BlockDirections::None => libc::POLLIN,
        };
        let mut fds = [
            libc::pollfd {
                fd: self.socket,
                events,
                revents: 0,
            },
            libc::pollfd {
                fd: self.wake_rx.as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            },
        ];
        let timeout = Self::MAX_WAIT.as_millis() as libc::c_int;

        // SAFETY: `fds` is a live array of `fds.len()` pollfd entries.
        let rc = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
        if fds[1].revents != 0 {
            self.drain();
        }
        Ok(())
    }

    fn drain(&self) {
        let mut buf = [0u8; 64];
        while matches!((&self.wake_rx).read(&mut buf), Ok(n) if n > 0) {}
    }
}

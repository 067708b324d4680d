use std::io;
use std::net::{IpAddr, SocketAddr, TcpStream, ToSocketAddrs};
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use ssh2::{HashType, Session};
use tracing::{debug, info};

use crate::endpoint::Endpoint;
use crate::error::{Result, TunnelError};
use crate::host_key::{AcceptAnyHostKey, HostKey, HostKeyVerifier};
use crate::key_management::AuthCredentials;

const LIBSSH2_ERROR_TIMEOUT: i32 = -9;

/// Produces authenticated sessions to an SSH server.
pub trait SecureSessionFactory: Send + Sync + 'static {
    type Session: Send;

    /// `timeout` bounds TCP connect, handshake and authentication together.
    fn connect(
        &self,
        server: &Endpoint,
        credentials: &AuthCredentials,
        timeout: Duration,
    ) -> Result<Self::Session>;
}

/// An authenticated libssh2 session.
pub struct SshSession {
    session: Session,
    socket: RawFd,
}

impl SshSession {
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Descriptor of the socket the session runs over; owned by the session.
    pub fn socket(&self) -> RawFd {
        self.socket
    }
}

/// libssh2-backed session factory with a pluggable host-key policy.
pub struct SshSessionFactory {
    verifier: Box<dyn HostKeyVerifier>,
}

impl SshSessionFactory {
    pub fn new(verifier: impl HostKeyVerifier + 'static) -> Self {
        Self {
            verifier: Box::new(verifier),
        }
    }
}

impl Default for SshSessionFactory {
    fn default() -> Self {
        Self::new(AcceptAnyHostKey)
    }
}

impl SecureSessionFactory for SshSessionFactory {
    type Session = SshSession;

    fn connect(
        &self,
        server: &Endpoint,
        credentials: &AuthCredentials,
        timeout: Duration,
    ) -> Result<SshSession> {
        let deadline = Deadline::new(server, timeout);
        let tcp = dial_tcp(server, &deadline)?;
        let socket = tcp.as_raw_fd();

        let mut session = Session::new().map_err(|e| TunnelError::SshConnect {
            endpoint: server.clone(),
            message: e.to_string(),
        })?;
        session.set_tcp_stream(tcp);

        session.set_timeout(deadline.remaining_millis()?);
        session.handshake().map_err(|e| {
            deadline.classify(e, |message| TunnelError::Handshake {
                endpoint: server.clone(),
                message,
            })
        })?;

        let key = presented_host_key(&session).ok_or_else(|| TunnelError::Handshake {
            endpoint: server.clone(),
            message: "server presented no host key".to_string(),
        })?;
        self.verifier.verify(server, &key)?;

        session.set_timeout(deadline.remaining_millis()?);
        session
            .userauth_pubkey_memory(
                credentials.user(),
                credentials.public_key(),
                credentials.private_key_text(),
                None,
            )
            .map_err(|e| {
                deadline.classify(e, |message| TunnelError::Auth {
                    endpoint: server.clone(),
                    user: credentials.user().to_string(),
                    message,
                })
            })?;
        if !session.authenticated() {
            return Err(TunnelError::Auth {
                endpoint: server.clone(),
                user: credentials.user().to_string(),
                message: "public key not accepted".to_string(),
            });
        }

        // Relaying has no timeout.
        session.set_timeout(0);
        info!(server = %server, user = credentials.user(), "ssh session established");
        Ok(SshSession { session, socket })
    }
}

fn presented_host_key(session: &Session) -> Option<HostKey> {
    let (blob, _) = session.host_key()?;
    let sha256 = session.host_key_hash(HashType::Sha256).map(<[u8]>::to_vec);
    Some(HostKey::new(blob.to_vec(), sha256))
}

fn dial_tcp(server: &Endpoint, deadline: &Deadline<'_>) -> Result<TcpStream> {
    let addrs = resolve(server, deadline)?;

    let mut last_error = None;
    for addr in addrs {
        let remaining = deadline.remaining()?;
        debug!(%addr, "dialing ssh server");
        match TcpStream::connect_timeout(&addr, remaining) {
            Ok(stream) => return Ok(stream),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => return Err(deadline.expired()),
            Err(e) => last_error = Some(e),
        }
    }

    Err(TunnelError::SshConnect {
        endpoint: server.clone(),
        message: last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no addresses resolved".to_string()),
    })
}

/// Resolve `server` within the remaining budget. Lookups run on a helper
/// thread because the system resolver cannot be given a timeout.
fn resolve(server: &Endpoint, deadline: &Deadline<'_>) -> Result<Vec<SocketAddr>> {
    if let Ok(ip) = server.host().parse::<IpAddr>() {
        return Ok(vec![SocketAddr::new(ip, server.port())]);
    }

    let budget = deadline.remaining()?;
    let target = (server.host().to_string(), server.port());
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name("resolve".to_string())
        .spawn(move || {
            let _ = tx.send(target.to_socket_addrs().map(Iterator::collect::<Vec<_>>));
        })
        .map_err(|e| TunnelError::SshConnect {
            endpoint: server.clone(),
            message: e.to_string(),
        })?;

    match rx.recv_timeout(budget) {
        Ok(Ok(addrs)) => Ok(addrs),
        Ok(Err(e)) => Err(TunnelError::SshConnect {
            endpoint: server.clone(),
            message: e.to_string(),
        }),
        Err(RecvTimeoutError::Timeout) => Err(deadline.expired()),
        Err(RecvTimeoutError::Disconnected) => Err(TunnelError::SshConnect {
            endpoint: server.clone(),
            message: "resolver thread exited".to_string(),
        }),
    }
}

struct Deadline<'a> {
    server: &'a Endpoint,
    timeout: Duration,
    expires: Instant,
}

impl<'a> Deadline<'a> {
    fn new(server: &'a Endpoint, timeout: Duration) -> Self {
        Self {
            server,
            timeout,
            expires: Instant::now() + timeout,
        }
    }

    fn expired(&self) -> TunnelError {
        TunnelError::Timeout {
            endpoint: self.server.clone(),
            timeout: self.timeout,
        }
    }

    fn remaining(&self) -> Result<Duration> {
        match self.expires.checked_duration_since(Instant::now()) {
            Some(left) if !left.is_zero() => Ok(left),
            _ => Err(self.expired()),
        }
    }

    // libssh2 treats 0 as "no timeout", so never hand it a zero.
    fn remaining_millis(&self) -> Result<u32> {
        let millis = self.remaining()?.as_millis().max(1);
        Ok(u32::try_from(millis).unwrap_or(u32::MAX))
    }

    fn classify(&self, err: ssh2::Error, other: impl FnOnce(String) -> TunnelError) -> TunnelError {
        if matches!(err.code(), ssh2::ErrorCode::Session(LIBSSH2_ERROR_TIMEOUT)) {
            self.expired()
        } else {
            other(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key_management::tests::test_credentials;
    use std::io::Write;
    use std::net::TcpListener;

    #[test]
    fn refused_connection_is_a_connect_error() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let server = Endpoint::new("127.0.0.1", port);

        let result = SshSessionFactory::default().connect(
            &server,
            &test_credentials(),
            Duration::from_secs(5),
        );
        assert!(matches!(result, Err(TunnelError::SshConnect { .. })));
    }

    #[test]
    fn silent_server_hits_the_deadline() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let server = Endpoint::new("127.0.0.1", listener.local_addr().unwrap().port());
        let holder = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            thread::sleep(Duration::from_secs(3));
            drop(stream);
        });

        let started = Instant::now();
        let result = SshSessionFactory::default().connect(
            &server,
            &test_credentials(),
            Duration::from_millis(300),
        );

        assert!(matches!(
            result,
            Err(TunnelError::Timeout { .. }) | Err(TunnelError::Handshake { .. })
        ));
        assert!(started.elapsed() < Duration::from_secs(3));
        holder.join().unwrap();
    }

    #[test]
    fn non_ssh_server_fails_the_handshake() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let server = Endpoint::new("127.0.0.1", listener.local_addr().unwrap().port());
        let responder = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let _ = stream.write_all(b"HTTP/1.1 400 Bad Request\r\n\r\n");
        });

        let result = SshSessionFactory::default().connect(
            &server,
            &test_credentials(),
            Duration::from_secs(5),
        );

        assert!(matches!(result, Err(TunnelError::Handshake { .. })));
        responder.join().unwrap();
    }

    #[test]
    fn zero_budget_expires_before_dialing() {
        let server = Endpoint::new("127.0.0.1", 22);
        let deadline = Deadline::new(&server, Duration::ZERO);
        assert!(matches!(deadline.remaining(), Err(TunnelError::Timeout { .. })));
    }

    #[test]
    fn hostname_lookup_is_bounded_by_the_deadline() {
        let server = Endpoint::new("localhost", 22);
        let deadline = Deadline::new(&server, Duration::ZERO);
        assert!(matches!(
            resolve(&server, &deadline),
            Err(TunnelError::Timeout { .. })
        ));
    }

    #[test]
    fn hostnames_resolve_within_the_budget() {
        let server = Endpoint::new("localhost", 2222);
        let deadline = Deadline::new(&server, Duration::from_secs(5));
        let addrs = resolve(&server, &deadline).unwrap();
        assert!(!addrs.is_empty());
        assert!(addrs.iter().all(|a| a.ip().is_loopback() && a.port() == 2222));
    }

    #[test]
    fn ip_literals_skip_the_resolver() {
        let server = Endpoint::new("::1", 22);
        let deadline = Deadline::new(&server, Duration::from_secs(5));
        assert_eq!(
            resolve(&server, &deadline).unwrap(),
            vec!["[::1]:22".parse::<SocketAddr>().unwrap()]
        );
    }
}

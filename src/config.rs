use std::fmt;
use std::time::Duration;

use crate::endpoint::Endpoint;
use crate::key_management::AuthCredentials;

/// Bound on connect + handshake + authenticate for one session.
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(30);

/// What a failed session connect or channel open does to the rest of the tunnel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum FailurePolicy {
    /// Stop the whole tunnel on the first failed connection.
    #[default]
    FailFast,
    /// Close only the affected local connection and keep accepting.
    Isolate,
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailurePolicy::FailFast => write!(f, "fail-fast"),
            FailurePolicy::Isolate => write!(f, "isolate"),
        }
    }
}

/// Tunnel configuration, built once at startup and shared read-only.
#[derive(Debug)]
pub struct TunnelConfig {
    pub local: Endpoint,
    pub server: Endpoint,
    pub remote: Endpoint,
    pub credentials: AuthCredentials,
    pub dial_timeout: Duration,
    pub on_connect_error: FailurePolicy,
}

impl TunnelConfig {
    pub fn new(
        local: Endpoint,
        server: Endpoint,
        remote: Endpoint,
        credentials: AuthCredentials,
    ) -> Self {
        Self {
            local,
            server,
            remote,
            credentials,
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            on_connect_error: FailurePolicy::default(),
        }
    }

    pub fn with_dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = timeout;
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.on_connect_error = policy;
        self
    }
}

//! Server host-key verification.
//!
//! The tunnel accepts whatever host key the server presents unless a stricter
//! [`HostKeyVerifier`] is installed on the session factory.

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use tracing::warn;

use crate::endpoint::Endpoint;
use crate::error::Result;

/// The host key presented by a server during the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostKey {
    algorithm: String,
    blob: Vec<u8>,
    sha256: Option<Vec<u8>>,
}

impl HostKey {
    /// `blob` is the SSH wire encoding of the public key; `sha256` is its
    /// digest when the transport already computed one.
    pub fn new(blob: Vec<u8>, sha256: Option<Vec<u8>>) -> Self {
        let algorithm = algorithm_name(&blob).unwrap_or_else(|| "unknown".to_string());
        Self {
            algorithm,
            blob,
            sha256,
        }
    }

    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    pub fn blob(&self) -> &[u8] {
        &self.blob
    }

    /// `SHA256:<base64>` in the form OpenSSH prints.
    pub fn fingerprint(&self) -> Option<String> {
        self.sha256
            .as_ref()
            .map(|digest| format!("SHA256:{}", STANDARD_NO_PAD.encode(digest)))
    }
}

// The key blob opens with a length-prefixed algorithm name.
fn algorithm_name(blob: &[u8]) -> Option<String> {
    let len = u32::from_be_bytes(blob.get(..4)?.try_into().ok()?) as usize;
    let name = blob.get(4..4usize.checked_add(len)?)?;
    std::str::from_utf8(name).ok().map(str::to_string)
}

pub trait HostKeyVerifier: Send + Sync {
    fn verify(&self, server: &Endpoint, key: &HostKey) -> Result<()>;
}

/// Accepts every host key, logging it. Offers no protection against a
/// man-in-the-middle.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAnyHostKey;

impl HostKeyVerifier for AcceptAnyHostKey {
    fn verify(&self, server: &Endpoint, key: &HostKey) -> Result<()> {
        warn!(
            server = %server,
            algorithm = key.algorithm(),
            fingerprint = key.fingerprint().as_deref().unwrap_or("unavailable"),
            "insecure host key callback: accepting host key"
        );
        Ok(())
    }
}

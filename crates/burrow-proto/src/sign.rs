//! Frame signing and verification.

use hmac::{Hmac, Mac};
use sha2::Sha256;

/// Hex length of an HMAC-SHA256 signature on the wire.
pub const SIGNATURE_HEX_LEN: usize = 64;

/// Signs and verifies frame payloads with HMAC-SHA256 under a shared
/// secret. The secret is read-only after startup; the signer is cheap to
/// clone into every connection task.
#[derive(Clone)]
pub struct FrameSigner {
    secret: Vec<u8>,
}

impl FrameSigner {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    fn mac(&self) -> Hmac<Sha256> {
        Hmac::<Sha256>::new_from_slice(&self.secret).expect("HMAC can take key of any size")
    }

    /// Lowercase hex HMAC-SHA256 of `payload`.
    pub fn sign(&self, payload: &[u8]) -> String {
        let mut mac = self.mac();
        mac.update(payload);
        hex::encode(mac.finalize().into_bytes())
    }

    /// Verify a received hex signature against `payload`. The comparison
    /// of the decoded tag is constant-time.
    pub fn verify(&self, payload: &[u8], signature_hex: &str) -> bool {
        let Ok(tag) = hex::decode(signature_hex) else {
            return false;
        };
        let mut mac = self.mac();
        mac.update(payload);
        mac.verify_slice(&tag).is_ok()
    }
}

impl std::fmt::Debug for FrameSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print the secret.
        f.debug_struct("FrameSigner").finish_non_exhaustive()
    }
}

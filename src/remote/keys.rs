//! Channel key material and the verification challenge.
//!
//! SECURITY: the expected verification value is never compared directly.
//! Both sides are hashed first so the comparison runs over fixed-length
//! digests in constant time and leaks neither length nor prefix matches.

use std::fmt;

use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const KEY_BYTES: usize = 32;

/// Secret material issued to one client.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelKeys {
    pub key: String,
    pub token: String,
}

impl ChannelKeys {
    /// Fresh random key and token.
    pub fn generate() -> Self {
        let mut rng = rand::rngs::OsRng;
        let mut key = [0u8; KEY_BYTES];
        let mut token = [0u8; KEY_BYTES];
        rng.fill_bytes(&mut key);
        rng.fill_bytes(&mut token);
        Self {
            key: hex::encode(key),
            token: hex::encode(token),
        }
    }

    /// Value a client must echo back to pass verification.
    pub fn verification_value(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.key.as_bytes());
        hasher.update(b":");
        hasher.update(self.token.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Check a client's test value against these keys.
    pub fn verify(&self, test_value: &str) -> bool {
        let expected = digest(self.verification_value().as_bytes());
        let presented = digest(test_value.as_bytes());
        constant_time_compare(&expected, &presented)
    }
}

impl fmt::Debug for ChannelKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelKeys")
            .field("key", &"<redacted>")
            .field("token", &"<redacted>")
            .finish()
    }
}

fn digest(bytes: &[u8]) -> [u8; 32] {
    Sha256::digest(bytes).into()
}

/// Constant-time comparison to prevent timing attacks.
fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

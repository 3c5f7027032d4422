//! HMAC-SHA256 admission signatures.
//!
//! A client proves its identity by presenting
//! `hex(HMAC_SHA256(secret, identity || timestamp))` together with the
//! decimal timestamp it signed. The hub accepts the proof only while the
//! timestamp is inside the freshness window.

use std::fmt;

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::types::unix_now;

type HmacSha256 = Hmac<Sha256>;

/// Stateless signature checker bound to one shared secret.
#[derive(Clone)]
pub struct SignatureGate {
    secret: String,
}

impl fmt::Debug for SignatureGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignatureGate")
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl SignatureGate {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Compute the hex signature for `identity` at `timestamp`.
    pub fn sign(&self, identity: &str, timestamp: &str) -> String {
        let mac = self.mac(identity, timestamp);
        hex::encode(mac.finalize().into_bytes())
    }

    /// Check a presented credential against the current clock.
    ///
    /// Never fails loudly: malformed input, a signature mismatch and an
    /// expired timestamp all simply return `false`.
    pub fn validate(
        &self,
        identity: &str,
        timestamp: &str,
        signature: &str,
        timeout_secs: u64,
    ) -> bool {
        self.validate_at(identity, timestamp, signature, timeout_secs, unix_now())
    }

    /// [`validate`](Self::validate) against an explicit `now` (Unix seconds).
    ///
    /// Timestamps ahead of `now` are accepted only within the same window,
    /// so a far-future credential cannot be replayed indefinitely.
    pub fn validate_at(
        &self,
        identity: &str,
        timestamp: &str,
        signature: &str,
        timeout_secs: u64,
        now: i64,
    ) -> bool {
        let Some(provided) = hex::decode(signature) else {
            return false;
        };

        // verify_slice compares in constant time.
        if self
            .mac(identity, timestamp)
            .verify_slice(&provided)
            .is_err()
        {
            return false;
        }

        let Ok(signed_at) = timestamp.parse::<i64>() else {
            return false;
        };

        let window = i64::try_from(timeout_secs).unwrap_or(i64::MAX);
        let elapsed = now.saturating_sub(signed_at);
        (-window..=window).contains(&elapsed)
    }

    /// Produce a fresh `(timestamp, signature)` pair for `identity`.
    pub fn generate_signature(&self, identity: &str) -> (String, String) {
        self.generate_signature_at(identity, unix_now())
    }

    pub fn generate_signature_at(&self, identity: &str, now: i64) -> (String, String) {
        let timestamp = now.to_string();
        let signature = self.sign(identity, &timestamp);
        (timestamp, signature)
    }

    fn mac(&self, identity: &str, timestamp: &str) -> HmacSha256 {
        let mut mac =
            HmacSha256::new_from_slice(self.secret.as_bytes()).expect("HMAC accepts any key length");
        mac.update(identity.as_bytes());
        mac.update(timestamp.as_bytes());
        mac
    }
}

// ---------------------------------------------------------------------------
// hex helpers (no extra dep)
// ---------------------------------------------------------------------------

mod hex {
    /// Encode bytes as a lowercase hex string.
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Decode a lowercase hex string. Uppercase digits are rejected so the
    /// accepted encoding of a signature is unique.
    pub fn decode(text: &str) -> Option<Vec<u8>> {
        if text.len() % 2 != 0 {
            return None;
        }
        text.as_bytes()
            .chunks(2)
            .map(|pair| Some(nibble(pair[0])? << 4 | nibble(pair[1])?))
            .collect()
    }

    fn nibble(c: u8) -> Option<u8> {
        match c {
            b'0'..=b'9' => Some(c - b'0'),
            b'a'..=b'f' => Some(c - b'a' + 10),
            _ => None,
        }
    }
}

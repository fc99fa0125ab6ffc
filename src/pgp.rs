//! PGP Verifier (§4.2): confirms the server-supplied SRP modulus was signed
//! by the expected key before it is ever used in an exponentiation.
//!
//! Holds one embedded armored public key (see [`crate::config::SRP_MODULUS_KEY`])
//! and verifies a cleartext-signed armored blob by (a) checking the signature
//! is good, (b) matching the signer's fingerprint byte-for-byte
//! (case-insensitively) against [`crate::config::SRP_MODULUS_KEY_FINGERPRINT`],
//! and (c) base64-decoding the verified plaintext. Any failure collapses to
//! [`SessionError::InvalidModulus`] — callers cannot distinguish "bad
//! signature" from "wrong signer" from "malformed armor", mirroring the
//! all-or-nothing `verify_modulus` check in the reference implementation.

use base64::Engine as _;
use pgp::composed::{CleartextSignedMessage, Deserializable, SignedPublicKey};

use crate::error::{SessionError, SessionResult};

/// Verifies signed SRP moduli against one embedded public key.
pub struct PgpVerifier {
    key: SignedPublicKey,
    expected_fingerprint: String,
}

impl PgpVerifier {
    /// Construct a verifier from an armored public key and the hex fingerprint
    /// its signatures must carry.
    pub fn new(armored_public_key: &str, expected_fingerprint: &str) -> SessionResult<Self> {
        let (key, _headers) = SignedPublicKey::from_armor_single(armored_public_key.as_bytes())
            .map_err(|e| SessionError::InvalidModulus(format!("bad signing key: {e}")))?;
        key.verify()
            .map_err(|e| SessionError::InvalidModulus(format!("signing key itself invalid: {e}")))?;

        Ok(Self {
            key,
            expected_fingerprint: expected_fingerprint.to_lowercase(),
        })
    }

    /// Verify a cleartext-signed, armored modulus blob and return the
    /// base64-decoded plaintext (the modulus bytes, big-endian).
    pub fn verify_modulus(&self, armored_modulus: &str) -> SessionResult<Vec<u8>> {
        let msg = CleartextSignedMessage::from_string(armored_modulus)
            .map_err(|e| SessionError::InvalidModulus(format!("malformed armor: {e}")))?;

        msg.verify(&self.key)
            .map_err(|e| SessionError::InvalidModulus(format!("bad signature: {e}")))?;

        let signer_fingerprint = to_hex(self.key.fingerprint().as_bytes());
        if !constant_time_eq(&signer_fingerprint, &self.expected_fingerprint) {
            return Err(SessionError::InvalidModulus(
                "signer fingerprint mismatch".to_string(),
            ));
        }

        let plaintext = msg.text().trim();
        base64::engine::general_purpose::STANDARD
            .decode(plaintext)
            .map_err(|e| SessionError::InvalidModulus(format!("invalid base64 payload: {e}")))
    }
}

/// Lowercase hex encoding. The `pgp` crate's fingerprint type doesn't impose a
/// case convention, so this crate controls it explicitly (hard-coded
/// fingerprint constants are always lowercase, see `config.rs`).
fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

/// Constant-time, case-sensitive string comparison (inputs are pre-lowercased).
fn constant_time_eq(a: &str, b: &str) -> bool {
    use subtle::ConstantTimeEq;
    a.len() == b.len() && a.as_bytes().ct_eq(b.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_encoding_is_lowercase() {
        assert_eq!(to_hex(&[0xAB, 0x0F, 0x10]), "ab0f10");
    }

    #[test]
    fn constant_time_eq_matches_identical_strings() {
        assert!(constant_time_eq("deadbeef", "deadbeef"));
        assert!(!constant_time_eq("deadbeef", "deadbeee"));
        assert!(!constant_time_eq("short", "shorter"));
    }
}

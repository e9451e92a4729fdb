//! Primitives shared by the sovereign wallet crates.
//!
//! - [`auth`]: the authentication capability that stands in for a platform
//!   keystore behind a biometric gate.
//! - digest and timestamp helpers used when recording audit references.

pub mod auth;

pub use auth::{
    verify_signature, AuthError, Authenticator, Challenge, SigningCapability,
    SoftwareAuthenticator,
};

use chrono::{DateTime, Utc};

/// Current wall-clock time in UTC.
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Blake3 digest of a proof artifact, hex encoded.
///
/// Activity entries reference proofs by this digest rather than by value.
pub fn proof_digest(proof: &[u8]) -> String {
    hex::encode(blake3::hash(proof).as_bytes())
}

/// Short prefix of a digest or id for log lines.
pub fn short_ref(reference: &str) -> &str {
    let end = reference
        .char_indices()
        .nth(12)
        .map(|(idx, _)| idx)
        .unwrap_or(reference.len());
    &reference[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proof_digest_is_stable_hex() {
        let a = proof_digest(b"mpc_vote_share_for_p1");
        let b = proof_digest(b"mpc_vote_share_for_p1");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, proof_digest(b"other"));
    }

    #[test]
    fn short_ref_truncates_long_references() {
        assert_eq!(short_ref("abcdefghijklmnop"), "abcdefghijkl");
        assert_eq!(short_ref("tx_1"), "tx_1");
    }
}

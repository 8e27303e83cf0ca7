//! Proof capability injected into the coordination store.
//!
//! The store never implements a signature scheme itself. It hands the
//! canonical operation payload to a [`ProofVerifier`] and keeps the returned
//! bytes on the vertex as an opaque fingerprint.

use std::fmt;

/// Failure reported by a verifier while signing.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("Proof signing failed: {0}")]
pub struct ProofError(pub String);

/// Signs operation payloads and verifies stored proofs.
///
/// Implementations may be slow (remote signers, post-quantum schemes); the
/// store only calls them with no lock held.
pub trait ProofVerifier: Send + Sync + fmt::Debug {
    fn sign(&self, payload: &[u8]) -> Result<Vec<u8>, ProofError>;

    /// `false` is an expected outcome, not an error.
    fn verify(&self, payload: &[u8], proof: &[u8]) -> bool;
}

/// Keyed checksum verifier for tests and local runs. Not cryptographically
/// secure.
#[derive(Debug, Clone)]
pub struct ChecksumVerifier {
    key: u64,
}

impl ChecksumVerifier {
    pub fn new(key: u64) -> Self {
        Self { key }
    }

    fn digest(&self, payload: &[u8]) -> [u8; 8] {
        let mut hash = 0xcbf2_9ce4_8422_2325_u64 ^ self.key;
        for &byte in payload {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        }
        hash.to_be_bytes()
    }
}

impl ProofVerifier for ChecksumVerifier {
    fn sign(&self, payload: &[u8]) -> Result<Vec<u8>, ProofError> {
        Ok(self.digest(payload).to_vec())
    }

    fn verify(&self, payload: &[u8], proof: &[u8]) -> bool {
        proof == self.digest(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_round_trips() {
        let verifier = ChecksumVerifier::new(7);
        let proof = verifier.sign(b"edit\0alpha\0a.txt").unwrap();
        assert!(verifier.verify(b"edit\0alpha\0a.txt", &proof));
        assert!(!verifier.verify(b"edit\0alpha\0b.txt", &proof));
    }

    #[test]
    fn different_keys_disagree() {
        let proof = ChecksumVerifier::new(1).sign(b"payload").unwrap();
        assert!(!ChecksumVerifier::new(2).verify(b"payload", &proof));
    }
}

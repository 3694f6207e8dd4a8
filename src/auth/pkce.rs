//! PKCE (Proof Key for Code Exchange) material for the authorization-code flow.

use std::fmt;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Verifier/challenge pair for a single authorization attempt.
///
/// Generated fresh per attempt and discarded after the exchange. The verifier
/// is never persisted and never logged.
pub struct PkcePair {
    /// Random secret sent with the code exchange
    pub verifier: String,
    /// S256 transform of the verifier, sent with the authorize request
    pub challenge: String,
}

impl PkcePair {
    /// Generate a fresh pair.
    ///
    /// The verifier is 43 characters (32 random bytes, base64url encoded),
    /// meeting the RFC 7636 requirement of 43-128 unreserved characters.
    /// The challenge is `BASE64URL(SHA256(verifier))`.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        let verifier = URL_SAFE_NO_PAD.encode(bytes);
        let challenge = challenge_for(&verifier);
        Self {
            verifier,
            challenge,
        }
    }
}

impl fmt::Debug for PkcePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PkcePair")
            .field("verifier", &"<redacted>")
            .field("challenge", &self.challenge)
            .finish()
    }
}

/// Compute the S256 challenge for a verifier
fn challenge_for(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verifier_is_43_chars() {
        let pair = PkcePair::generate();
        assert_eq!(
            pair.verifier.len(),
            43,
            "32 bytes base64url encoded should be 43 characters"
        );
    }

    #[test]
    fn pairs_are_unique_per_attempt() {
        let a = PkcePair::generate();
        let b = PkcePair::generate();
        assert_ne!(a.verifier, b.verifier);
        assert_ne!(a.challenge, b.challenge);
    }

    #[test]
    fn challenge_matches_rfc7636_appendix_b() {
        // Known vector from RFC 7636 appendix B
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        assert_eq!(
            challenge_for(verifier),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn challenge_is_url_safe() {
        let pair = PkcePair::generate();
        assert_eq!(pair.challenge.len(), 43);
        assert!(pair
            .challenge
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn debug_never_exposes_the_verifier() {
        let pair = PkcePair::generate();
        let rendered = format!("{pair:?}");
        assert!(!rendered.contains(&pair.verifier));
        assert!(rendered.contains("<redacted>"));
    }
}

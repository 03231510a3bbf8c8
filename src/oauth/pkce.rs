//! PKCE (Proof Key for Code Exchange)
//!
//! RFC 7636: <https://tools.ietf.org/html/rfc7636>

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngExt;
use sha2::{Digest, Sha256};

/// Default number of random bytes behind a code verifier
pub const DEFAULT_VERIFIER_BYTES: usize = 64;

/// The only challenge method this client emits
pub const CODE_CHALLENGE_METHOD: &str = "S256";

/// Generate a code verifier from `length` random bytes (base64url, unpadded)
#[must_use]
pub fn generate_code_verifier(length: usize) -> String {
    let mut rng = rand::rng();
    let bytes: Vec<u8> = (0..length).map(|_| rng.random::<u8>()).collect();
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Derive the S256 code challenge for a verifier
#[must_use]
pub fn generate_code_challenge(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

/// Generate a random opaque `state` value
pub(crate) fn generate_state() -> String {
    uuid::Uuid::new_v4().to_string()
}

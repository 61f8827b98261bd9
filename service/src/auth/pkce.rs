use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::Rng;
use rand::distributions::Alphanumeric;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

const VERIFIER_LEN: usize = 64;
const STATE_LEN: usize = 32;

/// PKCE verifier and its S256 challenge for one authorization request.
pub struct PkcePair {
    pub verifier: Zeroizing<String>,
    pub challenge: String,
}

impl PkcePair {
    pub fn generate() -> Self {
        let verifier = Zeroizing::new(random_alphanumeric(VERIFIER_LEN));
        let challenge = Self::challenge_for(&verifier);
        Self {
            verifier,
            challenge,
        }
    }

    pub fn challenge_for(verifier: &str) -> String {
        let digest = Sha256::digest(verifier.as_bytes());
        URL_SAFE_NO_PAD.encode(digest)
    }
}

/// Opaque `state` value binding a redirect to the request that caused it.
pub fn generate_state() -> String {
    random_alphanumeric(STATE_LEN)
}

fn random_alphanumeric(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

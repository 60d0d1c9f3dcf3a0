use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::Rng;
use sha2::{Digest, Sha256};

const VERIFIER_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
pub const VERIFIER_LENGTH: usize = 64;

pub fn generate_code_verifier() -> String {
  let mut rng = rand::thread_rng();
  (0..VERIFIER_LENGTH)
    .map(|_| VERIFIER_CHARSET[rng.gen_range(0..VERIFIER_CHARSET.len())] as char)
    .collect()
}

/// S256 challenge: unpadded base64url of the verifier's SHA-256 digest.
pub fn code_challenge(verifier: &str) -> String {
  URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

use rand::distributions::Alphanumeric;
use rand::Rng;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::limits::{OWNER_KEY_LEN, TOKEN_LEN};

/// Short shareable plan identifier (base62).
pub fn generate_plan_token() -> String {
    random_base62(TOKEN_LEN)
}

/// Secret issued to the plan creator exactly once. Only its salted hash is
/// stored.
pub fn generate_owner_key() -> String {
    random_base62(OWNER_KEY_LEN)
}

fn random_base62(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Salted SHA-256 over `{salt}:{owner_key}`.
pub fn hash_owner_key(salt: &str, owner_key: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b":");
    hasher.update(owner_key.as_bytes());
    hasher.finalize().into()
}

/// Constant-time verification. An empty key never verifies.
pub fn verify_owner_key(stored_hash: &[u8; 32], salt: &str, supplied: &str) -> bool {
    if supplied.is_empty() {
        return false;
    }
    let computed = hash_owner_key(salt, supplied);
    computed.ct_eq(stored_hash).into()
}

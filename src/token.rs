//! C3 — token primitives.
//!
//! A bearer token is `TOKEN_BYTES` of uniform random, hex-encoded. Only
//! its bcrypt hash is ever persisted; the plaintext lives in the
//! response body once, at issuance.

use rand::RngCore;

use crate::error::{AppError, AppResult};

pub const PREFIX_LEN: usize = 16;

#[derive(Debug, Clone, Copy)]
pub struct TokenParams {
    pub token_bytes: usize,
    pub bcrypt_cost: u32,
}

impl TokenParams {
    pub fn new(token_bytes: usize, bcrypt_cost: u32) -> Self {
        Self {
            token_bytes,
            bcrypt_cost,
        }
    }
}

/// Generate a fresh random token and its bcrypt hash.
pub fn generate_token(params: TokenParams) -> AppResult<(String, String)> {
    let mut bytes = vec![0u8; params.token_bytes];
    rand::thread_rng().fill_bytes(&mut bytes);
    let token = hex::encode(bytes);
    let hash = bcrypt::hash(&token, params.bcrypt_cost)
        .map_err(|e| AppError::Internal(format!("bcrypt hash: {e}")))?;
    Ok((token, hash))
}

/// Constant-time (w.r.t. the plaintext) bcrypt comparison.
pub fn verify_token(token: &str, hash: &str) -> bool {
    bcrypt::verify(token, hash).unwrap_or(false)
}

/// First `PREFIX_LEN` characters of a hex-encoded token — cache-key
/// material only, never presented as authentication on its own.
pub fn prefix(token: &str) -> String {
    token.chars().take(PREFIX_LEN).collect()
}

/// `true` iff `token` has the expected length and is entirely hex.
pub fn valid_format(token: &str, token_bytes: usize) -> bool {
    token.len() == token_bytes * 2 && token.chars().all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> TokenParams {
        TokenParams::new(32, 4) // low cost for fast tests
    }

    #[test]
    fn generated_token_has_valid_format() {
        let (token, _hash) = generate_token(params()).unwrap();
        assert!(valid_format(&token, params().token_bytes));
    }

    #[test]
    fn verify_accepts_matching_pair_and_rejects_mismatch() {
        let (token, hash) = generate_token(params()).unwrap();
        assert!(verify_token(&token, &hash));
        assert!(!verify_token("deadbeef", &hash));
    }

    #[test]
    fn prefix_is_first_16_chars() {
        let (token, _hash) = generate_token(params()).unwrap();
        assert_eq!(prefix(&token).len(), PREFIX_LEN);
        assert_eq!(prefix(&token), &token[..PREFIX_LEN]);
    }

    #[test]
    fn valid_format_rejects_wrong_length_and_non_hex() {
        assert!(!valid_format("abc", 32));
        let non_hex: String = "z".repeat(64);
        assert!(!valid_format(&non_hex, 32));
    }
}

use crate::error::AppError;
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use axum::http::HeaderMap;
use base64::prelude::BASE64_URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use sha2::{Digest, Sha256};
use sha3::Sha3_256;
use std::env;
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;
use url::Url;
use uuid::Uuid;

const REDEEM_TOKEN_BYTES: usize = 32;

pub async fn with_timeout<F: Future>(
    duration_in_millis: u64,
    task: F,
) -> Result<<F as Future>::Output, AppError> {
    timeout(Duration::from_millis(duration_in_millis), task)
        .await
        .map_err(AppError::from)
}

pub fn get_env(name: &str) -> String {
    env::var(name).unwrap_or_else(|_| panic!("Environment variable {} is required", name))
}

pub fn get_header(name: &str, headers: &HeaderMap) -> Option<String> {
    headers
        .get(name)
        .map(|value| value.to_str().unwrap_or_default().to_string())
}

pub fn generate_token() -> String {
    let mut bytes = [0u8; REDEEM_TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    BASE64_URL_SAFE_NO_PAD.encode(bytes)
}

// Only this hash is ever persisted; a leaked row must not yield a usable token.
pub fn token_hash(raw_token: &str) -> String {
    format!("{:x}", Sha256::digest(raw_token.as_bytes()))
}

pub fn api_key_hash(api_key: &str) -> String {
    let mut hasher = Sha3_256::new();
    hasher.update(api_key.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub fn hash_password(password: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| AppError::Internal(format!("Password hashing failed: {err}")))
}

pub fn verify_password(password: &str, password_hash: &str) -> bool {
    PasswordHash::new(password_hash)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

pub fn build_share_url(base: &str, share_id: Uuid) -> Result<String, AppError> {
    let mut url = Url::parse(base)
        .map_err(|err| AppError::Internal(format!("Malformed share base url: {err}")))?;
    url.path_segments_mut()
        .map_err(|_| AppError::Internal("Share base url cannot be a base".into()))?
        .push("redeem")
        .push(&share_id.to_string());
    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_tokens_are_long_and_unique() {
        let first = generate_token();
        let second = generate_token();
        // 32 bytes, base64 url-safe without padding
        assert_eq!(first.len(), 43);
        assert_ne!(first, second);
        assert!(!first.contains('+') && !first.contains('/') && !first.contains('='));
    }

    #[test]
    fn token_hash_is_stable_sha256_hex() {
        let hash = token_hash("some-raw-token");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, token_hash("some-raw-token"));
        assert_ne!(hash, token_hash("another-raw-token"));
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn api_key_hash_is_sha3_hex() {
        let hash = api_key_hash("owner-key");
        assert_eq!(hash.len(), 64);
        assert_ne!(hash, token_hash("owner-key"));
    }

    #[test]
    fn password_verification_round_trips() {
        let hash = hash_password("hunter2").unwrap();
        assert!(verify_password("hunter2", &hash));
        assert!(!verify_password("hunter3", &hash));
    }

    #[test]
    fn password_verification_rejects_malformed_hashes() {
        assert!(!verify_password("hunter2", "not-a-phc-string"));
    }

    #[test]
    fn share_url_appends_redeem_path() {
        let id = Uuid::new_v4();
        let url = build_share_url("https://coupons.example.com", id).unwrap();
        assert_eq!(url, format!("https://coupons.example.com/redeem/{id}"));
        let nested = build_share_url("https://example.com/app/", id).unwrap();
        assert_eq!(nested, format!("https://example.com/app/redeem/{id}"));
    }
}

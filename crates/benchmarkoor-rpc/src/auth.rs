//! Engine API JWT authentication
//!
//! The Engine endpoint requires a short-lived HS256 token over `{iat}`
//! signed with the shared 32-byte secret. A fresh token is computed per
//! call; execution clients reject tokens with a stale issued-at.

use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::Result;

#[derive(Serialize)]
struct Claims {
    iat: u64,
}

/// Per-endpoint JWT signer.
pub struct JwtSigner {
    key: EncodingKey,
}

impl JwtSigner {
    pub fn new(secret: &[u8; 32]) -> Self {
        Self {
            key: EncodingKey::from_secret(secret),
        }
    }

    /// A freshly signed `Bearer` header value.
    pub fn bearer_token(&self) -> Result<String> {
        let iat = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let token = encode(&Header::new(Algorithm::HS256), &Claims { iat }, &self.key)?;
        Ok(format!("Bearer {token}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{decode, DecodingKey, Validation};

    #[test]
    fn test_token_round_trips_with_the_shared_secret() {
        let secret = [7u8; 32];
        let signer = JwtSigner::new(&secret);
        let bearer = signer.bearer_token().expect("sign");
        let token = bearer.strip_prefix("Bearer ").expect("bearer prefix");

        let mut validation = Validation::new(Algorithm::HS256);
        validation.required_spec_claims.clear();
        validation.validate_exp = false;
        let decoded = decode::<serde_json::Value>(
            token,
            &DecodingKey::from_secret(&secret),
            &validation,
        )
        .expect("decode");
        assert!(decoded.claims["iat"].as_u64().is_some());
    }
}

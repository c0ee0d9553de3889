//! Short-lived, purpose-bound step-up tokens.
//!
//! Wire format: `base64url(claims JSON) "." base64url(HMAC-SHA256)`. Tokens are
//! stateless: nothing is stored, so a token cannot be revoked before it expires.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

use gatekeep_core::UserId;

use crate::time::saturating_add;

pub const DEFAULT_TTL_MINUTES: i64 = 5;

/// HMAC key length used for generated keys.
pub const KEY_LENGTH: usize = 32;

const NONCE_LENGTH: usize = 16;

type HmacSha256 = Hmac<Sha256>;

/// What a token may be used for. An issuer only accepts its own purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepUpPurpose {
    /// Bridges first-factor success to second-factor completion.
    SecondFactor,
    /// Re-authentication before a sensitive operation.
    SensitiveAction,
}

/// Signed token payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepUpClaims {
    pub sub: UserId,
    pub purpose: StepUpPurpose,
    /// Issued-at, unix seconds.
    pub iat: i64,
    /// Expiry, unix seconds.
    pub exp: i64,
    pub nonce: String,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TokenError {
    #[error("step-up token has expired")]
    Expired,

    #[error("step-up token is invalid")]
    Invalid,

    /// The issuer could not produce a token at all.
    #[error("step-up token could not be signed")]
    Signing,
}

/// Time-window checks on already-authenticated claims.
///
/// A window that is empty or starts in the future is `Invalid`; only a token
/// that was valid and has run out is `Expired`.
pub fn validate_window(claims: &StepUpClaims, now: DateTime<Utc>) -> Result<(), TokenError> {
    if claims.exp <= claims.iat {
        return Err(TokenError::Invalid);
    }
    let now = now.timestamp();
    if now < claims.iat {
        return Err(TokenError::Invalid);
    }
    if now >= claims.exp {
        return Err(TokenError::Expired);
    }
    Ok(())
}

pub struct StepUpTokenIssuer {
    key: Vec<u8>,
    purpose: StepUpPurpose,
    ttl: Duration,
}

impl core::fmt::Debug for StepUpTokenIssuer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("StepUpTokenIssuer")
            .field("purpose", &self.purpose)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl StepUpTokenIssuer {
    pub fn new(key: impl Into<Vec<u8>>, purpose: StepUpPurpose, ttl: Duration) -> Self {
        Self {
            key: key.into(),
            purpose,
            ttl,
        }
    }

    /// Issuer with a per-process random key; tokens do not survive a restart.
    pub fn with_random_key(purpose: StepUpPurpose, ttl: Duration) -> Self {
        Self::new(random_key(), purpose, ttl)
    }

    pub fn purpose(&self) -> StepUpPurpose {
        self.purpose
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn issue(&self, subject_id: UserId, now: DateTime<Utc>) -> Result<String, TokenError> {
        let mut nonce = [0u8; NONCE_LENGTH];
        rand::thread_rng().fill_bytes(&mut nonce);

        let claims = StepUpClaims {
            sub: subject_id,
            purpose: self.purpose,
            iat: now.timestamp(),
            exp: saturating_add(now, self.ttl).timestamp(),
            nonce: URL_SAFE_NO_PAD.encode(nonce),
        };

        let payload = serde_json::to_vec(&claims).map_err(|e| {
            tracing::error!(%subject_id, error = %e, "step-up claims failed to serialize");
            TokenError::Signing
        })?;
        let payload = URL_SAFE_NO_PAD.encode(payload);
        let Some(mac) = self.mac(payload.as_bytes()) else {
            tracing::error!(%subject_id, purpose = ?self.purpose, "step-up signing key rejected");
            return Err(TokenError::Signing);
        };
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        tracing::debug!(%subject_id, purpose = ?self.purpose, "step-up token issued");
        Ok(format!("{payload}.{signature}"))
    }

    /// Authenticate `token` and return its subject.
    ///
    /// The signature is checked before anything in the payload is trusted, so
    /// `Expired` is only ever reported for tokens this issuer actually minted.
    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<UserId, TokenError> {
        self.verify_claims(token, now).map(|claims| claims.sub)
    }

    pub fn verify_claims(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<StepUpClaims, TokenError> {
        let (payload, signature) = token.split_once('.').ok_or(TokenError::Invalid)?;
        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| TokenError::Invalid)?;

        self.mac(payload.as_bytes())
            .ok_or(TokenError::Invalid)?
            .verify_slice(&signature)
            .map_err(|_| TokenError::Invalid)?;

        let bytes = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| TokenError::Invalid)?;
        let claims: StepUpClaims = serde_json::from_slice(&bytes).map_err(|_| TokenError::Invalid)?;

        if claims.purpose != self.purpose {
            tracing::debug!(
                expected = ?self.purpose,
                got = ?claims.purpose,
                "step-up purpose mismatch"
            );
            return Err(TokenError::Invalid);
        }
        validate_window(&claims, now)?;
        Ok(claims)
    }

    fn mac(&self, payload: &[u8]) -> Option<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.key).ok()?;
        mac.update(payload);
        Some(mac)
    }
}

pub fn random_key() -> Vec<u8> {
    let mut key = vec![0u8; KEY_LENGTH];
    rand::thread_rng().fill_bytes(&mut key);
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issuer(purpose: StepUpPurpose) -> StepUpTokenIssuer {
        StepUpTokenIssuer::new(
            b"0123456789abcdef0123456789abcdef".to_vec(),
            purpose,
            Duration::minutes(DEFAULT_TTL_MINUTES),
        )
    }

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    #[test]
    fn verifies_within_ttl() {
        let issuer = issuer(StepUpPurpose::SecondFactor);
        let user = UserId::new();
        let token = issuer.issue(user, at(1_000)).unwrap();
        assert_eq!(issuer.verify(&token, at(1_000)), Ok(user));
        assert_eq!(issuer.verify(&token, at(1_299)), Ok(user));
    }

    #[test]
    fn expires_at_ttl_boundary() {
        let issuer = issuer(StepUpPurpose::SecondFactor);
        let token = issuer.issue(UserId::new(), at(1_000)).unwrap();
        assert_eq!(issuer.verify(&token, at(1_300)), Err(TokenError::Expired));
    }

    #[test]
    fn tampered_payload_is_invalid_even_when_expired() {
        let issuer = issuer(StepUpPurpose::SecondFactor);
        let token = issuer.issue(UserId::new(), at(1_000)).unwrap();
        let (_, signature) = token.split_once('.').unwrap();

        let forged = StepUpClaims {
            sub: UserId::new(),
            purpose: StepUpPurpose::SecondFactor,
            iat: 1_000,
            exp: 1_300,
            nonce: "x".into(),
        };
        let forged = format!(
            "{}.{signature}",
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(&forged).unwrap())
        );
        assert_eq!(issuer.verify(&forged, at(1_000)), Err(TokenError::Invalid));
        assert_eq!(issuer.verify(&forged, at(9_999)), Err(TokenError::Invalid));
    }

    #[test]
    fn other_key_is_invalid() {
        let token = issuer(StepUpPurpose::SecondFactor).issue(UserId::new(), at(1_000)).unwrap();
        let other =
            StepUpTokenIssuer::with_random_key(StepUpPurpose::SecondFactor, Duration::minutes(5));
        assert_eq!(other.verify(&token, at(1_000)), Err(TokenError::Invalid));
    }

    #[test]
    fn purpose_is_bound() {
        let second_factor = issuer(StepUpPurpose::SecondFactor);
        let sensitive = issuer(StepUpPurpose::SensitiveAction);
        let token = second_factor.issue(UserId::new(), at(1_000)).unwrap();
        assert_eq!(sensitive.verify(&token, at(1_000)), Err(TokenError::Invalid));
    }

    #[test]
    fn malformed_tokens_are_invalid() {
        let issuer = issuer(StepUpPurpose::SecondFactor);
        for token in ["", ".", "abc", "abc.def", "!!!.???"] {
            assert_eq!(issuer.verify(token, at(1_000)), Err(TokenError::Invalid), "{token}");
        }
    }

    #[test]
    fn nonce_makes_tokens_unique() {
        let issuer = issuer(StepUpPurpose::SecondFactor);
        let user = UserId::new();
        assert_ne!(issuer.issue(user, at(1_000)).unwrap(), issuer.issue(user, at(1_000)).unwrap());
    }

    #[test]
    fn window_checks() {
        let claims = |iat, exp| StepUpClaims {
            sub: UserId::new(),
            purpose: StepUpPurpose::SecondFactor,
            iat,
            exp,
            nonce: String::new(),
        };
        assert_eq!(validate_window(&claims(10, 10), at(10)), Err(TokenError::Invalid));
        assert_eq!(validate_window(&claims(20, 30), at(10)), Err(TokenError::Invalid));
        assert_eq!(validate_window(&claims(0, 10), at(10)), Err(TokenError::Expired));
        assert_eq!(validate_window(&claims(0, 10), at(9)), Ok(()));
    }

    #[test]
    fn huge_ttl_saturates_instead_of_overflowing() {
        let issuer = StepUpTokenIssuer::new(
            b"0123456789abcdef0123456789abcdef".to_vec(),
            StepUpPurpose::SensitiveAction,
            Duration::MAX,
        );
        let user = UserId::new();
        let token = issuer.issue(user, at(1_000)).unwrap();
        let claims = issuer.verify_claims(&token, at(1_000)).unwrap();
        assert_eq!(claims.exp, DateTime::<Utc>::MAX_UTC.timestamp());
        assert_eq!(claims.sub, user);
    }
}

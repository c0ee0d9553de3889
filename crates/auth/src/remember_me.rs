//! Persistent "remember me" logins.
//!
//! A grant is a public `series` plus a secret `token`. Only a salted SHA-256
//! of the token is stored. Every successful use rotates the token, so each
//! series has exactly one live token at a time. Presenting a token that no
//! longer matches means a copy of an older token is in someone else's hands:
//! every session of the owner is revoked.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, RwLock};

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;

use gatekeep_audit::{AuditAction, AuditEvent, AuditSink, emit};
use gatekeep_core::UserId;

use crate::store::StoreError;
use crate::time::saturating_add;

pub const DEFAULT_LIFETIME_DAYS: i64 = 30;

const SECRET_LEN: usize = 32;
const SALT_LEN: usize = 16;

pub type TokenHash = [u8; 32];
pub type Salt = [u8; SALT_LEN];

/// Client details shown in the session-management UI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceMetadata {
    pub user_agent: Option<String>,
    pub ip: Option<IpAddr>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistentSession {
    pub series: String,
    pub token_hash: TokenHash,
    pub salt: Salt,
    pub owner_id: UserId,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    /// Fixed at issue time; rotation never extends it.
    pub absolute_expiry: DateTime<Utc>,
    pub device: DeviceMetadata,
}

impl PersistentSession {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.absolute_expiry
    }

    fn matches(&self, token: &str) -> bool {
        hash_token(&self.salt, token)[..].ct_eq(&self.token_hash[..]).into()
    }
}

/// Handed to the client once, at opt-in login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedGrant {
    pub series: String,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Result of a successful remember-me login: the replacement token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotatedGrant {
    pub owner_id: UserId,
    pub series: String,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GrantSummary {
    pub series: String,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub device: DeviceMetadata,
}

impl From<&PersistentSession> for GrantSummary {
    fn from(s: &PersistentSession) -> Self {
        Self {
            series: s.series.clone(),
            created_at: s.created_at,
            last_used_at: s.last_used_at,
            expires_at: s.absolute_expiry,
            device: s.device.clone(),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("unknown remember-me series")]
    NotFound,

    #[error("remember-me grant has expired")]
    Expired,

    /// A stale token was replayed. Every session of `owner` has been revoked.
    #[error("remember-me token replay detected; {revoked} session(s) revoked")]
    TheftDetected { owner: UserId, revoked: usize },

    /// Another request rotated this series first.
    #[error("remember-me grant was rotated concurrently")]
    RotationConflict,

    #[error(transparent)]
    Store(#[from] StoreError),
}

// ─────────────────────────────────────────────────────────────────────────────
// Store contract
// ─────────────────────────────────────────────────────────────────────────────

/// Persistence contract for remember-me rows, keyed by series.
pub trait SessionStore: Send + Sync {
    /// Fails with `StoreError::Conflict` if the series already exists.
    fn insert(&self, session: PersistentSession) -> Result<(), StoreError>;

    fn find(&self, series: &str) -> Result<Option<PersistentSession>, StoreError>;

    /// Replace the token hash only if the stored hash still equals `expected`.
    /// Returns `false` when another writer got there first.
    fn compare_and_swap_token(
        &self,
        series: &str,
        expected: &TokenHash,
        new_hash: TokenHash,
        new_salt: Salt,
        used_at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    fn delete(&self, series: &str) -> Result<bool, StoreError>;

    fn delete_for_owner(&self, owner_id: UserId) -> Result<usize, StoreError>;

    fn list_for_owner(&self, owner_id: UserId) -> Result<Vec<PersistentSession>, StoreError>;

    fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError>;
}

impl<S> SessionStore for Arc<S>
where
    S: SessionStore + ?Sized,
{
    fn insert(&self, session: PersistentSession) -> Result<(), StoreError> {
        (**self).insert(session)
    }

    fn find(&self, series: &str) -> Result<Option<PersistentSession>, StoreError> {
        (**self).find(series)
    }

    fn compare_and_swap_token(
        &self,
        series: &str,
        expected: &TokenHash,
        new_hash: TokenHash,
        new_salt: Salt,
        used_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        (**self).compare_and_swap_token(series, expected, new_hash, new_salt, used_at)
    }

    fn delete(&self, series: &str) -> Result<bool, StoreError> {
        (**self).delete(series)
    }

    fn delete_for_owner(&self, owner_id: UserId) -> Result<usize, StoreError> {
        (**self).delete_for_owner(owner_id)
    }

    fn list_for_owner(&self, owner_id: UserId) -> Result<Vec<PersistentSession>, StoreError> {
        (**self).list_for_owner(owner_id)
    }

    fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        (**self).purge_expired(now)
    }
}

/// In-memory session store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    rows: RwLock<HashMap<String, PersistentSession>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl SessionStore for InMemorySessionStore {
    fn insert(&self, session: PersistentSession) -> Result<(), StoreError> {
        let mut rows = self.rows.write()?;
        if rows.contains_key(&session.series) {
            return Err(StoreError::Conflict(format!("series {} exists", session.series)));
        }
        rows.insert(session.series.clone(), session);
        Ok(())
    }

    fn find(&self, series: &str) -> Result<Option<PersistentSession>, StoreError> {
        Ok(self.rows.read()?.get(series).cloned())
    }

    fn compare_and_swap_token(
        &self,
        series: &str,
        expected: &TokenHash,
        new_hash: TokenHash,
        new_salt: Salt,
        used_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut rows = self.rows.write()?;
        let Some(row) = rows.get_mut(series) else {
            return Ok(false);
        };
        if !bool::from(row.token_hash[..].ct_eq(&expected[..])) {
            return Ok(false);
        }
        row.token_hash = new_hash;
        row.salt = new_salt;
        row.last_used_at = used_at;
        Ok(true)
    }

    fn delete(&self, series: &str) -> Result<bool, StoreError> {
        Ok(self.rows.write()?.remove(series).is_some())
    }

    fn delete_for_owner(&self, owner_id: UserId) -> Result<usize, StoreError> {
        let mut rows = self.rows.write()?;
        let before = rows.len();
        rows.retain(|_, s| s.owner_id != owner_id);
        Ok(before - rows.len())
    }

    fn list_for_owner(&self, owner_id: UserId) -> Result<Vec<PersistentSession>, StoreError> {
        let rows = self.rows.read()?;
        let mut out: Vec<_> = rows.values().filter(|s| s.owner_id == owner_id).cloned().collect();
        out.sort_by_key(|s| s.created_at);
        Ok(out)
    }

    fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut rows = self.rows.write()?;
        let before = rows.len();
        rows.retain(|_, s| !s.is_expired_at(now));
        Ok(before - rows.len())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Manager
// ─────────────────────────────────────────────────────────────────────────────

fn random_secret() -> String {
    let mut buf = [0u8; SECRET_LEN];
    rand::thread_rng().fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}

fn random_salt() -> Salt {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}

fn hash_token(salt: &Salt, token: &str) -> TokenHash {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(token.as_bytes());
    hasher.finalize().into()
}

pub struct PersistentSessionManager {
    store: Arc<dyn SessionStore>,
    audit: Arc<dyn AuditSink>,
    lifetime: Duration,
}

impl core::fmt::Debug for PersistentSessionManager {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PersistentSessionManager")
            .field("lifetime", &self.lifetime)
            .finish()
    }
}

impl PersistentSessionManager {
    pub fn new(
        store: Arc<dyn SessionStore>,
        audit: Arc<dyn AuditSink>,
        lifetime: Duration,
    ) -> Self {
        Self {
            store,
            audit,
            lifetime,
        }
    }

    pub fn with_default_lifetime(store: Arc<dyn SessionStore>, audit: Arc<dyn AuditSink>) -> Self {
        Self::new(store, audit, Duration::days(DEFAULT_LIFETIME_DAYS))
    }

    pub fn issue(
        &self,
        owner_id: UserId,
        device: DeviceMetadata,
        now: DateTime<Utc>,
    ) -> Result<IssuedGrant, SessionError> {
        let series = random_secret();
        let token = random_secret();
        let salt = random_salt();
        let expires_at = saturating_add(now, self.lifetime);

        self.store.insert(PersistentSession {
            series: series.clone(),
            token_hash: hash_token(&salt, &token),
            salt,
            owner_id,
            created_at: now,
            last_used_at: now,
            absolute_expiry: expires_at,
            device,
        })?;

        tracing::info!(%owner_id, %expires_at, "remember-me grant issued");
        Ok(IssuedGrant {
            series,
            token,
            expires_at,
        })
    }

    /// Log in with a (series, token) pair and rotate the token.
    pub fn authenticate(
        &self,
        series: &str,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<RotatedGrant, SessionError> {
        let session = self.store.find(series)?.ok_or(SessionError::NotFound)?;
        let owner_id = session.owner_id;

        if session.is_expired_at(now) {
            self.store.delete(series)?;
            tracing::debug!(%owner_id, "expired remember-me grant removed");
            return Err(SessionError::Expired);
        }

        if !session.matches(token) {
            let revoked = self.store.delete_for_owner(owner_id)?;
            tracing::warn!(%owner_id, revoked, "remember-me token replay; all sessions revoked");
            emit(
                self.audit.as_ref(),
                AuditEvent::new(AuditAction::SessionTheftDetected, owner_id, now)
                    .with_reason("TOKEN_REPLAY"),
            );
            return Err(SessionError::TheftDetected {
                owner: owner_id,
                revoked,
            });
        }

        let next_token = random_secret();
        let next_salt = random_salt();
        let swapped = self.store.compare_and_swap_token(
            series,
            &session.token_hash,
            hash_token(&next_salt, &next_token),
            next_salt,
            now,
        )?;
        if !swapped {
            tracing::debug!(%owner_id, "remember-me rotation lost a race");
            return Err(SessionError::RotationConflict);
        }

        tracing::info!(%owner_id, "remember-me token rotated");
        Ok(RotatedGrant {
            owner_id,
            series: session.series,
            token: next_token,
            expires_at: session.absolute_expiry,
        })
    }

    pub fn list_grants(&self, owner_id: UserId) -> Result<Vec<GrantSummary>, SessionError> {
        Ok(self
            .store
            .list_for_owner(owner_id)?
            .iter()
            .map(GrantSummary::from)
            .collect())
    }

    /// Revoke one grant. A series owned by someone else is left alone.
    pub fn revoke(&self, owner_id: UserId, series: &str) -> Result<bool, SessionError> {
        match self.store.find(series)? {
            Some(s) if s.owner_id == owner_id => {
                let deleted = self.store.delete(series)?;
                tracing::info!(%owner_id, "remember-me grant revoked");
                Ok(deleted)
            }
            _ => Ok(false),
        }
    }

    pub fn revoke_all(&self, owner_id: UserId) -> Result<usize, SessionError> {
        let revoked = self.store.delete_for_owner(owner_id)?;
        tracing::info!(%owner_id, revoked, "all remember-me grants revoked");
        Ok(revoked)
    }

    pub fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, SessionError> {
        Ok(self.store.purge_expired(now)?)
    }
}

//! Security settings for the credential and authorization components.
//!
//! Defaults are usable as-is; `from_env` overlays `GATEKEEP_*` variables.

use std::sync::Arc;

use anyhow::{Context, bail};
use chrono::Duration;
use serde::{Deserialize, Serialize};

use gatekeep_audit::AuditSink;

use crate::assignments::AssignmentStore;
use crate::lockout::{self, CredentialLockout, LockoutPolicy, LockoutStore};
use crate::remember_me::{self, PersistentSessionManager, SessionStore};
use crate::safeguard::RoleRemovalSafeguard;
use crate::step_up::{self, StepUpPurpose, StepUpTokenIssuer};
use crate::{RoleName, roles};

/// Minimum accepted length of a configured step-up secret, in bytes.
pub const MIN_SECRET_LEN: usize = 32;

/// Upper bound for every configured duration: ten years.
pub const MAX_DURATION_SECS: i64 = 10 * 365 * 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockoutSettings {
    pub threshold: u32,
    pub duration_secs: i64,
}

impl Default for LockoutSettings {
    fn default() -> Self {
        Self {
            threshold: lockout::DEFAULT_THRESHOLD,
            duration_secs: lockout::DEFAULT_LOCK_MINUTES * 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RememberMeSettings {
    pub lifetime_secs: i64,
}

impl Default for RememberMeSettings {
    fn default() -> Self {
        Self {
            lifetime_secs: remember_me::DEFAULT_LIFETIME_DAYS * 24 * 60 * 60,
        }
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepUpSettings {
    pub ttl_secs: i64,
    /// Hex-encoded or raw secret. `None` means a random per-process key.
    #[serde(skip_serializing)]
    pub secret: Option<String>,
}

impl core::fmt::Debug for StepUpSettings {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("StepUpSettings")
            .field("ttl_secs", &self.ttl_secs)
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Default for StepUpSettings {
    fn default() -> Self {
        Self {
            ttl_secs: step_up::DEFAULT_TTL_MINUTES * 60,
            secret: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthorizationSettings {
    /// Roles protected by the last-administrator safeguard.
    pub admin_roles: Vec<String>,
}

impl Default for AuthorizationSettings {
    fn default() -> Self {
        Self {
            admin_roles: vec![roles::ADMIN.to_string(), roles::OWNER.to_string()],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub lockout: LockoutSettings,
    pub remember_me: RememberMeSettings,
    pub step_up: StepUpSettings,
    pub authorization: AuthorizationSettings,
}

impl SecurityConfig {
    /// Defaults overlaid with `GATEKEEP_*` environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) over an arbitrary key/value source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let mut config = Self::default();

        if let Some(v) = lookup("GATEKEEP_LOCKOUT_THRESHOLD") {
            config.lockout.threshold = v.parse().context("GATEKEEP_LOCKOUT_THRESHOLD")?;
        }
        if let Some(v) = lookup("GATEKEEP_LOCKOUT_DURATION_SECS") {
            config.lockout.duration_secs = v.parse().context("GATEKEEP_LOCKOUT_DURATION_SECS")?;
        }
        if let Some(v) = lookup("GATEKEEP_REMEMBER_ME_LIFETIME_SECS") {
            config.remember_me.lifetime_secs =
                v.parse().context("GATEKEEP_REMEMBER_ME_LIFETIME_SECS")?;
        }
        if let Some(v) = lookup("GATEKEEP_STEP_UP_TTL_SECS") {
            config.step_up.ttl_secs = v.parse().context("GATEKEEP_STEP_UP_TTL_SECS")?;
        }
        if let Some(v) = lookup("GATEKEEP_STEP_UP_SECRET") {
            config.step_up.secret = Some(v);
        }
        if let Some(v) = lookup("GATEKEEP_ADMIN_ROLES") {
            config.authorization.admin_roles = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.lockout.threshold == 0 {
            bail!("lockout threshold must be at least 1");
        }
        check_duration("lockout duration", self.lockout.duration_secs)?;
        check_duration("remember-me lifetime", self.remember_me.lifetime_secs)?;
        check_duration("step-up ttl", self.step_up.ttl_secs)?;
        if self.authorization.admin_roles.is_empty() {
            bail!("at least one admin role must be configured");
        }
        if let Some(secret) = &self.step_up.secret {
            decode_secret(secret)?;
        }
        Ok(())
    }

    pub fn lockout_policy(&self) -> LockoutPolicy {
        LockoutPolicy {
            threshold: self.lockout.threshold,
            duration: bounded_seconds(self.lockout.duration_secs),
        }
    }

    pub fn remember_me_lifetime(&self) -> Duration {
        bounded_seconds(self.remember_me.lifetime_secs)
    }

    pub fn step_up_ttl(&self) -> Duration {
        bounded_seconds(self.step_up.ttl_secs)
    }

    pub fn admin_roles(&self) -> Vec<RoleName> {
        self.authorization
            .admin_roles
            .iter()
            .map(|r| RoleName::from(r.clone()))
            .collect()
    }

    /// Step-up signing key; a random key when no secret is configured.
    pub fn step_up_key(&self) -> anyhow::Result<Vec<u8>> {
        match &self.step_up.secret {
            Some(secret) => decode_secret(secret),
            None => {
                tracing::warn!("no step-up secret configured; using a random per-process key");
                Ok(step_up::random_key())
            }
        }
    }

    pub fn build_lockout(
        &self,
        store: Arc<dyn LockoutStore>,
        audit: Arc<dyn AuditSink>,
    ) -> CredentialLockout {
        CredentialLockout::new(self.lockout_policy(), store, audit)
    }

    pub fn build_session_manager(
        &self,
        store: Arc<dyn SessionStore>,
        audit: Arc<dyn AuditSink>,
    ) -> PersistentSessionManager {
        PersistentSessionManager::new(store, audit, self.remember_me_lifetime())
    }

    pub fn build_step_up_issuer(
        &self,
        purpose: StepUpPurpose,
    ) -> anyhow::Result<StepUpTokenIssuer> {
        Ok(StepUpTokenIssuer::new(self.step_up_key()?, purpose, self.step_up_ttl()))
    }

    pub fn build_safeguard(
        &self,
        store: Arc<dyn AssignmentStore>,
        audit: Arc<dyn AuditSink>,
    ) -> RoleRemovalSafeguard {
        RoleRemovalSafeguard::new(self.admin_roles(), store, audit)
    }
}

fn check_duration(name: &str, secs: i64) -> anyhow::Result<()> {
    if secs <= 0 {
        bail!("{name} must be positive");
    }
    if secs > MAX_DURATION_SECS {
        bail!("{name} must not exceed {MAX_DURATION_SECS} seconds, got {secs}");
    }
    Ok(())
}

/// Settings that skipped `validate` (e.g. deserialized directly) are clamped.
fn bounded_seconds(secs: i64) -> Duration {
    Duration::seconds(secs.clamp(0, MAX_DURATION_SECS))
}

/// Accepts an even-length hex string, otherwise the raw bytes.
fn decode_secret(secret: &str) -> anyhow::Result<Vec<u8>> {
    let bytes = decode_hex(secret).unwrap_or_else(|| secret.as_bytes().to_vec());
    if bytes.len() < MIN_SECRET_LEN {
        bail!(
            "step-up secret must be at least {MIN_SECRET_LEN} bytes, got {}",
            bytes.len()
        );
    }
    Ok(bytes)
}

fn decode_hex(s: &str) -> Option<Vec<u8>> {
    if s.is_empty() || s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| s.get(i..i + 2).and_then(|pair| u8::from_str_radix(pair, 16).ok()))
        .collect()
}

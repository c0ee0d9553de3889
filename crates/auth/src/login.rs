//! Login flow: lockout gate, first factor, optional second factor, optional
//! remember-me grant.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use gatekeep_core::UserId;

use crate::lockout::{CredentialLockout, LockoutError};
use crate::remember_me::{
    DeviceMetadata, IssuedGrant, PersistentSessionManager, RotatedGrant, SessionError,
};
use crate::step_up::{StepUpTokenIssuer, TokenError};
use crate::time::saturating_add;
use crate::store::StoreError;

/// What the credential collaborator knows about a login name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountRecord {
    pub user_id: UserId,
    pub two_factor_enabled: bool,
}

/// First-factor collaborator (password store, directory, ...).
pub trait CredentialVerifier: Send + Sync {
    fn lookup(&self, login: &str) -> Option<AccountRecord>;

    fn verify_secret(&self, user_id: UserId, secret: &str) -> bool;
}

/// Second-factor collaborator (TOTP, WebAuthn, ...).
pub trait SecondFactorVerifier: Send + Sync {
    fn verify(&self, user_id: UserId, code: &str) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginAttempt {
    pub login: String,
    pub secret: String,
    pub remember_me: bool,
    pub device: DeviceMetadata,
}

impl LoginAttempt {
    pub fn new(login: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            secret: secret.into(),
            remember_me: false,
            device: DeviceMetadata::default(),
        }
    }

    pub fn remember(mut self, device: DeviceMetadata) -> Self {
        self.remember_me = true;
        self.device = device;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    Authenticated {
        user_id: UserId,
        remember_me: Option<IssuedGrant>,
    },
    /// First factor passed; present `step_up_token` with the second factor.
    SecondFactorRequired {
        user_id: UserId,
        step_up_token: String,
        expires_at: DateTime<Utc>,
    },
}

impl LoginOutcome {
    pub fn user_id(&self) -> UserId {
        match self {
            LoginOutcome::Authenticated { user_id, .. }
            | LoginOutcome::SecondFactorRequired { user_id, .. } => *user_id,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LoginError {
    /// Unknown login, wrong secret, or wrong second-factor code.
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("account locked ({} seconds remaining)", .remaining.num_seconds())]
    Locked {
        locked_until: DateTime<Utc>,
        remaining: Duration,
    },

    #[error(transparent)]
    StepUp(#[from] TokenError),

    /// A replayed remember-me token; the owner's other sessions were terminated.
    #[error("remember-me token replay detected; {revoked} session(s) revoked")]
    SessionTheft { revoked: usize },

    #[error(transparent)]
    Session(SessionError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<LockoutError> for LoginError {
    fn from(err: LockoutError) -> Self {
        match err {
            LockoutError::Locked {
                locked_until,
                remaining,
            } => LoginError::Locked {
                locked_until,
                remaining,
            },
            LockoutError::Store(e) => LoginError::Store(e),
        }
    }
}

impl From<SessionError> for LoginError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::TheftDetected { revoked, .. } => LoginError::SessionTheft { revoked },
            SessionError::Store(e) => LoginError::Store(e),
            other => LoginError::Session(other),
        }
    }
}

/// Composes the credential-security components into a login front door.
///
/// `step_up` must be an issuer bound to `StepUpPurpose::SecondFactor`.
pub struct Authenticator {
    credentials: Arc<dyn CredentialVerifier>,
    second_factor: Arc<dyn SecondFactorVerifier>,
    lockout: Arc<CredentialLockout>,
    sessions: Arc<PersistentSessionManager>,
    step_up: Arc<StepUpTokenIssuer>,
}

impl Authenticator {
    pub fn new(
        credentials: Arc<dyn CredentialVerifier>,
        second_factor: Arc<dyn SecondFactorVerifier>,
        lockout: Arc<CredentialLockout>,
        sessions: Arc<PersistentSessionManager>,
        step_up: Arc<StepUpTokenIssuer>,
    ) -> Self {
        Self {
            credentials,
            second_factor,
            lockout,
            sessions,
            step_up,
        }
    }

    pub fn login(
        &self,
        attempt: LoginAttempt,
        now: DateTime<Utc>,
    ) -> Result<LoginOutcome, LoginError> {
        let Some(account) = self.credentials.lookup(&attempt.login) else {
            tracing::debug!("login for unknown account");
            return Err(LoginError::InvalidCredentials);
        };
        let user_id = account.user_id;

        // Locked accounts are refused before the secret is even looked at.
        self.lockout.ensure_unlocked(user_id, now)?;

        if !self.credentials.verify_secret(user_id, &attempt.secret) {
            let status = self.lockout.record_failed_attempt(user_id, now)?;
            tracing::debug!(%user_id, locked = status.is_locked(), "first factor rejected");
            return Err(LoginError::InvalidCredentials);
        }

        // The failure count survives until the login is complete, so wrong
        // second-factor codes keep accumulating across password logins.
        if account.two_factor_enabled {
            let step_up_token = self.step_up.issue(user_id, now)?;
            return Ok(LoginOutcome::SecondFactorRequired {
                user_id,
                step_up_token,
                expires_at: saturating_add(now, self.step_up.ttl()),
            });
        }
        self.lockout.record_successful_attempt(user_id)?;

        let remember_me = self.maybe_remember(user_id, attempt.remember_me, attempt.device, now)?;
        tracing::info!(%user_id, remember_me = remember_me.is_some(), "login succeeded");
        Ok(LoginOutcome::Authenticated { user_id, remember_me })
    }

    pub fn complete_second_factor(
        &self,
        step_up_token: &str,
        code: &str,
        remember_me: bool,
        device: DeviceMetadata,
        now: DateTime<Utc>,
    ) -> Result<LoginOutcome, LoginError> {
        let user_id = self.step_up.verify(step_up_token, now)?;
        self.lockout.ensure_unlocked(user_id, now)?;

        if !self.second_factor.verify(user_id, code) {
            let status = self.lockout.record_failed_attempt(user_id, now)?;
            tracing::debug!(%user_id, locked = status.is_locked(), "second factor rejected");
            return Err(LoginError::InvalidCredentials);
        }
        self.lockout.record_successful_attempt(user_id)?;

        let remember_me = self.maybe_remember(user_id, remember_me, device, now)?;
        tracing::info!(
            %user_id,
            remember_me = remember_me.is_some(),
            "login succeeded with second factor"
        );
        Ok(LoginOutcome::Authenticated { user_id, remember_me })
    }

    /// Log in with a remember-me grant. The returned grant replaces the
    /// presented token.
    pub fn resume(
        &self,
        series: &str,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<RotatedGrant, LoginError> {
        Ok(self.sessions.authenticate(series, token, now)?)
    }

    fn maybe_remember(
        &self,
        user_id: UserId,
        remember_me: bool,
        device: DeviceMetadata,
        now: DateTime<Utc>,
    ) -> Result<Option<IssuedGrant>, LoginError> {
        if !remember_me {
            return Ok(None);
        }
        Ok(Some(self.sessions.issue(user_id, device, now)?))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use gatekeep_audit::InMemoryAuditSink;

    use super::*;
    use crate::lockout::{InMemoryLockoutStore, LockoutPolicy};
    use crate::remember_me::InMemorySessionStore;
    use crate::step_up::StepUpPurpose;

    #[derive(Default)]
    struct Directory {
        accounts: HashMap<String, (AccountRecord, String)>,
    }

    impl Directory {
        fn with(mut self, login: &str, secret: &str, two_factor_enabled: bool) -> (Self, UserId) {
            let user_id = UserId::new();
            self.accounts.insert(
                login.to_string(),
                (
                    AccountRecord {
                        user_id,
                        two_factor_enabled,
                    },
                    secret.to_string(),
                ),
            );
            (self, user_id)
        }
    }

    impl CredentialVerifier for Directory {
        fn lookup(&self, login: &str) -> Option<AccountRecord> {
            self.accounts.get(login).map(|(a, _)| *a)
        }

        fn verify_secret(&self, user_id: UserId, secret: &str) -> bool {
            self.accounts
                .values()
                .any(|(a, s)| a.user_id == user_id && s == secret)
        }
    }

    struct FixedCode(&'static str);

    impl SecondFactorVerifier for FixedCode {
        fn verify(&self, _user_id: UserId, code: &str) -> bool {
            code == self.0
        }
    }

    fn no_device() -> DeviceMetadata {
        DeviceMetadata::default()
    }

    fn step_up_token(auth: &Authenticator, now: DateTime<Utc>) -> String {
        match auth.login(LoginAttempt::new("alice", "pw"), now).unwrap() {
            LoginOutcome::SecondFactorRequired { step_up_token, .. } => step_up_token,
            other => panic!("expected second factor, got {other:?}"),
        }
    }

    fn authenticator(directory: Directory) -> Authenticator {
        let audit = Arc::new(InMemoryAuditSink::new());
        Authenticator::new(
            Arc::new(directory),
            Arc::new(FixedCode("123456")),
            Arc::new(CredentialLockout::new(
                LockoutPolicy::default(),
                InMemoryLockoutStore::arc(),
                audit.clone(),
            )),
            Arc::new(PersistentSessionManager::with_default_lifetime(
                InMemorySessionStore::arc(),
                audit,
            )),
            Arc::new(StepUpTokenIssuer::with_random_key(
                StepUpPurpose::SecondFactor,
                Duration::minutes(5),
            )),
        )
    }

    #[test]
    fn password_only_login_with_remember_me() {
        let (dir, alice) = Directory::default().with("alice", "pw", false);
        let auth = authenticator(dir);
        let now = Utc::now();

        let outcome = auth
            .login(LoginAttempt::new("alice", "pw").remember(DeviceMetadata::default()), now)
            .unwrap();
        let LoginOutcome::Authenticated {
            user_id,
            remember_me: Some(grant),
        } = outcome
        else {
            panic!("expected remember-me grant");
        };
        assert_eq!(user_id, alice);

        let rotated = auth.resume(&grant.series, &grant.token, now).unwrap();
        assert_eq!(rotated.owner_id, alice);
    }

    #[test]
    fn unknown_login_and_wrong_secret_look_the_same() {
        let (dir, _) = Directory::default().with("alice", "pw", false);
        let auth = authenticator(dir);
        let now = Utc::now();
        assert_eq!(
            auth.login(LoginAttempt::new("bob", "pw"), now).unwrap_err(),
            LoginError::InvalidCredentials
        );
        assert_eq!(
            auth.login(LoginAttempt::new("alice", "nope"), now).unwrap_err(),
            LoginError::InvalidCredentials
        );
    }

    #[test]
    fn second_factor_flow() {
        let (dir, alice) = Directory::default().with("alice", "pw", true);
        let auth = authenticator(dir);
        let now = Utc::now();

        let LoginOutcome::SecondFactorRequired { step_up_token, .. } =
            auth.login(LoginAttempt::new("alice", "pw"), now).unwrap()
        else {
            panic!("expected second factor");
        };

        assert_eq!(
            auth.complete_second_factor(&step_up_token, "000000", false, no_device(), now)
                .unwrap_err(),
            LoginError::InvalidCredentials
        );
        let outcome = auth
            .complete_second_factor(&step_up_token, "123456", false, DeviceMetadata::default(), now)
            .unwrap();
        assert_eq!(
            outcome,
            LoginOutcome::Authenticated {
                user_id: alice,
                remember_me: None
            }
        );
    }

    #[test]
    fn stale_step_up_token_is_expired() {
        let (dir, _) = Directory::default().with("alice", "pw", true);
        let auth = authenticator(dir);
        let now = Utc::now();
        let outcome = auth.login(LoginAttempt::new("alice", "pw"), now).unwrap();
        let LoginOutcome::SecondFactorRequired { step_up_token, .. } = outcome else {
            panic!("expected second factor");
        };

        let err = auth
            .complete_second_factor(
                &step_up_token,
                "123456",
                false,
                DeviceMetadata::default(),
                now + Duration::minutes(6),
            )
            .unwrap_err();
        assert_eq!(err, LoginError::StepUp(TokenError::Expired));
    }

    #[test]
    fn wrong_codes_count_towards_lockout() {
        let (dir, _) = Directory::default().with("alice", "pw", true);
        let auth = authenticator(dir);
        let now = Utc::now();
        let LoginOutcome::SecondFactorRequired { step_up_token, .. } =
            auth.login(LoginAttempt::new("alice", "pw"), now).unwrap()
        else {
            panic!("expected second factor");
        };

        for _ in 0..5 {
            let _ = auth.complete_second_factor(&step_up_token, "bad", false, no_device(), now);
        }
        assert!(matches!(
            auth.complete_second_factor(&step_up_token, "123456", false, no_device(), now),
            Err(LoginError::Locked { .. })
        ));
    }

    #[test]
    fn fresh_password_logins_do_not_reset_second_factor_failures() {
        let (dir, _) = Directory::default().with("alice", "pw", true);
        let auth = authenticator(dir);
        let now = Utc::now();

        let token = step_up_token(&auth, now);
        for _ in 0..4 {
            assert_eq!(
                auth.complete_second_factor(&token, "bad", false, no_device(), now)
                    .unwrap_err(),
                LoginError::InvalidCredentials
            );
        }

        let token = step_up_token(&auth, now);
        assert_eq!(
            auth.complete_second_factor(&token, "bad", false, no_device(), now)
                .unwrap_err(),
            LoginError::InvalidCredentials
        );
        assert!(matches!(
            auth.complete_second_factor(&token, "123456", false, no_device(), now),
            Err(LoginError::Locked { .. })
        ));
        assert!(matches!(
            auth.login(LoginAttempt::new("alice", "pw"), now),
            Err(LoginError::Locked { .. })
        ));
    }

    #[test]
    fn completed_second_factor_clears_failures() {
        let (dir, _) = Directory::default().with("alice", "pw", true);
        let auth = authenticator(dir);
        let now = Utc::now();

        for _ in 0..4 {
            let _ = auth.login(LoginAttempt::new("alice", "wrong"), now);
        }
        let token = step_up_token(&auth, now);
        auth.complete_second_factor(&token, "123456", false, no_device(), now)
            .unwrap();

        let token = step_up_token(&auth, now);
        assert_eq!(
            auth.complete_second_factor(&token, "bad", false, no_device(), now)
                .unwrap_err(),
            LoginError::InvalidCredentials
        );
        assert!(auth.complete_second_factor(&token, "123456", false, no_device(), now).is_ok());
    }
}

//! Failed-login lockout.
//!
//! Each account moves through `Unlocked { failed_attempts }` → `Locked` →
//! `Unlocked`. Expiry is evaluated lazily against the `now` passed in, so no
//! background sweep is needed; [`CredentialLockout::purge_expired`] only
//! reclaims storage.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use gatekeep_audit::{AuditAction, AuditEvent, AuditSink, emit};
use gatekeep_core::UserId;

use crate::store::StoreError;
use crate::time::saturating_add;

pub const DEFAULT_THRESHOLD: u32 = 5;
pub const DEFAULT_LOCK_MINUTES: i64 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockoutPolicy {
    /// Consecutive failures that trigger a lock.
    pub threshold: u32,
    pub duration: Duration,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            duration: Duration::minutes(DEFAULT_LOCK_MINUTES),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockoutRecord {
    pub account_id: UserId,
    pub failed_attempts: u32,
    pub locked_until: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
}

impl LockoutRecord {
    pub fn new(account_id: UserId) -> Self {
        Self {
            account_id,
            failed_attempts: 0,
            locked_until: None,
            last_failure_at: None,
        }
    }

    pub fn is_locked_at(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.is_some_and(|until| now < until)
    }

    /// A lock was set and has run out.
    pub fn lock_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.is_some_and(|until| now >= until)
    }

    fn status_at(&self, now: DateTime<Utc>) -> LockoutStatus {
        match self.locked_until {
            Some(until) if now < until => LockoutStatus::Locked {
                until,
                remaining: until - now,
            },
            Some(_) => LockoutStatus::Unlocked { failed_attempts: 0 },
            None => LockoutStatus::Unlocked {
                failed_attempts: self.failed_attempts,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockoutStatus {
    Unlocked { failed_attempts: u32 },
    Locked { until: DateTime<Utc>, remaining: Duration },
}

impl LockoutStatus {
    pub fn is_locked(&self) -> bool {
        matches!(self, LockoutStatus::Locked { .. })
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LockoutError {
    #[error("account locked until {locked_until} ({} seconds remaining)", .remaining.num_seconds())]
    Locked {
        locked_until: DateTime<Utc>,
        remaining: Duration,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

// ─────────────────────────────────────────────────────────────────────────────
// Store contract
// ─────────────────────────────────────────────────────────────────────────────

/// Persistence contract for lockout records.
///
/// `modify` is the only write path used for attempt counting and must run
/// the closure atomically with respect to other writers of the same account
/// (a row lock, a transaction, or a process-local mutex).
pub trait LockoutStore: Send + Sync {
    fn get(&self, account_id: UserId) -> Result<Option<LockoutRecord>, StoreError>;

    /// Read-modify-write. Returning `None` from `f` deletes the record.
    fn modify(
        &self,
        account_id: UserId,
        f: &mut dyn FnMut(Option<LockoutRecord>) -> Option<LockoutRecord>,
    ) -> Result<Option<LockoutRecord>, StoreError>;

    fn remove(&self, account_id: UserId) -> Result<bool, StoreError>;

    /// Delete every record matching `predicate`; returns how many were deleted.
    fn purge(&self, predicate: &dyn Fn(&LockoutRecord) -> bool) -> Result<usize, StoreError>;
}

impl<S> LockoutStore for Arc<S>
where
    S: LockoutStore + ?Sized,
{
    fn get(&self, account_id: UserId) -> Result<Option<LockoutRecord>, StoreError> {
        (**self).get(account_id)
    }

    fn modify(
        &self,
        account_id: UserId,
        f: &mut dyn FnMut(Option<LockoutRecord>) -> Option<LockoutRecord>,
    ) -> Result<Option<LockoutRecord>, StoreError> {
        (**self).modify(account_id, f)
    }

    fn remove(&self, account_id: UserId) -> Result<bool, StoreError> {
        (**self).remove(account_id)
    }

    fn purge(&self, predicate: &dyn Fn(&LockoutRecord) -> bool) -> Result<usize, StoreError> {
        (**self).purge(predicate)
    }
}

/// In-memory lockout store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryLockoutStore {
    records: Mutex<HashMap<UserId, LockoutRecord>>,
}

impl InMemoryLockoutStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LockoutStore for InMemoryLockoutStore {
    fn get(&self, account_id: UserId) -> Result<Option<LockoutRecord>, StoreError> {
        Ok(self.records.lock()?.get(&account_id).cloned())
    }

    fn modify(
        &self,
        account_id: UserId,
        f: &mut dyn FnMut(Option<LockoutRecord>) -> Option<LockoutRecord>,
    ) -> Result<Option<LockoutRecord>, StoreError> {
        let mut records = self.records.lock()?;
        let current = records.remove(&account_id);
        let next = f(current);
        if let Some(record) = &next {
            records.insert(account_id, record.clone());
        }
        Ok(next)
    }

    fn remove(&self, account_id: UserId) -> Result<bool, StoreError> {
        Ok(self.records.lock()?.remove(&account_id).is_some())
    }

    fn purge(&self, predicate: &dyn Fn(&LockoutRecord) -> bool) -> Result<usize, StoreError> {
        let mut records = self.records.lock()?;
        let before = records.len();
        records.retain(|_, r| !predicate(r));
        Ok(before - records.len())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// State machine
// ─────────────────────────────────────────────────────────────────────────────

pub struct CredentialLockout {
    policy: LockoutPolicy,
    store: Arc<dyn LockoutStore>,
    audit: Arc<dyn AuditSink>,
}

impl core::fmt::Debug for CredentialLockout {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CredentialLockout")
            .field("policy", &self.policy)
            .finish()
    }
}

impl CredentialLockout {
    pub fn new(
        policy: LockoutPolicy,
        store: Arc<dyn LockoutStore>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            policy,
            store,
            audit,
        }
    }

    pub fn policy(&self) -> &LockoutPolicy {
        &self.policy
    }

    /// Count a failed credential check.
    ///
    /// A failure against an expired lock starts a fresh count. A failure while
    /// the lock is still active leaves the record untouched.
    pub fn record_failed_attempt(
        &self,
        account_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<LockoutStatus, LockoutError> {
        let policy = self.policy;
        let mut newly_locked = false;

        let record = self.store.modify(account_id, &mut |current| {
            let mut record = match current {
                Some(r) if r.is_locked_at(now) => return Some(r),
                Some(r) if !r.lock_expired_at(now) => r,
                _ => LockoutRecord::new(account_id),
            };

            record.failed_attempts = record.failed_attempts.saturating_add(1);
            record.last_failure_at = Some(now);
            if record.failed_attempts >= policy.threshold {
                record.locked_until = Some(saturating_add(now, policy.duration));
                newly_locked = true;
            }
            Some(record)
        })?;

        let Some(record) = record else {
            return Ok(LockoutStatus::Unlocked { failed_attempts: 0 });
        };

        if newly_locked {
            tracing::info!(
                %account_id,
                failed_attempts = record.failed_attempts,
                locked_until = ?record.locked_until,
                "account locked"
            );
            emit(
                self.audit.as_ref(),
                AuditEvent::new(AuditAction::AccountLocked, account_id, now)
                    .with_reason("FAILED_ATTEMPT_THRESHOLD"),
            );
        } else {
            tracing::debug!(
                %account_id,
                failed_attempts = record.failed_attempts,
                "failed attempt recorded"
            );
        }

        Ok(record.status_at(now))
    }

    /// Clear any failure history after a successful credential check.
    pub fn record_successful_attempt(&self, account_id: UserId) -> Result<(), LockoutError> {
        self.store.remove(account_id)?;
        Ok(())
    }

    pub fn check_locked(
        &self,
        account_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<LockoutStatus, LockoutError> {
        Ok(match self.store.get(account_id)? {
            Some(record) => record.status_at(now),
            None => LockoutStatus::Unlocked { failed_attempts: 0 },
        })
    }

    /// Login gate: `Err(Locked)` while a lock is active.
    pub fn ensure_unlocked(
        &self,
        account_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<(), LockoutError> {
        match self.check_locked(account_id, now)? {
            LockoutStatus::Unlocked { .. } => Ok(()),
            LockoutStatus::Locked { until, remaining } => Err(LockoutError::Locked {
                locked_until: until,
                remaining,
            }),
        }
    }

    /// Administrative override: lift an active lock and reset the counter.
    ///
    /// Returns `true` if a lock was active. The counter is reset either way.
    pub fn admin_unlock(
        &self,
        account_id: UserId,
        actor_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<bool, LockoutError> {
        let mut was_locked = false;
        self.store.modify(account_id, &mut |current| {
            was_locked = current.is_some_and(|r| r.is_locked_at(now));
            None
        })?;

        if was_locked {
            tracing::info!(%account_id, %actor_id, "account unlocked by administrator");
            emit(
                self.audit.as_ref(),
                AuditEvent::new(AuditAction::AccountUnlocked, account_id, now)
                    .with_actor(actor_id)
                    .with_reason("ADMIN_UNLOCK"),
            );
        }
        Ok(was_locked)
    }

    /// Drop records whose lock has run out.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, LockoutError> {
        let purged = self.store.purge(&|r| r.lock_expired_at(now))?;
        if purged > 0 {
            tracing::debug!(purged, "expired lockout records purged");
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use gatekeep_audit::InMemoryAuditSink;
    use proptest::prelude::*;

    use super::*;

    fn lockout() -> (CredentialLockout, Arc<InMemoryLockoutStore>, Arc<InMemoryAuditSink>) {
        let store = InMemoryLockoutStore::arc();
        let audit = Arc::new(InMemoryAuditSink::new());
        (
            CredentialLockout::new(LockoutPolicy::default(), store.clone(), audit.clone()),
            store,
            audit,
        )
    }

    #[test]
    fn fifth_failure_locks_for_fifteen_minutes() {
        let (lockout, _, audit) = lockout();
        let account = UserId::new();
        let now = Utc::now();

        for n in 1..=4 {
            assert_eq!(
                lockout.record_failed_attempt(account, now).unwrap(),
                LockoutStatus::Unlocked { failed_attempts: n }
            );
        }
        let status = lockout.record_failed_attempt(account, now).unwrap();
        assert_eq!(
            status,
            LockoutStatus::Locked {
                until: now + Duration::minutes(15),
                remaining: Duration::minutes(15),
            }
        );
        assert_eq!(audit.events_for(AuditAction::AccountLocked).len(), 1);
    }

    #[test]
    fn success_at_four_resets_counter() {
        let (lockout, store, _) = lockout();
        let account = UserId::new();
        let now = Utc::now();

        for _ in 0..4 {
            lockout.record_failed_attempt(account, now).unwrap();
        }
        lockout.record_successful_attempt(account).unwrap();
        assert!(store.is_empty());
        assert_eq!(
            lockout.record_failed_attempt(account, now).unwrap(),
            LockoutStatus::Unlocked { failed_attempts: 1 }
        );
    }

    #[test]
    fn lock_expires_lazily() {
        let (lockout, _, _) = lockout();
        let account = UserId::new();
        let now = Utc::now();
        for _ in 0..5 {
            lockout.record_failed_attempt(account, now).unwrap();
        }

        let just_before = now + Duration::minutes(15) - Duration::seconds(1);
        let err = lockout.ensure_unlocked(account, just_before).unwrap_err();
        assert_eq!(
            err,
            LockoutError::Locked {
                locked_until: now + Duration::minutes(15),
                remaining: Duration::seconds(1),
            }
        );

        let later = now + Duration::minutes(15);
        assert!(lockout.ensure_unlocked(account, later).is_ok());
        assert_eq!(
            lockout.check_locked(account, later).unwrap(),
            LockoutStatus::Unlocked { failed_attempts: 0 }
        );
    }

    #[test]
    fn failures_while_locked_do_not_extend_the_lock() {
        let (lockout, _, audit) = lockout();
        let account = UserId::new();
        let now = Utc::now();
        for _ in 0..5 {
            lockout.record_failed_attempt(account, now).unwrap();
        }

        let later = now + Duration::minutes(10);
        let status = lockout.record_failed_attempt(account, later).unwrap();
        assert_eq!(
            status,
            LockoutStatus::Locked {
                until: now + Duration::minutes(15),
                remaining: Duration::minutes(5),
            }
        );
        assert_eq!(audit.events_for(AuditAction::AccountLocked).len(), 1);
    }

    #[test]
    fn failure_after_expiry_starts_fresh_count() {
        let (lockout, _, _) = lockout();
        let account = UserId::new();
        let now = Utc::now();
        for _ in 0..5 {
            lockout.record_failed_attempt(account, now).unwrap();
        }
        let after = now + Duration::minutes(20);
        assert_eq!(
            lockout.record_failed_attempt(account, after).unwrap(),
            LockoutStatus::Unlocked { failed_attempts: 1 }
        );
    }

    #[test]
    fn admin_unlock_is_audited_only_when_locked() {
        let (lockout, _, audit) = lockout();
        let (account, admin) = (UserId::new(), UserId::new());
        let now = Utc::now();

        lockout.record_failed_attempt(account, now).unwrap();
        assert!(!lockout.admin_unlock(account, admin, now).unwrap());
        assert!(audit.events_for(AuditAction::AccountUnlocked).is_empty());

        for _ in 0..5 {
            lockout.record_failed_attempt(account, now).unwrap();
        }
        assert!(lockout.admin_unlock(account, admin, now).unwrap());
        assert!(lockout.ensure_unlocked(account, now).is_ok());

        let events = audit.events_for(AuditAction::AccountUnlocked);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].actor_id, Some(admin));
        assert_eq!(events[0].subject_id, account);
    }

    #[test]
    fn purge_drops_only_expired_locks() {
        let (lockout, store, _) = lockout();
        let now = Utc::now();
        let (locked, counting) = (UserId::new(), UserId::new());
        for _ in 0..5 {
            lockout.record_failed_attempt(locked, now).unwrap();
        }
        lockout.record_failed_attempt(counting, now).unwrap();

        assert_eq!(lockout.purge_expired(now).unwrap(), 0);
        assert_eq!(lockout.purge_expired(now + Duration::minutes(15)).unwrap(), 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn concurrent_failures_are_not_lost() {
        let store = InMemoryLockoutStore::arc();
        let lockout = CredentialLockout::new(
            LockoutPolicy {
                threshold: 1_000,
                duration: Duration::minutes(15),
            },
            store,
            Arc::new(InMemoryAuditSink::new()),
        );
        let account = UserId::new();
        let now = Utc::now();

        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..50 {
                        lockout.record_failed_attempt(account, now).unwrap();
                    }
                });
            }
        });

        assert_eq!(
            lockout.check_locked(account, now).unwrap(),
            LockoutStatus::Unlocked { failed_attempts: 400 }
        );
    }

    #[test]
    fn huge_lock_duration_saturates_instead_of_overflowing() {
        let policy = LockoutPolicy {
            threshold: 1,
            duration: Duration::MAX,
        };
        let lockout = CredentialLockout::new(
            policy,
            InMemoryLockoutStore::arc(),
            Arc::new(InMemoryAuditSink::new()),
        );
        let account = UserId::new();
        let now = Utc::now();

        match lockout.record_failed_attempt(account, now).unwrap() {
            LockoutStatus::Locked { until, .. } => assert_eq!(until, DateTime::<Utc>::MAX_UTC),
            other => panic!("expected a lock, got {other:?}"),
        }
        assert!(lockout.ensure_unlocked(account, now).is_err());
    }

    proptest! {
        #[test]
        fn counter_is_monotonic_until_threshold(failures in 1u32..12) {
            let (lockout, _, _) = lockout();
            let account = UserId::new();
            let now = Utc::now();

            let mut last = 0;
            for _ in 0..failures {
                match lockout.record_failed_attempt(account, now).unwrap() {
                    LockoutStatus::Unlocked { failed_attempts } => {
                        prop_assert_eq!(failed_attempts, last + 1);
                        last = failed_attempts;
                    }
                    LockoutStatus::Locked { .. } => {
                        prop_assert!(last + 1 >= DEFAULT_THRESHOLD);
                        last = DEFAULT_THRESHOLD;
                    }
                }
            }
            prop_assert_eq!(
                lockout.check_locked(account, now).unwrap().is_locked(),
                failures >= DEFAULT_THRESHOLD
            );
        }
    }
}

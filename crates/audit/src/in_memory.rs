//! In-memory audit sink for tests and single-process deployments.

use std::collections::VecDeque;
use std::sync::{Mutex, mpsc};

use crate::event::{AuditAction, AuditEvent};
use crate::sink::{AuditError, AuditSink, AuditSubscription};

const DEFAULT_CAPACITY: usize = 10_000;

/// Fan-out sink with a bounded history.
///
/// - No IO / no async
/// - Oldest events are dropped once `capacity` is reached
/// - Dead subscribers are pruned on publish
#[derive(Debug)]
pub struct InMemoryAuditSink {
    subscribers: Mutex<Vec<mpsc::Sender<AuditEvent>>>,
    history: Mutex<VecDeque<AuditEvent>>,
    capacity: usize,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            history: Mutex::new(VecDeque::with_capacity(capacity.min(4096))),
            capacity: capacity.max(1),
        }
    }

    /// Snapshot of the retained events, oldest first.
    pub fn events(&self) -> Vec<AuditEvent> {
        match self.history.lock() {
            Ok(history) => history.iter().cloned().collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn events_for(&self, action: AuditAction) -> Vec<AuditEvent> {
        self.events().into_iter().filter(|e| e.action == action).collect()
    }

    pub fn len(&self) -> usize {
        self.history.lock().map(|h| h.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryAuditSink {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn publish(&self, event: AuditEvent) -> Result<(), AuditError> {
        {
            let mut history = self.history.lock().map_err(|_| AuditError::Poisoned)?;
            if history.len() >= self.capacity {
                history.pop_front();
            }
            history.push_back(event.clone());
        }

        let mut subs = self.subscribers.lock().map_err(|_| AuditError::Poisoned)?;
        subs.retain(|tx| tx.send(event.clone()).is_ok());

        Ok(())
    }

    fn subscribe(&self) -> AuditSubscription {
        let (tx, rx) = mpsc::channel();

        // A poisoned lock still yields a subscription; it just stays silent.
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.push(tx);
        }

        AuditSubscription::new(rx)
    }
}

//! Audit delivery contract.
//!
//! Emitters hand events to an [`AuditSink`] and move on. Delivery is best-effort
//! from the emitter's point of view: a failed publish is logged, it never changes
//! the security decision that produced the event.

use std::sync::Arc;
use std::sync::mpsc::{Receiver, RecvError, RecvTimeoutError, TryRecvError};
use std::time::Duration;

use thiserror::Error;

use crate::event::AuditEvent;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuditError {
    /// Publish failed due to internal lock poisoning.
    #[error("audit sink lock poisoned")]
    Poisoned,

    /// The downstream collaborator refused the event.
    #[error("audit delivery failed: {0}")]
    Delivery(String),
}

/// A live feed of audit events.
///
/// Each subscription receives every event published after it was created.
#[derive(Debug)]
pub struct AuditSubscription {
    receiver: Receiver<AuditEvent>,
}

impl AuditSubscription {
    pub fn new(receiver: Receiver<AuditEvent>) -> Self {
        Self { receiver }
    }

    /// Block until the next event is available.
    pub fn recv(&self) -> Result<AuditEvent, RecvError> {
        self.receiver.recv()
    }

    pub fn try_recv(&self) -> Result<AuditEvent, TryRecvError> {
        self.receiver.try_recv()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<AuditEvent, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Collect everything already queued without blocking.
    pub fn drain(&self) -> Vec<AuditEvent> {
        self.receiver.try_iter().collect()
    }
}

/// Destination for structured audit events.
///
/// Implementations must be safe to share across request threads.
pub trait AuditSink: Send + Sync {
    fn publish(&self, event: AuditEvent) -> Result<(), AuditError>;

    fn subscribe(&self) -> AuditSubscription;
}

impl<S> AuditSink for Arc<S>
where
    S: AuditSink + ?Sized,
{
    fn publish(&self, event: AuditEvent) -> Result<(), AuditError> {
        (**self).publish(event)
    }

    fn subscribe(&self) -> AuditSubscription {
        (**self).subscribe()
    }
}

/// Publish an event, logging (not propagating) delivery failures.
pub fn emit(sink: &dyn AuditSink, event: AuditEvent) {
    let action = event.action;
    let event_id = event.event_id;
    if let Err(err) = sink.publish(event) {
        tracing::error!(%action, %event_id, error = %err, "failed to deliver audit event");
    }
}

/// Sink that writes every event to the `gatekeep::audit` tracing target.
///
/// Useful when the log pipeline is the audit collaborator. It keeps no history,
/// so subscriptions never yield anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn publish(&self, event: AuditEvent) -> Result<(), AuditError> {
        let payload =
            serde_json::to_string(&event).map_err(|e| AuditError::Delivery(e.to_string()))?;
        tracing::info!(
            target: "gatekeep::audit",
            action = %event.action,
            severity = ?event.severity,
            subject_id = %event.subject_id,
            event = %payload,
            "audit event"
        );
        Ok(())
    }

    fn subscribe(&self) -> AuditSubscription {
        let (_tx, rx) = std::sync::mpsc::channel();
        AuditSubscription::new(rx)
    }
}

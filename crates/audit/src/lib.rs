//! `gatekeep-audit` — structured security audit events.
//!
//! The security core only *emits* events. Storing, querying and alerting on them
//! is the job of whatever consumes an [`AuditSink`].

pub mod event;
pub mod in_memory;
pub mod sink;

pub use event::{AuditAction, AuditEvent, Severity};
pub use in_memory::InMemoryAuditSink;
pub use sink::{AuditError, AuditSink, AuditSubscription, TracingAuditSink, emit};

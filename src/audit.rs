// Audit surface.
//
// The actual writer is an external collaborator; the core only defines the
// entry record and the sink trait, and emits one entry per terminal
// command outcome. `LogAuditSink` is the reference sink, writing through
// the `log` facade.

use chrono::{DateTime, Utc};
#[allow(unused_imports)]
use log::{info, warn};
use serde::Serialize;

use crate::{
  error::ErrorKind,
  radio::RadioId,
  telemetry::event::CorrelationId,
};

/// Outcome of a finished command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AuditOutcome {
  Success,
  Failure { kind: ErrorKind, message: String },
}

/// One terminal command outcome, success or failure.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
  pub timestamp: DateTime<Utc>,
  pub correlation_id: CorrelationId,
  pub radio_id: RadioId,
  pub operation: String,
  pub outcome: AuditOutcome,
  pub attempts: u32,
}

/// Consumer of audit entries, implemented by the hosting application.
pub trait AuditSink: Send + Sync {
  fn record(&self, entry: AuditEntry);
}

/// Reference sink: one log line per entry.
pub struct LogAuditSink;

impl AuditSink for LogAuditSink {
  fn record(&self, entry: AuditEntry) {
    match &entry.outcome {
      AuditOutcome::Success => info!(
        "audit: {} {} on {} ok after {} attempt(s)",
        entry.correlation_id, entry.operation, entry.radio_id, entry.attempts
      ),
      AuditOutcome::Failure { kind, message } => warn!(
        "audit: {} {} on {} failed {kind} after {} attempt(s): {message}",
        entry.correlation_id, entry.operation, entry.radio_id, entry.attempts
      ),
    }
  }
}

/// Sink used when the application does not care about auditing.
pub struct NullAuditSink;

impl AuditSink for NullAuditSink {
  fn record(&self, _entry: AuditEntry) {}
}

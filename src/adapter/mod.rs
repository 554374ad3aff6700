// The contract a vendor radio driver satisfies.
//
// One adapter instance represents one physical (or mock) radio. The core
// guarantees it never issues concurrent calls against the same instance;
// implementations must still be `Send + Sync` because distinct radios run
// fully in parallel. Adapters never retry internally; the orchestrator owns
// the retry loop.

pub mod mock;

use thiserror::Error;

use crate::{
  clock::{CancelToken, Deadline},
  error::ErrorKind,
  radio::{Capability, Frequency, PowerDbm, RadioState},
  telemetry::event::CorrelationId,
};

/// Per-call context: deadline, cancellation, and the correlation id of the
/// originating command (propagated where the vendor protocol supports it).
#[derive(Debug, Clone)]
pub struct OpContext {
  pub deadline: Deadline,
  pub cancel: CancelToken,
  pub correlation_id: Option<CorrelationId>,
}

impl OpContext {
  pub fn new(deadline: Deadline, cancel: CancelToken) -> Self {
    Self {
      deadline,
      cancel,
      correlation_id: None,
    }
  }

  pub fn with_correlation(mut self, correlation_id: CorrelationId) -> Self {
    self.correlation_id = Some(correlation_id);
    self
  }
}

/// What an adapter operation can fail with: either a kind from the core
/// taxonomy, or an opaque vendor code that the orchestrator classifies
/// through the configured mapping table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdapterError {
  #[error("{kind}: {message}")]
  Classified { kind: ErrorKind, message: String },
  #[error("vendor error {code}: {message}")]
  Vendor { code: String, message: String },
}

impl AdapterError {
  pub fn classified(kind: ErrorKind, message: impl Into<String>) -> Self {
    Self::Classified {
      kind,
      message: message.into(),
    }
  }

  pub fn busy(message: impl Into<String>) -> Self {
    Self::classified(ErrorKind::Busy, message)
  }

  pub fn unavailable(message: impl Into<String>) -> Self {
    Self::classified(ErrorKind::Unavailable, message)
  }

  pub fn invalid_range(message: impl Into<String>) -> Self {
    Self::classified(ErrorKind::InvalidRange, message)
  }

  pub fn timeout(message: impl Into<String>) -> Self {
    Self::classified(ErrorKind::Timeout, message)
  }

  pub fn internal(message: impl Into<String>) -> Self {
    Self::classified(ErrorKind::Internal, message)
  }

  pub fn vendor(code: impl Into<String>, message: impl Into<String>) -> Self {
    Self::Vendor {
      code: code.into(),
      message: message.into(),
    }
  }

  /// The kind the adapter itself declared, if any.
  pub fn kind_hint(&self) -> Option<ErrorKind> {
    match self {
      AdapterError::Classified { kind, .. } => Some(*kind),
      AdapterError::Vendor { .. } => None,
    }
  }
}

pub type AdapterResult<T> = Result<T, AdapterError>;

/// Uniform operations a vendor driver exposes. Every call is bounded by the
/// context's deadline and cancellation token.
pub trait RadioAdapter: Send + Sync {
  /// Band plan, power range, and vendor metadata of this radio.
  fn get_capabilities(&self, ctx: &OpContext) -> AdapterResult<Capability>;

  /// Full current state.
  fn get_state(&self, ctx: &OpContext) -> AdapterResult<RadioState>;

  fn set_power(&self, power: PowerDbm, ctx: &OpContext) -> AdapterResult<()>;

  fn set_frequency(&self, frequency: Frequency, ctx: &OpContext) -> AdapterResult<()>;

  /// Read back the currently applied transmit power.
  fn read_power_actual(&self, ctx: &OpContext) -> AdapterResult<PowerDbm>;
}

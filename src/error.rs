// Error taxonomy of the control core.
//
// All failures inside the core propagate as values of this closed set of
// kinds. The orchestrator is the only component that retries; everything
// else surfaces the kind unchanged to its caller.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::adapter::AdapterError;

/// The closed set of error categories used throughout the core.
///
/// Each kind maps deterministically to a retry policy and to a transport
/// status code. Transport adapters must not invent kinds of their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
  /// Unknown radio, or a lookup against capabilities that were never loaded.
  NotFound,
  /// Argument outside the radio's declared capability, or malformed input.
  InvalidRange,
  /// The adapter temporarily rejected the operation.
  Busy,
  /// The adapter or the radio behind it is unreachable.
  Unavailable,
  /// A deadline elapsed, either locally or inside the adapter.
  Timeout,
  /// Invariant violation or an adapter error we cannot classify.
  Internal,
}

impl ErrorKind {
  /// Whether the orchestrator may retry an operation that failed with this
  /// kind, provided attempts and deadline budget remain.
  pub fn is_retriable(self) -> bool {
    matches!(
      self,
      ErrorKind::Busy | ErrorKind::Unavailable | ErrorKind::Timeout
    )
  }

  /// The HTTP status a transport adapter must answer with for this kind.
  pub fn http_status(self) -> u16 {
    match self {
      ErrorKind::NotFound => 404,
      ErrorKind::InvalidRange => 400,
      ErrorKind::Busy | ErrorKind::Unavailable => 503,
      ErrorKind::Timeout => 504,
      ErrorKind::Internal => 500,
    }
  }

  /// Stable wire name, e.g. `"INVALID_RANGE"`.
  pub fn as_str(self) -> &'static str {
    match self {
      ErrorKind::NotFound => "NOT_FOUND",
      ErrorKind::InvalidRange => "INVALID_RANGE",
      ErrorKind::Busy => "BUSY",
      ErrorKind::Unavailable => "UNAVAILABLE",
      ErrorKind::Timeout => "TIMEOUT",
      ErrorKind::Internal => "INTERNAL",
    }
  }
}

impl std::fmt::Display for ErrorKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// The single error type crossing the core's public API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct CoreError {
  pub kind: ErrorKind,
  pub message: String,
  /// Optional machine-oriented detail, e.g. the last adapter error text of
  /// an exhausted retry budget.
  pub detail: Option<String>,
}

impl CoreError {
  pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
    Self {
      kind,
      message: message.into(),
      detail: None,
    }
  }

  pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
    self.detail = Some(detail.into());
    self
  }

  pub fn not_found(message: impl Into<String>) -> Self {
    Self::new(ErrorKind::NotFound, message)
  }

  pub fn invalid_range(message: impl Into<String>) -> Self {
    Self::new(ErrorKind::InvalidRange, message)
  }

  pub fn timeout(message: impl Into<String>) -> Self {
    Self::new(ErrorKind::Timeout, message)
  }

  pub fn internal(message: impl Into<String>) -> Self {
    Self::new(ErrorKind::Internal, message)
  }
}

pub type CoreResult<T> = Result<T, CoreError>;

/// Vendor error code to [`ErrorKind`] classification table.
///
/// The table is loaded from a mapping file by an external configuration
/// collaborator and handed in; the core only ever consumes the resulting
/// kinds. An adapter error that names a kind directly bypasses the table;
/// an unmapped vendor code classifies as `INTERNAL`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct AdapterErrorMap {
  codes: HashMap<String, ErrorKind>,
}

impl AdapterErrorMap {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn from_pairs<I, S>(pairs: I) -> Self
  where
    I: IntoIterator<Item = (S, ErrorKind)>,
    S: Into<String>,
  {
    Self {
      codes: pairs.into_iter().map(|(c, k)| (c.into(), k)).collect(),
    }
  }

  pub fn classify(&self, error: &AdapterError) -> ErrorKind {
    match error {
      AdapterError::Classified { kind, .. } => *kind,
      AdapterError::Vendor { code, .. } => {
        self.codes.get(code).copied().unwrap_or(ErrorKind::Internal)
      }
    }
  }
}

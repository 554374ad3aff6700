// Telemetry: the event model, the replay ring, per-subscriber sinks, and
// the hub that ties them together.

pub mod event;
pub mod hub;
pub(crate) mod ring;
pub mod sink;

use self::event::RadioSummary;

/// Where the hub obtains the `ready` snapshot embedded in every new
/// subscription. The radio manager implements this; the indirection keeps
/// the hub free of a dependency back onto the registry (the hub is
/// constructed first).
pub trait SnapshotSource: Send + Sync {
  /// Current summary of all known radios.
  fn snapshot(&self) -> Vec<RadioSummary>;
}

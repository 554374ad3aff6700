// Telemetry event model.
//
// Events are immutable once published. The hub assigns the id and the
// timestamp; everything else is provided by the publisher as an
// `EventDraft`. Payloads are typed; the transport adapter turns them into
// JSON frames (`id:`/`event:`/`data:`) for SSE delivery.

use enumflags2::{bitflags, BitFlags};
use serde::Serialize;

use crate::{
  error::{CoreError, CoreResult, ErrorKind},
  radio::{ChannelIndex, Frequency, PowerDbm, RadioId, RadioState},
};

/// Monotonic, hub-global event identifier. Strictly increasing across the
/// lifetime of one hub; independent hubs number independently.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize,
)]
#[serde(transparent)]
pub struct EventId(pub u64);

impl EventId {
  pub fn value(self) -> u64 {
    self.0
  }
}

impl std::fmt::Display for EventId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Caller-supplied identifier carried through command execution, telemetry,
/// and audit. Must be non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
  pub fn new(id: impl Into<String>) -> CoreResult<Self> {
    let id = id.into();
    if id.is_empty() {
      return Err(CoreError::invalid_range("correlation id must be non-empty"));
    }
    Ok(Self(id))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl std::fmt::Display for CorrelationId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(&self.0)
  }
}

/// Event types recognised on the stream. A flags enum so subscriber filters
/// are cheap sets.
#[bitflags]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
  Ready,
  Heartbeat,
  PowerChanged,
  ChannelChanged,
  StateSnapshot,
  Error,
}

impl EventKind {
  /// The `event:` field value of the SSE frame.
  pub fn as_str(self) -> &'static str {
    match self {
      EventKind::Ready => "ready",
      EventKind::Heartbeat => "heartbeat",
      EventKind::PowerChanged => "powerChanged",
      EventKind::ChannelChanged => "channelChanged",
      EventKind::StateSnapshot => "stateSnapshot",
      EventKind::Error => "error",
    }
  }
}

impl std::fmt::Display for EventKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

impl std::str::FromStr for EventKind {
  type Err = CoreError;

  fn from_str(s: &str) -> CoreResult<Self> {
    match s {
      "ready" => Ok(EventKind::Ready),
      "heartbeat" => Ok(EventKind::Heartbeat),
      "powerChanged" => Ok(EventKind::PowerChanged),
      "channelChanged" => Ok(EventKind::ChannelChanged),
      "stateSnapshot" => Ok(EventKind::StateSnapshot),
      "error" => Ok(EventKind::Error),
      other => Err(CoreError::invalid_range(format!(
        "unknown event type {other:?}"
      ))),
    }
  }
}

/// Set of event kinds a subscriber wants delivered live.
pub type EventFilter = BitFlags<EventKind>;

/// Parse a transport-supplied filter expression, a comma-separated list of
/// event type names (e.g. `"powerChanged,channelChanged,error"`). An empty
/// expression means no filter. Unknown names are `INVALID_RANGE`.
pub fn parse_event_filter(expression: &str) -> CoreResult<Option<EventFilter>> {
  let mut filter = EventFilter::empty();
  for name in expression.split(',').map(str::trim).filter(|s| !s.is_empty()) {
    filter |= name.parse::<EventKind>()?;
  }
  if filter.is_empty() {
    Ok(None)
  } else {
    Ok(Some(filter))
  }
}

/// One radio row of the `ready` snapshot. `state` is absent for a radio
/// that has never been read or mutated.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RadioSummary {
  pub radio_id: RadioId,
  pub model: String,
  pub active: bool,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub state: Option<RadioState>,
}

/// Stream-level error conditions signalled to a single subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum StreamErrorKind {
  /// The subscriber's delivery queue overflowed; it is being closed.
  SlowConsumer,
  /// The requested Last-Event-ID has fallen out of the replay ring.
  ReplayGap,
}

/// The `kind` of an `error` event: either a stream condition or a command
/// error from the taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum TelemetryErrorKind {
  Stream(StreamErrorKind),
  Command(ErrorKind),
}

fn is_false(b: &bool) -> bool {
  !*b
}

/// Typed payloads, one per event kind.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EventPayload {
  Ready(ReadyPayload),
  Heartbeat(HeartbeatPayload),
  PowerChanged(PowerChangedPayload),
  ChannelChanged(ChannelChangedPayload),
  StateSnapshot(StateSnapshotPayload),
  Error(ErrorPayload),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadyPayload {
  pub radios: Vec<RadioSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeartbeatPayload {}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PowerChangedPayload {
  pub radio_id: RadioId,
  pub power_dbm: PowerDbm,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub correlation_id: Option<CorrelationId>,
  pub attempt: u32,
  #[serde(skip_serializing_if = "is_false")]
  pub unverified: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelChangedPayload {
  pub radio_id: RadioId,
  pub channel_index: ChannelIndex,
  pub frequency_mhz: Frequency,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub correlation_id: Option<CorrelationId>,
  pub attempt: u32,
  #[serde(skip_serializing_if = "is_false")]
  pub unverified: bool,
}

/// Why a `stateSnapshot` was published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SnapshotMarker {
  /// The active radio selection changed to this radio.
  ActiveChanged,
  /// The radio left the registry.
  Unavailable,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshotPayload {
  pub radio_id: RadioId,
  pub marker: SnapshotMarker,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub state: Option<RadioState>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
  pub kind: TelemetryErrorKind,
  pub message: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub correlation_id: Option<CorrelationId>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub radio_id: Option<RadioId>,
  /// Oldest id still in the ring; present on `replayGap`.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub oldest_id: Option<EventId>,
}

/// A published event: id and timestamp assigned by the hub, immutable
/// thereafter.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryEvent {
  pub id: EventId,
  #[serde(rename = "type")]
  pub kind: EventKind,
  pub timestamp: chrono::DateTime<chrono::Utc>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub correlation_id: Option<CorrelationId>,
  pub payload: EventPayload,
}

impl TelemetryEvent {
  pub fn matches(&self, filter: Option<EventFilter>) -> bool {
    match filter {
      None => true,
      Some(f) => f.contains(self.kind),
    }
  }
}

/// What a publisher hands to the hub: everything except id and timestamp.
#[derive(Debug, Clone)]
pub struct EventDraft {
  pub kind: EventKind,
  pub correlation_id: Option<CorrelationId>,
  pub payload: EventPayload,
}

impl EventDraft {
  pub fn heartbeat() -> Self {
    Self {
      kind: EventKind::Heartbeat,
      correlation_id: None,
      payload: EventPayload::Heartbeat(HeartbeatPayload {}),
    }
  }

  pub fn power_changed(payload: PowerChangedPayload) -> Self {
    Self {
      kind: EventKind::PowerChanged,
      correlation_id: payload.correlation_id.clone(),
      payload: EventPayload::PowerChanged(payload),
    }
  }

  pub fn channel_changed(payload: ChannelChangedPayload) -> Self {
    Self {
      kind: EventKind::ChannelChanged,
      correlation_id: payload.correlation_id.clone(),
      payload: EventPayload::ChannelChanged(payload),
    }
  }

  pub fn state_snapshot(payload: StateSnapshotPayload) -> Self {
    Self {
      kind: EventKind::StateSnapshot,
      correlation_id: None,
      payload: EventPayload::StateSnapshot(payload),
    }
  }

  pub fn error(payload: ErrorPayload) -> Self {
    Self {
      kind: EventKind::Error,
      correlation_id: payload.correlation_id.clone(),
      payload: EventPayload::Error(payload),
    }
  }
}

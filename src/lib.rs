//! Transport-agnostic core of a radio control container.
//!
//! The crate owns three problems and delegates everything else to the
//! hosting application:
//!
//! * a [`command::orchestrator::Orchestrator`] that mediates all mutating
//!   operations against radio adapters, with per-radio mutual exclusion,
//!   bounded retries with exponential backoff and jitter, a classified
//!   error taxonomy, and correlation-id propagation;
//! * a [`telemetry::hub::TelemetryHub`] that delivers an ordered,
//!   resumable event stream to many concurrent subscribers with per-client
//!   backpressure, monotonic event ids, and Last-Event-ID replay from a
//!   bounded ring;
//! * a [`radio::manager::RadioManager`] holding the set of known radios,
//!   their loaded capabilities, and the active selection, behind the
//!   [`adapter::RadioAdapter`] contract that vendor drivers implement.
//!
//! HTTP/SSE transport, JSON encoding, audit log writers, and configuration
//! loading are collaborators: they call the surfaces exposed here (and
//! implement [`audit::AuditSink`]) but live outside the crate. The core
//! keeps no state across restarts.
//!
//! ```
//! use std::{sync::Arc, time::Duration};
//! use rcc_core::{
//!   adapter::{mock::MockRadioAdapter, RadioAdapter},
//!   command::{CommandOp, CommandRequest},
//!   Core, CorrelationId, PowerDbm, RadioId,
//! };
//!
//! let core = Core::builder().build().unwrap();
//! let adapter = Arc::new(MockRadioAdapter::builder("silvus-001").build().unwrap());
//! core.manager().register("silvus-001", "mock", adapter as Arc<dyn RadioAdapter>).unwrap();
//! core.manager()
//!   .load_capabilities(&RadioId::from("silvus-001"), Duration::from_secs(1))
//!   .unwrap();
//!
//! let _subscription = core.hub().subscribe(None, None).unwrap();
//! let request = CommandRequest::new(
//!   CorrelationId::new("req-1").unwrap(),
//!   "silvus-001",
//!   CommandOp::SetPower(PowerDbm(10)),
//! );
//! let outcome = core.orchestrator().execute(request).unwrap();
//! assert_eq!(outcome.power_dbm, Some(PowerDbm(10)));
//! core.shutdown();
//! ```

pub mod adapter;
pub mod audit;
pub mod clock;
pub mod command;
pub mod core;
pub mod error;
pub mod radio;
pub mod telemetry;
pub mod timing;

pub use crate::{
  clock::{CancelToken, Clock, Deadline, ManualClock, SleepOutcome, SystemClock, Timestamp},
  command::{CommandOp, CommandOutcome, CommandRequest},
  core::{Core, CoreBuilder},
  error::{AdapterErrorMap, CoreError, CoreResult, ErrorKind},
  radio::{
    BandPlan, Capability, ChannelEntry, ChannelIndex, Frequency, PowerDbm, RadioDescription,
    RadioId, RadioState,
  },
  telemetry::{
    event::{
      parse_event_filter, CorrelationId, EventDraft, EventFilter, EventId, EventKind,
      TelemetryEvent,
    },
    hub::{SubscriberId, Subscription, TelemetryHub},
  },
  timing::{TimingProfile, TimingProfileBuilder},
};

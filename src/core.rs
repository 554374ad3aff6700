// Wiring of the core components.
//
// Construction order matters: the hub first (it depends on nothing), then
// the manager with a hub handle, then the manager is registered as the
// hub's snapshot source, then the orchestrator receives both. The builder
// encodes that order so applications cannot get it wrong.

use std::sync::{Arc, Weak};

#[allow(unused_imports)]
use log::{debug, info};

use crate::{
  audit::{AuditSink, LogAuditSink},
  clock::{Clock, SystemClock},
  command::orchestrator::Orchestrator,
  error::{AdapterErrorMap, CoreResult},
  radio::manager::RadioManager,
  telemetry::{hub::TelemetryHub, SnapshotSource},
  timing::TimingProfile,
};

pub struct CoreBuilder {
  profile: TimingProfile,
  clock: Arc<dyn Clock>,
  error_map: AdapterErrorMap,
  audit: Arc<dyn AuditSink>,
  start_heartbeat: bool,
}

impl CoreBuilder {
  pub fn new() -> Self {
    Self {
      profile: TimingProfile::default(),
      clock: Arc::new(SystemClock::new()),
      error_map: AdapterErrorMap::new(),
      audit: Arc::new(LogAuditSink),
      start_heartbeat: true,
    }
  }

  pub fn timing(mut self, profile: TimingProfile) -> Self {
    self.profile = profile;
    self
  }

  pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = clock;
    self
  }

  pub fn error_map(mut self, error_map: AdapterErrorMap) -> Self {
    self.error_map = error_map;
    self
  }

  pub fn audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
    self.audit = audit;
    self
  }

  /// Disable the heartbeat ticker, for tests that drive the hub manually.
  pub fn heartbeat(mut self, enabled: bool) -> Self {
    self.start_heartbeat = enabled;
    self
  }

  pub fn build(self) -> CoreResult<Core> {
    self.profile.validate()?;
    let hub = TelemetryHub::new(&self.profile, Arc::clone(&self.clock));
    let error_map = Arc::new(self.error_map);
    let manager = Arc::new(RadioManager::new(
      hub.clone(),
      Arc::clone(&self.clock),
      Arc::clone(&error_map),
    ));
    let source: Arc<dyn SnapshotSource> = manager.clone();
    let weak: Weak<dyn SnapshotSource> = Arc::downgrade(&source);
    drop(source);
    hub.set_snapshot_source(weak);
    if self.start_heartbeat {
      hub.start_heartbeat()?;
    }
    let orchestrator = Orchestrator::new(
      Arc::clone(&manager),
      hub.clone(),
      self.clock,
      self.profile.clone(),
      error_map,
      self.audit,
    );
    info!("control core assembled");
    Ok(Core {
      profile: self.profile,
      hub,
      manager,
      orchestrator,
    })
  }
}

impl Default for CoreBuilder {
  fn default() -> Self {
    Self::new()
  }
}

/// The assembled control core: registry, hub, and orchestrator, sharing
/// one clock and one timing profile.
pub struct Core {
  profile: TimingProfile,
  hub: TelemetryHub,
  manager: Arc<RadioManager>,
  orchestrator: Orchestrator,
}

impl Core {
  pub fn builder() -> CoreBuilder {
    CoreBuilder::new()
  }

  pub fn profile(&self) -> &TimingProfile {
    &self.profile
  }

  pub fn hub(&self) -> &TelemetryHub {
    &self.hub
  }

  pub fn manager(&self) -> &Arc<RadioManager> {
    &self.manager
  }

  pub fn orchestrator(&self) -> &Orchestrator {
    &self.orchestrator
  }

  /// Stop the hub: halt heartbeats, drain subscribers within the profile's
  /// grace period, close them all.
  pub fn shutdown(&self) {
    self.hub.stop(self.profile.shutdown_grace());
  }
}

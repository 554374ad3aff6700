// Registry of known radios, their capability cache, and the single active
// selection.
//
// The registry map and the active pointer sit under one read/write lock;
// each entry guards its own capability/state fields and owns the command
// gate the orchestrator serialises through. Telemetry is always published
// after the registry lock is released, so the hub can take its own lock and
// ask us for a snapshot without a lock cycle.

use std::{
  collections::HashMap,
  sync::{Arc, Mutex, RwLock},
  time::Duration,
};

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::{
  adapter::{OpContext, RadioAdapter},
  clock::{CancelToken, Clock, Deadline},
  error::{AdapterErrorMap, CoreError, CoreResult},
  telemetry::{
    event::{EventDraft, RadioSummary, SnapshotMarker, StateSnapshotPayload},
    hub::TelemetryHub,
    SnapshotSource,
  },
};
use super::{
  gate::CommandGate, Capability, ChannelIndex, Frequency, RadioDescription, RadioId, RadioState,
};

struct RadioShared {
  capability: Option<Capability>,
  last_state: Option<RadioState>,
  /// Cancellation token of the command currently holding the gate, so a
  /// deregistration can abort it.
  in_flight: Option<CancelToken>,
}

/// One registered radio. Shared between the manager and the orchestrator.
pub struct RadioEntry {
  id: RadioId,
  model: String,
  adapter: Arc<dyn RadioAdapter>,
  gate: CommandGate,
  shared: Mutex<RadioShared>,
}

impl RadioEntry {
  pub fn id(&self) -> &RadioId {
    &self.id
  }

  pub fn model(&self) -> &str {
    &self.model
  }

  pub fn adapter(&self) -> &Arc<dyn RadioAdapter> {
    &self.adapter
  }

  pub(crate) fn gate(&self) -> &CommandGate {
    &self.gate
  }

  pub fn capability(&self) -> Option<Capability> {
    self.shared.lock().unwrap().capability.clone()
  }

  pub fn last_state(&self) -> Option<RadioState> {
    self.shared.lock().unwrap().last_state.clone()
  }

  pub(crate) fn set_last_state(&self, state: RadioState) {
    self.shared.lock().unwrap().last_state = Some(state);
  }

  pub(crate) fn register_in_flight(&self, token: CancelToken) {
    self.shared.lock().unwrap().in_flight = Some(token);
  }

  pub(crate) fn clear_in_flight(&self) {
    self.shared.lock().unwrap().in_flight = None;
  }

  fn cancel_in_flight(&self) {
    if let Some(token) = self.shared.lock().unwrap().in_flight.take() {
      token.cancel();
    }
  }
}

struct Registry {
  radios: HashMap<RadioId, Arc<RadioEntry>>,
  active: Option<RadioId>,
}

pub struct RadioManager {
  registry: RwLock<Registry>,
  hub: TelemetryHub,
  clock: Arc<dyn Clock>,
  error_map: Arc<AdapterErrorMap>,
}

impl RadioManager {
  pub fn new(hub: TelemetryHub, clock: Arc<dyn Clock>, error_map: Arc<AdapterErrorMap>) -> Self {
    Self {
      registry: RwLock::new(Registry {
        radios: HashMap::new(),
        active: None,
      }),
      hub,
      clock,
      error_map,
    }
  }

  /// Add a radio with no capabilities loaded yet.
  pub fn register(
    &self,
    id: impl Into<RadioId>,
    model: impl Into<String>,
    adapter: Arc<dyn RadioAdapter>,
  ) -> CoreResult<()> {
    let id = id.into();
    let mut registry = self.registry.write().unwrap();
    if registry.radios.contains_key(&id) {
      return Err(CoreError::internal(format!("radio {id} already registered")));
    }
    let entry = Arc::new(RadioEntry {
      id: id.clone(),
      model: model.into(),
      adapter,
      gate: CommandGate::new(),
      shared: Mutex::new(RadioShared {
        capability: None,
        last_state: None,
        in_flight: None,
      }),
    });
    registry.radios.insert(id.clone(), entry);
    info!("registered radio {id}");
    Ok(())
  }

  /// Remove a radio. Any command currently holding its gate is cancelled
  /// (best effort), and an `unavailable` snapshot is published.
  pub fn deregister(&self, id: &RadioId) -> CoreResult<()> {
    let entry = {
      let mut registry = self.registry.write().unwrap();
      let entry = registry
        .radios
        .remove(id)
        .ok_or_else(|| CoreError::not_found(format!("radio {id} not registered")))?;
      if registry.active.as_ref() == Some(id) {
        registry.active = None;
      }
      entry
    };
    entry.cancel_in_flight();
    self.hub.publish(EventDraft::state_snapshot(StateSnapshotPayload {
      radio_id: id.clone(),
      marker: SnapshotMarker::Unavailable,
      state: entry.last_state(),
    }));
    info!("deregistered radio {id}");
    Ok(())
  }

  /// Call the adapter for capabilities under `deadline` and atomically
  /// replace the cached record.
  pub fn load_capabilities(&self, id: &RadioId, deadline: Duration) -> CoreResult<Capability> {
    let entry = self.entry(id)?;
    let ctx = OpContext::new(
      Deadline::after(self.clock.as_ref(), deadline),
      CancelToken::new(),
    );
    let capability = entry.adapter.get_capabilities(&ctx).map_err(|e| {
      warn!("capability load for {id} failed: {e}");
      CoreError::new(self.error_map.classify(&e), e.to_string())
    })?;
    entry.shared.lock().unwrap().capability = Some(capability.clone());
    debug!(
      "loaded capabilities for {id}: {} channels, power [{}, {}]",
      capability.band_plan.len(),
      capability.min_dbm.dbm(),
      capability.max_dbm.dbm()
    );
    Ok(capability)
  }

  /// Select the active radio and announce it on the stream.
  pub fn set_active(&self, id: &RadioId) -> CoreResult<()> {
    let state = {
      let mut registry = self.registry.write().unwrap();
      let entry = registry
        .radios
        .get(id)
        .ok_or_else(|| CoreError::not_found(format!("radio {id} not registered")))?
        .clone();
      registry.active = Some(id.clone());
      entry.last_state()
    };
    self.hub.publish(EventDraft::state_snapshot(StateSnapshotPayload {
      radio_id: id.clone(),
      marker: SnapshotMarker::ActiveChanged,
      state,
    }));
    info!("active radio is now {id}");
    Ok(())
  }

  pub fn get_active(&self) -> Option<RadioId> {
    self.registry.read().unwrap().active.clone()
  }

  /// All registered radios, ordered by id.
  pub fn list(&self) -> Vec<RadioDescription> {
    let registry = self.registry.read().unwrap();
    let mut rows: Vec<RadioDescription> = registry
      .radios
      .values()
      .map(|e| RadioDescription {
        id: e.id.clone(),
        model: e.model.clone(),
        active: registry.active.as_ref() == Some(&e.id),
      })
      .collect();
    rows.sort_by(|a, b| a.id.cmp(&b.id));
    rows
  }

  pub fn lookup(&self, id: &RadioId) -> CoreResult<RadioDescription> {
    let registry = self.registry.read().unwrap();
    let entry = registry
      .radios
      .get(id)
      .ok_or_else(|| CoreError::not_found(format!("radio {id} not registered")))?;
    Ok(RadioDescription {
      id: entry.id.clone(),
      model: entry.model.clone(),
      active: registry.active.as_ref() == Some(id),
    })
  }

  /// Read the live state through the adapter (no command gate; reads do not
  /// serialise against mutations) and refresh the cache.
  pub fn read_state(&self, id: &RadioId, deadline: Duration) -> CoreResult<RadioState> {
    let entry = self.entry(id)?;
    let ctx = OpContext::new(
      Deadline::after(self.clock.as_ref(), deadline),
      CancelToken::new(),
    );
    let mut state = entry
      .adapter
      .get_state(&ctx)
      .map_err(|e| CoreError::new(self.error_map.classify(&e), e.to_string()))?;
    // the registry id is authoritative, whatever the adapter believes
    state.radio_id = entry.id.clone();
    entry.set_last_state(state.clone());
    Ok(state)
  }

  /// The only permitted channel-to-frequency conversion path.
  pub fn channel_index_to_frequency(
    &self,
    id: &RadioId,
    index: ChannelIndex,
  ) -> CoreResult<Frequency> {
    self
      .capability_of(id)?
      .band_plan
      .frequency_of(index)
      .ok_or_else(|| CoreError::invalid_range(format!("{index} not in band plan of {id}")))
  }

  /// The only permitted frequency-to-channel conversion path.
  pub fn frequency_to_channel_index(
    &self,
    id: &RadioId,
    frequency: Frequency,
  ) -> CoreResult<ChannelIndex> {
    self
      .capability_of(id)?
      .band_plan
      .index_of(frequency)
      .ok_or_else(|| CoreError::invalid_range(format!("{frequency} not in band plan of {id}")))
  }

  /// Loaded capability of a radio; `NOT_FOUND` when the radio is unknown or
  /// its capabilities were never loaded.
  pub fn capability_of(&self, id: &RadioId) -> CoreResult<Capability> {
    self
      .entry(id)?
      .capability()
      .ok_or_else(|| CoreError::not_found(format!("capabilities of {id} not loaded")))
  }

  pub(crate) fn entry(&self, id: &RadioId) -> CoreResult<Arc<RadioEntry>> {
    self
      .registry
      .read()
      .unwrap()
      .radios
      .get(id)
      .cloned()
      .ok_or_else(|| CoreError::not_found(format!("radio {id} not registered")))
  }
}

impl SnapshotSource for RadioManager {
  fn snapshot(&self) -> Vec<RadioSummary> {
    let registry = self.registry.read().unwrap();
    let mut rows: Vec<RadioSummary> = registry
      .radios
      .values()
      .map(|e| RadioSummary {
        radio_id: e.id.clone(),
        model: e.model.clone(),
        active: registry.active.as_ref() == Some(&e.id),
        state: e.last_state(),
      })
      .collect();
    rows.sort_by(|a, b| a.radio_id.cmp(&b.radio_id));
    rows
  }
}

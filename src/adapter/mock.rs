// Reference mock adapter.
//
// Configurable with a fixed band plan, a starting state, and an injectable
// fault mode. The mock enforces its own bounds and stays internally
// consistent under concurrent use, even though the core never exercises
// that path for a single radio.

use std::{
  collections::VecDeque,
  sync::{Arc, Mutex},
  time::Duration,
};

#[allow(unused_imports)]
use log::{debug, trace, warn};

use crate::{
  clock::{Clock, SystemClock, Timestamp},
  error::{CoreError, CoreResult},
  radio::{BandPlan, Capability, ChannelEntry, ChannelIndex, Frequency, PowerDbm, RadioId, RadioState},
};
use super::{AdapterError, AdapterResult, OpContext, RadioAdapter};

/// Behaviour selected for mock operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultMode {
  /// Operate normally, enforcing band plan and power bounds.
  Ok,
  /// Reject with `BUSY`.
  Busy,
  /// Reject with `UNAVAILABLE`.
  Unavailable,
  /// Reject with `INVALID_RANGE` regardless of the argument.
  InvalidRange,
  /// Block until the call's deadline (or cancellation), then fail with
  /// `TIMEOUT`.
  Timeout,
  /// Fail with an unclassified vendor code, exercising the mapping table.
  Vendor(String),
}

/// One recorded adapter call, for exclusivity assertions in tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallRecord {
  pub operation: &'static str,
  pub start: Timestamp,
  pub end: Timestamp,
}

struct MockInner {
  power: PowerDbm,
  channel: ChannelEntry,
  steady: FaultMode,
  script: VecDeque<FaultMode>,
  calls: Vec<CallRecord>,
}

pub struct MockRadioAdapter {
  id: RadioId,
  clock: Arc<dyn Clock>,
  capability: Capability,
  op_latency: Duration,
  inner: Mutex<MockInner>,
}

impl std::fmt::Debug for MockRadioAdapter {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("MockRadioAdapter").field("id", &self.id).finish()
  }
}

impl MockRadioAdapter {
  pub fn builder(id: impl Into<RadioId>) -> MockRadioBuilder {
    MockRadioBuilder {
      id: id.into(),
      capability: None,
      initial_power: None,
      initial_channel: None,
      steady: FaultMode::Ok,
      clock: None,
      op_latency: Duration::ZERO,
    }
  }

  /// Replace the steady fault mode applied when the script is empty.
  pub fn set_fault_mode(&self, mode: FaultMode) {
    self.inner.lock().unwrap().steady = mode;
  }

  /// Queue a one-shot fault consumed by the next operation. Queued faults
  /// take precedence over the steady mode.
  pub fn push_fault(&self, mode: FaultMode) {
    self.inner.lock().unwrap().script.push_back(mode);
  }

  /// Every call made so far, in completion order.
  pub fn calls(&self) -> Vec<CallRecord> {
    self.inner.lock().unwrap().calls.clone()
  }

  fn run<T>(
    &self,
    operation: &'static str,
    ctx: &OpContext,
    op: impl FnOnce(&mut MockInner) -> AdapterResult<T>,
  ) -> AdapterResult<T> {
    let start = self.clock.now();
    let fault = {
      let mut inner = self.inner.lock().unwrap();
      inner.script.pop_front().unwrap_or_else(|| inner.steady.clone())
    };
    let result = if ctx.cancel.is_cancelled() || ctx.deadline.has_expired(self.clock.as_ref()) {
      Err(AdapterError::timeout(format!("{operation}: deadline exceeded before call")))
    } else {
      match fault {
        FaultMode::Ok => {
          // simulated vendor processing time, outside the state lock
          if !self.op_latency.is_zero() {
            let _ = self.clock.sleep(self.op_latency, &ctx.cancel);
          }
          let mut inner = self.inner.lock().unwrap();
          op(&mut inner)
        }
        FaultMode::Busy => Err(AdapterError::busy(format!("{operation}: radio busy"))),
        FaultMode::Unavailable => {
          Err(AdapterError::unavailable(format!("{operation}: radio unreachable")))
        }
        FaultMode::InvalidRange => {
          Err(AdapterError::invalid_range(format!("{operation}: rejected by radio")))
        }
        FaultMode::Timeout => {
          if let Some(remaining) = ctx.deadline.remaining(self.clock.as_ref()) {
            let _ = self.clock.sleep(remaining, &ctx.cancel);
          }
          Err(AdapterError::timeout(format!("{operation}: radio did not answer")))
        }
        FaultMode::Vendor(code) => {
          Err(AdapterError::vendor(code, format!("{operation}: vendor fault")))
        }
      }
    };
    let end = self.clock.now();
    self.inner.lock().unwrap().calls.push(CallRecord {
      operation,
      start,
      end,
    });
    trace!("mock {}: {} -> {:?}", self.id, operation, result.as_ref().err());
    result
  }
}

impl RadioAdapter for MockRadioAdapter {
  fn get_capabilities(&self, ctx: &OpContext) -> AdapterResult<Capability> {
    self.run("get_capabilities", ctx, |_| Ok(self.capability.clone()))
  }

  fn get_state(&self, ctx: &OpContext) -> AdapterResult<RadioState> {
    let id = self.id.clone();
    let timestamp = self.clock.wall();
    self.run("get_state", ctx, move |inner| {
      Ok(RadioState {
        radio_id: id,
        power_dbm: inner.power,
        frequency_mhz: inner.channel.frequency_mhz,
        channel_index: inner.channel.channel_index,
        timestamp,
      })
    })
  }

  fn set_power(&self, power: PowerDbm, ctx: &OpContext) -> AdapterResult<()> {
    let capability = &self.capability;
    self.run("set_power", ctx, move |inner| {
      if !capability.contains_power(power) {
        return Err(AdapterError::invalid_range(format!(
          "{power} outside [{}, {}]",
          capability.min_dbm.dbm(),
          capability.max_dbm.dbm()
        )));
      }
      inner.power = power;
      Ok(())
    })
  }

  fn set_frequency(&self, frequency: Frequency, ctx: &OpContext) -> AdapterResult<()> {
    let capability = &self.capability;
    self.run("set_frequency", ctx, move |inner| {
      match capability.band_plan.index_of(frequency) {
        Some(channel_index) => {
          inner.channel = ChannelEntry {
            channel_index,
            frequency_mhz: frequency,
          };
          Ok(())
        }
        None => Err(AdapterError::invalid_range(format!(
          "{frequency} not in band plan"
        ))),
      }
    })
  }

  fn read_power_actual(&self, ctx: &OpContext) -> AdapterResult<PowerDbm> {
    self.run("read_power_actual", ctx, |inner| Ok(inner.power))
  }
}

/// Builder for [`MockRadioAdapter`]. Defaults: a 2.4 GHz three-channel
/// plan, power range 0..=30 dBm, first channel, minimum power, system
/// clock.
pub struct MockRadioBuilder {
  id: RadioId,
  capability: Option<Capability>,
  initial_power: Option<PowerDbm>,
  initial_channel: Option<ChannelIndex>,
  steady: FaultMode,
  clock: Option<Arc<dyn Clock>>,
  op_latency: Duration,
}

impl MockRadioBuilder {
  pub fn capability(mut self, capability: Capability) -> Self {
    self.capability = Some(capability);
    self
  }

  /// Make successful operations take this long, so tests can observe call
  /// overlap.
  pub fn op_latency(mut self, latency: Duration) -> Self {
    self.op_latency = latency;
    self
  }

  pub fn initial_power(mut self, power: PowerDbm) -> Self {
    self.initial_power = Some(power);
    self
  }

  pub fn initial_channel(mut self, channel: ChannelIndex) -> Self {
    self.initial_channel = Some(channel);
    self
  }

  pub fn fault_mode(mut self, mode: FaultMode) -> Self {
    self.steady = mode;
    self
  }

  pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = Some(clock);
    self
  }

  pub fn build(self) -> CoreResult<MockRadioAdapter> {
    let capability = match self.capability {
      Some(c) => c,
      None => Capability::new(
        BandPlan::from_mhz_table([(1, 2412.0), (6, 2437.0), (11, 2462.0)])?,
        PowerDbm(0),
        PowerDbm(30),
      )?,
    };
    if capability.band_plan.is_empty() {
      return Err(CoreError::invalid_range("mock radio needs a non-empty band plan"));
    }
    let channel = match self.initial_channel {
      Some(idx) => {
        let frequency = capability.band_plan.frequency_of(idx).ok_or_else(|| {
          CoreError::invalid_range(format!("initial channel {idx} not in band plan"))
        })?;
        ChannelEntry {
          channel_index: idx,
          frequency_mhz: frequency,
        }
      }
      None => capability.band_plan.entries()[0],
    };
    let power = self.initial_power.unwrap_or(capability.min_dbm);
    if !capability.contains_power(power) {
      return Err(CoreError::invalid_range(format!(
        "initial power {power} outside the capability range"
      )));
    }
    Ok(MockRadioAdapter {
      id: self.id,
      clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock::new())),
      capability,
      op_latency: self.op_latency,
      inner: Mutex::new(MockInner {
        power,
        channel,
        steady: self.steady,
        script: VecDeque::new(),
        calls: Vec::new(),
      }),
    })
  }
}

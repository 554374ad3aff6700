// The command orchestrator: single entry point for mutating radio state.
//
// Pre-validates against the loaded capability, serialises per radio through
// the entry's command gate, drives the classified retry loop with
// exponential backoff and uniform jitter, and on success publishes exactly
// one `*Changed` event before the caller learns the result. Terminal
// failures after the adapter was engaged publish an `error` event;
// rejections during pre-validation publish nothing. Every exit emits one
// audit entry.

use std::{sync::Arc, time::Duration};

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};
use rand::Rng;
use static_assertions::assert_impl_all;

use crate::{
  adapter::OpContext,
  audit::{AuditEntry, AuditOutcome, AuditSink},
  clock::{Clock, Deadline, SleepOutcome},
  error::{AdapterErrorMap, CoreError, CoreResult, ErrorKind},
  radio::{
    manager::{RadioEntry, RadioManager},
    ChannelIndex, Frequency, PowerDbm,
  },
  telemetry::{
    event::{
      ChannelChangedPayload, ErrorPayload, EventDraft, PowerChangedPayload, TelemetryErrorKind,
    },
    hub::TelemetryHub,
  },
  timing::TimingProfile,
};
use super::{CommandOp, CommandOutcome, CommandRequest};

/// Validated shape of the mutation, with any channel/frequency conversion
/// already resolved through the manager.
enum Target {
  Power(PowerDbm),
  Channel {
    index: ChannelIndex,
    frequency: Frequency,
  },
}

/// Clears the radio's in-flight token when orchestration leaves the gate,
/// on every path.
struct InFlightReset<'a> {
  entry: &'a RadioEntry,
}

impl Drop for InFlightReset<'_> {
  fn drop(&mut self) {
    self.entry.clear_in_flight();
  }
}

pub struct Orchestrator {
  manager: Arc<RadioManager>,
  hub: TelemetryHub,
  clock: Arc<dyn Clock>,
  profile: TimingProfile,
  error_map: Arc<AdapterErrorMap>,
  audit: Arc<dyn AuditSink>,
}

assert_impl_all!(Orchestrator: Send, Sync);

impl Orchestrator {
  pub fn new(
    manager: Arc<RadioManager>,
    hub: TelemetryHub,
    clock: Arc<dyn Clock>,
    profile: TimingProfile,
    error_map: Arc<AdapterErrorMap>,
    audit: Arc<dyn AuditSink>,
  ) -> Self {
    Self {
      manager,
      hub,
      clock,
      profile,
      error_map,
      audit,
    }
  }

  /// Execute one mutating command to completion: success, or a terminal
  /// kind from the taxonomy.
  pub fn execute(&self, request: CommandRequest) -> CoreResult<CommandOutcome> {
    debug!(
      "{} execute {} on {}",
      request.correlation_id, request.op, request.radio_id
    );
    let mut attempts_used = 0;
    let result = self.run(&request, &mut attempts_used);
    self.audit.record(AuditEntry {
      timestamp: self.clock.wall(),
      correlation_id: request.correlation_id.clone(),
      radio_id: request.radio_id.clone(),
      operation: request.op.name().to_string(),
      outcome: match &result {
        Ok(_) => AuditOutcome::Success,
        Err(e) => AuditOutcome::Failure {
          kind: e.kind,
          message: e.message.clone(),
        },
      },
      attempts: attempts_used,
    });
    result
  }

  fn run(&self, request: &CommandRequest, attempts_used: &mut u32) -> CoreResult<CommandOutcome> {
    let clock = self.clock.as_ref();
    let budget = match request.deadline {
      Some(d) => d.min(self.profile.command_deadline()),
      None => self.profile.command_deadline(),
    };
    let deadline = Deadline::after(clock, budget);

    // Pre-validation, before any lock is taken.
    let entry = self.manager.entry(&request.radio_id)?;
    let capability = entry.capability().ok_or_else(|| {
      CoreError::not_found(format!("capabilities of {} not loaded", request.radio_id))
    })?;
    let target = match request.op {
      CommandOp::SetPower(power) => {
        if !capability.contains_power(power) {
          return Err(CoreError::invalid_range(format!(
            "{power} outside [{}, {}] of {}",
            capability.min_dbm.dbm(),
            capability.max_dbm.dbm(),
            request.radio_id
          )));
        }
        Target::Power(power)
      }
      CommandOp::SetFrequency(frequency) => Target::Channel {
        index: self
          .manager
          .frequency_to_channel_index(&request.radio_id, frequency)?,
        frequency,
      },
      CommandOp::SetChannel(index) => Target::Channel {
        index,
        frequency: self
          .manager
          .channel_index_to_frequency(&request.radio_id, index)?,
      },
    };

    let gate_budget = deadline
      .remaining(clock)
      .ok_or_else(|| CoreError::timeout("command deadline expired before radio acquisition"))?;
    let _gate = entry.gate().acquire(gate_budget, &request.cancel)?;
    entry.register_in_flight(request.cancel.clone());
    let _reset = InFlightReset {
      entry: entry.as_ref(),
    };

    let ctx = OpContext::new(deadline, request.cancel.clone())
      .with_correlation(request.correlation_id.clone());
    let max_attempts = self.profile.retry_attempts();
    let mut rng = rand::rng();
    let mut attempt = 0u32;

    loop {
      attempt += 1;
      *attempts_used = attempt;
      if request.cancel.is_cancelled() {
        return Err(self.fail(request, ErrorKind::Timeout, "command cancelled", attempt > 1));
      }
      if deadline.has_expired(clock) {
        return Err(self.fail(
          request,
          ErrorKind::Timeout,
          "command deadline expired",
          attempt > 1,
        ));
      }

      let call = match &target {
        Target::Power(power) => entry.adapter().set_power(*power, &ctx),
        Target::Channel { frequency, .. } => entry.adapter().set_frequency(*frequency, &ctx),
      };
      let adapter_err = match call {
        Ok(()) => break,
        Err(e) => e,
      };
      let kind = self.error_map.classify(&adapter_err);
      if !kind.is_retriable() || attempt >= max_attempts {
        warn!(
          "{} {} on {} failed terminally ({kind}) at attempt {attempt}: {adapter_err}",
          request.correlation_id, request.op, request.radio_id
        );
        return Err(
          self
            .fail(
              request,
              kind,
              &format!("{} failed on {}", request.op.name(), request.radio_id),
              true,
            )
            .with_detail(adapter_err.to_string()),
        );
      }

      let backoff = backoff_interval(
        self.profile.retry_base(),
        attempt,
        self.profile.retry_max(),
        &mut rng,
      );
      let remaining = deadline.remaining(clock).unwrap_or(Duration::ZERO);
      if backoff > remaining {
        return Err(
          self
            .fail(
              request,
              ErrorKind::Timeout,
              &format!("retry budget exhausted for {} on {}", request.op.name(), request.radio_id),
              true,
            )
            .with_detail(adapter_err.to_string()),
        );
      }
      debug!(
        "{} attempt {attempt}/{max_attempts} on {} failed ({kind}), backing off {backoff:?}",
        request.correlation_id, request.radio_id
      );
      match clock.sleep(backoff, &request.cancel) {
        SleepOutcome::Cancelled => {
          return Err(self.fail(
            request,
            ErrorKind::Timeout,
            "command cancelled during retry backoff",
            true,
          ));
        }
        SleepOutcome::Elapsed => {}
      }
    }

    let outcome = self.confirm(request, &entry, &ctx, target, attempt);
    info!(
      "{} {} on {} ok after {attempt} attempt(s)",
      request.correlation_id, request.op, request.radio_id
    );
    Ok(outcome)
  }

  /// Best-effort read-back, cache update, and the single `*Changed` event.
  fn confirm(
    &self,
    request: &CommandRequest,
    entry: &Arc<RadioEntry>,
    ctx: &OpContext,
    target: Target,
    attempt: u32,
  ) -> CommandOutcome {
    let clock = self.clock.as_ref();
    match target {
      Target::Power(requested) => {
        let (power, unverified) = match entry.adapter().read_power_actual(ctx) {
          Ok(actual) => (actual, false),
          Err(e) => {
            debug!("{} power read-back failed: {e}", request.radio_id);
            (requested, true)
          }
        };
        if let Some(mut state) = entry.last_state() {
          state.power_dbm = power;
          state.timestamp = clock.wall();
          entry.set_last_state(state);
        }
        self.hub.publish(EventDraft::power_changed(PowerChangedPayload {
          radio_id: request.radio_id.clone(),
          power_dbm: power,
          correlation_id: Some(request.correlation_id.clone()),
          attempt,
          unverified,
        }));
        CommandOutcome {
          radio_id: request.radio_id.clone(),
          correlation_id: request.correlation_id.clone(),
          attempts: attempt,
          power_dbm: Some(power),
          channel_index: None,
          frequency_mhz: None,
          unverified,
        }
      }
      Target::Channel { index, frequency } => {
        let read_back = entry.adapter().get_state(ctx).ok().and_then(|mut state| {
          state.radio_id = request.radio_id.clone();
          // the band plan, not the adapter, is authoritative for the pairing
          match self
            .manager
            .frequency_to_channel_index(&request.radio_id, state.frequency_mhz)
          {
            Ok(read_index) => {
              state.channel_index = read_index;
              Some(state)
            }
            Err(_) => None,
          }
        });
        let (index, frequency, unverified) = match read_back {
          Some(state) => {
            let pair = (state.channel_index, state.frequency_mhz);
            entry.set_last_state(state);
            (pair.0, pair.1, false)
          }
          None => {
            debug!("{} channel read-back failed", request.radio_id);
            if let Some(mut state) = entry.last_state() {
              state.channel_index = index;
              state.frequency_mhz = frequency;
              state.timestamp = clock.wall();
              entry.set_last_state(state);
            }
            (index, frequency, true)
          }
        };
        self
          .hub
          .publish(EventDraft::channel_changed(ChannelChangedPayload {
            radio_id: request.radio_id.clone(),
            channel_index: index,
            frequency_mhz: frequency,
            correlation_id: Some(request.correlation_id.clone()),
            attempt,
            unverified,
          }));
        CommandOutcome {
          radio_id: request.radio_id.clone(),
          correlation_id: request.correlation_id.clone(),
          attempts: attempt,
          power_dbm: None,
          channel_index: Some(index),
          frequency_mhz: Some(frequency),
          unverified,
        }
      }
    }
  }

  /// Build the terminal error, publishing an `error` event when the
  /// adapter was actually engaged.
  fn fail(
    &self,
    request: &CommandRequest,
    kind: ErrorKind,
    message: &str,
    adapter_engaged: bool,
  ) -> CoreError {
    if adapter_engaged {
      self.hub.publish(EventDraft::error(ErrorPayload {
        kind: TelemetryErrorKind::Command(kind),
        message: message.to_string(),
        correlation_id: Some(request.correlation_id.clone()),
        radio_id: Some(request.radio_id.clone()),
        oldest_id: None,
      }));
    }
    CoreError::new(kind, message)
  }
}

/// One backoff interval: `base * 2^(attempt-1)` capped at `cap`, with a
/// uniform jitter factor in `[0.5, 1.5]`.
pub(crate) fn backoff_interval(
  base: Duration,
  attempt: u32,
  cap: Duration,
  rng: &mut impl Rng,
) -> Duration {
  let exponent = attempt.saturating_sub(1).min(20);
  let nominal = base.saturating_mul(2u32.saturating_pow(exponent)).min(cap);
  let jitter: f64 = rng.random_range(-0.5..=0.5);
  Duration::from_nanos(((nominal.as_nanos() as f64) * (1.0 + jitter)) as u64)
}

// The single timing profile governing heartbeats, retries, and deadlines.
//
// The profile is immutable after construction. The core never reads timing
// values from the environment or from files; an external collaborator loads
// them (the record derives `Deserialize`) and passes the result in through
// the builder.

use std::time::Duration;

use serde::Deserialize;

use crate::error::{CoreError, CoreResult};

/// Process-wide timing parameters.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TimingProfile {
  heartbeat_interval: Duration,
  heartbeat_jitter: Duration,
  heartbeat_timeout: Duration,
  command_deadline: Duration,
  retry_base: Duration,
  retry_max: Duration,
  retry_attempts: u32,
  ring_capacity: usize,
  subscriber_queue_capacity: usize,
  shutdown_grace: Duration,
}

impl Default for TimingProfile {
  fn default() -> Self {
    Self {
      heartbeat_interval: Duration::from_secs(15),
      heartbeat_jitter: Duration::from_secs(2),
      heartbeat_timeout: Duration::from_secs(45),
      command_deadline: Duration::from_secs(10),
      retry_base: Duration::from_millis(100),
      retry_max: Duration::from_secs(5),
      retry_attempts: 3,
      ring_capacity: 1024,
      subscriber_queue_capacity: 64,
      shutdown_grace: Duration::from_secs(1),
    }
  }
}

impl TimingProfile {
  pub fn builder() -> TimingProfileBuilder {
    TimingProfileBuilder::new()
  }

  pub fn heartbeat_interval(&self) -> Duration {
    self.heartbeat_interval
  }

  pub fn heartbeat_jitter(&self) -> Duration {
    self.heartbeat_jitter
  }

  pub fn heartbeat_timeout(&self) -> Duration {
    self.heartbeat_timeout
  }

  pub fn command_deadline(&self) -> Duration {
    self.command_deadline
  }

  pub fn retry_base(&self) -> Duration {
    self.retry_base
  }

  pub fn retry_max(&self) -> Duration {
    self.retry_max
  }

  pub fn retry_attempts(&self) -> u32 {
    self.retry_attempts
  }

  pub fn ring_capacity(&self) -> usize {
    self.ring_capacity
  }

  /// Per-subscriber live delivery queue bound; overflowing it makes the
  /// subscriber a slow consumer.
  pub fn subscriber_queue_capacity(&self) -> usize {
    self.subscriber_queue_capacity
  }

  pub fn shutdown_grace(&self) -> Duration {
    self.shutdown_grace
  }

  /// Validity rules shared by the builder and deserialised profiles.
  pub fn validate(&self) -> CoreResult<()> {
    if self.heartbeat_interval.is_zero() {
      return Err(CoreError::invalid_range("heartbeat interval must be non-zero"));
    }
    if self.heartbeat_jitter >= self.heartbeat_interval {
      return Err(CoreError::invalid_range(
        "heartbeat jitter must be smaller than the interval",
      ));
    }
    if self.heartbeat_timeout < self.heartbeat_interval + self.heartbeat_jitter {
      return Err(CoreError::invalid_range(
        "heartbeat timeout must cover one full jittered interval",
      ));
    }
    if self.command_deadline.is_zero() {
      return Err(CoreError::invalid_range("command deadline must be non-zero"));
    }
    if self.retry_base.is_zero() || self.retry_max < self.retry_base {
      return Err(CoreError::invalid_range(
        "retry base must be non-zero and not above retry max",
      ));
    }
    if self.retry_attempts == 0 {
      return Err(CoreError::invalid_range("at least one attempt is required"));
    }
    if self.ring_capacity == 0 || self.subscriber_queue_capacity == 0 {
      return Err(CoreError::invalid_range("capacities must be at least 1"));
    }
    Ok(())
  }
}

/// Field-wise builder for [`TimingProfile`]. Unset fields keep the
/// normative defaults.
#[derive(Debug, Clone, Default)]
pub struct TimingProfileBuilder {
  profile: TimingProfile,
}

impl TimingProfileBuilder {
  pub fn new() -> Self {
    Self {
      profile: TimingProfile::default(),
    }
  }

  pub fn heartbeat_interval(mut self, d: Duration) -> Self {
    self.profile.heartbeat_interval = d;
    self
  }

  pub fn heartbeat_jitter(mut self, d: Duration) -> Self {
    self.profile.heartbeat_jitter = d;
    self
  }

  pub fn heartbeat_timeout(mut self, d: Duration) -> Self {
    self.profile.heartbeat_timeout = d;
    self
  }

  pub fn command_deadline(mut self, d: Duration) -> Self {
    self.profile.command_deadline = d;
    self
  }

  pub fn retry_base(mut self, d: Duration) -> Self {
    self.profile.retry_base = d;
    self
  }

  pub fn retry_max(mut self, d: Duration) -> Self {
    self.profile.retry_max = d;
    self
  }

  pub fn retry_attempts(mut self, attempts: u32) -> Self {
    self.profile.retry_attempts = attempts;
    self
  }

  pub fn ring_capacity(mut self, capacity: usize) -> Self {
    self.profile.ring_capacity = capacity;
    self
  }

  pub fn subscriber_queue_capacity(mut self, capacity: usize) -> Self {
    self.profile.subscriber_queue_capacity = capacity;
    self
  }

  pub fn shutdown_grace(mut self, d: Duration) -> Self {
    self.profile.shutdown_grace = d;
    self
  }

  pub fn build(self) -> CoreResult<TimingProfile> {
    self.profile.validate()?;
    Ok(self.profile)
  }
}

#[cfg(test)]
mod tests {
  use crate::error::ErrorKind;

  use super::*;

  #[test]
  fn defaults_are_the_normative_ones() {
    let p = TimingProfile::default();
    assert_eq!(p.heartbeat_interval(), Duration::from_secs(15));
    assert_eq!(p.heartbeat_jitter(), Duration::from_secs(2));
    assert_eq!(p.heartbeat_timeout(), Duration::from_secs(45));
    assert_eq!(p.command_deadline(), Duration::from_secs(10));
    assert_eq!(p.retry_base(), Duration::from_millis(100));
    assert_eq!(p.retry_attempts(), 3);
    assert_eq!(p.ring_capacity(), 1024);
    assert!(p.validate().is_ok());
  }

  #[test]
  fn builder_overrides_fields() {
    let p = TimingProfile::builder()
      .heartbeat_interval(Duration::from_secs(5))
      .heartbeat_jitter(Duration::from_secs(1))
      .heartbeat_timeout(Duration::from_secs(20))
      .retry_base(Duration::from_millis(50))
      .retry_attempts(5)
      .build()
      .unwrap();
    assert_eq!(p.heartbeat_interval(), Duration::from_secs(5));
    assert_eq!(p.retry_base(), Duration::from_millis(50));
    assert_eq!(p.retry_attempts(), 5);
  }

  #[test]
  fn builder_rejects_zero_attempts() {
    let err = TimingProfile::builder().retry_attempts(0).build().unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidRange);
  }

  #[test]
  fn builder_rejects_jitter_at_interval() {
    let err = TimingProfile::builder()
      .heartbeat_interval(Duration::from_secs(2))
      .heartbeat_jitter(Duration::from_secs(2))
      .build()
      .unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidRange);
  }

  #[test]
  fn builder_rejects_retry_max_below_base() {
    let err = TimingProfile::builder()
      .retry_base(Duration::from_secs(1))
      .retry_max(Duration::from_millis(10))
      .build()
      .unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidRange);
  }
}

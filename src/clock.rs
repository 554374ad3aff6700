// Time primitives of the core.
//
// The core never calls `Instant::now` or `thread::sleep` directly. A single
// `Clock` is injected into the hub (heartbeat ticker) and the orchestrator
// (retry backoff), so tests can substitute `ManualClock` and drive timing
// scenarios deterministically.

use std::{
  ops::{Add, Sub},
  sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Condvar, Mutex,
  },
  time::{Duration, Instant},
};

use chrono::{DateTime, Utc};

/// A point on the core's monotonic time axis, in nanoseconds from an
/// arbitrary per-clock origin. Values from different clocks do not compare
/// meaningfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp {
  nanos: u64,
}

impl Timestamp {
  pub const ZERO: Timestamp = Timestamp { nanos: 0 };

  pub fn from_nanos(nanos: u64) -> Self {
    Self { nanos }
  }

  pub fn as_nanos(self) -> u64 {
    self.nanos
  }

  /// Time elapsed since `earlier`, or zero if `earlier` is in the future.
  pub fn duration_since(self, earlier: Timestamp) -> Duration {
    Duration::from_nanos(self.nanos.saturating_sub(earlier.nanos))
  }
}

impl Add<Duration> for Timestamp {
  type Output = Timestamp;

  fn add(self, d: Duration) -> Timestamp {
    Timestamp {
      nanos: self.nanos.saturating_add(d.as_nanos() as u64),
    }
  }
}

impl Sub<Timestamp> for Timestamp {
  type Output = Duration;

  fn sub(self, earlier: Timestamp) -> Duration {
    self.duration_since(earlier)
  }
}

/// How a [`Clock::sleep`] call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepOutcome {
  /// The full duration elapsed.
  Elapsed,
  /// The cancellation token fired first.
  Cancelled,
}

struct CancelInner {
  cancelled: AtomicBool,
  lock: Mutex<()>,
  cond: Condvar,
}

/// Cloneable cancellation flag. `cancel()` is sticky and wakes every sleeper
/// currently parked on the token.
#[derive(Clone)]
pub struct CancelToken {
  inner: Arc<CancelInner>,
}

impl CancelToken {
  pub fn new() -> Self {
    Self {
      inner: Arc::new(CancelInner {
        cancelled: AtomicBool::new(false),
        lock: Mutex::new(()),
        cond: Condvar::new(),
      }),
    }
  }

  pub fn cancel(&self) {
    self.inner.cancelled.store(true, Ordering::SeqCst);
    // Take the lock so a sleeper cannot check the flag and park between our
    // store and notify.
    drop(self.inner.lock.lock().unwrap());
    self.inner.cond.notify_all();
  }

  pub fn is_cancelled(&self) -> bool {
    self.inner.cancelled.load(Ordering::SeqCst)
  }
}

impl Default for CancelToken {
  fn default() -> Self {
    Self::new()
  }
}

impl std::fmt::Debug for CancelToken {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("CancelToken")
      .field("cancelled", &self.is_cancelled())
      .finish()
  }
}

/// The abstract time source injected into hub and orchestrator.
pub trait Clock: Send + Sync {
  /// Current position on the monotonic axis.
  fn now(&self) -> Timestamp;

  /// Current wall-clock time, used to stamp telemetry events and audit
  /// entries.
  fn wall(&self) -> DateTime<Utc>;

  /// Sleep for `duration` or until `cancel` fires, whichever comes first.
  fn sleep(&self, duration: Duration, cancel: &CancelToken) -> SleepOutcome;
}

/// Production clock backed by `std::time::Instant`.
pub struct SystemClock {
  origin: Instant,
}

impl SystemClock {
  pub fn new() -> Self {
    Self {
      origin: Instant::now(),
    }
  }
}

impl Default for SystemClock {
  fn default() -> Self {
    Self::new()
  }
}

impl Clock for SystemClock {
  fn now(&self) -> Timestamp {
    Timestamp::from_nanos(self.origin.elapsed().as_nanos() as u64)
  }

  fn wall(&self) -> DateTime<Utc> {
    Utc::now()
  }

  fn sleep(&self, duration: Duration, cancel: &CancelToken) -> SleepOutcome {
    let deadline = Instant::now() + duration;
    let inner = &cancel.inner;
    let mut guard = inner.lock.lock().unwrap();
    loop {
      if inner.cancelled.load(Ordering::SeqCst) {
        return SleepOutcome::Cancelled;
      }
      let now = Instant::now();
      if now >= deadline {
        return SleepOutcome::Elapsed;
      }
      let (g, _) = inner.cond.wait_timeout(guard, deadline - now).unwrap();
      guard = g;
    }
  }
}

/// Virtual clock for tests: time only moves when `advance` is called.
///
/// Sleepers park until the clock has been advanced past their wake point or
/// their token is cancelled. Cancellation is observed by a short periodic
/// re-check, which keeps the sleeper off the token's own condvar.
#[derive(Clone)]
pub struct ManualClock {
  inner: Arc<ManualInner>,
}

struct ManualInner {
  state: Mutex<ManualState>,
  cond: Condvar,
}

struct ManualState {
  now: Timestamp,
  wall_base: DateTime<Utc>,
}

const MANUAL_POLL: Duration = Duration::from_millis(1);

impl ManualClock {
  pub fn new() -> Self {
    Self {
      inner: Arc::new(ManualInner {
        state: Mutex::new(ManualState {
          now: Timestamp::ZERO,
          wall_base: Utc::now(),
        }),
        cond: Condvar::new(),
      }),
    }
  }

  /// Move time forward, releasing any sleeper whose wake point is reached.
  pub fn advance(&self, d: Duration) {
    let mut state = self.inner.state.lock().unwrap();
    state.now = state.now + d;
    self.inner.cond.notify_all();
  }
}

impl Default for ManualClock {
  fn default() -> Self {
    Self::new()
  }
}

impl Clock for ManualClock {
  fn now(&self) -> Timestamp {
    self.inner.state.lock().unwrap().now
  }

  fn wall(&self) -> DateTime<Utc> {
    let state = self.inner.state.lock().unwrap();
    state.wall_base
      + chrono::Duration::from_std(Duration::from_nanos(state.now.as_nanos()))
        .unwrap_or_else(|_| chrono::Duration::zero())
  }

  fn sleep(&self, duration: Duration, cancel: &CancelToken) -> SleepOutcome {
    let mut state = self.inner.state.lock().unwrap();
    let wake_at = state.now + duration;
    loop {
      if cancel.is_cancelled() {
        return SleepOutcome::Cancelled;
      }
      if state.now >= wake_at {
        return SleepOutcome::Elapsed;
      }
      let (g, _) = self.inner.cond.wait_timeout(state, MANUAL_POLL).unwrap();
      state = g;
    }
  }
}

/// An absolute point in time an operation must finish by.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
  at: Timestamp,
}

impl Deadline {
  pub fn at(at: Timestamp) -> Self {
    Self { at }
  }

  pub fn after(clock: &dyn Clock, d: Duration) -> Self {
    Self {
      at: clock.now() + d,
    }
  }

  pub fn instant(&self) -> Timestamp {
    self.at
  }

  /// Budget left before the deadline, or `None` once it has passed.
  pub fn remaining(&self, clock: &dyn Clock) -> Option<Duration> {
    let now = clock.now();
    if now >= self.at {
      None
    } else {
      Some(self.at - now)
    }
  }

  pub fn has_expired(&self, clock: &dyn Clock) -> bool {
    self.remaining(clock).is_none()
  }

  /// The tighter of two deadlines.
  pub fn min(self, other: Deadline) -> Deadline {
    if self.at <= other.at {
      self
    } else {
      other
    }
  }
}

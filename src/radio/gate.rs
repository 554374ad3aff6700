// Per-radio mutual exclusion for mutating commands.
//
// A plain `Mutex` cannot respect a command deadline, so the gate is a
// boolean guarded by a mutex with a condvar, acquired with a time budget.
// Waiters wake in short slices so a fired cancellation token is observed
// promptly even though it notifies its own condvar, not ours.

use std::{
  sync::{Condvar, Mutex},
  time::{Duration, Instant},
};

use crate::{
  clock::CancelToken,
  error::{CoreError, CoreResult},
};

const WAIT_SLICE: Duration = Duration::from_millis(10);

#[derive(Debug)]
pub(crate) struct CommandGate {
  locked: Mutex<bool>,
  cond: Condvar,
}

impl CommandGate {
  pub fn new() -> Self {
    Self {
      locked: Mutex::new(false),
      cond: Condvar::new(),
    }
  }

  /// Acquire the gate within `budget`, or fail with `TIMEOUT`. A fired
  /// cancellation token also resolves to `TIMEOUT`, matching how callers
  /// observe an abandoned command.
  pub fn acquire(&self, budget: Duration, cancel: &CancelToken) -> CoreResult<GateGuard<'_>> {
    let deadline = Instant::now() + budget;
    let mut locked = self.locked.lock().unwrap();
    while *locked {
      if cancel.is_cancelled() {
        return Err(CoreError::timeout("command cancelled while waiting for radio"));
      }
      let now = Instant::now();
      if now >= deadline {
        return Err(CoreError::timeout("timed out waiting for radio to become free"));
      }
      let wait = WAIT_SLICE.min(deadline - now);
      let (guard, _) = self.cond.wait_timeout(locked, wait).unwrap();
      locked = guard;
    }
    *locked = true;
    Ok(GateGuard { gate: self })
  }

  #[allow(dead_code)] // test-facing accessor
  pub fn is_held(&self) -> bool {
    *self.locked.lock().unwrap()
  }
}

/// Releases the gate on drop.
pub(crate) struct GateGuard<'a> {
  gate: &'a CommandGate,
}

impl std::fmt::Debug for GateGuard<'_> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("GateGuard").finish()
  }
}

impl Drop for GateGuard<'_> {
  fn drop(&mut self) {
    let mut locked = self.gate.locked.lock().unwrap();
    *locked = false;
    self.gate.cond.notify_one();
  }
}

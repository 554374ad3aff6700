// Per-subscriber delivery queue.
//
// A bounded deque shared between the hub (sender side) and the subscription
// handle (receiver side). The receiver can be drained synchronously or
// consumed as an async `Stream`; a waker slot bridges the two worlds, the
// same arrangement the sender also uses to wake a parked condvar waiter.
//
// The sender side never blocks. The hub uses the bounded `try_send` for
// live delivery and the unbounded `force_send` for subscribe-time traffic
// (`ready`, replay, synthetic errors), and can clear and close the queue
// when evicting a slow consumer.

use std::{
  collections::VecDeque,
  pin::Pin,
  sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Condvar, Mutex,
  },
  task::{Context, Poll, Waker},
  time::{Duration, Instant},
};

use futures::stream::{FusedStream, Stream};
use thiserror::Error;

use super::event::TelemetryEvent;

pub(crate) fn event_channel(capacity: usize) -> (EventSender, EventReceiver) {
  let shared = Arc::new(Shared {
    state: Mutex::new(ChannelState {
      buf: VecDeque::new(),
      closed: false,
      waker: None,
    }),
    cond: Condvar::new(),
    capacity,
  });
  (
    EventSender {
      shared: Arc::clone(&shared),
    },
    EventReceiver { shared },
  )
}

struct ChannelState {
  buf: VecDeque<Arc<TelemetryEvent>>,
  closed: bool,
  waker: Option<Waker>,
}

struct Shared {
  state: Mutex<ChannelState>,
  cond: Condvar,
  capacity: usize,
}

impl Shared {
  fn wake(&self, state: &mut ChannelState) {
    if let Some(w) = state.waker.take() {
      w.wake();
    }
    self.cond.notify_one();
  }
}

/// Why a bounded send was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SendRejection {
  /// The queue is at capacity; the subscriber is falling behind.
  Full,
  /// The receiver is gone or the queue was closed.
  Closed,
}

pub(crate) struct EventSender {
  shared: Arc<Shared>,
}

impl EventSender {
  /// Bounded, non-blocking enqueue for live delivery.
  pub fn try_send(&self, event: Arc<TelemetryEvent>) -> Result<(), SendRejection> {
    let mut state = self.shared.state.lock().unwrap();
    if state.closed {
      return Err(SendRejection::Closed);
    }
    if state.buf.len() >= self.shared.capacity {
      return Err(SendRejection::Full);
    }
    state.buf.push_back(event);
    self.shared.wake(&mut state);
    Ok(())
  }

  /// Enqueue ignoring the capacity bound. Subscribe-time traffic (`ready`,
  /// replay, synthetic errors) is bounded by the ring, not by this queue.
  pub fn force_send(&self, event: Arc<TelemetryEvent>) -> Result<(), SendRejection> {
    let mut state = self.shared.state.lock().unwrap();
    if state.closed {
      return Err(SendRejection::Closed);
    }
    state.buf.push_back(event);
    self.shared.wake(&mut state);
    Ok(())
  }

  /// Drop everything still queued.
  pub fn clear(&self) {
    let mut state = self.shared.state.lock().unwrap();
    state.buf.clear();
  }

  /// No more sends will be accepted; the receiver drains what is queued and
  /// then observes the close.
  pub fn close(&self) {
    let mut state = self.shared.state.lock().unwrap();
    state.closed = true;
    self.shared.wake(&mut state);
  }

  pub fn queued_len(&self) -> usize {
    self.shared.state.lock().unwrap().buf.len()
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TryRecvError {
  #[error("no event queued")]
  Empty,
  #[error("subscription closed")]
  Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RecvTimeoutError {
  #[error("no event within the timeout")]
  Timeout,
  #[error("subscription closed")]
  Closed,
}

/// Receiving half of a subscriber queue, owned by the `Subscription`
/// handle. Dropping it closes the queue, which the hub observes as a
/// disconnect on the next delivery.
pub struct EventReceiver {
  shared: Arc<Shared>,
}

impl EventReceiver {
  pub fn try_recv(&self) -> Result<Arc<TelemetryEvent>, TryRecvError> {
    let mut state = self.shared.state.lock().unwrap();
    match state.buf.pop_front() {
      Some(event) => Ok(event),
      None if state.closed => Err(TryRecvError::Closed),
      None => Err(TryRecvError::Empty),
    }
  }

  /// Blocking receive with a wall-clock timeout.
  pub fn recv_timeout(&self, timeout: Duration) -> Result<Arc<TelemetryEvent>, RecvTimeoutError> {
    let deadline = Instant::now() + timeout;
    let mut state = self.shared.state.lock().unwrap();
    loop {
      if let Some(event) = state.buf.pop_front() {
        return Ok(event);
      }
      if state.closed {
        return Err(RecvTimeoutError::Closed);
      }
      let now = Instant::now();
      if now >= deadline {
        return Err(RecvTimeoutError::Timeout);
      }
      let (guard, _) = self.shared.cond.wait_timeout(state, deadline - now).unwrap();
      state = guard;
    }
  }

  /// Consume the queue as an async stream. The stream terminates when the
  /// queue is closed and drained.
  pub fn as_stream(&self) -> EventStream<'_> {
    EventStream {
      receiver: self,
      terminated: AtomicBool::new(false),
    }
  }
}

impl Drop for EventReceiver {
  fn drop(&mut self) {
    let mut state = self.shared.state.lock().unwrap();
    state.closed = true;
    state.buf.clear();
  }
}

pub struct EventStream<'a> {
  receiver: &'a EventReceiver,
  terminated: AtomicBool,
}

impl Stream for EventStream<'_> {
  type Item = Arc<TelemetryEvent>;

  fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
    let mut state = self.receiver.shared.state.lock().unwrap();
    match state.buf.pop_front() {
      Some(event) => Poll::Ready(Some(event)),
      None if state.closed => {
        self.terminated.store(true, Ordering::SeqCst);
        Poll::Ready(None)
      }
      None => {
        state.waker = Some(cx.waker().clone());
        Poll::Pending
      }
    }
  }
}

impl FusedStream for EventStream<'_> {
  fn is_terminated(&self) -> bool {
    self.terminated.load(Ordering::SeqCst)
  }
}

// Bounded replay buffer of the most recent events.
//
// The ring bounds the replay window: a subscriber reconnecting after a gap
// larger than the ring must resynchronise from the `ready` snapshot.

use std::{collections::VecDeque, sync::Arc};

use super::event::{EventId, TelemetryEvent};

#[derive(Debug)]
pub(crate) struct EventRing {
  buf: VecDeque<Arc<TelemetryEvent>>,
  capacity: usize,
}

impl EventRing {
  pub fn new(capacity: usize) -> Self {
    assert!(capacity > 0, "ring capacity must be at least 1");
    Self {
      buf: VecDeque::with_capacity(capacity),
      capacity,
    }
  }

  /// Append, overwriting the oldest entry when full.
  pub fn push(&mut self, event: Arc<TelemetryEvent>) {
    if self.buf.len() == self.capacity {
      self.buf.pop_front();
    }
    self.buf.push_back(event);
  }

  pub fn oldest_id(&self) -> Option<EventId> {
    self.buf.front().map(|e| e.id)
  }

  #[allow(dead_code)] // test-facing accessor
  pub fn newest_id(&self) -> Option<EventId> {
    self.buf.back().map(|e| e.id)
  }

  /// All buffered events with id greater than `after`, oldest first.
  pub fn events_after(&self, after: EventId) -> impl Iterator<Item = &Arc<TelemetryEvent>> {
    self.buf.iter().filter(move |e| e.id > after)
  }

  #[allow(dead_code)] // test-facing accessor
  pub fn len(&self) -> usize {
    self.buf.len()
  }

  #[allow(dead_code)] // test-facing accessor
  pub fn capacity(&self) -> usize {
    self.capacity
  }
}

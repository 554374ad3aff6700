// The telemetry hub: single point of fan-out.
//
// One mutex serialises id assignment, the ring append, and the per-
// subscriber enqueues, so every subscriber observes the same relative
// order. Enqueues are non-blocking; a full queue marks the subscriber slow
// instead of stalling the publisher, and the next publish evicts it with a
// final `slowConsumer` error event.

use std::{
  collections::HashMap,
  sync::{Arc, Mutex, Weak},
  thread,
  time::{Duration, Instant},
};

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};
use rand::Rng;
use static_assertions::assert_impl_all;

use crate::{
  clock::{CancelToken, Clock, SleepOutcome},
  error::{CoreError, CoreResult},
  timing::TimingProfile,
};
use super::{
  event::{
    ErrorPayload, EventDraft, EventFilter, EventId, EventKind, EventPayload, ReadyPayload,
    StreamErrorKind, TelemetryErrorKind, TelemetryEvent,
  },
  ring::EventRing,
  sink::{event_channel, EventReceiver, EventSender, SendRejection},
  SnapshotSource,
};

/// Identifies one subscription for the lifetime of a hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl std::fmt::Display for SubscriberId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "sub-{}", self.0)
  }
}

struct SubEntry {
  sender: EventSender,
  filter: Option<EventFilter>,
  slow: bool,
}

struct HubState {
  next_event_id: u64,
  next_subscriber_id: u64,
  ring: EventRing,
  subscribers: HashMap<SubscriberId, SubEntry>,
  stopped: bool,
}

struct HubInner {
  profile: TimingProfile,
  clock: Arc<dyn Clock>,
  state: Mutex<HubState>,
  shutdown: CancelToken,
  ticker: Mutex<Option<thread::JoinHandle<()>>>,
  snapshot_source: Mutex<Option<Weak<dyn SnapshotSource>>>,
}

/// Cheaply cloneable handle to one hub instance. Hubs are independently
/// constructable; nothing about event numbering is process-global.
#[derive(Clone)]
pub struct TelemetryHub {
  inner: Arc<HubInner>,
}

assert_impl_all!(TelemetryHub: Send, Sync);

impl TelemetryHub {
  pub fn new(profile: &TimingProfile, clock: Arc<dyn Clock>) -> Self {
    Self {
      inner: Arc::new(HubInner {
        profile: profile.clone(),
        clock,
        state: Mutex::new(HubState {
          next_event_id: 1,
          next_subscriber_id: 1,
          ring: EventRing::new(profile.ring_capacity()),
          subscribers: HashMap::new(),
          stopped: false,
        }),
        shutdown: CancelToken::new(),
        ticker: Mutex::new(None),
        snapshot_source: Mutex::new(None),
      }),
    }
  }

  /// Register the provider of `ready` snapshots. Kept weak so the hub never
  /// owns the registry.
  pub fn set_snapshot_source(&self, source: Weak<dyn SnapshotSource>) {
    *self.inner.snapshot_source.lock().unwrap() = Some(source);
  }

  /// Publish an event: assign the next id, stamp the timestamp, append to
  /// the replay ring, and fan out to every live subscriber.
  ///
  /// Publish never fails. After `stop` the event is discarded and `None` is
  /// returned.
  pub fn publish(&self, draft: EventDraft) -> Option<EventId> {
    let timestamp = self.inner.clock.wall();
    let mut state = self.inner.state.lock().unwrap();
    if state.stopped {
      trace!("publish after stop, discarding {:?}", draft.kind);
      return None;
    }
    let id = EventId(state.next_event_id);
    state.next_event_id += 1;
    let event = Arc::new(TelemetryEvent {
      id,
      kind: draft.kind,
      timestamp,
      correlation_id: draft.correlation_id,
      payload: draft.payload,
    });
    state.ring.push(Arc::clone(&event));

    let ids: Vec<SubscriberId> = state.subscribers.keys().copied().collect();
    for sid in ids {
      let slow = state.subscribers.get(&sid).map(|e| e.slow).unwrap_or(false);
      if slow {
        // Second strike: clear, signal, close.
        let err_id = EventId(state.next_event_id);
        state.next_event_id += 1;
        let err_event = Arc::new(TelemetryEvent {
          id: err_id,
          kind: EventKind::Error,
          timestamp,
          correlation_id: None,
          payload: EventPayload::Error(ErrorPayload {
            kind: TelemetryErrorKind::Stream(StreamErrorKind::SlowConsumer),
            message: "subscriber queue overflowed, closing".to_string(),
            correlation_id: None,
            radio_id: None,
            oldest_id: None,
          }),
        });
        if let Some(entry) = state.subscribers.remove(&sid) {
          entry.sender.clear();
          let _ = entry.sender.force_send(err_event);
          entry.sender.close();
          warn!("{sid} evicted as slow consumer");
        }
        continue;
      }
      let verdict = {
        let entry = state.subscribers.get(&sid).expect("present, not removed");
        if event.matches(entry.filter) {
          Some(entry.sender.try_send(Arc::clone(&event)))
        } else {
          None
        }
      };
      match verdict {
        None | Some(Ok(())) => {}
        Some(Err(SendRejection::Full)) => {
          debug!("{sid} queue full at event {id}, marking slow");
          state.subscribers.get_mut(&sid).expect("present").slow = true;
        }
        Some(Err(SendRejection::Closed)) => {
          state.subscribers.remove(&sid);
          debug!("{sid} disconnected");
        }
      }
    }
    Some(id)
  }

  /// Register a subscriber: deliver `ready` with the registry snapshot,
  /// replay from the ring per `last_event_id`, then go live with the
  /// optional `filter`.
  ///
  /// Fails with `INTERNAL` once the hub is stopped.
  pub fn subscribe(
    &self,
    last_event_id: Option<EventId>,
    filter: Option<EventFilter>,
  ) -> CoreResult<Subscription> {
    let timestamp = self.inner.clock.wall();
    let mut state = self.inner.state.lock().unwrap();
    if state.stopped {
      return Err(CoreError::internal("telemetry hub is stopped"));
    }
    // Snapshot under the hub lock: an event published after this snapshot
    // is guaranteed to reach the new subscriber's queue. Registry locks are
    // never held while publishing, so the ordering cannot deadlock.
    let radios = {
      let source = self.inner.snapshot_source.lock().unwrap().clone();
      source
        .and_then(|weak| weak.upgrade())
        .map(|s| s.snapshot())
        .unwrap_or_default()
    };
    let (sender, receiver) = event_channel(self.inner.profile.subscriber_queue_capacity());

    let ready_id = EventId(state.next_event_id);
    state.next_event_id += 1;
    let ready = Arc::new(TelemetryEvent {
      id: ready_id,
      kind: EventKind::Ready,
      timestamp,
      correlation_id: None,
      payload: EventPayload::Ready(ReadyPayload { radios }),
    });
    let _ = sender.force_send(ready);

    if let Some(last) = last_event_id {
      if let Some(oldest) = state.ring.oldest_id() {
        if last.value() + 1 >= oldest.value() {
          for event in state.ring.events_after(last) {
            let _ = sender.force_send(Arc::clone(event));
          }
        } else {
          // The requested resume point predates the ring: tell the client
          // which ids it will never see instead of silently skipping.
          let gap_id = EventId(state.next_event_id);
          state.next_event_id += 1;
          let gap = Arc::new(TelemetryEvent {
            id: gap_id,
            kind: EventKind::Error,
            timestamp,
            correlation_id: None,
            payload: EventPayload::Error(ErrorPayload {
              kind: TelemetryErrorKind::Stream(StreamErrorKind::ReplayGap),
              message: format!("events up to {} have left the replay window", oldest),
              correlation_id: None,
              radio_id: None,
              oldest_id: Some(oldest),
            }),
          });
          let _ = sender.force_send(gap);
        }
      }
    }

    let sid = SubscriberId(state.next_subscriber_id);
    state.next_subscriber_id += 1;
    state.subscribers.insert(
      sid,
      SubEntry {
        sender,
        filter,
        slow: false,
      },
    );
    debug!("{sid} subscribed (resume from {last_event_id:?})");
    Ok(Subscription {
      id: sid,
      receiver,
      hub: self.clone(),
    })
  }

  fn unsubscribe(&self, id: SubscriberId) {
    let mut state = self.inner.state.lock().unwrap();
    if let Some(entry) = state.subscribers.remove(&id) {
      entry.sender.close();
      debug!("{id} unsubscribed");
    }
  }

  /// Spawn the heartbeat ticker thread. Idempotent.
  pub fn start_heartbeat(&self) -> CoreResult<()> {
    let mut ticker = self.inner.ticker.lock().unwrap();
    if ticker.is_some() {
      return Ok(());
    }
    let hub = self.clone();
    let handle = thread::Builder::new()
      .name("rcc-heartbeat".to_string())
      .spawn(move || hub.run_heartbeat())
      .map_err(|e| CoreError::internal(format!("cannot spawn heartbeat ticker: {e}")))?;
    *ticker = Some(handle);
    Ok(())
  }

  fn run_heartbeat(&self) {
    let interval = self.inner.profile.heartbeat_interval();
    let jitter = self.inner.profile.heartbeat_jitter();
    let mut rng = rand::rng();
    info!("heartbeat ticker running at {interval:?} +/- {jitter:?}");
    loop {
      let next = jittered_interval(interval, jitter, &mut rng);
      match self.inner.clock.sleep(next, &self.inner.shutdown) {
        SleepOutcome::Cancelled => break,
        SleepOutcome::Elapsed => {}
      }
      self.publish(EventDraft::heartbeat());
    }
    info!("heartbeat ticker stopped");
  }

  /// Stop the hub: halt the ticker, give subscribers `grace` to drain, then
  /// close them all. Subsequent subscribes fail; publishes are discarded.
  pub fn stop(&self, grace: Duration) {
    self.inner.shutdown.cancel();
    if let Some(handle) = self.inner.ticker.lock().unwrap().take() {
      let _ = handle.join();
    }
    let deadline = Instant::now() + grace;
    loop {
      let pending: usize = {
        let state = self.inner.state.lock().unwrap();
        if state.stopped {
          break;
        }
        state.subscribers.values().map(|e| e.sender.queued_len()).sum()
      };
      if pending == 0 || Instant::now() >= deadline {
        break;
      }
      thread::sleep(Duration::from_millis(5));
    }
    let mut state = self.inner.state.lock().unwrap();
    state.stopped = true;
    for (_, entry) in state.subscribers.drain() {
      entry.sender.close();
    }
    info!("telemetry hub stopped");
  }

  pub fn subscriber_count(&self) -> usize {
    self.inner.state.lock().unwrap().subscribers.len()
  }

  /// Id of the most recently assigned event, if any.
  pub fn head_id(&self) -> Option<EventId> {
    let state = self.inner.state.lock().unwrap();
    match state.next_event_id {
      1 => None,
      n => Some(EventId(n - 1)),
    }
  }
}

/// Uniformly jittered heartbeat interval: `interval ± jitter`.
fn jittered_interval(interval: Duration, jitter: Duration, rng: &mut impl Rng) -> Duration {
  if jitter.is_zero() {
    return interval;
  }
  let j = jitter.as_nanos() as i64;
  let offset = rng.random_range(-j..=j);
  let nanos = (interval.as_nanos() as i64).saturating_add(offset);
  Duration::from_nanos(nanos.max(0) as u64)
}

/// A live subscription. Dropping the handle disconnects the subscriber.
pub struct Subscription {
  id: SubscriberId,
  receiver: EventReceiver,
  hub: TelemetryHub,
}

impl std::fmt::Debug for Subscription {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Subscription").field("id", &self.id).finish()
  }
}

impl Subscription {
  pub fn id(&self) -> SubscriberId {
    self.id
  }

  /// Access to the queue for synchronous draining or async streaming.
  pub fn receiver(&self) -> &EventReceiver {
    &self.receiver
  }
}

impl Drop for Subscription {
  fn drop(&mut self) {
    self.hub.unsubscribe(self.id);
  }
}

#[cfg(test)]
mod tests {
  use crate::{
    clock::ManualClock,
    telemetry::event::EventKind,
    telemetry::sink::{RecvTimeoutError, TryRecvError},
  };

  use super::*;

  fn test_profile(queue: usize, ring: usize) -> TimingProfile {
    TimingProfile::builder()
      .subscriber_queue_capacity(queue)
      .ring_capacity(ring)
      .build()
      .unwrap()
  }

  fn hub_with(queue: usize, ring: usize) -> TelemetryHub {
    TelemetryHub::new(&test_profile(queue, ring), Arc::new(ManualClock::new()))
  }

  fn drain_kinds(sub: &Subscription, n: usize) -> Vec<EventKind> {
    let mut kinds = Vec::new();
    for _ in 0..n {
      kinds.push(
        sub
          .receiver()
          .recv_timeout(Duration::from_secs(1))
          .expect("event expected")
          .kind,
      );
    }
    kinds
  }

  #[test]
  fn ids_are_monotonic_and_contiguous_for_live_subscriber() {
    let hub = hub_with(64, 64);
    let sub = hub.subscribe(None, None).unwrap();
    let ready = sub.receiver().recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(ready.kind, EventKind::Ready);
    for _ in 0..5 {
      hub.publish(EventDraft::heartbeat());
    }
    let mut prev = ready.id.value();
    for _ in 0..5 {
      let ev = sub.receiver().recv_timeout(Duration::from_secs(1)).unwrap();
      assert_eq!(ev.id.value(), prev + 1);
      prev = ev.id.value();
    }
  }

  #[test]
  fn replay_resumes_after_last_event_id() {
    let hub = hub_with(64, 64);
    for _ in 0..5 {
      hub.publish(EventDraft::heartbeat());
    }
    // Heartbeats took ids 1..=5; resume from 2 replays 3, 4, 5.
    let sub = hub.subscribe(Some(EventId(2)), None).unwrap();
    let ready = sub.receiver().recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(ready.kind, EventKind::Ready);
    let replayed: Vec<u64> = (0..3)
      .map(|_| {
        sub
          .receiver()
          .recv_timeout(Duration::from_secs(1))
          .unwrap()
          .id
          .value()
      })
      .collect();
    assert_eq!(replayed, vec![3, 4, 5]);
    assert_eq!(
      sub.receiver().try_recv().unwrap_err(),
      TryRecvError::Empty
    );
  }

  #[test]
  fn replay_of_everything_from_before_first_id() {
    let hub = hub_with(64, 64);
    for _ in 0..4 {
      hub.publish(EventDraft::heartbeat());
    }
    let sub = hub.subscribe(Some(EventId(0)), None).unwrap();
    let kinds = drain_kinds(&sub, 5);
    assert_eq!(kinds[0], EventKind::Ready);
    assert!(kinds[1..].iter().all(|k| *k == EventKind::Heartbeat));
  }

  #[test]
  fn replay_gap_is_signalled_with_oldest_id() {
    let hub = hub_with(64, 4);
    // ids 1..=10 published into a ring of 4: oldest kept id is 7.
    for _ in 0..10 {
      hub.publish(EventDraft::heartbeat());
    }
    let sub = hub.subscribe(Some(EventId(2)), None).unwrap();
    let ready = sub.receiver().recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(ready.kind, EventKind::Ready);
    let gap = sub.receiver().recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(gap.kind, EventKind::Error);
    match &gap.payload {
      EventPayload::Error(p) => {
        assert_eq!(p.kind, TelemetryErrorKind::Stream(StreamErrorKind::ReplayGap));
        assert_eq!(p.oldest_id, Some(EventId(7)));
      }
      other => panic!("unexpected payload {other:?}"),
    }
    // live after the gap signal
    hub.publish(EventDraft::heartbeat());
    let live = sub.receiver().recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(live.kind, EventKind::Heartbeat);
  }

  #[test]
  fn slow_consumer_is_evicted_others_unaffected() {
    let hub = hub_with(4, 64);
    let slow = hub.subscribe(None, None).unwrap();
    let healthy = hub.subscribe(None, None).unwrap();
    // drain both ready events
    slow.receiver().recv_timeout(Duration::from_secs(1)).unwrap();
    healthy.receiver().recv_timeout(Duration::from_secs(1)).unwrap();

    // The healthy subscriber drains as we publish; the slow one never does.
    for _ in 0..10 {
      hub.publish(EventDraft::heartbeat());
      healthy.receiver().recv_timeout(Duration::from_secs(1)).unwrap();
    }

    // slow got at most its queue capacity, then the eviction notice
    let mut got = Vec::new();
    loop {
      match slow.receiver().try_recv() {
        Ok(ev) => got.push(ev),
        Err(TryRecvError::Closed) => break,
        Err(TryRecvError::Empty) => panic!("expected closed queue, got empty"),
      }
    }
    assert!(got.len() <= 5, "slow consumer saw {} events", got.len());
    let last = got.last().expect("eviction notice expected");
    assert_eq!(last.kind, EventKind::Error);
    match &last.payload {
      EventPayload::Error(p) => {
        assert_eq!(
          p.kind,
          TelemetryErrorKind::Stream(StreamErrorKind::SlowConsumer)
        );
      }
      other => panic!("unexpected payload {other:?}"),
    }
    assert_eq!(hub.subscriber_count(), 1);
  }

  #[test]
  fn filter_limits_live_delivery() {
    let hub = hub_with(16, 16);
    let sub = hub
      .subscribe(None, Some(EventKind::Error.into()))
      .unwrap();
    // ready is part of the handshake, not subject to the filter
    let ready = sub.receiver().recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(ready.kind, EventKind::Ready);
    hub.publish(EventDraft::heartbeat());
    hub.publish(EventDraft::error(ErrorPayload {
      kind: TelemetryErrorKind::Command(crate::error::ErrorKind::Busy),
      message: "busy".to_string(),
      correlation_id: None,
      radio_id: None,
      oldest_id: None,
    }));
    let ev = sub.receiver().recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(ev.kind, EventKind::Error);
    assert_eq!(sub.receiver().try_recv().unwrap_err(), TryRecvError::Empty);
  }

  #[test]
  fn dropping_subscription_unsubscribes() {
    let hub = hub_with(16, 16);
    let sub = hub.subscribe(None, None).unwrap();
    assert_eq!(hub.subscriber_count(), 1);
    drop(sub);
    assert_eq!(hub.subscriber_count(), 0);
  }

  #[test]
  fn stopped_hub_rejects_subscribe_and_discards_publish() {
    let hub = hub_with(16, 16);
    let sub = hub.subscribe(None, None).unwrap();
    hub.stop(Duration::from_millis(50));
    assert!(hub.publish(EventDraft::heartbeat()).is_none());
    let err = hub.subscribe(None, None).unwrap_err();
    assert_eq!(err.kind, crate::error::ErrorKind::Internal);
    // existing subscriber drains what it had, then sees the close
    let ready = sub.receiver().recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(ready.kind, EventKind::Ready);
    assert_eq!(
      sub.receiver().recv_timeout(Duration::from_millis(50)),
      Err(RecvTimeoutError::Closed)
    );
  }

  #[test]
  fn heartbeats_follow_the_virtual_clock() {
    let clock = ManualClock::new();
    let profile = TimingProfile::builder()
      .heartbeat_interval(Duration::from_secs(15))
      .heartbeat_jitter(Duration::from_secs(2))
      .build()
      .unwrap();
    let hub = TelemetryHub::new(&profile, Arc::new(clock.clone()));
    hub.start_heartbeat().unwrap();
    let sub = hub.subscribe(None, None).unwrap();
    sub.receiver().recv_timeout(Duration::from_secs(1)).unwrap(); // ready

    // Advance virtual time in 1s steps; each jittered interval is 13..=17s,
    // so every tick must fire within at most 17 steps.
    for _ in 0..3 {
      let mut received = false;
      for _ in 0..25 {
        clock.advance(Duration::from_secs(1));
        match sub.receiver().recv_timeout(Duration::from_millis(50)) {
          Ok(ev) => {
            assert_eq!(ev.kind, EventKind::Heartbeat);
            received = true;
            break;
          }
          Err(RecvTimeoutError::Timeout) => continue,
          Err(e) => panic!("unexpected receive error {e:?}"),
        }
      }
      assert!(received, "heartbeat did not fire within the jitter bound");
    }
    hub.stop(Duration::from_millis(50));
  }

  #[test]
  fn concurrent_publishers_preserve_one_total_order() {
    let hub = hub_with(512, 512);
    let sub_a = hub.subscribe(None, None).unwrap();
    let sub_b = hub.subscribe(None, None).unwrap();
    sub_a.receiver().recv_timeout(Duration::from_secs(1)).unwrap();
    sub_b.receiver().recv_timeout(Duration::from_secs(1)).unwrap();

    let mut publishers = Vec::new();
    for _ in 0..4 {
      let hub = hub.clone();
      publishers.push(std::thread::spawn(move || {
        for _ in 0..25 {
          hub.publish(EventDraft::heartbeat());
        }
      }));
    }
    for p in publishers {
      p.join().unwrap();
    }

    let drain = |sub: &Subscription| -> Vec<u64> {
      let mut ids = Vec::new();
      while let Ok(ev) = sub.receiver().try_recv() {
        ids.push(ev.id.value());
      }
      ids
    };
    let ids_a = drain(&sub_a);
    let ids_b = drain(&sub_b);
    assert_eq!(ids_a.len(), 100);
    // both observe the same sequence, strictly increasing
    assert_eq!(ids_a, ids_b);
    assert!(ids_a.windows(2).all(|w| w[0] < w[1]));
  }

  #[test]
  fn jittered_interval_stays_in_bounds() {
    let interval = Duration::from_secs(15);
    let jitter = Duration::from_secs(2);
    let mut rng = rand::rng();
    for _ in 0..1000 {
      let d = jittered_interval(interval, jitter, &mut rng);
      assert!(d >= Duration::from_secs(13) && d <= Duration::from_secs(17));
    }
    assert_eq!(
      jittered_interval(interval, Duration::ZERO, &mut rng),
      interval
    );
  }
}

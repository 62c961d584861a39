//! The event bus: per-analysis streams with bounded per-subscriber buffers.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::sync::Notify;

use super::{Event, EventPayload};

/// Why a subscription stopped receiving events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The subscriber lagged and a critical event could not be buffered.
    Overflow,
    /// The analysis finished; buffered events remain consumable.
    Finished,
}

struct SubState {
    buffer: VecDeque<Event>,
    closed: Option<CloseReason>,
}

struct SubscriptionShared {
    state: Mutex<SubState>,
    notify: Notify,
    capacity: usize,
}

impl SubscriptionShared {
    /// Count of buffered events that occupy capacity (sentinels are free).
    fn occupied(buffer: &VecDeque<Event>) -> usize {
        buffer.iter().filter(|e| !e.payload.is_sentinel()).count()
    }

    /// Enqueue one event, applying the drop-oldest / overflow policy.
    fn enqueue(&self, event: &Event) {
        let mut state = self.state.lock().expect("subscription lock poisoned");
        if state.closed.is_some() {
            return;
        }

        if Self::occupied(&state.buffer) >= self.capacity {
            // Find the oldest droppable (non-critical, non-sentinel) event.
            let droppable = state
                .buffer
                .iter()
                .position(|e| !e.payload.is_critical() && !e.payload.is_sentinel());

            match droppable {
                Some(index) => {
                    let removed = state.buffer.remove(index).expect("index in bounds");
                    Self::record_gap(
                        &mut state.buffer,
                        index,
                        removed.sequence,
                        &removed.analysis_id,
                    );
                }
                None => {
                    if event.payload.is_critical() {
                        // Nothing droppable and the incoming event must not
                        // be lost: close the subscription.
                        state.closed = Some(CloseReason::Overflow);
                        self.notify.notify_one();
                        return;
                    }
                    // Drop the incoming non-critical event itself.
                    let back_extended = match state.buffer.back_mut() {
                        Some(Event {
                            sequence,
                            payload: EventPayload::Dropped { covers_to, .. },
                            ..
                        }) if *covers_to + 1 == event.sequence => {
                            *covers_to = event.sequence;
                            *sequence = event.sequence;
                            true
                        }
                        _ => false,
                    };
                    if !back_extended {
                        state.buffer.push_back(sentinel(event, event.sequence, event.sequence));
                    }
                    self.notify.notify_one();
                    return;
                }
            }
        }

        state.buffer.push_back(event.clone());
        self.notify.notify_one();
    }

    /// After removing the event with `seq` at `index`, extend an adjacent
    /// sentinel to cover it, or insert a fresh one in its place.
    fn record_gap(buffer: &mut VecDeque<Event>, index: usize, seq: u64, analysis_id: &str) {
        if index > 0 {
            if let Some(Event {
                sequence,
                payload: EventPayload::Dropped { covers_to, .. },
                ..
            }) = buffer.get_mut(index - 1)
            {
                if *covers_to + 1 == seq {
                    *covers_to = seq;
                    *sequence = seq;
                    return;
                }
            }
        }
        if let Some(Event {
            payload: EventPayload::Dropped { covers_from, .. },
            ..
        }) = buffer.get_mut(index)
        {
            if *covers_from == seq + 1 {
                *covers_from = seq;
                return;
            }
        }

        buffer.insert(
            index,
            Event {
                analysis_id: analysis_id.to_string(),
                sequence: seq,
                timestamp: Utc::now(),
                payload: EventPayload::Dropped {
                    covers_from: seq,
                    covers_to: seq,
                },
            },
        );
    }

    fn close(&self, reason: CloseReason) {
        let mut state = self.state.lock().expect("subscription lock poisoned");
        if state.closed.is_none() {
            state.closed = Some(reason);
        }
        self.notify.notify_one();
    }
}

fn sentinel(like: &Event, from: u64, to: u64) -> Event {
    Event {
        analysis_id: like.analysis_id.clone(),
        sequence: to,
        timestamp: Utc::now(),
        payload: EventPayload::Dropped {
            covers_from: from,
            covers_to: to,
        },
    }
}

/// Consumer handle for one subscription.
pub struct EventSubscription {
    shared: Arc<SubscriptionShared>,
}

impl EventSubscription {
    /// Receive the next event in FIFO order.
    ///
    /// Returns `None` once the subscription is closed and its buffer is
    /// drained. Buffered events are always delivered before the close is
    /// observed.
    pub async fn recv(&self) -> Option<Event> {
        loop {
            {
                let mut state = self.shared.state.lock().expect("subscription lock poisoned");
                if let Some(event) = state.buffer.pop_front() {
                    return Some(event);
                }
                if state.closed.is_some() {
                    return None;
                }
            }
            self.shared.notify.notified().await;
        }
    }

    /// Non-blocking receive.
    pub fn try_recv(&self) -> Option<Event> {
        let mut state = self.shared.state.lock().expect("subscription lock poisoned");
        state.buffer.pop_front()
    }

    /// Why the subscription was closed, if it has been.
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.shared.state.lock().expect("subscription lock poisoned").closed
    }
}

struct AnalysisStream {
    next_sequence: u64,
    subscribers: HashMap<String, Arc<SubscriptionShared>>,
}

/// Publish/subscribe hub keyed by `(analysis_id, subscriber_id)`.
///
/// All publishes for one analysis are serialized through that analysis'
/// stream entry, which is what guarantees per-subscriber total ordering
/// regardless of publisher concurrency. The lock is only held for
/// in-memory enqueues; publishing never awaits.
pub struct EventBus {
    streams: Mutex<HashMap<String, AnalysisStream>>,
    buffer_capacity: usize,
}

impl EventBus {
    /// Create a bus whose subscriptions buffer `buffer_capacity` events.
    pub fn new(buffer_capacity: usize) -> Self {
        Self {
            streams: Mutex::new(HashMap::new()),
            buffer_capacity: buffer_capacity.max(1),
        }
    }

    /// Subscribe to an analysis stream. Re-subscribing with the same
    /// subscriber id replaces the previous subscription.
    pub fn subscribe(&self, analysis_id: &str, subscriber_id: &str) -> EventSubscription {
        let shared = Arc::new(SubscriptionShared {
            state: Mutex::new(SubState {
                buffer: VecDeque::new(),
                closed: None,
            }),
            notify: Notify::new(),
            capacity: self.buffer_capacity,
        });

        let mut streams = self.streams.lock().expect("bus lock poisoned");
        let stream = streams
            .entry(analysis_id.to_string())
            .or_insert_with(|| AnalysisStream {
                next_sequence: 0,
                subscribers: HashMap::new(),
            });
        stream
            .subscribers
            .insert(subscriber_id.to_string(), Arc::clone(&shared));

        EventSubscription { shared }
    }

    /// Publish an event to every subscriber of `analysis_id`.
    ///
    /// Assigns the next sequence number and returns the published event.
    pub fn publish(&self, analysis_id: &str, payload: EventPayload) -> Event {
        let mut streams = self.streams.lock().expect("bus lock poisoned");
        let stream = streams
            .entry(analysis_id.to_string())
            .or_insert_with(|| AnalysisStream {
                next_sequence: 0,
                subscribers: HashMap::new(),
            });

        stream.next_sequence += 1;
        let event = Event {
            analysis_id: analysis_id.to_string(),
            sequence: stream.next_sequence,
            timestamp: Utc::now(),
            payload,
        };

        for shared in stream.subscribers.values() {
            shared.enqueue(&event);
        }

        event
    }

    /// Mark an analysis finished: close all its subscriptions (buffered
    /// events remain consumable) and drop the stream entry.
    pub fn finish(&self, analysis_id: &str) {
        let stream = {
            let mut streams = self.streams.lock().expect("bus lock poisoned");
            streams.remove(analysis_id)
        };
        if let Some(stream) = stream {
            for shared in stream.subscribers.values() {
                shared.close(CloseReason::Finished);
            }
        }
    }
}

/// Publisher handle bound to one analysis.
#[derive(Clone)]
pub struct AnalysisEvents {
    bus: Arc<EventBus>,
    analysis_id: String,
}

impl AnalysisEvents {
    /// Bind a publisher to `analysis_id`.
    pub fn new(bus: Arc<EventBus>, analysis_id: impl Into<String>) -> Self {
        Self {
            bus,
            analysis_id: analysis_id.into(),
        }
    }

    /// The analysis this publisher is bound to.
    pub fn analysis_id(&self) -> &str {
        &self.analysis_id
    }

    /// Publish one event on the bound stream.
    pub fn publish(&self, payload: EventPayload) -> Event {
        self.bus.publish(&self.analysis_id, payload)
    }

    /// The underlying bus.
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thinking(n: u32) -> EventPayload {
        EventPayload::Thinking {
            provider_id: "p".into(),
            content: format!("step {n}"),
        }
    }

    fn approval(n: u32) -> EventPayload {
        EventPayload::ApprovalRequested {
            request_id: format!("req-{n}"),
            tool_name: "t".into(),
            risk_level: "high".into(),
        }
    }

    #[tokio::test]
    async fn events_delivered_in_publish_order() {
        let bus = EventBus::new(64);
        let sub = bus.subscribe("a1", "s1");

        for n in 0..5 {
            bus.publish("a1", thinking(n));
        }
        bus.finish("a1");

        let mut sequences = Vec::new();
        while let Some(event) = sub.recv().await {
            sequences.push(event.sequence);
        }
        assert_eq!(sequences, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn oldest_non_critical_dropped_with_sentinel() {
        let bus = EventBus::new(3);
        let sub = bus.subscribe("a1", "s1");

        for n in 0..6 {
            bus.publish("a1", thinking(n));
        }
        bus.finish("a1");

        let mut received = Vec::new();
        while let Some(event) = sub.recv().await {
            received.push(event);
        }

        // Sentinel first, covering 1..=3, then the surviving 4, 5, 6.
        match &received[0].payload {
            EventPayload::Dropped {
                covers_from,
                covers_to,
            } => {
                assert_eq!((*covers_from, *covers_to), (1, 3));
            }
            other => panic!("expected dropped sentinel, got {other:?}"),
        }
        let tail: Vec<u64> = received[1..].iter().map(|e| e.sequence).collect();
        assert_eq!(tail, vec![4, 5, 6]);
    }

    #[tokio::test]
    async fn sentinel_ranges_cover_exactly_the_missing_set() {
        let bus = EventBus::new(4);
        let sub = bus.subscribe("a1", "s1");

        for n in 0..20 {
            bus.publish("a1", thinking(n));
        }
        bus.finish("a1");

        let mut seen = Vec::new();
        let mut covered = Vec::new();
        while let Some(event) = sub.recv().await {
            match event.payload {
                EventPayload::Dropped {
                    covers_from,
                    covers_to,
                } => covered.extend(covers_from..=covers_to),
                _ => seen.push(event.sequence),
            }
        }

        let mut all: Vec<u64> = seen.iter().chain(covered.iter()).copied().collect();
        all.sort_unstable();
        assert_eq!(all, (1..=20).collect::<Vec<u64>>());
        // Sequence numbers strictly monotone among delivered events.
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn critical_events_survive_pressure_from_non_critical() {
        let bus = EventBus::new(2);
        let sub = bus.subscribe("a1", "s1");

        bus.publish("a1", approval(1));
        bus.publish("a1", approval(2));
        // Buffer now holds two criticals; a non-critical burst must not
        // displace them.
        bus.publish("a1", thinking(1));
        bus.publish("a1", thinking(2));
        bus.finish("a1");

        let mut criticals = 0;
        let mut covered = Vec::new();
        while let Some(event) = sub.recv().await {
            match event.payload {
                EventPayload::ApprovalRequested { .. } => criticals += 1,
                EventPayload::Dropped {
                    covers_from,
                    covers_to,
                } => covered.extend(covers_from..=covers_to),
                other => panic!("unexpected event {other:?}"),
            }
        }
        assert_eq!(criticals, 2);
        assert_eq!(covered, vec![3, 4]);
    }

    #[tokio::test]
    async fn unbufferable_critical_closes_with_overflow() {
        let bus = EventBus::new(2);
        let sub = bus.subscribe("a1", "s1");

        bus.publish("a1", approval(1));
        bus.publish("a1", approval(2));
        bus.publish("a1", approval(3));

        // Buffered criticals are still delivered before the close.
        assert!(sub.recv().await.is_some());
        assert!(sub.recv().await.is_some());
        assert!(sub.recv().await.is_none());
        assert_eq!(sub.close_reason(), Some(CloseReason::Overflow));
    }

    #[tokio::test]
    async fn subscribers_have_independent_buffers() {
        let bus = EventBus::new(64);
        let fast = bus.subscribe("a1", "fast");
        let late = bus.subscribe("a1", "late");

        bus.publish("a1", thinking(1));
        assert_eq!(fast.recv().await.unwrap().sequence, 1);

        bus.publish("a1", thinking(2));
        bus.finish("a1");

        assert_eq!(fast.recv().await.unwrap().sequence, 2);
        assert_eq!(late.recv().await.unwrap().sequence, 1);
        assert_eq!(late.recv().await.unwrap().sequence, 2);
    }

    #[tokio::test]
    async fn streams_are_independent_across_analyses() {
        let bus = EventBus::new(64);
        let sub_a = bus.subscribe("a1", "s");
        let sub_b = bus.subscribe("a2", "s");

        bus.publish("a1", thinking(1));
        bus.publish("a2", thinking(1));

        assert_eq!(sub_a.recv().await.unwrap().sequence, 1);
        assert_eq!(sub_b.recv().await.unwrap().sequence, 1);
    }
}

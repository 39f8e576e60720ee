//! Event dispatcher.
//!
//! Routes unsolicited gateway events to subscribers. Every subscriber owns
//! an unbounded queue; the driver only pushes into queues, so a slow or
//! panicking subscriber never holds up frame processing or other
//! subscribers. Subscribers whose queue is gone are pruned on the next
//! dispatch.

// ============================================================================
// Imports
// ============================================================================

use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use futures_util::Stream;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::identifiers::SubscriptionId;
use crate::protocol::Event;

// ============================================================================
// EventFilter
// ============================================================================

/// Selects which events a subscriber receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventFilter {
    /// Every event.
    All,
    /// Events with exactly this name.
    Name(String),
    /// Events whose name starts with `"<namespace>."`.
    Namespace(String),
}

impl EventFilter {
    /// Returns `true` if `event` passes the filter.
    #[must_use]
    pub fn matches(&self, event: &Event) -> bool {
        match self {
            Self::All => true,
            Self::Name(name) => event.event == *name,
            Self::Namespace(namespace) => event
                .event
                .strip_prefix(namespace.as_str())
                .is_some_and(|rest| rest.starts_with('.')),
        }
    }
}

impl From<&str> for EventFilter {
    /// `"*"` matches everything, `"chat.*"` a namespace, anything else an
    /// exact name.
    fn from(pattern: &str) -> Self {
        if pattern == "*" {
            Self::All
        } else if let Some(namespace) = pattern.strip_suffix(".*") {
            Self::Namespace(namespace.to_string())
        } else {
            Self::Name(pattern.to_string())
        }
    }
}

// ============================================================================
// Subscription
// ============================================================================

/// Stream of events matching one filter.
///
/// Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    rx: mpsc::UnboundedReceiver<Event>,
}

impl Subscription {
    /// Identifier usable with `off`.
    #[inline]
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Waits for the next event. Returns `None` once unsubscribed.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Returns an already queued event without waiting.
    pub fn try_recv(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }
}

impl Stream for Subscription {
    type Item = Event;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Event>> {
        self.rx.poll_recv(cx)
    }
}

// ============================================================================
// EventDispatcher
// ============================================================================

struct Subscriber {
    id: SubscriptionId,
    filter: EventFilter,
    tx: mpsc::UnboundedSender<Event>,
}

/// Registry of event subscribers.
#[derive(Default)]
pub struct EventDispatcher {
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: AtomicU64,
}

impl EventDispatcher {
    /// Creates an empty dispatcher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a stream subscriber.
    pub fn subscribe(&self, filter: impl Into<EventFilter>) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.insert(filter.into(), tx);
        Subscription { id, rx }
    }

    /// Registers a callback subscriber running on its own task.
    ///
    /// Must be called inside a tokio runtime. A panic in `handler` ends
    /// only this subscriber.
    pub fn on<F>(&self, filter: impl Into<EventFilter>, mut handler: F) -> SubscriptionId
    where
        F: FnMut(Event) + Send + 'static,
    {
        let mut subscription = self.subscribe(filter);
        let id = subscription.id;

        tokio::spawn(async move {
            while let Some(event) = subscription.recv().await {
                handler(event);
            }
            trace!(%id, "Event handler finished");
        });

        id
    }

    /// Removes a subscriber. Returns `false` if it was not registered.
    pub fn off(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.lock();
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        subscribers.len() != before
    }

    /// Removes every subscriber.
    pub fn clear(&self) {
        self.subscribers.lock().clear();
    }

    /// Number of registered subscribers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Returns `true` if nobody is subscribed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscribers.lock().is_empty()
    }

    /// Queues `event` for every matching subscriber, in registration order.
    ///
    /// Returns how many subscribers received it.
    pub fn dispatch(&self, event: &Event) -> usize {
        let mut delivered = 0;

        self.subscribers.lock().retain(|subscriber| {
            if !subscriber.filter.matches(event) {
                return !subscriber.tx.is_closed();
            }

            if subscriber.tx.send(event.clone()).is_ok() {
                delivered += 1;
                true
            } else {
                debug!(id = %subscriber.id, "Pruning closed subscriber");
                false
            }
        });

        delivered
    }

    fn insert(&self, filter: EventFilter, tx: mpsc::UnboundedSender<Event>) -> SubscriptionId {
        let id = SubscriptionId::new(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        self.subscribers.lock().push(Subscriber { id, filter, tx });
        id
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::time::Duration;

    use futures_util::StreamExt;
    use serde_json::json;

    fn event(name: &str, n: u64) -> Event {
        Event::new(name, json!({ "n": n }))
    }

    #[test]
    fn test_filter_matching() {
        let delta = event("chat.delta", 0);

        assert!(EventFilter::All.matches(&delta));
        assert!(EventFilter::from("chat.delta").matches(&delta));
        assert!(EventFilter::from("chat.*").matches(&delta));
        assert!(!EventFilter::from("chat").matches(&delta));
        assert!(!EventFilter::from("cha.*").matches(&delta));
        assert!(!EventFilter::from("agent.*").matches(&delta));
        assert_eq!(EventFilter::from("*"), EventFilter::All);
    }

    #[tokio::test]
    async fn test_subscribers_receive_in_arrival_order() {
        let dispatcher = EventDispatcher::new();
        let mut all = dispatcher.subscribe(EventFilter::All);
        let mut ticks = dispatcher.subscribe("tick");

        for n in 0..5 {
            dispatcher.dispatch(&event("tick", n));
            dispatcher.dispatch(&event("chat.delta", n));
        }

        let names: Vec<_> = (0..10)
            .map(|_| all.try_recv().expect("event").event)
            .collect();
        assert_eq!(names[..4], ["tick", "chat.delta", "tick", "chat.delta"]);

        for n in 0..5 {
            assert_eq!(ticks.recv().await.expect("tick").payload["n"], n);
        }
        assert!(ticks.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_off_and_dropped_subscribers_stop_receiving() {
        let dispatcher = EventDispatcher::new();
        let kept = dispatcher.subscribe(EventFilter::All);
        let removed = dispatcher.subscribe(EventFilter::All);
        let dropped = dispatcher.subscribe(EventFilter::All);

        assert!(dispatcher.off(removed.id()));
        assert!(!dispatcher.off(removed.id()));
        drop(dropped);

        assert_eq!(dispatcher.dispatch(&event("tick", 1)), 1);
        assert_eq!(dispatcher.len(), 1);
        drop(kept);
        assert_eq!(dispatcher.dispatch(&event("tick", 2)), 0);
        assert!(dispatcher.is_empty());
    }

    #[tokio::test]
    async fn test_panicking_handler_does_not_affect_others() {
        let dispatcher = EventDispatcher::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        dispatcher.on("tick", |_| panic!("subscriber bug"));
        let sink = Arc::clone(&seen);
        dispatcher.on("tick", move |event: Event| sink.lock().push(event.payload["n"].clone()));

        dispatcher.dispatch(&event("tick", 1));
        tokio::time::sleep(Duration::from_millis(20)).await;
        dispatcher.dispatch(&event("tick", 2));
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(*seen.lock(), vec![json!(1), json!(2)]);
        assert_eq!(dispatcher.len(), 1);
    }

    #[tokio::test]
    async fn test_subscription_is_a_stream() {
        let dispatcher = EventDispatcher::new();
        let subscription = dispatcher.subscribe("chat.*");

        for n in 0..3 {
            dispatcher.dispatch(&event("chat.delta", n));
        }
        dispatcher.clear();

        let collected: Vec<_> = subscription.map(|e| e.payload["n"].clone()).collect().await;
        assert_eq!(collected, vec![json!(0), json!(1), json!(2)]);
    }
}

//! Headless, typed, topic-based publish/subscribe event bus.
//!
//! Uses [`tokio::sync::broadcast`] channels under the hood so that every
//! subscriber receives every message without any single subscriber blocking
//! the others.  A slow subscriber lags and drops old events; it never stalls
//! a connection handler or the timeout monitor.
//!
//! # Topics
//!
//! | Topic | Typical traffic |
//! |---|---|
//! | [`Topic::Liveness`] | `PULSE:` lines accepted by a handler |
//! | [`Topic::Orders`] | Relayed `ORDER:` tuples |
//! | [`Topic::Alerts`] | Stale-client alerts, recoveries, malformed or unknown lines |
//! | [`Topic::Connections`] | Connection opened / closed |
//!
//! Every event published to a topic is also mirrored onto a firehose channel
//! available through [`EventBus::subscribe_all`].

use tokio::sync::broadcast;
use tracing::warn;
use vigil_types::{Event, EventPayload};

/// Default channel capacity (number of buffered events before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 1024;

/// Enumeration of all routing topics on the event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Accepted liveness pulses.
    Liveness,
    /// Relayed orders.
    Orders,
    /// Stale clients, recoveries, and per-line protocol problems.
    Alerts,
    /// Connection lifecycle.
    Connections,
}

impl Topic {
    /// The topic a payload is routed to by [`EventBus::emit`].
    pub fn for_payload(payload: &EventPayload) -> Self {
        match payload {
            EventPayload::Pulse { .. } => Topic::Liveness,
            EventPayload::Order(_) => Topic::Orders,
            EventPayload::Unknown { .. }
            | EventPayload::Malformed { .. }
            | EventPayload::StaleClient(_)
            | EventPayload::ClientRecovered { .. }
            | EventPayload::HealthChanged { .. } => Topic::Alerts,
            EventPayload::ConnectionOpened { .. } | EventPayload::ConnectionClosed { .. } => {
                Topic::Connections
            }
        }
    }
}

/// Shared event bus. Clone it cheaply – all clones share the same underlying
/// broadcast channels.
#[derive(Clone, Debug)]
pub struct EventBus {
    all: broadcast::Sender<Event>,
    liveness: broadcast::Sender<Event>,
    orders: broadcast::Sender<Event>,
    alerts: broadcast::Sender<Event>,
    connections: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new bus with the given channel capacity.
    ///
    /// The `capacity` is applied to every channel independently.
    pub fn new(capacity: usize) -> Self {
        let (all, _) = broadcast::channel(capacity);
        let (liveness, _) = broadcast::channel(capacity);
        let (orders, _) = broadcast::channel(capacity);
        let (alerts, _) = broadcast::channel(capacity);
        let (connections, _) = broadcast::channel(capacity);
        Self {
            all,
            liveness,
            orders,
            alerts,
            connections,
        }
    }

    /// Publish `event` to the given [`Topic`] channel and to the firehose.
    ///
    /// Returns the number of receivers that were handed the event.  Zero
    /// receivers is a normal condition: the hub runs fine with nobody
    /// watching.
    pub fn publish_to(&self, topic: Topic, event: Event) -> usize {
        let on_topic = self.topic_sender(topic).send(event.clone()).unwrap_or(0);
        let on_all = self.all.send(event).unwrap_or(0);
        on_topic + on_all
    }

    /// Wrap `payload` in an [`Event`] stamped with `source` and publish it to
    /// the topic derived from the payload kind.
    pub fn emit(&self, source: &str, payload: EventPayload) -> usize {
        let topic = Topic::for_payload(&payload);
        self.publish_to(topic, Event::new(source, payload))
    }

    /// Subscribe to a specific [`Topic`] channel.
    pub fn subscribe_to(&self, topic: Topic) -> TopicReceiver {
        TopicReceiver {
            topic: Some(topic),
            receiver: self.topic_sender(topic).subscribe(),
        }
    }

    /// Subscribe to every event regardless of topic.
    pub fn subscribe_all(&self) -> TopicReceiver {
        TopicReceiver {
            topic: None,
            receiver: self.all.subscribe(),
        }
    }

    fn topic_sender(&self, topic: Topic) -> &broadcast::Sender<Event> {
        match topic {
            Topic::Liveness => &self.liveness,
            Topic::Orders => &self.orders,
            Topic::Alerts => &self.alerts,
            Topic::Connections => &self.connections,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Receiver
// ---------------------------------------------------------------------------

/// An async receiver bound to one [`Topic`] channel, or to the firehose.
///
/// Obtained via [`EventBus::subscribe_to`] or [`EventBus::subscribe_all`].
pub struct TopicReceiver {
    topic: Option<Topic>,
    receiver: broadcast::Receiver<Event>,
}

impl TopicReceiver {
    /// Wait for the next event.
    ///
    /// Returns:
    /// * `Ok(event)` – a successfully received event.
    /// * `Err(broadcast::error::RecvError::Lagged(n))` – the subscriber fell
    ///   behind and `n` messages were dropped.
    /// * `Err(broadcast::error::RecvError::Closed)` – the bus has shut down.
    pub async fn recv(&mut self) -> Result<Event, broadcast::error::RecvError> {
        self.receiver.recv().await
    }

    /// Wait for the next event, skipping over lag.
    ///
    /// Returns `None` once the bus is closed.
    pub async fn next(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(topic = ?self.topic, lagged_by = n, "event subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking receive; `None` when nothing is buffered.
    pub fn try_next(&mut self) -> Option<Event> {
        self.receiver.try_recv().ok()
    }

    /// The [`Topic`] this receiver is bound to, `None` for the firehose.
    pub fn topic(&self) -> Option<Topic> {
        self.topic
    }
}

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use pcx_diff::GraphDiff;
use pcx_types::ChannelId;

use crate::event::{EventSubject, EventTopic, GraphEvent};

/// Synchronous event callback. Runs on the publishing thread, after the
/// publisher has released its own locks.
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &GraphEvent);
}

impl<F> EventListener for F
where
    F: Fn(&GraphEvent) + Send + Sync,
{
    fn on_event(&self, event: &GraphEvent) {
        self(event)
    }
}

/// Filter for subscribing to a subset of events.
#[derive(Clone, Debug, Default)]
pub struct EventFilter {
    /// If set, only events for these subjects are delivered.
    pub subjects: Option<Vec<EventSubject>>,
    /// If set, only events with these topics are delivered.
    pub topics: Option<Vec<EventTopic>>,
}

impl EventFilter {
    /// Match every event.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn for_subject(subject: EventSubject) -> Self {
        Self {
            subjects: Some(vec![subject]),
            topics: None,
        }
    }

    pub fn with_topics(mut self, topics: impl IntoIterator<Item = EventTopic>) -> Self {
        self.topics = Some(topics.into_iter().collect());
        self
    }

    /// Returns `true` if the given event matches this filter.
    pub fn matches(&self, event: &GraphEvent) -> bool {
        if let Some(ref subjects) = self.subjects {
            if !subjects.contains(&event.subject) {
                return false;
            }
        }
        if let Some(ref topics) = self.topics {
            if !topics.contains(&event.topic) {
                return false;
            }
        }
        true
    }
}

/// Handle returned by [`EventManager::subscribe`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// A broadcast channel receiver for graph events.
pub type EventStream = broadcast::Receiver<GraphEvent>;

/// Configuration for the [`EventManager`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EventManagerConfig {
    /// Capacity of per-subscriber broadcast channels.
    pub channel_capacity: usize,
}

impl Default for EventManagerConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
        }
    }
}

struct Listener {
    id: SubscriptionId,
    filter: EventFilter,
    callback: Arc<dyn EventListener>,
}

struct StreamSubscriber {
    filter: EventFilter,
    sender: broadcast::Sender<GraphEvent>,
}

/// Fan-out router that delivers events to matching listeners and streams.
pub struct EventManager {
    config: EventManagerConfig,
    next_seq: AtomicU64,
    next_subscription: AtomicU64,
    listeners: RwLock<Vec<Listener>>,
    streams: RwLock<Vec<StreamSubscriber>>,
}

impl EventManager {
    pub fn new() -> Self {
        Self::with_config(EventManagerConfig::default())
    }

    pub fn with_config(config: EventManagerConfig) -> Self {
        Self {
            config,
            next_seq: AtomicU64::new(1),
            next_subscription: AtomicU64::new(1),
            listeners: RwLock::new(Vec::new()),
            streams: RwLock::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &EventManagerConfig {
        &self.config
    }

    /// Register a synchronous listener.
    pub fn subscribe(
        &self,
        filter: EventFilter,
        listener: Arc<dyn EventListener>,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Listener {
                id,
                filter,
                callback: listener,
            });
        debug!(subscription = id.0, "listener subscribed");
        id
    }

    /// Remove a listener. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|l| l.id != id);
        let removed = listeners.len() != before;
        if removed {
            debug!(subscription = id.0, "listener unsubscribed");
        }
        removed
    }

    /// Register a new stream subscriber with the given filter.
    pub fn subscribe_stream(&self, filter: EventFilter) -> EventStream {
        let (tx, rx) = broadcast::channel(self.config.channel_capacity.max(1));
        self.streams
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(StreamSubscriber { filter, sender: tx });
        rx
    }

    /// Build an event and deliver it to every matching subscriber.
    ///
    /// Listener callbacks are collected under the read lock and invoked after
    /// it is released, so a listener may subscribe or unsubscribe.
    pub fn publish(
        &self,
        subject: EventSubject,
        topic: EventTopic,
        posted_by: ChannelId,
        diff: GraphDiff,
    ) -> GraphEvent {
        let event = GraphEvent {
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            subject,
            topic,
            posted_by,
            diff,
        };

        let targets: Vec<Arc<dyn EventListener>> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|l| l.filter.matches(&event))
            .map(|l| Arc::clone(&l.callback))
            .collect();

        for listener in &targets {
            listener.on_event(&event);
        }

        let mut streams = self.streams.write().unwrap_or_else(PoisonError::into_inner);
        streams.retain(|sub| {
            if sub.filter.matches(&event) {
                sub.sender.send(event.clone()).is_ok()
            } else {
                sub.sender.receiver_count() > 0
            }
        });

        debug!(
            seq = event.seq,
            subject = %event.subject,
            topic = %event.topic,
            listeners = targets.len(),
            "event published"
        );
        event
    }

    pub fn listener_count(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn stream_count(&self) -> usize {
        self.streams
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Default for EventManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventManager")
            .field("listeners", &self.listener_count())
            .field("streams", &self.stream_count())
            .finish()
    }
}

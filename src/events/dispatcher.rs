//! Event dispatcher module
//!
//! Fire-and-forget lifecycle notifications over a broadcast channel. Emitting
//! never fails the caller: with no subscribers the event is simply dropped.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, trace};

/// Cache event kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheEventKind {
    Hit,
    Miss,
    /// Joined an in-flight construction
    Coalesced,
    Evict,
    Expire,
    Invalidate,
    ConstructionFailed,
}

/// Cache lifecycle event
#[derive(Debug, Clone, Serialize)]
pub struct CacheEvent {
    pub kind: CacheEventKind,
    pub key: String,
    pub timestamp: DateTime<Utc>,
}

/// Frame focus change
#[derive(Debug, Clone, Serialize)]
pub struct FrameSwitchEvent {
    pub page_id: String,
    /// URL of the previous focus, `None` for the root
    pub from: Option<String>,
    /// URL of the new focus, `None` for the root
    pub to: Option<String>,
    pub depth: usize,
    pub timestamp: DateTime<Utc>,
}

/// Context mutation kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextEventKind {
    Set,
    Delete,
    Merge,
    Clear,
    CheckpointCreated,
    CheckpointRestored,
    CheckpointDeleted,
}

/// Context store mutation
#[derive(Debug, Clone, Serialize)]
pub struct ContextEvent {
    pub page_id: String,
    pub kind: ContextEventKind,
    pub key: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Event that can be dispatched
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "category", rename_all = "snake_case")]
pub enum LifecycleEvent {
    Cache(CacheEvent),
    Frame(FrameSwitchEvent),
    Context(ContextEvent),
}

/// Event category used for filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventCategory {
    Cache,
    Frame,
    Context,
}

impl LifecycleEvent {
    /// Category of this event
    pub fn category(&self) -> EventCategory {
        match self {
            LifecycleEvent::Cache(_) => EventCategory::Cache,
            LifecycleEvent::Frame(_) => EventCategory::Frame,
            LifecycleEvent::Context(_) => EventCategory::Context,
        }
    }

    pub(crate) fn cache(kind: CacheEventKind, key: impl ToString) -> Self {
        LifecycleEvent::Cache(CacheEvent {
            kind,
            key: key.to_string(),
            timestamp: Utc::now(),
        })
    }

    pub(crate) fn frame_switch(
        page_id: &str,
        from: Option<String>,
        to: Option<String>,
        depth: usize,
    ) -> Self {
        LifecycleEvent::Frame(FrameSwitchEvent {
            page_id: page_id.to_string(),
            from,
            to,
            depth,
            timestamp: Utc::now(),
        })
    }

    pub(crate) fn context(page_id: &str, kind: ContextEventKind, key: Option<&str>) -> Self {
        LifecycleEvent::Context(ContextEvent {
            page_id: page_id.to_string(),
            kind,
            key: key.map(str::to_string),
            timestamp: Utc::now(),
        })
    }
}

/// Filtered receiver that only receives events of the requested categories
pub struct FilteredReceiver {
    inner: broadcast::Receiver<LifecycleEvent>,
    categories: Vec<EventCategory>,
}

impl FilteredReceiver {
    /// Receive next filtered event
    pub async fn recv(&mut self) -> Result<LifecycleEvent> {
        loop {
            match self.inner.recv().await {
                Ok(event) => {
                    if self.matches(&event) {
                        return Ok(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!("Receiver lagged behind by {} events, catching up", n);
                }
                Err(e) => {
                    return Err(Error::internal(format!("Failed to receive event: {}", e)));
                }
            }
        }
    }

    /// Try to receive next filtered event without blocking
    pub fn try_recv(&mut self) -> Option<LifecycleEvent> {
        loop {
            match self.inner.try_recv() {
                Ok(event) if self.matches(&event) => return Some(event),
                Ok(_) => {}
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    debug!("Receiver lagged behind by {} events, catching up", n);
                }
                Err(_) => return None,
            }
        }
    }

    fn matches(&self, event: &LifecycleEvent) -> bool {
        self.categories.is_empty() || self.categories.contains(&event.category())
    }
}

/// Event dispatcher
///
/// Cheap to share behind an `Arc`; every component that reports lifecycle
/// events holds an optional handle to one.
#[derive(Debug)]
pub struct EventDispatcher {
    tx: broadcast::Sender<LifecycleEvent>,
    channel_capacity: usize,
}

impl EventDispatcher {
    /// Create a new event dispatcher
    pub fn new(channel_capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(channel_capacity.max(1));

        Self {
            tx,
            channel_capacity: channel_capacity.max(1),
        }
    }

    /// Subscribe to all events
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.tx.subscribe()
    }

    /// Subscribe to events of the given categories (all when empty)
    pub fn subscribe_filtered(&self, categories: Vec<EventCategory>) -> FilteredReceiver {
        FilteredReceiver {
            inner: self.tx.subscribe(),
            categories,
        }
    }

    /// Subscribe to all events as a stream
    pub fn stream(&self) -> BroadcastStream<LifecycleEvent> {
        BroadcastStream::new(self.tx.subscribe())
    }

    /// Emit an event, ignoring the absence of subscribers
    pub fn emit(&self, event: LifecycleEvent) {
        if let Err(e) = self.tx.send(event) {
            trace!("No receivers for lifecycle event: {}", e);
        }
    }

    /// Get current channel capacity
    pub fn capacity(&self) -> usize {
        self.channel_capacity
    }

    /// Number of live receivers
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    #[test]
    fn test_emit_without_subscribers() {
        let dispatcher = EventDispatcher::new(8);
        assert_eq!(dispatcher.receiver_count(), 0);
        dispatcher.emit(LifecycleEvent::cache(CacheEventKind::Miss, "key"));
    }

    #[tokio::test]
    async fn test_filtered_receiver() {
        let dispatcher = EventDispatcher::new(8);
        let mut rx = dispatcher.subscribe_filtered(vec![EventCategory::Context]);

        dispatcher.emit(LifecycleEvent::cache(CacheEventKind::Hit, "key"));
        dispatcher.emit(LifecycleEvent::context("page-1", ContextEventKind::Set, Some("user")));

        let event = tokio::time::timeout(std::time::Duration::from_millis(100), rx.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            LifecycleEvent::Context(e) => {
                assert_eq!(e.kind, ContextEventKind::Set);
                assert_eq!(e.key.as_deref(), Some("user"));
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(rx.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_stream() {
        let dispatcher = EventDispatcher::new(8);
        let mut stream = dispatcher.stream();

        dispatcher.emit(LifecycleEvent::cache(CacheEventKind::Evict, "key"));

        let event = stream.next().await.unwrap().unwrap();
        assert_eq!(event.category(), EventCategory::Cache);
    }
}

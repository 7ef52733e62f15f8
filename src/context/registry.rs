//! Context registry
//!
//! Owns one [`ContextStore`] per page for the lifetime of that page.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::config::Config;
use crate::context::{ContextStore, DEFAULT_HISTORY_CAPACITY};
use crate::events::EventDispatcher;

/// Page id -> context store
#[derive(Debug)]
pub struct ContextRegistry {
    stores: RwLock<HashMap<String, Arc<ContextStore>>>,
    history_capacity: usize,
    events: Option<Arc<EventDispatcher>>,
}

impl Default for ContextRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextRegistry {
    pub fn new() -> Self {
        Self {
            stores: RwLock::new(HashMap::new()),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            events: None,
        }
    }

    /// Registry whose stores follow `config` and report to `events`
    pub fn from_config(config: &Config, events: Option<Arc<EventDispatcher>>) -> Self {
        Self {
            stores: RwLock::new(HashMap::new()),
            history_capacity: config.history_capacity,
            events,
        }
    }

    /// Store of `page_id`, created on first use
    pub async fn open(&self, page_id: &str) -> Arc<ContextStore> {
        if let Some(store) = self.stores.read().await.get(page_id) {
            return store.clone();
        }

        let mut stores = self.stores.write().await;
        stores
            .entry(page_id.to_string())
            .or_insert_with(|| {
                debug!("Opening context store for page {}", page_id);
                let store = ContextStore::with_capacity(page_id, self.history_capacity);
                Arc::new(match &self.events {
                    Some(events) => store.with_events(events.clone()),
                    None => store,
                })
            })
            .clone()
    }

    pub async fn get(&self, page_id: &str) -> Option<Arc<ContextStore>> {
        self.stores.read().await.get(page_id).cloned()
    }

    /// Tear down the store of `page_id`
    ///
    /// Holders of the store keep their `Arc` but every later mutation fails.
    pub async fn close(&self, page_id: &str) -> bool {
        let removed = self.stores.write().await.remove(page_id);
        match removed {
            Some(store) => {
                store.close();
                info!("Closed context for page {}", page_id);
                true
            }
            None => false,
        }
    }

    /// Close every store
    pub async fn close_all(&self) -> usize {
        let stores: Vec<Arc<ContextStore>> =
            self.stores.write().await.drain().map(|(_, s)| s).collect();
        for store in &stores {
            store.close();
        }
        stores.len()
    }

    /// Sorted ids of pages with an open store
    pub async fn page_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.stores.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn len(&self) -> usize {
        self.stores.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

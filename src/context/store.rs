//! Per-page context store implementation

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, instrument};

use crate::context::record::{
    checkpoint_key, is_reserved, ActionRecord, CheckpointData, ContextRecord, ContextSnapshot,
    ErrorRecord, HistoryEntry, MetricSample, MetricSummary, Metrics,
};
use crate::context::DEFAULT_HISTORY_CAPACITY;
use crate::events::{ContextEventKind, EventDispatcher, LifecycleEvent};
use crate::{Error, Result};

/// Restores a full record when a temporary context ends, however it ends
struct TemporaryRestore<'a> {
    store: &'a ContextStore,
    snapshot: Option<ContextRecord>,
}

impl Drop for TemporaryRestore<'_> {
    fn drop(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            let mut record = self
                .store
                .record
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            // A store closed while the temporary context ran stays empty
            if self.store.is_closed() {
                return;
            }
            *record = snapshot;
            debug!("Temporary context on page {} rolled back", self.store.page_id);
        }
    }
}

/// Keyed value, metrics and checkpoint store of one page
pub struct ContextStore {
    page_id: String,
    record: RwLock<ContextRecord>,
    history_capacity: usize,
    closed: AtomicBool,
    events: Option<Arc<EventDispatcher>>,
}

impl fmt::Debug for ContextStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextStore")
            .field("page_id", &self.page_id)
            .field("len", &self.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl ContextStore {
    pub fn new(page_id: impl Into<String>) -> Self {
        Self::with_capacity(page_id, DEFAULT_HISTORY_CAPACITY)
    }

    /// Create a store whose history keeps at most `history_capacity` entries
    pub fn with_capacity(page_id: impl Into<String>, history_capacity: usize) -> Self {
        Self {
            page_id: page_id.into(),
            record: RwLock::new(ContextRecord::default()),
            history_capacity: history_capacity.max(1),
            closed: AtomicBool::new(false),
            events: None,
        }
    }

    /// Report mutations to `events`
    pub fn with_events(mut self, events: Arc<EventDispatcher>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn page_id(&self) -> &str {
        &self.page_id
    }

    pub fn history_capacity(&self) -> usize {
        self.history_capacity
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Tear the store down; later mutations fail with `IllegalState`
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            *self.record.write().unwrap_or_else(PoisonError::into_inner) =
                ContextRecord::default();
            info!("Context store for page {} closed", self.page_id);
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, ContextRecord> {
        self.record.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write access for mutations; fails once the store is closed
    fn write(&self) -> Result<RwLockWriteGuard<'_, ContextRecord>> {
        if self.is_closed() {
            return Err(Error::illegal_state(format!(
                "context store for page {} is closed",
                self.page_id
            )));
        }
        Ok(self.record.write()?)
    }

    fn emit(&self, kind: ContextEventKind, key: Option<&str>) {
        if let Some(events) = &self.events {
            events.emit(LifecycleEvent::context(&self.page_id, kind, key));
        }
    }

    fn check_key(key: &str) -> Result<()> {
        if is_reserved(key) {
            return Err(Error::illegal_state(format!("'{}' is a reserved key", key)));
        }
        Ok(())
    }

    /// Store `value` under `key`
    pub fn set<V: Serialize>(&self, key: &str, value: V) -> Result<()> {
        Self::check_key(key)?;
        let value = serde_json::to_value(value)?;

        let mut record = self.write()?;
        record.store.insert(key.to_string(), value);
        record.log(self.history_capacity, "set", json!({ "key": key }));
        drop(record);

        self.emit(ContextEventKind::Set, Some(key));
        Ok(())
    }

    /// Store several entries under one lock
    pub fn set_multiple<I, K>(&self, entries: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let entries: Vec<(String, Value)> = entries.into_iter().map(|(k, v)| (k.into(), v)).collect();
        for (key, _) in &entries {
            Self::check_key(key)?;
        }

        let keys: Vec<String> = entries.iter().map(|(k, _)| k.clone()).collect();
        let mut record = self.write()?;
        record.store.extend(entries);
        record.log(self.history_capacity, "set_multiple", json!({ "keys": keys }));
        drop(record);

        for key in &keys {
            self.emit(ContextEventKind::Set, Some(key));
        }
        Ok(())
    }

    /// Deep copy of the value under `key`
    pub fn get(&self, key: &str) -> Option<Value> {
        if is_reserved(key) {
            return None;
        }
        self.read().store.get(key).cloned()
    }

    /// Value under `key` deserialized as `T`
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.get(key)
            .map(serde_json::from_value)
            .transpose()
            .map_err(Error::from)
    }

    pub fn get_required(&self, key: &str) -> Result<Value> {
        self.get(key)
            .ok_or_else(|| Error::not_found(format!("context key '{}'", key)))
    }

    pub fn has(&self, key: &str) -> bool {
        !is_reserved(key) && self.read().store.contains_key(key)
    }

    /// Remove `key`; returns whether it was present
    pub fn delete(&self, key: &str) -> Result<bool> {
        Self::check_key(key)?;

        let mut record = self.write()?;
        let removed = record.store.remove(key).is_some();
        if removed {
            record.log(self.history_capacity, "delete", json!({ "key": key }));
        }
        drop(record);

        if removed {
            self.emit(ContextEventKind::Delete, Some(key));
        }
        Ok(removed)
    }

    /// Remove every entry; checkpoints survive. Returns the number removed.
    pub fn clear(&self) -> Result<usize> {
        let mut record = self.write()?;
        let before = record.store.len();
        record.store.retain(|k, _| is_reserved(k));
        let removed = before - record.store.len();
        record.log(self.history_capacity, "clear", json!({ "removed": removed }));
        drop(record);

        debug!("Cleared {} context entries on page {}", removed, self.page_id);
        self.emit(ContextEventKind::Clear, None);
        Ok(removed)
    }

    /// Merge the fields of `partial` into the store
    ///
    /// Where both the existing and the incoming value are objects their
    /// fields are merged one level deep; any other pair is replaced.
    pub fn merge(&self, partial: Value) -> Result<()> {
        let partial = match partial {
            Value::Object(map) => map,
            other => {
                return Err(Error::Serialization(format!(
                    "merge expects a JSON object, got {}",
                    other
                )))
            }
        };
        for key in partial.keys() {
            Self::check_key(key)?;
        }

        let keys: Vec<String> = partial.keys().cloned().collect();
        let mut record = self.write()?;
        for (key, incoming) in partial {
            let slot = record.store.entry(key).or_insert(Value::Null);
            match (slot, incoming) {
                (Value::Object(existing), Value::Object(fields)) => existing.extend(fields),
                (slot, incoming) => *slot = incoming,
            }
        }
        record.log(self.history_capacity, "merge", json!({ "keys": keys }));
        drop(record);

        self.emit(ContextEventKind::Merge, None);
        Ok(())
    }

    /// Sorted user keys
    pub fn keys(&self) -> Vec<String> {
        self.read().visible().map(|(k, _)| k.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.read().visible().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append a sample to the custom series `name`
    ///
    /// Only finite values are accepted; NaN and infinities have no JSON form
    /// and would break checkpoints and snapshots.
    pub fn record_metric(&self, name: &str, value: f64) -> Result<()> {
        if !value.is_finite() {
            return Err(Error::Serialization(format!(
                "metric '{}' sample {} is not finite",
                name, value
            )));
        }
        let mut record = self.write()?;
        record
            .metrics
            .custom
            .entry(name.to_string())
            .or_default()
            .push(MetricSample {
                value,
                timestamp: chrono::Utc::now(),
            });
        Ok(())
    }

    pub fn record_action(&self, name: &str, duration_ms: u64, details: Value) -> Result<()> {
        let mut record = self.write()?;
        record.metrics.actions.push(ActionRecord {
            name: name.to_string(),
            duration_ms,
            details,
            timestamp: chrono::Utc::now(),
        });
        Ok(())
    }

    pub fn record_error(&self, error: impl fmt::Display, context: Value) -> Result<()> {
        let message = error.to_string();
        let mut record = self.write()?;
        record.metrics.errors.push(ErrorRecord {
            message: message.clone(),
            context,
            timestamp: chrono::Utc::now(),
        });
        record.log(self.history_capacity, "error", json!({ "message": message }));
        Ok(())
    }

    /// Add `by` to counter `name`; returns the new value
    pub fn increment_counter(&self, name: &str, by: i64) -> Result<i64> {
        let mut record = self.write()?;
        let counter = record.metrics.counters.entry(name.to_string()).or_default();
        *counter += by;
        Ok(*counter)
    }

    /// Aggregate of the custom series `name`
    pub fn summary(&self, name: &str) -> Option<MetricSummary> {
        self.read()
            .metrics
            .custom
            .get(name)
            .and_then(|samples| MetricSummary::of(samples))
    }

    pub fn metrics(&self) -> Metrics {
        self.read().metrics.clone()
    }

    /// History, oldest first
    pub fn history(&self) -> Vec<HistoryEntry> {
        self.read().history.iter().cloned().collect()
    }

    /// Serializable export of the user-visible state
    pub fn snapshot(&self) -> ContextSnapshot {
        let record = self.read();
        ContextSnapshot {
            page_id: self.page_id.clone(),
            store: record.visible_store(),
            metrics: record.metrics.clone(),
            checkpoints: record.checkpoint_names(),
            history_len: record.history.len(),
            taken_at: chrono::Utc::now(),
        }
    }

    /// Save a deep copy of store and metrics as checkpoint `name`
    ///
    /// An existing checkpoint of the same name is overwritten.
    #[instrument(skip(self), fields(page = %self.page_id))]
    pub fn create_checkpoint(&self, name: &str) -> Result<()> {
        let mut record = self.write()?;
        let data = CheckpointData {
            store: record.visible_store(),
            metrics: record.metrics.clone(),
        };
        let value = serde_json::to_value(data)?;
        record.store.insert(checkpoint_key(name), value);
        record.log(self.history_capacity, "checkpoint", json!({ "name": name }));
        drop(record);

        debug!("Created checkpoint '{}'", name);
        self.emit(ContextEventKind::CheckpointCreated, Some(name));
        Ok(())
    }

    /// Replace store and metrics with a deep copy of checkpoint `name`
    ///
    /// Other checkpoints are kept. The checkpoint itself stays available.
    #[instrument(skip(self), fields(page = %self.page_id))]
    pub fn restore_checkpoint(&self, name: &str) -> Result<()> {
        let mut record = self.write()?;
        let stored = record
            .store
            .get(&checkpoint_key(name))
            .cloned()
            .ok_or_else(|| Error::not_found(format!("checkpoint '{}'", name)))?;
        let data: CheckpointData = serde_json::from_value(stored)?;

        let mut store: BTreeMap<String, Value> = record
            .store
            .iter()
            .filter(|(k, _)| is_reserved(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        store.extend(data.store);
        record.store = store;
        record.metrics = data.metrics;
        record.log(self.history_capacity, "restore", json!({ "name": name }));
        drop(record);

        debug!("Restored checkpoint '{}'", name);
        self.emit(ContextEventKind::CheckpointRestored, Some(name));
        Ok(())
    }

    /// Sorted checkpoint names
    pub fn list_checkpoints(&self) -> Vec<String> {
        self.read().checkpoint_names()
    }

    pub fn delete_checkpoint(&self, name: &str) -> Result<bool> {
        let mut record = self.write()?;
        let removed = record.store.remove(&checkpoint_key(name)).is_some();
        drop(record);

        if removed {
            self.emit(ContextEventKind::CheckpointDeleted, Some(name));
        }
        Ok(removed)
    }

    /// Apply `patch`, run `f`, then put back the exact prior state
    ///
    /// Store, metrics and history are rolled back on success, on error and
    /// when the returned future is dropped early.
    pub async fn with_temporary_context<I, K, F, Fut, R>(&self, patch: I, f: F) -> Result<R>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        let snapshot = self.write()?.clone();
        let _restore = TemporaryRestore {
            store: self,
            snapshot: Some(snapshot),
        };

        self.set_multiple(patch)?;
        f().await
    }
}

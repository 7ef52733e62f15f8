//! Context record types
//!
//! Everything a [`ContextStore`](super::ContextStore) holds, all of it
//! cloneable by value so snapshots never alias live state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};

/// Prefix of keys holding checkpoints inside the store
pub(crate) const CHECKPOINT_PREFIX: &str = "__checkpoint__:";

pub(crate) fn is_reserved(key: &str) -> bool {
    key.starts_with(CHECKPOINT_PREFIX)
}

pub(crate) fn checkpoint_key(name: &str) -> String {
    format!("{}{}", CHECKPOINT_PREFIX, name)
}

/// Timed action, e.g. a step or a page interaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub name: String,
    pub duration_ms: u64,
    pub details: Value,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub message: String,
    pub context: Value,
    pub timestamp: DateTime<Utc>,
}

/// One point of a custom metric series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

/// Aggregated view of a custom metric series
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSummary {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub last: f64,
}

impl MetricSummary {
    pub(crate) fn of(samples: &[MetricSample]) -> Option<Self> {
        let last = samples.last()?.value;
        let (min, max, sum) = samples.iter().fold(
            (f64::INFINITY, f64::NEG_INFINITY, 0.0),
            |(min, max, sum), s| (min.min(s.value), max.max(s.value), sum + s.value),
        );

        Some(Self {
            count: samples.len(),
            min,
            max,
            avg: sum / samples.len() as f64,
            last,
        })
    }
}

/// Metrics buckets of one page
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub actions: Vec<ActionRecord>,
    pub errors: Vec<ErrorRecord>,
    pub custom: BTreeMap<String, Vec<MetricSample>>,
    pub counters: BTreeMap<String, i64>,
}

/// Entry of the bounded mutation history
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub action: String,
    pub timestamp: DateTime<Utc>,
    pub data: Value,
}

/// Serialized form of a checkpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct CheckpointData {
    pub store: BTreeMap<String, Value>,
    pub metrics: Metrics,
}

/// Full mutable state of a context store
#[derive(Debug, Clone, Default)]
pub(crate) struct ContextRecord {
    pub store: BTreeMap<String, Value>,
    pub metrics: Metrics,
    pub history: VecDeque<HistoryEntry>,
}

impl ContextRecord {
    /// Append to history, dropping the oldest entries beyond `capacity`
    pub fn log(&mut self, capacity: usize, action: &str, data: Value) {
        while self.history.len() >= capacity.max(1) {
            self.history.pop_front();
        }
        self.history.push_back(HistoryEntry {
            action: action.to_string(),
            timestamp: Utc::now(),
            data,
        });
    }

    /// User-visible entries, checkpoints excluded
    pub fn visible(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.store.iter().filter(|(k, _)| !is_reserved(k))
    }

    /// Deep copy of the user-visible store
    pub fn visible_store(&self) -> BTreeMap<String, Value> {
        self.visible()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn checkpoint_names(&self) -> Vec<String> {
        self.store
            .keys()
            .filter_map(|k| k.strip_prefix(CHECKPOINT_PREFIX))
            .map(str::to_string)
            .collect()
    }
}

/// Serializable export of a context store
#[derive(Debug, Clone, Serialize)]
pub struct ContextSnapshot {
    pub page_id: String,
    pub store: BTreeMap<String, Value>,
    pub metrics: Metrics,
    pub checkpoints: Vec<String>,
    pub history_len: usize,
    pub taken_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample(value: f64) -> MetricSample {
        MetricSample {
            value,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_metric_summary() {
        assert!(MetricSummary::of(&[]).is_none());

        let summary = MetricSummary::of(&[sample(120.0), sample(80.0), sample(100.0)]).unwrap();
        assert_eq!(summary.count, 3);
        assert_eq!(summary.min, 80.0);
        assert_eq!(summary.max, 120.0);
        assert_eq!(summary.avg, 100.0);
        assert_eq!(summary.last, 100.0);
    }

    #[test]
    fn test_history_ring() {
        let mut record = ContextRecord::default();
        for i in 0..5 {
            record.log(3, "set", json!({ "i": i }));
        }

        assert_eq!(record.history.len(), 3);
        assert_eq!(record.history[0].data, json!({ "i": 2 }));
        assert_eq!(record.history[2].data, json!({ "i": 4 }));
    }

    #[test]
    fn test_reserved_keys_hidden() {
        let mut record = ContextRecord::default();
        record.store.insert("user".into(), json!("alice"));
        record.store.insert(checkpoint_key("before-login"), json!({}));

        assert_eq!(record.visible().count(), 1);
        assert_eq!(record.checkpoint_names(), vec!["before-login".to_string()]);
        assert!(!record.visible_store().contains_key(&checkpoint_key("before-login")));
    }
}

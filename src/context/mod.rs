//! # Context store
//!
//! Per-page key/value state, metrics and checkpoints.
//!
//! ## Main features
//! - **Keyed values**: arbitrary JSON values with typed access
//! - **Metrics**: actions, errors, custom series and counters
//! - **Checkpoints**: named deep copies of store and metrics, restorable
//!   at any time
//! - **Temporary contexts**: patch, run, roll back
//! - **History**: bounded ring buffer of mutations
//!
//! ## Module structure
//! - `record`: value, metric and snapshot types
//! - `store`: `ContextStore`
//! - `registry`: `ContextRegistry`, one store per page

pub mod record;
pub mod store;
pub mod registry;


/// Default capacity of a store's history ring buffer
pub const DEFAULT_HISTORY_CAPACITY: usize = 1000;

pub use record::{
    ActionRecord, ContextSnapshot, ErrorRecord, HistoryEntry, MetricSample, MetricSummary,
    Metrics,
};
pub use registry::ContextRegistry;
pub use store::ContextStore;

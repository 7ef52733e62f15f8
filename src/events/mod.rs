//! # Lifecycle events
//!
//! Observability sink for cache hits/misses/evictions, frame switches and
//! context mutations. Components emit through an optional shared
//! [`EventDispatcher`]; a slow or absent subscriber never affects them.

pub mod dispatcher;

pub use dispatcher::{
    CacheEvent, CacheEventKind, ContextEvent, ContextEventKind, EventCategory, EventDispatcher,
    FilteredReceiver, FrameSwitchEvent, LifecycleEvent,
};

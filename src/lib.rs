//! Chaser-POM: page-object lifecycle core for browser automation
//!
//! This library provides the pieces an automation orchestrator builds page
//! objects on: a single-flight page-object cache, a frame navigator over
//! nested documents and a per-page context store with checkpoints. The
//! browser itself is reached only through the traits in [`capability`].

pub mod error;
pub mod config;
pub mod telemetry;

pub mod capability;
pub mod events;
pub mod cache;
pub mod frames;
pub mod context;

// Re-exports
pub use cache::{AcquireOptions, CacheKey, CachePolicy, PageObject, PageObjectCache};
pub use context::{ContextRegistry, ContextStore};
pub use error::{Error, Result};
pub use frames::{FrameNavigator, FrameTarget};

/// Chaser-POM library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! # Frame navigation
//!
//! Tracks which embedded document of a page is "current" and moves between
//! them with a push/pop discipline.
//!
//! ## Main features
//! - **Stack-based focus**: `switch_to` pushes, `switch_to_parent` pops,
//!   `switch_to_root` resets
//! - **Scoped execution**: `execute_in_scope` restores focus and stack
//!   however the closure ends
//! - **Flexible targets**: handles, names, generated identifiers
//!   (`frame[n]`), URLs, URL fragments and selectors
//! - **Tree export**: serializable nested tree and flat summaries
//! - **Change monitoring**: attach/detach callbacks with explicit disposal
//!
//! ## Module structure
//! - `tree`: frame arena snapshot, identifier rules, exported shapes
//! - `navigator`: `FrameNavigator`, targets, monitors

pub mod tree;
pub mod navigator;

#[cfg(test)]
pub mod tests;

pub use navigator::{Focus, FrameMonitor, FrameNavigator, FrameTarget, NavigationState};
pub use tree::{FrameArena, FrameId, FrameInfo, FrameNode, FrameSummary, ROOT_IDENTIFIER};

//! # Capability layer
//!
//! Page and frame handles supplied by the browser-automation collaborator.
//! The core never drives a browser itself; it only reads the live frame tree
//! and resolves embedded documents through these traits.
//!
//! ## Module structure
//! - `traits`: `PageHandle` / `FrameHandle` contracts and frame change events
//! - `mock`: in-memory implementation used by tests

pub mod traits;
pub mod mock;

pub use traits::{
    same_frame, FrameEvent, FrameEventKind, FrameHandle, FrameListener, FrameRef,
    ListenerId, PageHandle, PageRef,
};

pub use mock::{MockFrame, MockPage};

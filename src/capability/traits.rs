//! Capability layer traits
//!
//! This module defines the abstract interfaces for page and frame handles
//! supplied by the browser-automation collaborator.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Shared handle to a live frame
pub type FrameRef = Arc<dyn FrameHandle>;

/// Shared handle to a live page
pub type PageRef = Arc<dyn PageHandle>;

/// Frame handle trait
///
/// Represents one embedded document (or the main document) of a page.
/// Every accessor reads the live state; nothing here is a snapshot.
#[async_trait]
pub trait FrameHandle: Send + Sync + fmt::Debug {
    /// Stable handle ID, unique within the owning page
    fn id(&self) -> &str;

    /// Current URL of the frame document
    fn url(&self) -> String;

    /// Frame name attribute, if any
    fn name(&self) -> Option<String>;

    /// Parent frame, `None` for the main frame or a detached frame
    fn parent_frame(&self) -> Option<FrameRef>;

    /// Attached child frames in document order
    fn child_frames(&self) -> Vec<FrameRef>;

    /// Check if the frame has been detached from its page
    fn is_detached(&self) -> bool;

    /// Resolve the embedded document behind the element matching `selector`
    async fn locate(&self, selector: &str) -> Result<Option<FrameRef>, crate::Error>;
}

/// Kind of frame tree change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameEventKind {
    Attached,
    Detached,
}

/// Frame tree change reported by the page
#[derive(Debug, Clone)]
pub struct FrameEvent {
    pub kind: FrameEventKind,
    pub frame: FrameRef,
}

/// Observer registered for frame tree changes
pub type FrameListener = Arc<dyn Fn(&FrameEvent) + Send + Sync>;

/// Registration handle for a frame listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// Page handle trait
///
/// Represents a page/tab whose frames the navigator walks.
pub trait PageHandle: Send + Sync + fmt::Debug {
    /// Get page ID
    fn id(&self) -> &str;

    /// Current URL of the main document
    fn url(&self) -> String;

    /// Main (root) frame
    fn main_frame(&self) -> FrameRef;

    /// Register an observer for one kind of frame change
    fn add_frame_listener(&self, kind: FrameEventKind, listener: FrameListener) -> ListenerId;

    /// Deregister an observer, returning whether it was registered
    fn remove_frame_listener(&self, id: ListenerId) -> bool;

    /// All attached frames, main frame first, depth-first
    fn frames(&self) -> Vec<FrameRef> {
        let mut out = Vec::new();
        let mut pending = vec![self.main_frame()];
        while let Some(frame) = pending.pop() {
            let mut children = frame.child_frames();
            children.reverse();
            out.push(frame);
            pending.extend(children);
        }
        out
    }
}

/// Check if two handles refer to the same live frame
pub fn same_frame(a: &FrameRef, b: &FrameRef) -> bool {
    Arc::ptr_eq(a, b) || a.id() == b.id()
}

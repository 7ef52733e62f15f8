//! Mock capability implementation for testing
//!
//! In-memory page and frame handles whose frame tree can be attached,
//! detached and re-rendered from test code.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

use crate::capability::traits::*;
use crate::Error;

/// Mock frame
#[derive(Debug)]
pub struct MockFrame {
    id: String,
    url: RwLock<String>,
    name: Option<String>,
    parent: Option<Weak<MockFrame>>,
    children: RwLock<Vec<Arc<MockFrame>>>,
    detached: AtomicBool,
    /// Selector -> embedded document, as if the element hosting it matched
    embeds: RwLock<HashMap<String, Weak<MockFrame>>>,
}

impl MockFrame {
    fn new(name: Option<&str>, url: &str, parent: Option<Weak<MockFrame>>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            url: RwLock::new(url.to_string()),
            name: name.map(str::to_string),
            parent,
            children: RwLock::new(Vec::new()),
            detached: AtomicBool::new(false),
            embeds: RwLock::new(HashMap::new()),
        }
    }

    /// Child frames as concrete mocks
    pub fn mock_children(&self) -> Vec<Arc<MockFrame>> {
        self.children
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn mark_detached(&self) {
        self.detached.store(true, Ordering::SeqCst);
        for child in self.mock_children() {
            child.mark_detached();
        }
    }
}

#[async_trait]
impl FrameHandle for MockFrame {
    fn id(&self) -> &str {
        &self.id
    }

    fn url(&self) -> String {
        self.url.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn name(&self) -> Option<String> {
        self.name.clone()
    }

    fn parent_frame(&self) -> Option<FrameRef> {
        if self.is_detached() {
            return None;
        }
        self.parent
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|p| p as FrameRef)
    }

    fn child_frames(&self) -> Vec<FrameRef> {
        self.mock_children()
            .into_iter()
            .map(|c| c as FrameRef)
            .collect()
    }

    fn is_detached(&self) -> bool {
        self.detached.load(Ordering::SeqCst)
    }

    async fn locate(&self, selector: &str) -> Result<Option<FrameRef>, Error> {
        if self.is_detached() {
            return Err(Error::detached(format!("frame {}", self.id)));
        }

        let found = self
            .embeds
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(selector)
            .and_then(Weak::upgrade);

        Ok(found.map(|f| f as FrameRef))
    }
}

/// Mock page
pub struct MockPage {
    id: String,
    main: Arc<MockFrame>,
    listeners: RwLock<HashMap<u64, (FrameEventKind, FrameListener)>>,
    next_listener: AtomicU64,
}

impl std::fmt::Debug for MockPage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockPage")
            .field("id", &self.id)
            .field("main", &self.main)
            .field("listeners", &self.listener_count())
            .finish()
    }
}

impl MockPage {
    /// Create a new mock page whose main document is at `url`
    pub fn new(url: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            main: Arc::new(MockFrame::new(None, url, None)),
            listeners: RwLock::new(HashMap::new()),
            next_listener: AtomicU64::new(1),
        }
    }

    /// Main frame as a concrete mock
    pub fn main(&self) -> Arc<MockFrame> {
        self.main.clone()
    }

    /// Attach a new child frame under `parent`
    pub fn attach_frame(
        &self,
        parent: &Arc<MockFrame>,
        name: Option<&str>,
        url: &str,
    ) -> Arc<MockFrame> {
        let frame = Arc::new(MockFrame::new(name, url, Some(Arc::downgrade(parent))));
        parent
            .children
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(frame.clone());

        tracing::debug!("Mock: attached frame {} ({}) under {}", frame.id, url, parent.id);
        self.fire(FrameEventKind::Attached, frame.clone());
        frame
    }

    /// Attach a new child frame hosted by an element matching `selector`
    pub fn attach_frame_with_selector(
        &self,
        parent: &Arc<MockFrame>,
        selector: &str,
        name: Option<&str>,
        url: &str,
    ) -> Arc<MockFrame> {
        let frame = self.attach_frame(parent, name, url);
        parent
            .embeds
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(selector.to_string(), Arc::downgrade(&frame));
        frame
    }

    /// Drop the selector mapping, as if the host element was re-rendered
    pub fn forget_selector(&self, parent: &Arc<MockFrame>, selector: &str) {
        parent
            .embeds
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(selector);
    }

    /// Detach a frame and its subtree from the page
    pub fn detach_frame(&self, frame: &Arc<MockFrame>) {
        if let Some(parent) = frame.parent.as_ref().and_then(Weak::upgrade) {
            parent
                .children
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|c| !Arc::ptr_eq(c, frame));
        }
        frame.mark_detached();

        tracing::debug!("Mock: detached frame {}", frame.id);
        self.fire(FrameEventKind::Detached, frame.clone());
    }

    /// Change a frame's URL in place
    pub fn navigate_frame(&self, frame: &Arc<MockFrame>, url: &str) {
        *frame.url.write().unwrap_or_else(PoisonError::into_inner) = url.to_string();
    }

    /// Number of registered frame listeners
    pub fn listener_count(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn fire(&self, kind: FrameEventKind, frame: Arc<MockFrame>) {
        // Snapshot so listeners may (de)register without deadlocking
        let listeners: Vec<FrameListener> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|(k, _)| *k == kind)
            .map(|(_, l)| l.clone())
            .collect();

        let event = FrameEvent {
            kind,
            frame: frame as FrameRef,
        };
        for listener in listeners {
            listener(&event);
        }
    }
}

impl PageHandle for MockPage {
    fn id(&self) -> &str {
        &self.id
    }

    fn url(&self) -> String {
        self.main.url()
    }

    fn main_frame(&self) -> FrameRef {
        self.main.clone()
    }

    fn add_frame_listener(&self, kind: FrameEventKind, listener: FrameListener) -> ListenerId {
        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, (kind, listener));
        ListenerId(id)
    }

    fn remove_frame_listener(&self, id: ListenerId) -> bool {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id.0)
            .is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_mock_tree() {
        let page = MockPage::new("https://example.com/");
        let main = page.main();
        let a = page.attach_frame(&main, Some("a"), "https://example.com/a.html");
        let b = page.attach_frame(&a, None, "about:blank");

        assert_eq!(page.frames().len(), 3);
        assert_eq!(b.parent_frame().unwrap().id(), a.id());
        assert_eq!(main.child_frames().len(), 1);

        page.detach_frame(&a);
        assert!(a.is_detached());
        assert!(b.is_detached());
        assert!(main.child_frames().is_empty());
        assert_eq!(page.frames().len(), 1);
    }

    #[tokio::test]
    async fn test_mock_locate() {
        let page = MockPage::new("https://example.com/");
        let main = page.main();
        let frame = page.attach_frame_with_selector(&main, "#login", None, "https://auth.example.com/");

        let found = main.locate("#login").await.unwrap().unwrap();
        assert_eq!(found.id(), frame.id());
        assert!(main.locate("#missing").await.unwrap().is_none());

        page.forget_selector(&main, "#login");
        assert!(main.locate("#login").await.unwrap().is_none());
    }

    #[test]
    fn test_mock_listeners() {
        let page = MockPage::new("https://example.com/");
        let attached = Arc::new(AtomicUsize::new(0));
        let counter = attached.clone();
        let id = page.add_frame_listener(
            FrameEventKind::Attached,
            Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        page.attach_frame(&page.main(), None, "about:blank");
        assert_eq!(attached.load(Ordering::SeqCst), 1);

        assert!(page.remove_frame_listener(id));
        assert!(!page.remove_frame_listener(id));
        page.attach_frame(&page.main(), None, "about:blank");
        assert_eq!(attached.load(Ordering::SeqCst), 1);
    }
}

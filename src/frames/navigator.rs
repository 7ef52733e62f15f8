//! Frame navigator implementation
//!
//! Keeps a focus plus a stack of previous focuses per page and resolves
//! frame targets against the live tree on every call.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, instrument, trace};

use crate::capability::{
    same_frame, FrameEvent, FrameEventKind, FrameListener, FrameRef, ListenerId, PageRef,
};
use crate::events::{EventDispatcher, LifecycleEvent};
use crate::frames::tree::{
    preferred_identifier, sibling_identifiers, FrameArena, FrameInfo, FrameSummary,
    ROOT_IDENTIFIER,
};
use crate::{Error, Result};

/// Polling period of [`FrameNavigator::wait_for_frame`]
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Current focus of a navigator
#[derive(Debug, Clone)]
pub enum Focus {
    /// The page's main document
    Root,
    Frame(FrameRef),
}

impl Focus {
    /// URL of the focused frame, `None` for the root
    pub fn url(&self) -> Option<String> {
        match self {
            Focus::Root => None,
            Focus::Frame(frame) => Some(frame.url()),
        }
    }

    pub fn is_root(&self) -> bool {
        matches!(self, Focus::Root)
    }

    fn identifier(&self) -> String {
        match self {
            Focus::Root => ROOT_IDENTIFIER.to_string(),
            Focus::Frame(frame) => preferred_identifier(frame.name(), &frame.url())
                .unwrap_or_else(|| frame.id().to_string()),
        }
    }

    fn same_as(&self, other: &Focus) -> bool {
        match (self, other) {
            (Focus::Root, Focus::Root) => true,
            (Focus::Frame(a), Focus::Frame(b)) => same_frame(a, b),
            _ => false,
        }
    }
}

/// Focus plus the stack of previous focuses
#[derive(Debug, Clone)]
pub struct NavigationState {
    pub focus: Focus,
    pub stack: Vec<Focus>,
}

impl NavigationState {
    fn root() -> Self {
        Self {
            focus: Focus::Root,
            stack: Vec::new(),
        }
    }

    /// Number of saved focuses
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Same focus and same stack, compared by frame identity
    pub fn same_as(&self, other: &NavigationState) -> bool {
        self.focus.same_as(&other.focus)
            && self.stack.len() == other.stack.len()
            && self.stack.iter().zip(&other.stack).all(|(a, b)| a.same_as(b))
    }
}

/// What to switch to
#[derive(Debug, Clone)]
pub enum FrameTarget {
    /// A frame handle, used as-is after the liveness check
    Handle(FrameRef),
    /// Frame name, generated identifier, URL, URL fragment or selector
    Identifier(String),
}

impl fmt::Display for FrameTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameTarget::Handle(frame) => write!(f, "frame {} ({})", frame.id(), frame.url()),
            FrameTarget::Identifier(identifier) => write!(f, "frame '{}'", identifier),
        }
    }
}

impl From<&str> for FrameTarget {
    fn from(identifier: &str) -> Self {
        FrameTarget::Identifier(identifier.to_string())
    }
}

impl From<String> for FrameTarget {
    fn from(identifier: String) -> Self {
        FrameTarget::Identifier(identifier)
    }
}

impl From<FrameRef> for FrameTarget {
    fn from(frame: FrameRef) -> Self {
        FrameTarget::Handle(frame)
    }
}

impl From<&FrameRef> for FrameTarget {
    fn from(frame: &FrameRef) -> Self {
        FrameTarget::Handle(frame.clone())
    }
}

/// Frame-tree change subscription
///
/// Listeners stay registered until [`dispose`](Self::dispose) is called or
/// the monitor is dropped.
pub struct FrameMonitor {
    page: PageRef,
    listeners: Mutex<Vec<ListenerId>>,
}

impl FrameMonitor {
    /// Deregister all listeners; returns how many were still registered
    pub fn dispose(&self) -> usize {
        let listeners: Vec<ListenerId> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();

        listeners
            .into_iter()
            .filter(|id| self.page.remove_frame_listener(*id))
            .count()
    }

    pub fn is_active(&self) -> bool {
        !self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }
}

impl fmt::Debug for FrameMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameMonitor")
            .field("page", &self.page.id())
            .field("active", &self.is_active())
            .finish()
    }
}

impl Drop for FrameMonitor {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Restores a navigation snapshot when a scoped call ends, however it ends
struct ScopeRestore<'a> {
    navigator: &'a FrameNavigator,
    snapshot: Option<NavigationState>,
}

impl Drop for ScopeRestore<'_> {
    fn drop(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            *self
                .navigator
                .state
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = snapshot;
        }
    }
}

/// Per-page frame navigator
pub struct FrameNavigator {
    page: PageRef,
    state: Mutex<NavigationState>,
    /// (scope frame id, selector) -> frame resolved through that selector
    selector_cache: Mutex<HashMap<(String, String), FrameRef>>,
    events: Option<Arc<EventDispatcher>>,
}

impl fmt::Debug for FrameNavigator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameNavigator")
            .field("page", &self.page.id())
            .field("state", &self.state())
            .finish()
    }
}

impl FrameNavigator {
    /// Create a navigator focused on the page root
    pub fn new(page: PageRef) -> Self {
        Self {
            page,
            state: Mutex::new(NavigationState::root()),
            selector_cache: Mutex::new(HashMap::new()),
            events: None,
        }
    }

    /// Create a navigator that reports focus changes
    pub fn with_events(page: PageRef, events: Arc<EventDispatcher>) -> Self {
        Self {
            events: Some(events),
            ..Self::new(page)
        }
    }

    pub fn page(&self) -> &PageRef {
        &self.page
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, NavigationState>> {
        Ok(self.state.lock()?)
    }

    /// Snapshot of focus and stack
    pub fn state(&self) -> NavigationState {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of saved focuses
    pub fn depth(&self) -> usize {
        self.state().depth()
    }

    pub fn is_at_root(&self) -> bool {
        self.state().focus.is_root()
    }

    /// Identifiers of the saved focuses, oldest first, then the focus itself
    pub fn stack_identifiers(&self) -> Vec<String> {
        let state = self.state();
        state
            .stack
            .iter()
            .chain(std::iter::once(&state.focus))
            .map(Focus::identifier)
            .collect()
    }

    /// Handle of the focused document
    ///
    /// Fails with `DetachedResource` if the focused frame has gone away.
    pub fn current_frame(&self) -> Result<FrameRef> {
        match self.state().focus {
            Focus::Root => Ok(self.page.main_frame()),
            Focus::Frame(frame) if frame.is_detached() => Err(Error::detached(format!(
                "focused frame {} ({})",
                frame.id(),
                frame.url()
            ))),
            Focus::Frame(frame) => Ok(frame),
        }
    }

    fn scope_frame(&self) -> FrameRef {
        match self.state().focus {
            Focus::Root => self.page.main_frame(),
            Focus::Frame(frame) => frame,
        }
    }

    /// Push the current focus and focus `target`
    #[instrument(skip(self, target), fields(page = %self.page.id()))]
    pub async fn switch_to(&self, target: impl Into<FrameTarget>) -> Result<FrameRef> {
        let target = target.into();
        let frame = self.resolve(&target).await?;

        let (from, depth) = {
            let mut state = self.lock_state()?;
            let previous = std::mem::replace(&mut state.focus, Focus::Frame(frame.clone()));
            let from = previous.url();
            state.stack.push(previous);
            (from, state.stack.len())
        };

        debug!("Switched to frame {} ({}), depth {}", frame.id(), frame.url(), depth);
        self.emit_switch(from, Some(frame.url()), depth);
        Ok(frame)
    }

    /// Restore the most recently saved focus
    pub fn switch_to_parent(&self) -> Result<()> {
        let (from, to, depth) = {
            let mut state = self.lock_state()?;
            let previous = state
                .stack
                .pop()
                .ok_or_else(|| Error::illegal_state("no parent frame to switch to"))?;
            let from = std::mem::replace(&mut state.focus, previous).url();
            (from, state.focus.url(), state.stack.len())
        };

        debug!("Switched back to {}, depth {}", to.as_deref().unwrap_or(ROOT_IDENTIFIER), depth);
        self.emit_switch(from, to, depth);
        Ok(())
    }

    /// Focus the root and forget every saved focus
    pub fn switch_to_root(&self) -> Result<()> {
        let from = {
            let mut state = self.lock_state()?;
            let previous = std::mem::replace(&mut *state, NavigationState::root());
            previous.focus.url()
        };

        debug!("Switched to root frame");
        self.emit_switch(from, None, 0);
        Ok(())
    }

    /// Run `f` with `target` focused, then restore focus and stack
    ///
    /// Restoration happens whether `f` succeeds, fails or is cancelled.
    pub async fn execute_in_scope<F, Fut, R>(
        &self,
        target: impl Into<FrameTarget>,
        f: F,
    ) -> Result<R>
    where
        F: FnOnce(FrameRef) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        let _restore = ScopeRestore {
            navigator: self,
            snapshot: Some(self.state()),
        };

        let frame = self.switch_to(target).await?;
        f(frame).await
    }

    /// Poll until `target` resolves or `timeout` elapses
    pub async fn wait_for_frame(
        &self,
        target: impl Into<FrameTarget>,
        timeout: Duration,
    ) -> Result<FrameRef> {
        let target = target.into();

        let waited = tokio::time::timeout(timeout, async {
            loop {
                match self.resolve(&target).await {
                    Ok(frame) => return Ok(frame),
                    Err(e) if e.is_not_found() => {
                        trace!("{} not available yet: {}", target, e);
                        tokio::time::sleep(POLL_INTERVAL).await;
                    }
                    Err(e) => return Err(e),
                }
            }
        })
        .await;

        waited.map_err(|_| {
            Error::timeout(format!("{} not available within {:?}", target, timeout))
        })?
    }

    /// Snapshot of every non-root frame
    pub fn get_all_frames(&self) -> Vec<FrameSummary> {
        self.arena().summaries()
    }

    /// Nested tree rooted at the main frame
    pub fn get_frame_tree(&self) -> FrameInfo {
        self.arena().export()
    }

    /// Capture the live tree
    pub fn arena(&self) -> FrameArena {
        FrameArena::capture(&self.page.main_frame())
    }

    /// First frame whose URL equals `url`, else the first containing it
    pub fn find_frame_by_url(&self, url: &str) -> Option<FrameRef> {
        if url.is_empty() {
            return None;
        }
        let frames = self.page.frames();
        frames
            .iter()
            .find(|f| f.url() == url)
            .or_else(|| frames.iter().find(|f| f.url().contains(url)))
            .cloned()
    }

    pub fn find_frame_by_name(&self, name: &str) -> Option<FrameRef> {
        self.page
            .frames()
            .into_iter()
            .find(|f| f.name().as_deref() == Some(name))
    }

    /// Frames embedded by elements matching `selector`, in any document
    pub async fn find_frames_by_selector(&self, selector: &str) -> Result<Vec<FrameRef>> {
        let mut found: Vec<FrameRef> = Vec::new();

        for frame in self.page.frames() {
            match frame.locate(selector).await {
                Ok(Some(embedded)) => {
                    if !found.iter().any(|f| same_frame(f, &embedded)) {
                        found.push(embedded);
                    }
                }
                Ok(None) => {}
                Err(e) if e.is_not_found() => {
                    trace!("Skipping frame {} during selector search: {}", frame.id(), e);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(found)
    }

    /// Subscribe `callback` to frame attach and detach events
    pub fn monitor_changes<C>(&self, callback: C) -> FrameMonitor
    where
        C: Fn(&FrameEvent) + Send + Sync + 'static,
    {
        let callback: FrameListener = Arc::new(callback);
        let attached = self
            .page
            .add_frame_listener(FrameEventKind::Attached, callback.clone());
        let detached = self
            .page
            .add_frame_listener(FrameEventKind::Detached, callback);

        info!("Monitoring frame changes on page {}", self.page.id());
        FrameMonitor {
            page: self.page.clone(),
            listeners: Mutex::new(vec![attached, detached]),
        }
    }

    /// Forget selector resolutions
    pub fn clear_selector_cache(&self) {
        self.selector_cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    async fn resolve(&self, target: &FrameTarget) -> Result<FrameRef> {
        let frame = match target {
            FrameTarget::Handle(frame) => frame.clone(),
            FrameTarget::Identifier(identifier) => self
                .resolve_identifier(identifier)
                .await?
                .ok_or_else(|| Error::not_found(target.to_string()))?,
        };

        if frame.is_detached() {
            return Err(Error::detached(format!("{} ({})", target, frame.url())));
        }
        Ok(frame)
    }

    /// Name, generated identifier, exact URL, URL fragment, selector, then
    /// the cached selector resolution
    async fn resolve_identifier(&self, identifier: &str) -> Result<Option<FrameRef>> {
        if identifier.is_empty() {
            return Ok(None);
        }

        let scope = self.scope_frame();
        let candidates = self.search_order(&scope);

        if let Some(frame) = candidates
            .iter()
            .find(|f| f.name().as_deref() == Some(identifier))
        {
            return Ok(Some(frame.clone()));
        }

        let children = scope.child_frames();
        if let Some(index) = sibling_identifiers(&children)
            .iter()
            .position(|i| i == identifier)
        {
            return Ok(Some(children[index].clone()));
        }

        if let Some(frame) = candidates
            .iter()
            .find(|f| f.url() == identifier)
            .or_else(|| candidates.iter().find(|f| f.url().contains(identifier)))
        {
            return Ok(Some(frame.clone()));
        }

        let cache_key = (scope.id().to_string(), identifier.to_string());
        match scope.locate(identifier).await {
            Ok(Some(frame)) => {
                self.selector_cache
                    .lock()?
                    .insert(cache_key, frame.clone());
                return Ok(Some(frame));
            }
            Ok(None) => {}
            Err(e) => debug!("Selector lookup for '{}' failed: {}", identifier, e),
        }

        let cached = self.selector_cache.lock()?.get(&cache_key).cloned();
        if let Some(frame) = &cached {
            if frame.is_detached() {
                self.selector_cache.lock()?.remove(&cache_key);
            }
        }
        Ok(cached)
    }

    /// Descendants of `scope` first, then the rest of the page
    fn search_order(&self, scope: &FrameRef) -> Vec<FrameRef> {
        let mut ordered = Vec::new();
        let mut pending: Vec<FrameRef> = scope.child_frames().into_iter().rev().collect();
        while let Some(frame) = pending.pop() {
            pending.extend(frame.child_frames().into_iter().rev());
            ordered.push(frame);
        }

        for frame in self.page.frames() {
            if !same_frame(&frame, scope) && !ordered.iter().any(|f| same_frame(f, &frame)) {
                ordered.push(frame);
            }
        }
        ordered
    }

    fn emit_switch(&self, from: Option<String>, to: Option<String>, depth: usize) {
        if let Some(events) = &self.events {
            events.emit(LifecycleEvent::frame_switch(self.page.id(), from, to, depth));
        }
    }
}

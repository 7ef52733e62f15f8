//! Frame tree snapshot
//!
//! An arena of frame nodes captured from the live tree. Nodes address each
//! other by [`FrameId`]; parents are back-references by id only. The arena
//! is a point-in-time view: liveness must be re-checked through
//! [`FrameArena::is_live`] before acting on a node.

use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use url::Url;

use crate::capability::{same_frame, FrameRef};

/// Identifier of the root (main) frame in exported trees
pub const ROOT_IDENTIFIER: &str = "main";

/// Index of a node inside a [`FrameArena`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameId(usize);

/// One captured frame
#[derive(Debug, Clone)]
pub struct FrameNode {
    pub id: FrameId,
    pub identifier: String,
    pub url: String,
    pub name: Option<String>,
    pub is_detached: bool,
    pub parent: Option<FrameId>,
    pub children: Vec<FrameId>,
    pub handle: FrameRef,
}

/// Exported frame tree node
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameInfo {
    pub identifier: String,
    pub url: String,
    pub name: Option<String>,
    pub is_detached: bool,
    pub children: Vec<FrameInfo>,
}

/// Flat description of a non-root frame
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameSummary {
    pub identifier: String,
    /// Identifiers from the root's children down to this frame, `/`-joined
    pub path: String,
    pub url: String,
    pub name: Option<String>,
    pub depth: usize,
    pub is_detached: bool,
}

/// Arena of captured frames; index 0 is the root
#[derive(Debug, Clone)]
pub struct FrameArena {
    nodes: Vec<FrameNode>,
}

impl FrameArena {
    /// Capture the live tree below `main`
    pub fn capture(main: &FrameRef) -> Self {
        let mut arena = FrameArena { nodes: Vec::new() };
        let root = arena.push(main.clone(), ROOT_IDENTIFIER.to_string(), None);

        let mut queue = VecDeque::from([root]);
        while let Some(parent) = queue.pop_front() {
            let children = arena.nodes[parent.0].handle.child_frames();
            let identifiers = sibling_identifiers(&children);

            for (child, identifier) in children.into_iter().zip(identifiers) {
                let id = arena.push(child, identifier, Some(parent));
                arena.nodes[parent.0].children.push(id);
                queue.push_back(id);
            }
        }
        arena
    }

    fn push(&mut self, handle: FrameRef, identifier: String, parent: Option<FrameId>) -> FrameId {
        let id = FrameId(self.nodes.len());
        self.nodes.push(FrameNode {
            id,
            identifier,
            url: handle.url(),
            name: handle.name(),
            is_detached: handle.is_detached(),
            parent,
            children: Vec::new(),
            handle,
        });
        id
    }

    pub fn root(&self) -> &FrameNode {
        &self.nodes[0]
    }

    pub fn get(&self, id: FrameId) -> Option<&FrameNode> {
        self.nodes.get(id.0)
    }

    pub fn parent(&self, id: FrameId) -> Option<&FrameNode> {
        self.get(id)?.parent.and_then(|p| self.get(p))
    }

    pub fn children(&self, id: FrameId) -> impl Iterator<Item = &FrameNode> {
        self.get(id)
            .map(|n| n.children.as_slice())
            .unwrap_or_default()
            .iter()
            .filter_map(|c| self.get(*c))
    }

    /// Nodes in capture (breadth-first) order
    pub fn iter(&self) -> impl Iterator<Item = &FrameNode> {
        self.nodes.iter()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Node captured for `handle`
    pub fn find_handle(&self, handle: &FrameRef) -> Option<&FrameNode> {
        self.nodes.iter().find(|n| same_frame(&n.handle, handle))
    }

    /// Node at an identifier path such as `frame[0]/checkout`
    pub fn find_path(&self, path: &str) -> Option<&FrameNode> {
        let mut current = self.root();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current = self.children(current.id).find(|c| c.identifier == segment)?;
        }
        Some(current)
    }

    /// Number of ancestors between `id` and the root
    pub fn depth(&self, id: FrameId) -> usize {
        let mut depth = 0;
        let mut current = self.get(id).and_then(|n| n.parent);
        while let Some(parent) = current {
            depth += 1;
            current = self.get(parent).and_then(|n| n.parent);
        }
        depth
    }

    /// Identifier path of `id`, empty for the root
    pub fn path(&self, id: FrameId) -> String {
        let mut segments = Vec::new();
        let mut current = self.get(id);
        while let Some(node) = current {
            if node.parent.is_none() {
                break;
            }
            segments.push(node.identifier.as_str());
            current = self.parent(node.id);
        }
        segments.reverse();
        segments.join("/")
    }

    /// Re-check liveness against the collaborator
    pub fn is_live(&self, id: FrameId) -> bool {
        self.get(id).is_some_and(|n| !n.handle.is_detached())
    }

    /// Nested export rooted at the main frame
    pub fn export(&self) -> FrameInfo {
        self.export_node(self.root())
    }

    fn export_node(&self, node: &FrameNode) -> FrameInfo {
        FrameInfo {
            identifier: node.identifier.clone(),
            url: node.url.clone(),
            name: node.name.clone(),
            is_detached: node.is_detached,
            children: self.children(node.id).map(|c| self.export_node(c)).collect(),
        }
    }

    /// Every non-root frame, depth-first in document order
    pub fn summaries(&self) -> Vec<FrameSummary> {
        let mut out = Vec::new();
        let mut pending: Vec<FrameId> = self.root().children.iter().rev().copied().collect();
        while let Some(id) = pending.pop() {
            let Some(node) = self.get(id) else { continue };
            out.push(FrameSummary {
                identifier: node.identifier.clone(),
                path: self.path(id),
                url: node.url.clone(),
                name: node.name.clone(),
                depth: self.depth(id),
                is_detached: node.is_detached,
            });
            pending.extend(node.children.iter().rev().copied());
        }
        out
    }
}

/// Identifiers for one sibling list
///
/// Name beats URL; a missing or duplicated candidate falls back to the
/// positional `frame[n]`.
pub fn sibling_identifiers(children: &[FrameRef]) -> Vec<String> {
    let candidates: Vec<Option<String>> = children
        .iter()
        .map(|c| preferred_identifier(c.name(), &c.url()))
        .collect();

    let mut counts: HashMap<&str, usize> = HashMap::new();
    for candidate in candidates.iter().flatten() {
        *counts.entry(candidate.as_str()).or_default() += 1;
    }

    candidates
        .iter()
        .enumerate()
        .map(|(index, candidate)| match candidate {
            Some(c) if counts.get(c.as_str()) == Some(&1) => c.clone(),
            _ => format!("frame[{}]", index),
        })
        .collect()
}

/// Explicit name, else the URL's last path segment
pub fn preferred_identifier(name: Option<String>, url: &str) -> Option<String> {
    if let Some(name) = name.filter(|n| !n.trim().is_empty()) {
        return Some(name);
    }
    url_identifier(url)
}

/// Last non-empty path segment of `url`; `None` for blank documents
pub fn url_identifier(url: &str) -> Option<String> {
    let url = url.trim();
    if url.is_empty() || url.starts_with("about:") {
        return None;
    }

    Url::parse(url).ok().and_then(|parsed| {
        parsed
            .path_segments()
            .and_then(|mut segments| segments.rfind(|s| !s.is_empty()).map(str::to_string))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_identifier() {
        assert_eq!(url_identifier("https://shop.example.com/checkout/pay.html?x=1#top").as_deref(), Some("pay.html"));
        assert_eq!(url_identifier("https://shop.example.com/checkout/").as_deref(), Some("checkout"));
        assert_eq!(url_identifier("https://shop.example.com"), None);
        assert_eq!(url_identifier("about:blank"), None);
        assert_eq!(url_identifier("  "), None);
        assert_eq!(url_identifier("data:text/html,<p>hi</p>"), None);
        assert_eq!(url_identifier("not a url/at all.html"), None);
    }

    #[test]
    fn test_preferred_identifier() {
        assert_eq!(
            preferred_identifier(Some("payment".into()), "https://x.test/a.html").as_deref(),
            Some("payment")
        );
        assert_eq!(
            preferred_identifier(Some(" ".into()), "https://x.test/a.html").as_deref(),
            Some("a.html")
        );
        assert_eq!(preferred_identifier(None, "about:blank"), None);
    }
}

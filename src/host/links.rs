//! Bidirectional link graph over vault entities.
//!
//! Backlinks make the graph cyclic, so nodes live in an arena keyed by
//! entity ID; edges are IDs, never owning pointers. Traversals are explicit
//! map lookups.
//!
//! Links come from two places: the `links` metadata array and `[[wikilinks]]`
//! in the Markdown body.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::OnceLock;
use std::sync::RwLock;

use regex::Regex;
use serde_json::Value;

fn wikilink_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\[\[([^\[\]|]+)(?:\|[^\[\]]*)?\]\]").expect("static wikilink pattern is valid")
    })
}

/// Extract the outgoing link set of an entity from metadata and body.
///
/// Metadata `links` entries and wikilink targets are trimmed; duplicates
/// collapse via the set.
pub fn extract_links(metadata: &BTreeMap<String, Value>, content: &str) -> BTreeSet<String> {
    let mut links = BTreeSet::new();

    if let Some(Value::Array(items)) = metadata.get("links") {
        for item in items {
            if let Some(target) = item.as_str() {
                let target = target.trim();
                if !target.is_empty() {
                    links.insert(target.to_owned());
                }
            }
        }
    }

    for capture in wikilink_pattern().captures_iter(content) {
        if let Some(target) = capture.get(1) {
            let target = target.as_str().trim();
            if !target.is_empty() {
                links.insert(target.to_owned());
            }
        }
    }

    links
}

/// A node in the link arena.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct LinkNode {
    /// IDs this entity links to.
    outgoing: BTreeSet<String>,
    /// IDs that link to this entity.
    incoming: BTreeSet<String>,
}

impl LinkNode {
    fn is_empty(&self) -> bool {
        self.outgoing.is_empty() && self.incoming.is_empty()
    }
}

/// In-memory bidirectional link graph.
///
/// For every recorded `A → B` edge, `links_of(A)` contains `B` and
/// `backlinks(B)` contains `A`. Rebuilt from the filesystem at startup;
/// kept consistent by the Host API write pipeline afterwards.
#[derive(Debug, Default)]
pub struct LinkGraph {
    nodes: RwLock<HashMap<String, LinkNode>>,
}

impl LinkGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the outgoing edge set of `id`, updating backlinks on both the
    /// removed and added targets.
    pub fn set_links(&self, id: &str, targets: BTreeSet<String>) {
        let mut nodes = self.nodes.write().unwrap_or_else(|p| p.into_inner());

        let old: BTreeSet<String> = nodes
            .get(id)
            .map(|node| node.outgoing.clone())
            .unwrap_or_default();

        for removed in old.difference(&targets) {
            if let Some(node) = nodes.get_mut(removed) {
                node.incoming.remove(id);
                if node.is_empty() {
                    nodes.remove(removed);
                }
            }
        }

        for added in targets.difference(&old) {
            nodes.entry(added.clone()).or_default().incoming.insert(id.to_owned());
        }

        let node = nodes.entry(id.to_owned()).or_default();
        node.outgoing = targets;
        if node.is_empty() {
            nodes.remove(id);
        }
    }

    /// Remove an entity from the graph.
    ///
    /// Its outgoing edges disappear (clearing the matching backlinks);
    /// dangling forward links *to* the removed entity are left in place so
    /// other entities still report what they reference.
    pub fn remove_entity(&self, id: &str) {
        let mut nodes = self.nodes.write().unwrap_or_else(|p| p.into_inner());

        let outgoing = nodes
            .get(id)
            .map(|node| node.outgoing.clone())
            .unwrap_or_default();
        for target in &outgoing {
            if let Some(node) = nodes.get_mut(target) {
                node.incoming.remove(id);
                if node.is_empty() {
                    nodes.remove(target);
                }
            }
        }

        if let Some(node) = nodes.get_mut(id) {
            node.outgoing.clear();
            if node.is_empty() {
                nodes.remove(id);
            }
        }
    }

    /// Outgoing links of an entity, sorted.
    pub fn links_of(&self, id: &str) -> Vec<String> {
        let nodes = self.nodes.read().unwrap_or_else(|p| p.into_inner());
        nodes
            .get(id)
            .map(|node| node.outgoing.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Backlinks of an entity, sorted.
    pub fn backlinks(&self, id: &str) -> Vec<String> {
        let nodes = self.nodes.read().unwrap_or_else(|p| p.into_inner());
        nodes
            .get(id)
            .map(|node| node.incoming.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of entities with at least one edge.
    pub fn node_count(&self) -> usize {
        self.nodes.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    /// Drop all edges (used before a full rebuild).
    pub fn clear(&self) {
        self.nodes.write().unwrap_or_else(|p| p.into_inner()).clear();
    }

    /// Verify the invariant `B ∈ A.outgoing ⇔ A ∈ B.incoming`.
    ///
    /// Returns violation descriptions; empty means consistent.
    pub fn validate(&self) -> Vec<String> {
        let nodes = self.nodes.read().unwrap_or_else(|p| p.into_inner());
        let mut violations = Vec::new();
        for (id, node) in nodes.iter() {
            for target in &node.outgoing {
                let has_backlink = nodes
                    .get(target)
                    .map(|t| t.incoming.contains(id))
                    .unwrap_or(false);
                if !has_backlink {
                    violations.push(format!("{id} -> {target} has no backlink"));
                }
            }
            for source in &node.incoming {
                let has_forward = nodes
                    .get(source)
                    .map(|s| s.outgoing.contains(id))
                    .unwrap_or(false);
                if !has_forward {
                    violations.push(format!("{id} <- {source} has no forward link"));
                }
            }
        }
        violations
    }
}

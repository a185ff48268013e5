//! The inspector: selected nodes rendered as a forest of values.
//!
//! The user picks nodes to inspect and expands parts of their values. The
//! forest is rebuilt from scratch whenever the call's iteration selection
//! changes, so expansion state cannot live in the rebuilt nodes. It lives
//! in a registry of *open paths* instead: per selected node, the sequences
//! of child labels the user expanded. The empty path stands for the root
//! value itself.
//!
//! A recorded path is re-opened only when every strict prefix of it is
//! recorded too. Collapsing a parent therefore hides its open descendants
//! without forgetting them, and re-opening the parent brings them back.
//! Paths are matched by label, never by child position, because a value's
//! children differ from one iteration to the next.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::error::BirdseyeResult;
use crate::value::{ValueKind, ValueTree};

/// Index of a node within its call.
pub type NodeIndex = usize;

/// Description of a selected node without a value at the current iterations.
pub const NOT_EVALUATED: &str = "not evaluated";

// ============================================================================
// Forest
// ============================================================================

/// One rendered entry of the inspector forest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InspectorNode {
    /// Source text (roots) or child key.
    pub label: String,
    /// One-line rendering of the value.
    pub description: String,
    /// The decoded value; `None` for a root that was not evaluated.
    pub value: Option<ValueKind>,
    /// Labels from the root value down to this entry.
    pub path: Vec<String>,
    /// Whether the entry can be expanded.
    pub has_children: bool,
    /// Whether the entry is shown expanded.
    pub expanded: bool,
    /// Decoded children; empty unless expanded.
    pub children: Vec<InspectorNode>,
}

/// One root of the forest: a selected node and its value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InspectorRoot {
    /// The selected node.
    pub node: NodeIndex,
    /// Its rendered value.
    pub entry: InspectorNode,
}

/// What the call reports for one selected node during a refresh.
#[derive(Debug, Clone)]
pub struct SelectedValue {
    /// Label of the root (the node's source text).
    pub label: String,
    /// Value at the current iterations, if the node ran there.
    pub value: Option<ValueTree>,
}

// ============================================================================
// Inspector Tree
// ============================================================================

/// Selected nodes, their open paths and the current forest.
#[derive(Debug, Clone, Default)]
pub struct InspectorTree {
    selected: Vec<NodeIndex>,
    open_paths: HashMap<NodeIndex, HashSet<Vec<String>>>,
    forest: Vec<InspectorRoot>,
}

impl InspectorTree {
    /// Empty inspector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Select `node`, or deselect it if it was selected.
    ///
    /// Newly selected nodes go first. Returns whether `node` is selected
    /// afterwards. The forest is not rebuilt until the next refresh.
    pub fn toggle(&mut self, node: NodeIndex) -> bool {
        if let Some(position) = self.selected.iter().position(|n| *n == node) {
            self.selected.remove(position);
            false
        } else {
            self.selected.insert(0, node);
            true
        }
    }

    /// Selected nodes, most recently selected first.
    pub fn selected(&self) -> &[NodeIndex] {
        &self.selected
    }

    /// Whether `node` is selected.
    pub fn is_selected(&self, node: NodeIndex) -> bool {
        self.selected.contains(&node)
    }

    /// The user expanded `path` under `node`.
    pub fn record_expanded(&mut self, node: NodeIndex, path: Vec<String>) {
        self.open_paths.entry(node).or_default().insert(path);
    }

    /// The user collapsed `path` under `node`.
    ///
    /// Open descendants stay recorded; they are hidden until the path is
    /// expanded again.
    pub fn record_collapsed(&mut self, node: NodeIndex, path: &[String]) {
        if let Some(paths) = self.open_paths.get_mut(&node) {
            paths.remove(path);
        }
    }

    /// Whether `path` under `node` is shown expanded.
    pub fn is_open(&self, node: NodeIndex, path: &[String]) -> bool {
        self.open_paths
            .get(&node)
            .is_some_and(|paths| path_is_open(paths, path))
    }

    /// The forest built by the last refresh.
    pub fn forest(&self) -> &[InspectorRoot] {
        &self.forest
    }

    /// Rebuild the forest.
    ///
    /// `resolve` reports each selected node's label and current value. Only
    /// open entries have their children decoded. On error the previous
    /// forest is kept.
    pub fn refresh<F>(&mut self, mut resolve: F) -> BirdseyeResult<()>
    where
        F: FnMut(NodeIndex) -> BirdseyeResult<SelectedValue>,
    {
        let empty = HashSet::new();
        let mut forest = Vec::with_capacity(self.selected.len());
        for &node in &self.selected {
            let selected = resolve(node)?;
            let open = self.open_paths.get(&node).unwrap_or(&empty);
            let entry = match &selected.value {
                Some(value) => build_entry(value, selected.label, Vec::new(), open)?,
                None => not_evaluated(selected.label),
            };
            forest.push(InspectorRoot { node, entry });
        }
        self.forest = forest;
        Ok(())
    }

    /// Drop selections, open paths and the forest.
    pub fn clear(&mut self) {
        self.selected.clear();
        self.open_paths.clear();
        self.forest.clear();
    }
}

fn path_is_open(paths: &HashSet<Vec<String>>, path: &[String]) -> bool {
    (0..=path.len()).all(|len| paths.contains(&path[..len]))
}

fn build_entry(
    value: &ValueTree,
    label: String,
    path: Vec<String>,
    open: &HashSet<Vec<String>>,
) -> BirdseyeResult<InspectorNode> {
    let has_children = value.has_children();
    let expanded = has_children && path_is_open(open, &path);
    let mut children = Vec::new();
    if expanded {
        for child in value.children()? {
            let mut child_path = path.clone();
            child_path.push(child.label().to_string());
            let child_label = child.label().to_string();
            children.push(build_entry(&child, child_label, child_path, open)?);
        }
    }
    Ok(InspectorNode {
        label,
        description: value.describe(),
        value: Some(value.kind().clone()),
        path,
        has_children,
        expanded,
        children,
    })
}

fn not_evaluated(label: String) -> InspectorNode {
    InspectorNode {
        label,
        description: NOT_EVALUATED.to_string(),
        value: None,
        path: Vec::new(),
        has_children: false,
        expanded: false,
        children: Vec::new(),
    }
}

// ============================================================================
// Tests
// ============================================================================

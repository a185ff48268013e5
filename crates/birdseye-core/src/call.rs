//! One inspected invocation of a traced function.
//!
//! A [`Call`] owns the captured data of one invocation, one [`Node`] per
//! traced node position, one [`LoopNavigator`] per loop it could attach to
//! the live source, the [`InspectorTree`] of selected nodes and the
//! highlights it placed through the host.
//!
//! Everything is recomputed by [`Call::update`], which runs once at
//! construction and after every navigation step:
//!
//! 1. loop iterations are re-derived from the navigators' cursors,
//! 2. the host is told to repaint its line markers,
//! 3. the inspector forest is rebuilt,
//! 4. transient highlights (uncovered statements, exceptions) are
//!    recomputed from scratch,
//! 5. an open hover is re-read at the new iterations.
//!
//! A value is addressed by its node id plus the iteration selected in every
//! enclosing loop, outermost first. Resolution fails closed: a missing
//! navigator, iteration or value yields "no value", never a guess.

use std::cell::OnceCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::anchor::{AnchorId, Document};
use crate::client::CallSource;
use crate::error::{BirdseyeError, BirdseyeResult};
use crate::host::{CallHost, HighlightId, HighlightStyle, StructureResolver};
use crate::inspector::{InspectorRoot, InspectorTree, NodeIndex, SelectedValue};
use crate::navigator::{LoopNavigator, NavigatorSet};
use crate::range::Range;
use crate::snapshot::FunctionSnapshot;
use crate::text::{collapse_whitespace, offset_to_position, truncate};
use crate::trace::{CallData, CallSummary, FunctionStructure, LoopId, NodeId, NodeRangeInfo};
use crate::value::{TypeTable, ValueTree};

/// Inspector labels are shortened to about this many characters.
const LABEL_MAX_LEN: usize = 50;

// ============================================================================
// Nodes
// ============================================================================

/// One traced node position within a call.
#[derive(Debug)]
pub struct Node {
    index: NodeIndex,
    info: NodeRangeInfo,
    anchor: Option<AnchorId>,
    label: String,
    value: OnceCell<Option<ValueTree>>,
}

impl Node {
    /// Position of the node within its call.
    pub fn index(&self) -> NodeIndex {
        self.index
    }

    /// Tree index of the node in the function.
    pub fn id(&self) -> NodeId {
        self.info.id
    }

    /// Static range information.
    pub fn info(&self) -> &NodeRangeInfo {
        &self.info
    }

    /// Anchor of the node's range, shared with nodes of the same range.
    pub fn anchor(&self) -> Option<AnchorId> {
        self.anchor
    }

    /// Original source text, whitespace collapsed and shortened.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Live range of the node, if its anchor is still valid.
    pub fn live_range(&self, document: &Document) -> Option<Range> {
        self.anchor.and_then(|anchor| document.anchor_range(anchor))
    }

    /// Value at the current iterations, decoded and cached on first use.
    fn value(&self, captured: &Captured, navigators: &NavigatorSet) -> BirdseyeResult<Option<&ValueTree>> {
        if let Some(cached) = self.value.get() {
            return Ok(cached.as_ref());
        }
        let decoded = match captured.raw_value(self.info.id, navigators)? {
            Some(raw) => Some(ValueTree::decode(
                self.info.id,
                self.label.clone(),
                raw,
                &captured.types,
            )?),
            None => None,
        };
        Ok(self.value.get_or_init(|| decoded).as_ref())
    }
}

// ============================================================================
// Captured Data
// ============================================================================

/// The immutable data fetched for a call.
#[derive(Debug)]
struct Captured {
    data: CallData,
    structure: FunctionStructure,
    types: Rc<TypeTable>,
}

impl Captured {
    /// Raw value of `node` at the navigators' current iterations.
    fn raw_value(&self, node: NodeId, navigators: &NavigatorSet) -> BirdseyeResult<Option<&Value>> {
        let Some(mut value) = self.data.node_values.get(&node) else {
            return Ok(None);
        };
        for loop_id in self.structure.enclosing_loops(node) {
            let Some(position) = navigators
                .get(*loop_id)
                .and_then(LoopNavigator::current_iteration)
            else {
                return Ok(None);
            };
            let per_iteration = value.as_object().ok_or_else(|| {
                BirdseyeError::malformed(
                    node,
                    format!("expected values per iteration of loop {}", loop_id),
                )
            })?;
            match per_iteration.get(&position.to_string()) {
                Some(inner) => value = inner,
                None => return Ok(None),
            }
        }
        Ok(Some(value))
    }
}

// ============================================================================
// Highlights
// ============================================================================

/// A highlight of one node that can be hidden and shown again.
#[derive(Debug, Clone, Copy)]
struct Highlight {
    node: NodeIndex,
    style: HighlightStyle,
    placed: Option<HighlightId>,
}

impl Highlight {
    fn new(node: NodeIndex, style: HighlightStyle) -> Self {
        Highlight {
            node,
            style,
            placed: None,
        }
    }

    /// Place the mark unless it is already placed or the node's anchor
    /// was invalidated.
    fn show(&mut self, nodes: &[Node], document: &Document, host: &mut dyn CallHost) {
        if self.placed.is_some() {
            return;
        }
        if let Some(range) = nodes.get(self.node).and_then(|n| n.live_range(document)) {
            self.placed = Some(host.mark(range, self.style));
        }
    }

    fn hide(&mut self, host: &mut dyn CallHost) {
        if let Some(id) = self.placed.take() {
            host.unmark(id);
        }
    }
}

/// What hovering at an offset shows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HoverInfo {
    /// The hovered node.
    pub node: NodeIndex,
    /// Repr of its value, shown at the end of the line.
    pub repr: String,
    /// 1-indexed line the hover happened on.
    pub line: u32,
}

// ============================================================================
// Call
// ============================================================================

/// One invocation under inspection.
#[derive(Debug)]
pub struct Call {
    meta: CallSummary,
    snapshot: Rc<FunctionSnapshot>,
    captured: Captured,
    nodes: Vec<Node>,
    nodes_by_range: HashMap<Range, Vec<NodeIndex>>,
    navigators: NavigatorSet,
    inspector: InspectorTree,
    transient: Vec<Highlight>,
    selection: BTreeMap<NodeIndex, Highlight>,
    hover: Option<(Highlight, HoverInfo)>,
    hidden: bool,
}

impl Call {
    /// Fetch the detail of `meta` and build a ready call.
    ///
    /// Fails when the fetch fails; no partial call is produced. Loops whose
    /// anchor is invalid or cannot be resolved to an element get no
    /// navigator.
    pub fn create(
        meta: CallSummary,
        source: &dyn CallSource,
        snapshot: Rc<FunctionSnapshot>,
        document: &Document,
        resolver: &dyn StructureResolver,
        host: &mut dyn CallHost,
    ) -> BirdseyeResult<Self> {
        let detail = source.call_detail(&meta.id)?;
        let types = Rc::new(TypeTable::from_call_data(&detail.call_data));
        let structure = detail.function_structure;

        let mut nodes = Vec::with_capacity(structure.node_ranges.len());
        let mut nodes_by_range: HashMap<Range, Vec<NodeIndex>> = HashMap::new();
        for info in &structure.node_ranges {
            let index = nodes.len();
            let text = snapshot.original_slice(&info.range).unwrap_or_default();
            nodes.push(Node {
                index,
                info: info.clone(),
                anchor: snapshot.node_anchor(&info.range),
                label: truncate(&collapse_whitespace(text), LABEL_MAX_LEN),
                value: OnceCell::new(),
            });
            nodes_by_range.entry(info.range).or_default().push(index);
        }

        let mut navigators = NavigatorSet::new();
        for loop_info in &structure.loop_ranges {
            let element = snapshot
                .loop_anchor(&loop_info.range)
                .and_then(|anchor| document.anchor_range(anchor))
                .and_then(|live| resolver.resolve(document, live));
            match element {
                Some(element) => navigators.insert(LoopNavigator::new(loop_info.id, element)),
                None => debug!(loop_id = loop_info.id, "loop not attached to source, skipping"),
            }
        }

        let mut call = Call {
            meta,
            snapshot,
            captured: Captured {
                data: detail.call_data,
                structure,
                types,
            },
            nodes,
            nodes_by_range,
            navigators,
            inspector: InspectorTree::new(),
            transient: Vec::new(),
            selection: BTreeMap::new(),
            hover: None,
            hidden: false,
        };
        call.update(document, host)?;
        info!(
            call_id = %call.meta.id,
            function = call.snapshot.name(),
            nodes = call.nodes.len(),
            navigators = call.navigators.len(),
            "call ready"
        );
        Ok(call)
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    /// Summary the call was opened from.
    pub fn meta(&self) -> &CallSummary {
        &self.meta
    }

    /// Call id.
    pub fn id(&self) -> &str {
        &self.meta.id
    }

    /// Snapshot of the called function.
    pub fn snapshot(&self) -> &Rc<FunctionSnapshot> {
        &self.snapshot
    }

    /// All nodes, in structure order.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// One node.
    pub fn node(&self, index: NodeIndex) -> BirdseyeResult<&Node> {
        self.nodes
            .get(index)
            .ok_or(BirdseyeError::UnknownNode { node: index })
    }

    /// Nodes sharing a function-relative range.
    pub fn nodes_at_range(&self, range: &Range) -> &[NodeIndex] {
        self.nodes_by_range
            .get(range)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// First node with tree index `id`.
    pub fn node_by_id(&self, id: NodeId) -> Option<&Node> {
        self.nodes.iter().find(|node| node.id() == id)
    }

    /// Loop navigators.
    pub fn navigators(&self) -> &NavigatorSet {
        &self.navigators
    }

    /// Inspector state.
    pub fn inspector(&self) -> &InspectorTree {
        &self.inspector
    }

    /// Inspector forest as of the last refresh.
    pub fn forest(&self) -> &[InspectorRoot] {
        self.inspector.forest()
    }

    /// Whether this call's highlights are currently hidden.
    pub fn highlights_hidden(&self) -> bool {
        self.hidden
    }

    /// Current hover, if any.
    pub fn hover_info(&self) -> Option<&HoverInfo> {
        self.hover.as_ref().map(|(_, info)| info)
    }

    // ------------------------------------------------------------------------
    // Values
    // ------------------------------------------------------------------------

    /// Value of a node at the current iterations; `None` if it did not run
    /// there.
    pub fn node_value(&self, index: NodeIndex) -> BirdseyeResult<Option<&ValueTree>> {
        self.node(index)?.value(&self.captured, &self.navigators)
    }

    /// Whether the node's live text no longer matches the traced text.
    pub fn is_range_invalid(&self, document: &Document, index: NodeIndex) -> BirdseyeResult<bool> {
        let node = self.node(index)?;
        Ok(self
            .snapshot
            .is_range_stale(document, &node.info.range, node.info.is_tagged()))
    }

    /// The deepest node with a value whose live range covers the character
    /// at `offset`.
    pub fn node_at_position(&self, document: &Document, offset: usize) -> BirdseyeResult<Option<NodeIndex>> {
        let mut best: Option<&Node> = None;
        for node in &self.nodes {
            let covers = node
                .live_range(document)
                .is_some_and(|range| range.contains_offset(offset));
            if !covers || best.is_some_and(|b| b.info.depth >= node.info.depth) {
                continue;
            }
            if node.value(&self.captured, &self.navigators)?.is_some() {
                best = Some(node);
            }
        }
        Ok(best.map(Node::index))
    }

    /// Whether a node is worth hovering or selecting: its text is intact
    /// and it has an interesting value.
    fn is_inspectable(&self, document: &Document, index: NodeIndex) -> BirdseyeResult<bool> {
        if self.is_range_invalid(document, index)? {
            return Ok(false);
        }
        Ok(self
            .node_value(index)?
            .is_some_and(|value| !value.is_not_interesting()))
    }

    // ------------------------------------------------------------------------
    // Update Cycle
    // ------------------------------------------------------------------------

    /// Recompute iterations, inspector and transient highlights.
    pub fn update(&mut self, document: &Document, host: &mut dyn CallHost) -> BirdseyeResult<()> {
        for node in &mut self.nodes {
            node.value = OnceCell::new();
        }
        self.navigators
            .derive_iterations(&self.captured.data.loop_iterations);
        host.markers_changed();
        self.refresh_inspector()?;

        for highlight in &mut self.transient {
            highlight.hide(host);
        }
        self.transient.clear();
        let mut transient = Vec::new();
        for node in &self.nodes {
            let value = node.value(&self.captured, &self.navigators)?;
            if value.is_none() && node.info.is_statement() {
                transient.push(Highlight::new(node.index, HighlightStyle::Uncovered));
            }
        }
        for node in &self.nodes {
            let value = node.value(&self.captured, &self.navigators)?;
            if value.is_some_and(ValueTree::is_exception) {
                transient.push(Highlight::new(node.index, HighlightStyle::Errored));
            }
        }
        if !self.hidden {
            for highlight in &mut transient {
                highlight.show(&self.nodes, document, host);
            }
        }
        self.transient = transient;
        self.refresh_hover(document, host)
    }

    fn refresh_inspector(&mut self) -> BirdseyeResult<()> {
        let nodes = &self.nodes;
        let captured = &self.captured;
        let navigators = &self.navigators;
        self.inspector.refresh(|index| {
            let node = nodes
                .get(index)
                .ok_or(BirdseyeError::UnknownNode { node: index })?;
            Ok(SelectedValue {
                label: node.label.clone(),
                value: node.value(captured, navigators)?.cloned(),
            })
        })
    }

    /// Step a loop's navigator by `direction` and update.
    ///
    /// Returns `false` without updating when the step is not possible. When
    /// the new iteration cannot be decoded the step is undone and the
    /// error returned.
    pub fn navigate(
        &mut self,
        document: &Document,
        loop_id: LoopId,
        direction: isize,
        host: &mut dyn CallHost,
    ) -> BirdseyeResult<bool> {
        let navigator = self
            .navigators
            .get_mut(loop_id)
            .ok_or(BirdseyeError::UnknownLoop { loop_id })?;
        let previous = navigator.clone();
        if !navigator.step(direction) {
            return Ok(false);
        }
        debug!(
            call_id = %self.meta.id,
            loop_id,
            cursor = navigator.cursor(),
            "navigated loop"
        );
        if let Err(err) = self.update(document, host) {
            self.navigators.insert(previous);
            if let Err(restore) = self.update(document, host) {
                warn!(call_id = %self.meta.id, error = %restore, "could not restore iteration");
            }
            return Err(err);
        }
        Ok(true)
    }

    // ------------------------------------------------------------------------
    // Interaction
    // ------------------------------------------------------------------------

    /// Track the mouse at `offset`.
    ///
    /// The hover highlight follows the node under the mouse. Returns what
    /// to show, or `None` when the node is stale or has nothing
    /// interesting.
    pub fn hover(
        &mut self,
        document: &Document,
        offset: usize,
        host: &mut dyn CallHost,
    ) -> BirdseyeResult<Option<HoverInfo>> {
        let target = self.node_at_position(document, offset)?;
        let same_node = matches!(&self.hover, Some((highlight, _)) if Some(highlight.node) == target);
        if !same_node {
            self.clear_hover(host);
        }
        let Some(index) = target else {
            return Ok(None);
        };
        let Some(repr) = self.hover_repr(document, index)? else {
            self.clear_hover(host);
            return Ok(None);
        };
        let info = HoverInfo {
            node: index,
            repr,
            line: offset_to_position(document.text(), offset).0,
        };
        if let Some((_, current)) = &mut self.hover {
            *current = info.clone();
            return Ok(Some(info));
        }
        let mut highlight = Highlight::new(index, HighlightStyle::Hover);
        if !self.hidden {
            highlight.show(&self.nodes, document, host);
        }
        self.hover = Some((highlight, info.clone()));
        Ok(Some(info))
    }

    /// Repr shown when hovering `index`, or `None` if it is not inspectable.
    fn hover_repr(&self, document: &Document, index: NodeIndex) -> BirdseyeResult<Option<String>> {
        if !self.is_inspectable(document, index)? {
            return Ok(None);
        }
        Ok(Some(
            self.node_value(index)?
                .and_then(ValueTree::repr)
                .unwrap_or_default()
                .to_string(),
        ))
    }

    /// Bring the open hover in line with the current iterations.
    fn refresh_hover(&mut self, document: &Document, host: &mut dyn CallHost) -> BirdseyeResult<()> {
        let Some((highlight, _)) = &self.hover else {
            return Ok(());
        };
        match self.hover_repr(document, highlight.node)? {
            Some(repr) => {
                if let Some((_, info)) = &mut self.hover {
                    info.repr = repr;
                }
            }
            None => self.clear_hover(host),
        }
        Ok(())
    }

    /// Remove the hover highlight.
    pub fn clear_hover(&mut self, host: &mut dyn CallHost) {
        if let Some((mut highlight, _)) = self.hover.take() {
            highlight.hide(host);
        }
    }

    /// Select or deselect a node for inspection.
    ///
    /// Selecting requires the node to be inspectable; otherwise nothing
    /// happens and `None` is returned. Deselecting always works. Returns
    /// whether the node is selected afterwards.
    pub fn toggle_selection(
        &mut self,
        document: &Document,
        index: NodeIndex,
        host: &mut dyn CallHost,
    ) -> BirdseyeResult<Option<bool>> {
        self.node(index)?;
        if let Some(mut highlight) = self.selection.remove(&index) {
            highlight.hide(host);
        } else {
            if !self.is_inspectable(document, index)? {
                return Ok(None);
            }
            let mut highlight = Highlight::new(index, HighlightStyle::Selected);
            if !self.hidden {
                highlight.show(&self.nodes, document, host);
            }
            self.selection.insert(index, highlight);
        }
        let selected = self.inspector.toggle(index);
        self.refresh_inspector()?;
        Ok(Some(selected))
    }

    /// The user expanded `path` in the value of selected node `index`.
    pub fn expand(&mut self, index: NodeIndex, path: Vec<String>) -> BirdseyeResult<()> {
        self.node(index)?;
        self.inspector.record_expanded(index, path);
        self.refresh_inspector()
    }

    /// The user collapsed `path` in the value of selected node `index`.
    pub fn collapse(&mut self, index: NodeIndex, path: &[String]) -> BirdseyeResult<()> {
        self.node(index)?;
        self.inspector.record_collapsed(index, path);
        self.refresh_inspector()
    }

    // ------------------------------------------------------------------------
    // Highlight Visibility
    // ------------------------------------------------------------------------

    fn highlights_mut(&mut self) -> impl Iterator<Item = &mut Highlight> {
        self.transient
            .iter_mut()
            .chain(self.selection.values_mut())
            .chain(self.hover.iter_mut().map(|(highlight, _)| highlight))
    }

    /// Take every highlight of this call off the host.
    pub fn hide_highlights(&mut self, host: &mut dyn CallHost) {
        self.hidden = true;
        for highlight in self.highlights_mut() {
            highlight.hide(host);
        }
    }

    /// Put transient and selection highlights back.
    pub fn show_highlights(&mut self, document: &Document, host: &mut dyn CallHost) {
        self.hidden = false;
        self.clear_hover(host);
        let nodes = &self.nodes;
        for highlight in self.transient.iter_mut().chain(self.selection.values_mut()) {
            highlight.show(nodes, document, host);
        }
    }

    /// After an edit: hide exception highlights of nodes whose text changed
    /// and restore those whose text matches again.
    pub fn refresh_stale_highlights(&mut self, document: &Document, host: &mut dyn CallHost) {
        if self.hidden {
            return;
        }
        let nodes = &self.nodes;
        let snapshot = &self.snapshot;
        for highlight in &mut self.transient {
            if highlight.style != HighlightStyle::Errored {
                continue;
            }
            let Some(node) = nodes.get(highlight.node) else {
                continue;
            };
            if snapshot.is_range_stale(document, &node.info.range, node.info.is_tagged()) {
                highlight.hide(host);
            } else {
                highlight.show(nodes, document, host);
            }
        }
    }

    /// Tear the call down, removing everything it placed.
    pub fn dispose(mut self, host: &mut dyn CallHost) {
        self.hide_highlights(host);
        info!(call_id = %self.meta.id, "call disposed");
    }
}

// ============================================================================
// Tests
// ============================================================================

//! The single owner of all inspection state for one document.
//!
//! A [`Session`] holds the live [`Document`], the open calls and the
//! "which function bodies have recorded calls" map. It is the only place
//! that mutates calls, so every operation takes `&mut self` and runs to
//! completion before the next one. Background work (the hash poller) never
//! touches a session; it sends results over a channel that the owner
//! drains with [`Session::apply_pending_presence`].
//!
//! Anchors belong to the snapshots [`Session::list_calls`] hands out. The
//! session remembers each snapshot weakly and frees its anchors once no
//! listing or call holds it any more: before the next listing, on every
//! edit and when calls are closed.
//!
//! Open calls are ordered most recently selected first. The first call is
//! the current one: it alone shows highlights and accepts clicks and
//! navigation.

use std::collections::{HashMap, HashSet};
use std::rc::{Rc, Weak};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::anchor::{AnchorId, Document, TextEdit};
use crate::call::{Call, HoverInfo};
use crate::client::{CallSource, ReportingSource};
use crate::error::{BirdseyeError, BirdseyeResult};
use crate::hash::ContentHash;
use crate::host::{CallHost, StructureResolver};
use crate::inspector::NodeIndex;
use crate::snapshot::{FunctionOccurrence, FunctionSnapshot};
use crate::trace::{CallSummary, HashPresence, LoopId, NodeId};

/// Calls recorded for one function occurrence, anchored in the document.
#[derive(Debug, Clone)]
pub struct FunctionCalls {
    /// Snapshot shared by every call opened from this listing.
    pub snapshot: Rc<FunctionSnapshot>,
    /// Recorded invocations, in server order.
    pub calls: Vec<CallSummary>,
}

/// A snapshot handed out by the session, with the anchors to free once it
/// is gone.
struct SnapshotAnchors {
    snapshot: Weak<FunctionSnapshot>,
    anchors: Vec<AnchorId>,
}

/// Inspection state of one document.
pub struct Session<S> {
    document: Document,
    source: Arc<ReportingSource<S>>,
    calls: Vec<Call>,
    snapshots: Vec<SnapshotAnchors>,
    tracked_functions: Vec<String>,
    function_hashes: HashMap<ContentHash, bool>,
    active: bool,
}

impl<S: CallSource> Session<S> {
    /// Session over `document`, fetching from `source`.
    pub fn new(document: Document, source: S) -> Self {
        Self::with_reporting_source(document, Arc::new(ReportingSource::new(source)))
    }

    /// Session sharing an already wrapped source (e.g. with the poller).
    pub fn with_reporting_source(document: Document, source: Arc<ReportingSource<S>>) -> Self {
        Session {
            document,
            source,
            calls: Vec::new(),
            snapshots: Vec::new(),
            tracked_functions: Vec::new(),
            function_hashes: HashMap::new(),
            active: true,
        }
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    /// The live document.
    pub fn document(&self) -> &Document {
        &self.document
    }

    /// The shared source.
    pub fn source(&self) -> &Arc<ReportingSource<S>> {
        &self.source
    }

    /// Open calls, most recently selected first.
    pub fn calls(&self) -> &[Call] {
        &self.calls
    }

    /// An open call by id.
    pub fn call(&self, call_id: &str) -> BirdseyeResult<&Call> {
        self.calls
            .iter()
            .find(|call| call.id() == call_id)
            .ok_or_else(|| BirdseyeError::UnknownCall {
                call_id: call_id.to_string(),
            })
    }

    /// Whether the inspector is shown.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// The call that shows highlights and takes input.
    pub fn current_call(&self) -> Option<&Call> {
        if self.active {
            self.calls.first()
        } else {
            None
        }
    }

    fn active_call_positions(&self) -> Vec<usize> {
        if !self.active {
            return Vec::new();
        }
        let mut starts = HashSet::new();
        self.calls
            .iter()
            .enumerate()
            .filter(|(_, call)| {
                call.snapshot()
                    .start_offset(&self.document)
                    .is_some_and(|start| starts.insert(start))
            })
            .map(|(position, _)| position)
            .collect()
    }

    /// At most one call per function occurrence, most recently selected
    /// first.
    ///
    /// Occurrences are told apart by the live offset of their `def`
    /// keyword, so a function that was edited and inspected again is
    /// represented by its newest call only. Calls whose function start was
    /// destroyed are left out.
    pub fn active_calls(&self) -> Vec<&Call> {
        self.active_call_positions()
            .into_iter()
            .map(|position| &self.calls[position])
            .collect()
    }

    // ------------------------------------------------------------------------
    // Opening Calls
    // ------------------------------------------------------------------------

    fn flush_notifications(&self, host: &mut dyn CallHost) {
        for notification in self.source.drain_notifications() {
            host.notify_error(&notification.title, &notification.message);
        }
    }

    /// List the recorded calls of a function and anchor its ranges.
    ///
    /// Returns `None` when the server has no calls for the function's
    /// current body or could not be reached (the user is notified once).
    pub fn list_calls(
        &mut self,
        occurrence: &FunctionOccurrence,
        host: &mut dyn CallHost,
    ) -> BirdseyeResult<Option<FunctionCalls>> {
        self.release_unused_anchors();
        let hash = occurrence.body_hash(&self.document)?;
        let listing = match self.source.calls_by_hash(&hash) {
            Ok(listing) => listing,
            Err(err) if err.is_load_failure() => {
                self.flush_notifications(host);
                return Ok(None);
            }
            Err(err) => return Err(err),
        };
        if listing.calls.is_empty() {
            debug!(function = %occurrence.name, %hash, "no recorded calls");
            return Ok(None);
        }
        let snapshot = Rc::new(FunctionSnapshot::create(
            &mut self.document,
            occurrence,
            &listing,
        )?);
        self.snapshots.push(SnapshotAnchors {
            snapshot: Rc::downgrade(&snapshot),
            anchors: snapshot.anchor_ids(),
        });
        Ok(Some(FunctionCalls {
            snapshot,
            calls: listing.calls,
        }))
    }

    /// Free the anchors of snapshots that no listing or call holds any
    /// more. Returns how many snapshots were released.
    pub fn release_unused_anchors(&mut self) -> usize {
        let document = &mut self.document;
        let before = self.snapshots.len();
        self.snapshots.retain(|tracked| {
            if tracked.snapshot.strong_count() > 0 {
                return true;
            }
            document.release_anchors(tracked.anchors.iter().copied());
            false
        });
        let released = before - self.snapshots.len();
        if released > 0 {
            debug!(
                released,
                anchors = self.document.anchor_count(),
                "released unused snapshots"
            );
        }
        released
    }

    /// Open a call and make it current.
    ///
    /// An already open call with the same id is reselected instead of
    /// loaded again. Returns `None` when loading failed; the user is
    /// notified once per outage.
    pub fn open_call(
        &mut self,
        meta: &CallSummary,
        snapshot: &Rc<FunctionSnapshot>,
        resolver: &dyn StructureResolver,
        host: &mut dyn CallHost,
    ) -> BirdseyeResult<Option<&Call>> {
        if self.calls.iter().any(|call| call.id() == meta.id) {
            self.select_call(&meta.id, host)?;
            return Ok(self.calls.first());
        }
        let created = Call::create(
            meta.clone(),
            self.source.as_ref(),
            Rc::clone(snapshot),
            &self.document,
            resolver,
            host,
        );
        let call = match created {
            Ok(call) => call,
            Err(err) if err.is_load_failure() => {
                warn!(call_id = %meta.id, error = %err, "could not load call");
                self.flush_notifications(host);
                return Ok(None);
            }
            Err(err) => return Err(err),
        };
        if let Some(previous) = self.calls.first_mut() {
            previous.hide_highlights(host);
        }
        self.calls.insert(0, call);
        if !self.active {
            self.calls[0].hide_highlights(host);
        }
        Ok(self.calls.first())
    }

    /// Make an open call current, moving its highlights in.
    pub fn select_call(&mut self, call_id: &str, host: &mut dyn CallHost) -> BirdseyeResult<()> {
        let position = self
            .calls
            .iter()
            .position(|call| call.id() == call_id)
            .ok_or_else(|| BirdseyeError::UnknownCall {
                call_id: call_id.to_string(),
            })?;
        if position == 0 {
            return Ok(());
        }
        self.calls[0].hide_highlights(host);
        let call = self.calls.remove(position);
        self.calls.insert(0, call);
        if self.active {
            self.calls[0].show_highlights(&self.document, host);
        }
        host.markers_changed();
        Ok(())
    }

    /// Close an open call, removing its highlights.
    pub fn close_call(&mut self, call_id: &str, host: &mut dyn CallHost) -> BirdseyeResult<()> {
        let position = self
            .calls
            .iter()
            .position(|call| call.id() == call_id)
            .ok_or_else(|| BirdseyeError::UnknownCall {
                call_id: call_id.to_string(),
            })?;
        let call = self.calls.remove(position);
        call.dispose(host);
        self.release_unused_anchors();
        if position == 0 && self.active {
            if let Some(next) = self.calls.first_mut() {
                next.show_highlights(&self.document, host);
            }
        }
        Ok(())
    }

    /// Show or hide the inspector; only an active session shows highlights.
    pub fn set_active(&mut self, active: bool, host: &mut dyn CallHost) {
        if self.active == active {
            return;
        }
        self.active = active;
        if active {
            if let Some(call) = self.calls.first_mut() {
                call.show_highlights(&self.document, host);
            }
        } else {
            for call in &mut self.calls {
                call.hide_highlights(host);
            }
        }
        host.markers_changed();
    }

    // ------------------------------------------------------------------------
    // Input
    // ------------------------------------------------------------------------

    /// Track the mouse at `offset` across the active calls.
    pub fn hover(&mut self, offset: usize, host: &mut dyn CallHost) -> BirdseyeResult<Option<HoverInfo>> {
        let mut target = None;
        for position in self.active_call_positions() {
            if self.calls[position]
                .node_at_position(&self.document, offset)?
                .is_some()
            {
                target = Some(position);
                break;
            }
        }
        for (position, call) in self.calls.iter_mut().enumerate() {
            if Some(position) != target {
                call.clear_hover(host);
            }
        }
        match target {
            Some(position) => self.calls[position].hover(&self.document, offset, host),
            None => Ok(None),
        }
    }

    /// Click at `offset`: toggle the node there in the current call.
    ///
    /// Returns whether the node is selected afterwards, or `None` if the
    /// click did nothing.
    pub fn click(&mut self, offset: usize, host: &mut dyn CallHost) -> BirdseyeResult<Option<bool>> {
        let Some(call) = self.current_call() else {
            return Ok(None);
        };
        let Some(index) = call.node_at_position(&self.document, offset)? else {
            return Ok(None);
        };
        let document = &self.document;
        match self.calls.first_mut() {
            Some(call) => call.toggle_selection(document, index, host),
            None => Ok(None),
        }
    }

    /// Toggle the node with tree index `node` in the current call.
    ///
    /// Same as clicking it. Returns `None` when there is no current call
    /// or the node cannot be selected.
    pub fn toggle_node(&mut self, node: NodeId, host: &mut dyn CallHost) -> BirdseyeResult<Option<bool>> {
        let document = &self.document;
        let Some(call) = (if self.active { self.calls.first_mut() } else { None }) else {
            return Ok(None);
        };
        let index = node_index(call, node)?;
        call.toggle_selection(document, index, host)
    }

    /// Expand `path` in the inspected value of `node` in the current call.
    pub fn expand_node(&mut self, node: NodeId, path: Vec<String>) -> BirdseyeResult<()> {
        match self.calls.first_mut() {
            Some(call) => {
                let index = node_index(call, node)?;
                call.expand(index, path)
            }
            None => Ok(()),
        }
    }

    /// Collapse `path` in the inspected value of `node` in the current call.
    pub fn collapse_node(&mut self, node: NodeId, path: &[String]) -> BirdseyeResult<()> {
        match self.calls.first_mut() {
            Some(call) => {
                let index = node_index(call, node)?;
                call.collapse(index, path)
            }
            None => Ok(()),
        }
    }

    /// Step a loop of the current call.
    pub fn navigate(
        &mut self,
        loop_id: LoopId,
        direction: isize,
        host: &mut dyn CallHost,
    ) -> BirdseyeResult<bool> {
        let document = &self.document;
        let call = if self.active { self.calls.first_mut() } else { None };
        match call {
            Some(call) => call.navigate(document, loop_id, direction, host),
            None => Ok(false),
        }
    }

    /// Apply an edit to the document.
    ///
    /// Anchors are adjusted, then the current call's exception highlights
    /// are hidden or restored depending on whether their text still
    /// matches.
    pub fn edit(&mut self, edit: &TextEdit, host: &mut dyn CallHost) -> BirdseyeResult<()> {
        self.release_unused_anchors();
        self.document.apply_edit(edit)?;
        let document = &self.document;
        if let Some(call) = if self.active { self.calls.first_mut() } else { None } {
            call.refresh_stale_highlights(document, host);
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Function Hashes
    // ------------------------------------------------------------------------

    /// Start tracking a function by name for call presence.
    pub fn track_function(&mut self, name: impl Into<String>) {
        let name = name.into();
        if !self.tracked_functions.contains(&name) {
            self.tracked_functions.push(name);
        }
    }

    /// Body hashes of the tracked functions as they currently read.
    ///
    /// Functions that cannot be found or trimmed are skipped.
    pub fn tracked_hashes(&self) -> Vec<ContentHash> {
        self.tracked_functions
            .iter()
            .filter_map(|name| FunctionOccurrence::locate(self.document.text(), name))
            .filter_map(|occurrence| occurrence.body_hash(&self.document).ok())
            .collect()
    }

    /// Whether a body hash has recorded calls; `None` if unknown.
    pub fn has_calls(&self, hash: &ContentHash) -> Option<bool> {
        self.function_hashes.get(hash).copied()
    }

    /// Replace the hash presence map.
    ///
    /// The host repaints its markers only when the map changed. Returns
    /// whether it changed.
    pub fn apply_hash_presence(&mut self, presence: Vec<HashPresence>, host: &mut dyn CallHost) -> bool {
        let hashes: HashMap<ContentHash, bool> = presence
            .into_iter()
            .map(|item| (item.hash, item.count > 0))
            .collect();
        if hashes == self.function_hashes {
            return false;
        }
        info!(functions = hashes.len(), "function hashes changed");
        self.function_hashes = hashes;
        host.markers_changed();
        true
    }

    /// Apply everything the poller sent since the last call.
    ///
    /// Only the newest presence map matters. Notifications queued by
    /// failed polls are shown as well.
    pub fn apply_pending_presence(
        &mut self,
        receiver: &mut mpsc::Receiver<Vec<HashPresence>>,
        host: &mut dyn CallHost,
    ) -> bool {
        let mut latest = None;
        while let Ok(presence) = receiver.try_recv() {
            latest = Some(presence);
        }
        self.flush_notifications(host);
        match latest {
            Some(presence) => self.apply_hash_presence(presence, host),
            None => false,
        }
    }

    /// Close every call.
    pub fn close_all(&mut self, host: &mut dyn CallHost) {
        for call in self.calls.drain(..) {
            call.dispose(host);
        }
        self.release_unused_anchors();
    }
}

fn node_index(call: &Call, node: NodeId) -> BirdseyeResult<NodeIndex> {
    call.node_by_id(node)
        .map(|found| found.index())
        .ok_or(BirdseyeError::UnknownNode {
            node: node as usize,
        })
}

// ============================================================================
// Tests
// ============================================================================

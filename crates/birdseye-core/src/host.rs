//! Interfaces to the host editor.
//!
//! The core never renders anything itself. It asks the host to mark and
//! unmark byte ranges, to repaint line markers after navigation, to show
//! error notifications, and to resolve a loop's range to a structural
//! element that navigation controls can attach to.
//!
//! [`RecordingHost`] implements the host side in memory; the CLI reports
//! what it recorded and the tests assert on it.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::Serialize;

use crate::anchor::Document;
use crate::range::Range;

// ============================================================================
// Highlights
// ============================================================================

/// Visual treatment requested for a range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HighlightStyle {
    /// A statement that did not run at the current iterations (grayed).
    Uncovered,
    /// A node whose value is an exception (red box).
    Errored,
    /// A node selected for inspection (blue box).
    Selected,
    /// The node under the mouse.
    Hover,
}

/// Handle of one mark placed by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct HighlightId(pub u64);

impl fmt::Display for HighlightId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "highlight_{}", self.0)
    }
}

/// "Mark this byte range with this style" capability.
pub trait Highlighter {
    /// Mark `range` (absolute offsets) with `style`.
    fn mark(&mut self, range: Range, style: HighlightStyle) -> HighlightId;

    /// Remove a mark. Unknown ids are ignored.
    fn unmark(&mut self, id: HighlightId);
}

/// Everything a call needs from the host.
pub trait CallHost: Highlighter {
    /// Line markers (loop arrows, function icons) may need repainting.
    fn markers_changed(&mut self) {}

    /// Show an error notification to the user.
    fn notify_error(&mut self, _title: &str, _message: &str) {}
}

// ============================================================================
// Structural Elements
// ============================================================================

/// Opaque handle of a structural element in the host's syntax tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ElementId(pub u64);

/// Finds the smallest structural element occupying exactly a range.
pub trait StructureResolver {
    /// Resolve `range` (absolute offsets); `None` if no element matches.
    fn resolve(&self, document: &Document, range: Range) -> Option<ElementId>;
}

/// Resolves exactly the ranges it was given.
#[derive(Debug, Clone, Default)]
pub struct RangeSetResolver {
    ranges: HashSet<Range>,
}

impl RangeSetResolver {
    /// Resolver accepting `ranges`.
    pub fn new(ranges: impl IntoIterator<Item = Range>) -> Self {
        RangeSetResolver {
            ranges: ranges.into_iter().collect(),
        }
    }
}

impl StructureResolver for RangeSetResolver {
    fn resolve(&self, _document: &Document, range: Range) -> Option<ElementId> {
        self.ranges
            .contains(&range)
            .then_some(ElementId(range.start as u64))
    }
}

/// Resolves ranges whose text is a loop statement.
///
/// Without a syntax tree, a range is taken to be a loop statement when it
/// starts with a `for`, `async for` or `while` keyword.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoopKeywordResolver;

impl StructureResolver for LoopKeywordResolver {
    fn resolve(&self, document: &Document, range: Range) -> Option<ElementId> {
        let text = document.slice(range)?;
        let text = text.strip_prefix("async ").unwrap_or(text).trim_start();
        let is_loop = ["for", "while"].iter().any(|keyword| {
            text.strip_prefix(keyword)
                .is_some_and(|rest| rest.starts_with(char::is_whitespace))
        });
        is_loop.then_some(ElementId(range.start as u64))
    }
}

// ============================================================================
// Recording Host
// ============================================================================

/// A notification shown through the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    /// Title line.
    pub title: String,
    /// Message body.
    pub message: String,
}

/// In-memory host that records what the core asked for.
#[derive(Debug, Default)]
pub struct RecordingHost {
    next_id: u64,
    marks: BTreeMap<HighlightId, (Range, HighlightStyle)>,
    repaints: usize,
    notifications: Vec<Notification>,
}

impl RecordingHost {
    /// Create an empty host.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks currently placed, in creation order.
    pub fn marks(&self) -> impl Iterator<Item = (HighlightId, Range, HighlightStyle)> + '_ {
        self.marks
            .iter()
            .map(|(id, (range, style))| (*id, *range, *style))
    }

    /// Ranges currently marked with `style`, sorted.
    pub fn ranges_with(&self, style: HighlightStyle) -> Vec<Range> {
        let mut ranges: Vec<Range> = self
            .marks
            .values()
            .filter(|(_, s)| *s == style)
            .map(|(range, _)| *range)
            .collect();
        ranges.sort();
        ranges
    }

    /// Number of marks currently placed.
    pub fn mark_count(&self) -> usize {
        self.marks.len()
    }

    /// How many repaints were requested.
    pub fn repaints(&self) -> usize {
        self.repaints
    }

    /// Notifications shown so far.
    pub fn notifications(&self) -> &[Notification] {
        &self.notifications
    }
}

impl Highlighter for RecordingHost {
    fn mark(&mut self, range: Range, style: HighlightStyle) -> HighlightId {
        let id = HighlightId(self.next_id);
        self.next_id += 1;
        self.marks.insert(id, (range, style));
        id
    }

    fn unmark(&mut self, id: HighlightId) {
        self.marks.remove(&id);
    }
}

impl CallHost for RecordingHost {
    fn markers_changed(&mut self) {
        self.repaints += 1;
    }

    fn notify_error(&mut self, title: &str, message: &str) {
        self.notifications.push(Notification {
            title: title.to_string(),
            message: message.to_string(),
        });
    }
}

// ============================================================================
// Tests
// ============================================================================

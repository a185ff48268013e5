//! Function snapshots: a traced function bound to live document text.
//!
//! A [`FunctionSnapshot`] is built once per (function occurrence, calls
//! listing) pair. It freezes the function's trimmed text as it was when the
//! calls were listed and anchors every traced range in the document, so
//! later edits can be told apart from the code that actually ran.
//!
//! The snapshot owns anchor *ids*; the anchors themselves live in the
//! [`Document`] arena. Several calls to the same function share one
//! snapshot through an `Rc`; whoever owns the document hands the anchors
//! back with [`FunctionSnapshot::release`] once the last reference is gone.

use std::collections::HashMap;

use tracing::debug;

use crate::anchor::{AnchorId, Document};
use crate::error::{BirdseyeError, BirdseyeResult};
use crate::hash::ContentHash;
use crate::range::Range;
use crate::text::{is_range_text_stale, locate_function, trim_function_text};
use crate::trace::CallsByHash;

/// Length of the `def` keyword anchored as the function's start.
const DEF_KEYWORD_LEN: usize = 3;

// ============================================================================
// Function Occurrence
// ============================================================================

/// Where one function definition sits in a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionOccurrence {
    /// Function name, for display.
    pub name: String,
    /// From the `def` keyword (after decorators) to the end of the block.
    pub range: Range,
}

impl FunctionOccurrence {
    /// Create an occurrence from known offsets.
    pub fn new(name: impl Into<String>, range: Range) -> Self {
        FunctionOccurrence {
            name: name.into(),
            range,
        }
    }

    /// Find function `name` in `source` by text search.
    pub fn locate(source: &str, name: &str) -> Option<Self> {
        locate_function(source, name).map(|range| FunctionOccurrence::new(name, range))
    }

    /// Trimmed text of the function in `document`.
    pub fn text<'a>(&self, document: &'a Document) -> BirdseyeResult<&'a str> {
        let raw = document
            .slice(self.range)
            .ok_or_else(|| BirdseyeError::InvalidFunction {
                reason: format!("range {} is outside the document", self.range),
            })?;
        trim_function_text(raw)
    }

    /// Body hash of the function as it currently reads in `document`.
    pub fn body_hash(&self, document: &Document) -> BirdseyeResult<ContentHash> {
        Ok(ContentHash::compute(self.text(document)?.as_bytes()))
    }
}

// ============================================================================
// Function Snapshot
// ============================================================================

/// A traced function's ranges anchored in live text.
#[derive(Debug, Clone)]
pub struct FunctionSnapshot {
    name: String,
    original_text: String,
    body_hash: ContentHash,
    start_anchor: AnchorId,
    node_anchors: HashMap<Range, AnchorId>,
    loop_anchors: HashMap<Range, AnchorId>,
}

impl FunctionSnapshot {
    /// Anchor the ranges of `listing` for the function at `occurrence`.
    ///
    /// Ranges in `listing` are relative to the `def` keyword. One anchor is
    /// created per distinct range.
    pub fn create(
        document: &mut Document,
        occurrence: &FunctionOccurrence,
        listing: &CallsByHash,
    ) -> BirdseyeResult<Self> {
        let original_text = occurrence.text(document)?.to_string();
        let body_hash = ContentHash::compute(original_text.as_bytes());
        let def_start = occurrence.range.start;

        let start_anchor =
            document.create_anchor(Range::new(def_start, def_start + DEF_KEYWORD_LEN));

        let mut node_anchors = HashMap::new();
        for range in &listing.ranges {
            node_anchors
                .entry(*range)
                .or_insert_with(|| document.create_anchor(range.offset_by(def_start)));
        }

        let mut loop_anchors = HashMap::new();
        for range in &listing.loop_ranges {
            loop_anchors
                .entry(*range)
                .or_insert_with(|| document.create_anchor(range.offset_by(def_start)));
        }

        debug!(
            function = %occurrence.name,
            hash = %body_hash,
            nodes = node_anchors.len(),
            loops = loop_anchors.len(),
            "created function snapshot"
        );

        Ok(FunctionSnapshot {
            name: occurrence.name.clone(),
            original_text,
            body_hash,
            start_anchor,
            node_anchors,
            loop_anchors,
        })
    }

    /// Function name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Trimmed function text as it was when the snapshot was taken.
    pub fn original_text(&self) -> &str {
        &self.original_text
    }

    /// Body hash of the original text.
    pub fn body_hash(&self) -> &ContentHash {
        &self.body_hash
    }

    /// Anchor on the `def` keyword, identifying this occurrence.
    pub fn start_anchor(&self) -> AnchorId {
        self.start_anchor
    }

    /// Live offset of the `def` keyword, if it still exists.
    pub fn start_offset(&self, document: &Document) -> Option<usize> {
        document.anchor_range(self.start_anchor).map(|r| r.start)
    }

    /// Anchor of a traced-node range.
    pub fn node_anchor(&self, range: &Range) -> Option<AnchorId> {
        self.node_anchors.get(range).copied()
    }

    /// Anchor of a loop range.
    pub fn loop_anchor(&self, range: &Range) -> Option<AnchorId> {
        self.loop_anchors.get(range).copied()
    }

    /// Number of distinct node ranges anchored.
    pub fn node_anchor_count(&self) -> usize {
        self.node_anchors.len()
    }

    /// Every anchor this snapshot created.
    pub fn anchor_ids(&self) -> Vec<AnchorId> {
        std::iter::once(self.start_anchor)
            .chain(self.node_anchors.values().copied())
            .chain(self.loop_anchors.values().copied())
            .collect()
    }

    /// Hand this snapshot's anchors back to `document`.
    pub fn release(&self, document: &mut Document) {
        document.release_anchors(self.anchor_ids());
    }

    /// Original text of a function-relative range.
    pub fn original_slice(&self, range: &Range) -> Option<&str> {
        self.original_text.get(range.start..range.end)
    }

    /// Whether the live text at `range` no longer matches what was traced.
    ///
    /// A range without a valid anchor is always stale. `tagged` marks
    /// statement-like nodes, which get no whitespace leniency.
    pub fn is_range_stale(&self, document: &Document, range: &Range, tagged: bool) -> bool {
        let Some(current) = self
            .node_anchor(range)
            .and_then(|anchor| document.anchor_text(anchor))
        else {
            return true;
        };
        let Some(original) = self.original_slice(range) else {
            return true;
        };
        is_range_text_stale(original, current, tagged)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anchor::TextEdit;

    const SOURCE: &str = "@traced\ndef f(xs):\n    total = x + y\n    for x in xs:\n        total += x\n    return total  # done\n";

    fn listing() -> CallsByHash {
        // Offsets relative to "def".
        CallsByHash {
            calls: Vec::new(),
            ranges: vec![
                Range::new(23, 28), // x + y
                Range::new(15, 28), // total = x + y
                Range::new(23, 28), // duplicate
            ],
            loop_ranges: vec![Range::new(33, 64)],
        }
    }

    fn snapshot() -> (Document, FunctionSnapshot) {
        let mut doc = Document::new(SOURCE);
        let occurrence = FunctionOccurrence::locate(SOURCE, "f").unwrap();
        let snapshot = FunctionSnapshot::create(&mut doc, &occurrence, &listing()).unwrap();
        (doc, snapshot)
    }

    #[test]
    fn original_text_is_trimmed() {
        let (_, snapshot) = snapshot();
        assert!(snapshot.original_text().starts_with("def f(xs):"));
        assert!(snapshot.original_text().ends_with("return total"));
        assert_eq!(
            snapshot.body_hash(),
            &ContentHash::compute(snapshot.original_text().as_bytes())
        );
    }

    #[test]
    fn one_anchor_per_distinct_range() {
        let (doc, snapshot) = snapshot();
        assert_eq!(snapshot.node_anchor_count(), 2);
        let anchor = snapshot.node_anchor(&Range::new(23, 28)).unwrap();
        assert_eq!(doc.anchor_text(anchor), Some("x + y"));
        let loop_anchor = snapshot.loop_anchor(&Range::new(33, 64)).unwrap();
        assert!(doc.anchor_text(loop_anchor).unwrap().starts_with("for x in xs:"));
    }

    #[test]
    fn release_frees_every_anchor() {
        let (mut doc, snapshot) = snapshot();
        // def keyword, two node ranges, one loop range
        assert_eq!(doc.anchor_count(), 4);
        assert_eq!(snapshot.anchor_ids().len(), 4);
        snapshot.release(&mut doc);
        assert_eq!(doc.anchor_count(), 0);
        assert_eq!(snapshot.start_offset(&doc), None);
    }

    #[test]
    fn start_anchor_tracks_def_keyword() {
        let (mut doc, snapshot) = snapshot();
        assert_eq!(snapshot.start_offset(&doc), Some(8));
        doc.apply_edit(&TextEdit::insert(0, "import os\n")).unwrap();
        assert_eq!(snapshot.start_offset(&doc), Some(18));
    }

    #[test]
    fn edits_elsewhere_keep_ranges_fresh() {
        let (mut doc, snapshot) = snapshot();
        doc.apply_edit(&TextEdit::insert(0, "# header\n")).unwrap();
        assert!(!snapshot.is_range_stale(&doc, &Range::new(23, 28), false));
        assert!(!snapshot.is_range_stale(&doc, &Range::new(15, 28), true));
    }

    #[test]
    fn whitespace_edits_are_lenient_for_expressions_only() {
        let (mut doc, snapshot) = snapshot();
        // Remove the spaces around "+" in "x + y" (absolute 31..36).
        doc.apply_edit(&TextEdit::delete(Range::new(32, 33))).unwrap();
        doc.apply_edit(&TextEdit::delete(Range::new(33, 34))).unwrap();
        let anchor = snapshot.node_anchor(&Range::new(23, 28)).unwrap();
        assert_eq!(doc.anchor_text(anchor), Some("x+y"));
        assert!(!snapshot.is_range_stale(&doc, &Range::new(23, 28), false));
        assert!(snapshot.is_range_stale(&doc, &Range::new(15, 28), true));
    }

    #[test]
    fn unknown_range_is_stale() {
        let (doc, snapshot) = snapshot();
        assert!(snapshot.is_range_stale(&doc, &Range::new(0, 3), false));
    }
}

//! Edit-tolerant anchors over a mutable document.
//!
//! A [`Document`] owns the live text of one source file and an arena of
//! [`Anchor`]s. Each anchor tracks one byte range. Every edit applied
//! through [`Document::apply_edit`] runs one pass over the arena:
//!
//! - edits entirely before an anchor shift it,
//! - edits entirely after an anchor leave it alone,
//! - edits strictly inside an anchor resize it,
//! - edits that straddle one of its bounds, or replace its whole span,
//!   invalidate it.
//!
//! An insertion exactly at an anchor's start lands before the anchor; an
//! insertion exactly at its end lands after it. Invalid anchors never
//! become valid again.
//!
//! Anchors are addressed by [`AnchorId`]; snapshots and calls keep ids,
//! never references into the arena. Released anchors free their slot for
//! reuse. An id carries the generation of its slot, so an id kept past its
//! release never resolves to the slot's next anchor.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{BirdseyeError, BirdseyeResult};
use crate::range::Range;

// ============================================================================
// Anchor
// ============================================================================

/// Slot of an anchor inside its document's arena, plus the slot's
/// generation when the anchor was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AnchorId {
    slot: u32,
    generation: u32,
}

impl fmt::Display for AnchorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "anchor_{}.{}", self.slot, self.generation)
    }
}

/// A byte range that follows the text it was created on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Anchor {
    range: Range,
    valid: bool,
}

impl Anchor {
    fn new(range: Range) -> Self {
        Anchor { range, valid: true }
    }

    /// Whether the anchored span still exists.
    pub fn valid(&self) -> bool {
        self.valid
    }

    /// The live range of the anchor.
    ///
    /// After invalidation this is the last range the anchor had.
    pub fn current_range(&self) -> Range {
        self.range
    }

    /// Adjust the anchor for one edit replacing `removed` with
    /// `inserted_len` bytes.
    fn apply(&mut self, removed: Range, inserted_len: usize) {
        if !self.valid {
            return;
        }
        let delta = inserted_len as isize - removed.len() as isize;
        let span = self.range;

        if removed.end <= span.start {
            self.range = span.shift(delta);
            return;
        }
        if removed.start >= span.end {
            return;
        }
        if span.start <= removed.start && removed.end <= span.end {
            let whole = removed.start == span.start && removed.end == span.end && !span.is_empty();
            if whole {
                self.valid = false;
            } else {
                self.range = Range {
                    start: span.start,
                    end: (span.end as isize + delta) as usize,
                };
            }
            return;
        }
        self.valid = false;
    }
}

// ============================================================================
// Edits
// ============================================================================

/// Replacement of a byte range of a document by new text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextEdit {
    /// Bytes removed (absolute offsets, may be empty for an insertion).
    pub range: Range,
    /// Text inserted at `range.start`.
    pub replacement: String,
}

impl TextEdit {
    /// Insert `text` at `offset`.
    pub fn insert(offset: usize, text: impl Into<String>) -> Self {
        TextEdit {
            range: Range::new(offset, offset),
            replacement: text.into(),
        }
    }

    /// Delete the bytes of `range`.
    pub fn delete(range: Range) -> Self {
        TextEdit {
            range,
            replacement: String::new(),
        }
    }

    /// Replace the bytes of `range` with `text`.
    pub fn replace(range: Range, text: impl Into<String>) -> Self {
        TextEdit {
            range,
            replacement: text.into(),
        }
    }
}

// ============================================================================
// Document
// ============================================================================

#[derive(Debug, Clone)]
struct Slot {
    generation: u32,
    anchor: Option<Anchor>,
}

/// Live text of one source file plus the anchors created on it.
#[derive(Debug, Clone, Default)]
pub struct Document {
    text: String,
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl Document {
    /// Create a document holding `text`.
    pub fn new(text: impl Into<String>) -> Self {
        Document {
            text: text.into(),
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    /// The current text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Length of the current text in bytes.
    pub fn len(&self) -> usize {
        self.text.len()
    }

    /// Whether the document is empty.
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// The text of `range`, or `None` if it is out of bounds or splits a
    /// UTF-8 character.
    pub fn slice(&self, range: Range) -> Option<&str> {
        self.text.get(range.start..range.end)
    }

    /// Anchor `range` (absolute offsets) in this document.
    pub fn create_anchor(&mut self, range: Range) -> AnchorId {
        let mut anchor = Anchor::new(range);
        if range.end > self.text.len() {
            anchor.valid = false;
        }
        match self.free.pop() {
            Some(slot) => {
                let entry = &mut self.slots[slot as usize];
                entry.anchor = Some(anchor);
                AnchorId {
                    slot,
                    generation: entry.generation,
                }
            }
            None => {
                let slot = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    anchor: Some(anchor),
                });
                AnchorId {
                    slot,
                    generation: 0,
                }
            }
        }
    }

    /// Drop an anchor and free its slot. Unknown or already released ids
    /// are ignored.
    pub fn release_anchor(&mut self, id: AnchorId) {
        let Some(entry) = self.slots.get_mut(id.slot as usize) else {
            return;
        };
        if entry.generation != id.generation || entry.anchor.is_none() {
            return;
        }
        entry.anchor = None;
        entry.generation = entry.generation.wrapping_add(1);
        self.free.push(id.slot);
    }

    /// Release every anchor in `ids`.
    pub fn release_anchors(&mut self, ids: impl IntoIterator<Item = AnchorId>) {
        for id in ids {
            self.release_anchor(id);
        }
    }

    /// Look up an anchor; `None` once it was released.
    pub fn anchor(&self, id: AnchorId) -> Option<&Anchor> {
        self.slots
            .get(id.slot as usize)
            .filter(|entry| entry.generation == id.generation)
            .and_then(|entry| entry.anchor.as_ref())
    }

    /// The live range of an anchor, if the anchor exists and is valid.
    pub fn anchor_range(&self, id: AnchorId) -> Option<Range> {
        self.anchor(id)
            .filter(|anchor| anchor.valid())
            .map(Anchor::current_range)
    }

    /// The live text of an anchor, if the anchor exists and is valid.
    pub fn anchor_text(&self, id: AnchorId) -> Option<&str> {
        self.anchor_range(id).and_then(|range| self.slice(range))
    }

    /// Number of live (not released) anchors.
    pub fn anchor_count(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Apply one edit to the text and to every anchor.
    pub fn apply_edit(&mut self, edit: &TextEdit) -> BirdseyeResult<()> {
        let range = edit.range;
        if range.start > range.end
            || range.end > self.text.len()
            || !self.text.is_char_boundary(range.start)
            || !self.text.is_char_boundary(range.end)
        {
            return Err(BirdseyeError::EditOutOfBounds {
                start: range.start,
                end: range.end,
                len: self.text.len(),
            });
        }

        self.text
            .replace_range(range.start..range.end, &edit.replacement);
        for anchor in self.slots.iter_mut().filter_map(|entry| entry.anchor.as_mut()) {
            anchor.apply(range, edit.replacement.len());
        }
        trace!(
            removed = %range,
            inserted = edit.replacement.len(),
            "applied document edit"
        );
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

//! Byte ranges.
//!
//! Ranges are half-open intervals `[start, end)` of byte offsets. Ranges
//! reported by the trace server are relative to the start of a function
//! (its `def` keyword); ranges held by anchors are absolute document
//! offsets. `Range::offset_by` converts the former into the latter.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Half-open byte range `[start, end)`.
///
/// Two ranges are equal iff both bounds match, which makes `Range` usable
/// as a map key for the anchors of a function snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Range {
    /// Start byte offset (inclusive).
    pub start: usize,
    /// End byte offset (exclusive).
    pub end: usize,
}

impl Range {
    /// Create a new range.
    ///
    /// # Panics
    /// Panics if `start > end`.
    pub fn new(start: usize, end: usize) -> Self {
        assert!(
            start <= end,
            "Range start ({}) must be <= end ({})",
            start,
            end
        );
        Range { start, end }
    }

    /// Length of the range in bytes.
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    /// Check if range is empty.
    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// Check if this range overlaps with another.
    ///
    /// Adjacent ranges (one ends where another starts) do NOT overlap.
    pub fn overlaps(&self, other: &Range) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Check if this range contains another range entirely.
    pub fn contains(&self, other: &Range) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Check if the byte at `offset` lies inside this range.
    pub fn contains_offset(&self, offset: usize) -> bool {
        self.start <= offset && offset < self.end
    }

    /// Translate a function-relative range into document coordinates.
    pub fn offset_by(&self, base: usize) -> Range {
        Range {
            start: self.start + base,
            end: self.end + base,
        }
    }

    /// Move both bounds by a signed delta, saturating at zero.
    pub fn shift(&self, delta: isize) -> Range {
        Range {
            start: shift_offset(self.start, delta),
            end: shift_offset(self.end, delta),
        }
    }
}

fn shift_offset(offset: usize, delta: isize) -> usize {
    if delta >= 0 {
        offset + delta as usize
    } else {
        offset.saturating_sub(delta.unsigned_abs())
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn range_creation() {
        let range = Range::new(10, 20);
        assert_eq!(range.len(), 10);
        assert!(!range.is_empty());
        assert!(Range::new(4, 4).is_empty());
    }

    #[test]
    #[should_panic(expected = "must be <= end")]
    fn range_rejects_inverted_bounds() {
        Range::new(5, 2);
    }

    #[test]
    fn range_overlap_detection() {
        let a = Range::new(10, 20);
        assert!(a.overlaps(&Range::new(15, 25)));
        assert!(a.overlaps(&Range::new(5, 15)));
        assert!(!a.overlaps(&Range::new(20, 30)));
        assert!(!Range::new(20, 30).overlaps(&a));
    }

    #[test]
    fn range_containment() {
        let outer = Range::new(10, 30);
        assert!(outer.contains(&Range::new(15, 25)));
        assert!(!outer.contains(&Range::new(20, 40)));
        assert!(outer.contains_offset(10));
        assert!(outer.contains_offset(29));
        assert!(!outer.contains_offset(30));
    }

    #[test]
    fn range_translation() {
        let relative = Range::new(4, 9);
        assert_eq!(relative.offset_by(100), Range::new(104, 109));
        assert_eq!(relative.shift(-2), Range::new(2, 7));
        assert_eq!(relative.shift(-6), Range::new(0, 3));
        assert_eq!(relative.shift(3), Range::new(7, 12));
    }

    #[test]
    fn range_is_a_map_key() {
        let mut map = HashMap::new();
        map.insert(Range::new(1, 2), "a");
        map.insert(Range::new(1, 2), "b");
        map.insert(Range::new(1, 3), "c");
        assert_eq!(map.len(), 2);
        assert_eq!(map[&Range::new(1, 2)], "b");
    }

    #[test]
    fn range_deserializes_from_server_shape() {
        let range: Range = serde_json::from_str(r#"{"start": 3, "end": 8}"#).unwrap();
        assert_eq!(range, Range::new(3, 8));
        assert_eq!(range.to_string(), "[3, 8)");
    }
}

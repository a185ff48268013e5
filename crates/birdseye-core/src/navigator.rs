//! Loop navigators.
//!
//! Each loop of a call that could be attached to a live element gets a
//! [`LoopNavigator`]: a cursor over the loop's sampled iterations. Which
//! iterations are available depends on the iterations selected in the
//! enclosing loops, so the lists are re-derived from scratch, top-down,
//! after every navigation step ([`NavigatorSet::derive_iterations`]).
//!
//! A cursor is never reset by derivation. When an outer step shrinks an
//! inner loop's list the inner cursor is only clamped on read, so stepping
//! the outer loop back restores the inner selection exactly.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::trace;

use crate::host::ElementId;
use crate::trace::{LoopId, Loops};

// ============================================================================
// Loop Navigator
// ============================================================================

/// Cursor over the sampled iterations of one loop within one call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoopNavigator {
    loop_id: LoopId,
    element: ElementId,
    cursor: usize,
    indices: Vec<i64>,
}

impl LoopNavigator {
    /// Navigator at cursor 0 for a loop attached to `element`.
    pub fn new(loop_id: LoopId, element: ElementId) -> Self {
        LoopNavigator {
            loop_id,
            element,
            cursor: 0,
            indices: Vec::new(),
        }
    }

    /// The loop this navigator steps through.
    pub fn loop_id(&self) -> LoopId {
        self.loop_id
    }

    /// Host element that navigation controls attach to.
    pub fn element(&self) -> ElementId {
        self.element
    }

    /// Raw cursor; may exceed the currently available iterations.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Sampled iteration indices available at the current selection.
    pub fn indices(&self) -> &[i64] {
        &self.indices
    }

    /// Position of the selected iteration within [`Self::indices`].
    ///
    /// The cursor clamped to the available iterations; `None` when no
    /// iteration is available.
    pub fn current_iteration(&self) -> Option<usize> {
        if self.indices.is_empty() {
            None
        } else {
            Some(self.cursor.min(self.indices.len() - 1))
        }
    }

    /// The selected iteration's runtime index, for display.
    pub fn current_iteration_display(&self) -> Option<String> {
        self.current_iteration()
            .map(|position| self.indices[position].to_string())
    }

    /// Whether stepping by `direction` lands on an available iteration.
    pub fn can_navigate(&self, direction: isize) -> bool {
        let Some(current) = self.current_iteration() else {
            return false;
        };
        let target = current as isize + direction;
        target >= 0 && (target as usize) < self.indices.len()
    }

    /// Step by `direction`; a no-op returning `false` when not possible.
    ///
    /// Stepping starts from the clamped position, so a cursor left beyond
    /// the available iterations moves relative to what is displayed.
    pub fn step(&mut self, direction: isize) -> bool {
        if !self.can_navigate(direction) {
            return false;
        }
        if let Some(current) = self.current_iteration() {
            self.cursor = (current as isize + direction) as usize;
        }
        true
    }
}

// ============================================================================
// Navigator Set
// ============================================================================

/// The navigators of one call, keyed by loop id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NavigatorSet {
    navigators: BTreeMap<LoopId, LoopNavigator>,
}

impl NavigatorSet {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a navigator, replacing any previous one for the same loop.
    pub fn insert(&mut self, navigator: LoopNavigator) {
        self.navigators.insert(navigator.loop_id, navigator);
    }

    /// Navigator of a loop, if one was registered.
    pub fn get(&self, loop_id: LoopId) -> Option<&LoopNavigator> {
        self.navigators.get(&loop_id)
    }

    /// Mutable navigator of a loop.
    pub fn get_mut(&mut self, loop_id: LoopId) -> Option<&mut LoopNavigator> {
        self.navigators.get_mut(&loop_id)
    }

    /// All navigators in loop id order.
    pub fn iter(&self) -> impl Iterator<Item = &LoopNavigator> {
        self.navigators.values()
    }

    /// Number of registered navigators.
    pub fn len(&self) -> usize {
        self.navigators.len()
    }

    /// Whether no navigator is registered.
    pub fn is_empty(&self) -> bool {
        self.navigators.is_empty()
    }

    /// Drop every navigator.
    pub fn clear(&mut self) {
        self.navigators.clear();
    }

    /// Recompute every navigator's available iterations from `root`.
    ///
    /// All lists are emptied first. Then each loop present at a level gets
    /// its sampled indices in server order, and only the selected
    /// iteration's nested loops are visited. Loops without a registered
    /// navigator are skipped together with everything nested inside them.
    pub fn derive_iterations(&mut self, root: &Loops) {
        for navigator in self.navigators.values_mut() {
            navigator.indices.clear();
        }
        self.fill_level(root);
    }

    fn fill_level(&mut self, loops: &Loops) {
        for (loop_id, iterations) in loops {
            let Some(navigator) = self.navigators.get_mut(loop_id) else {
                trace!(loop_id, "no navigator for loop, skipping its iterations");
                continue;
            };
            navigator.indices = iterations.iter().map(|i| i.sampled_index).collect();
            let Some(current) = navigator.current_iteration() else {
                continue;
            };
            if let Some(children) = iterations[current].child_loops() {
                self.fill_level(children);
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::Iteration;

    fn iteration(index: i64, child_loops: Option<Loops>) -> Iteration {
        Iteration {
            sampled_index: index,
            child_loops,
        }
    }

    fn flat(indices: &[i64]) -> Vec<Iteration> {
        indices.iter().map(|i| iteration(*i, None)).collect()
    }

    fn set_with(loops: &[LoopId]) -> NavigatorSet {
        let mut set = NavigatorSet::new();
        for id in loops {
            set.insert(LoopNavigator::new(*id, ElementId(*id as u64)));
        }
        set
    }

    mod navigator_tests {
        use super::*;

        #[test]
        fn empty_navigator_has_no_iteration() {
            let nav = LoopNavigator::new(3, ElementId(0));
            assert_eq!(nav.current_iteration(), None);
            assert_eq!(nav.current_iteration_display(), None);
            assert!(!nav.can_navigate(1));
            assert!(!nav.can_navigate(-1));
        }

        #[test]
        fn stepping_through_sampled_iterations() {
            let mut set = set_with(&[3]);
            let root: Loops = [(3, flat(&[0, 99]))].into_iter().collect();
            set.derive_iterations(&root);

            let nav = set.get_mut(3).unwrap();
            assert_eq!(nav.current_iteration_display().as_deref(), Some("0"));
            assert!(!nav.can_navigate(-1));
            assert!(nav.step(1));
            assert_eq!(nav.current_iteration_display().as_deref(), Some("99"));
            assert!(!nav.can_navigate(1));
            assert!(!nav.step(1));
            assert_eq!(nav.cursor(), 1);
        }

        #[test]
        fn step_from_clamped_position() {
            let mut nav = LoopNavigator::new(1, ElementId(0));
            nav.indices = vec![0, 1];
            nav.cursor = 4;
            assert_eq!(nav.current_iteration(), Some(1));
            assert!(nav.step(-1));
            assert_eq!(nav.current_iteration(), Some(0));
        }
    }

    mod derivation_tests {
        use super::*;

        /// Outer loop 1 with iterations A (index 0, inner has 5 samples)
        /// and B (index 9, inner has 2 samples).
        fn nested() -> Loops {
            let inner_a: Loops = [(2, flat(&[0, 1, 2, 7, 8]))].into_iter().collect();
            let inner_b: Loops = [(2, flat(&[0, 1]))].into_iter().collect();
            [(
                1,
                vec![iteration(0, Some(inner_a)), iteration(9, Some(inner_b))],
            )]
            .into_iter()
            .collect()
        }

        #[test]
        fn inner_cursor_survives_outer_round_trip() {
            let mut set = set_with(&[1, 2]);
            let root = nested();
            set.derive_iterations(&root);

            for _ in 0..4 {
                assert!(set.get_mut(2).unwrap().step(1));
                set.derive_iterations(&root);
            }
            assert_eq!(set.get(2).unwrap().current_iteration(), Some(4));

            assert!(set.get_mut(1).unwrap().step(1));
            set.derive_iterations(&root);
            assert_eq!(set.get(2).unwrap().indices(), &[0, 1]);
            assert_eq!(set.get(2).unwrap().current_iteration(), Some(1));
            assert_eq!(set.get(2).unwrap().cursor(), 4);

            assert!(set.get_mut(1).unwrap().step(-1));
            set.derive_iterations(&root);
            assert_eq!(set.get(2).unwrap().current_iteration(), Some(4));
            assert_eq!(
                set.get(2).unwrap().current_iteration_display().as_deref(),
                Some("8")
            );
        }

        #[test]
        fn only_selected_iteration_is_visited() {
            let inner: Loops = [(2, flat(&[5]))].into_iter().collect();
            let root: Loops = [(1, vec![iteration(0, None), iteration(1, Some(inner))])]
                .into_iter()
                .collect();
            let mut set = set_with(&[1, 2]);
            set.derive_iterations(&root);
            assert!(set.get(2).unwrap().indices().is_empty());

            set.get_mut(1).unwrap().step(1);
            set.derive_iterations(&root);
            assert_eq!(set.get(2).unwrap().indices(), &[5]);

            set.get_mut(1).unwrap().step(-1);
            set.derive_iterations(&root);
            assert!(set.get(2).unwrap().indices().is_empty());
        }

        #[test]
        fn unregistered_loops_hide_their_children() {
            let mut set = set_with(&[2]);
            set.derive_iterations(&nested());
            assert!(set.get(2).unwrap().indices().is_empty());
            assert_eq!(set.len(), 1);
        }

        #[test]
        fn derivation_is_idempotent() {
            let mut set = set_with(&[1, 2]);
            let root = nested();
            set.derive_iterations(&root);
            let first = set.clone();
            set.derive_iterations(&root);
            assert_eq!(set, first);
        }
    }
}

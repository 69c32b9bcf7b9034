//! Branch policies.
//!
//! A policy decides where a new branch starts when the open chain splits,
//! how a core node maps a time range onto its children, and which file
//! identity the tree is stamped with. The tree engine is generic over the
//! policy instead of subclassing per variant.

use crate::node::{ChildRef, Node, NodeLayout};
use histree_common::block::NodeType;
use histree_common::TimeRange;

/// Magic number of classic history tree files.
pub const CLASSIC_MAGIC_NUMBER: u32 = 0x05FF_A900;

/// File format version of classic history tree files.
pub const CLASSIC_FILE_VERSION: u32 = 1;

/// Strategy for branch placement and child selection.
pub trait BranchPolicy: Send + Sync {
    /// Returns the magic number identifying files built with this policy.
    fn magic_number(&self) -> u32;

    /// Returns the file format version written with this policy.
    fn file_version(&self) -> u32;

    /// Returns the start time of a new branch split off at `depth`.
    ///
    /// `tree_end` is the largest end time inserted so far and
    /// `interval_start` the start of the interval that triggered the split.
    fn new_branch_start(&self, tree_end: i64, depth: usize, interval_start: i64) -> i64;

    /// Returns the last instant covered by `children[index]`.
    fn child_end(&self, children: &[ChildRef], index: usize, node_end: i64) -> i64;

    /// Returns the indices of the children whose time range intersects `range`.
    fn select_children(&self, children: &[ChildRef], node_end: i64, range: &TimeRange) -> Vec<usize> {
        (0..children.len())
            .filter(|&i| range.intersects(children[i].start, self.child_end(children, i, node_end)))
            .collect()
    }

    /// Creates an empty open node.
    fn create_node<V>(
        &self,
        node_type: NodeType,
        seq: u32,
        parent: Option<u32>,
        start: i64,
        layout: NodeLayout,
    ) -> Node<V> {
        Node::new(node_type, seq, parent, start, layout)
    }
}

/// Sequential policy: sibling branches are contiguous.
///
/// Every new branch starts one tick after the current tree end, so child
/// `i` of a core node covers `[start(i), start(i + 1) - 1]` and the last
/// child runs to the end of its parent. Exactly one child owns any instant.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClassicPolicy;

impl BranchPolicy for ClassicPolicy {
    fn magic_number(&self) -> u32 {
        CLASSIC_MAGIC_NUMBER
    }

    fn file_version(&self) -> u32 {
        CLASSIC_FILE_VERSION
    }

    fn new_branch_start(&self, tree_end: i64, _depth: usize, _interval_start: i64) -> i64 {
        tree_end.saturating_add(1)
    }

    fn child_end(&self, children: &[ChildRef], index: usize, node_end: i64) -> i64 {
        match children.get(index + 1) {
            Some(next) => next.start - 1,
            None => node_end,
        }
    }

    fn select_children(&self, children: &[ChildRef], node_end: i64, range: &TimeRange) -> Vec<usize> {
        // Children are contiguous and ordered, so skip those ending before
        // the range and stop at the first one starting after it.
        let first = children.partition_point(|c| c.start <= range.min()).saturating_sub(1);
        let mut selected = Vec::new();
        for i in first..children.len() {
            if children[i].start > range.max() {
                break;
            }
            if range.intersects(children[i].start, self.child_end(children, i, node_end)) {
                selected.push(i);
            }
        }
        selected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn refs(starts: &[i64]) -> Vec<ChildRef> {
        starts
            .iter()
            .enumerate()
            .map(|(i, &start)| ChildRef {
                seq: i as u32 + 1,
                start,
            })
            .collect()
    }

    #[test]
    fn test_classic_identity() {
        assert_eq!(ClassicPolicy.magic_number(), 0x05FFA900);
        assert_eq!(ClassicPolicy.file_version(), 1);
    }

    #[test]
    fn test_classic_new_branch_start() {
        assert_eq!(ClassicPolicy.new_branch_start(1000, 2, 5), 1001);
        assert_eq!(ClassicPolicy.new_branch_start(i64::MAX, 0, 0), i64::MAX);
    }

    #[test]
    fn test_classic_child_end() {
        let children = refs(&[0, 10, 25]);
        assert_eq!(ClassicPolicy.child_end(&children, 0, 40), 9);
        assert_eq!(ClassicPolicy.child_end(&children, 1, 40), 24);
        assert_eq!(ClassicPolicy.child_end(&children, 2, 40), 40);
    }

    #[test]
    fn test_classic_exactly_one_child_per_instant() {
        let children = refs(&[0, 10, 25, 26]);
        for t in 0..=40 {
            let selected = ClassicPolicy.select_children(&children, 40, &TimeRange::singleton(t));
            assert_eq!(selected.len(), 1, "instant {}", t);
        }
    }

    #[test]
    fn test_classic_matches_default_selection() {
        struct Linear;
        impl BranchPolicy for Linear {
            fn magic_number(&self) -> u32 {
                0
            }
            fn file_version(&self) -> u32 {
                0
            }
            fn new_branch_start(&self, tree_end: i64, _: usize, _: i64) -> i64 {
                tree_end + 1
            }
            fn child_end(&self, children: &[ChildRef], index: usize, node_end: i64) -> i64 {
                ClassicPolicy.child_end(children, index, node_end)
            }
        }

        // Includes an empty child (start 31, end 30) sealed before its start
        let children = refs(&[0, 10, 25, 31, 31]);
        for (min, max) in [(0, 0), (5, 12), (9, 10), (24, 40), (30, 30), (31, 31), (41, 50)] {
            let range = TimeRange::new(min, max).unwrap();
            assert_eq!(
                ClassicPolicy.select_children(&children, 40, &range),
                Linear.select_children(&children, 40, &range),
                "range {}",
                range
            );
        }
    }

    #[test]
    fn test_classic_range_beyond_node() {
        let children = refs(&[0, 10]);
        let range = TimeRange::new(100, 200).unwrap();
        assert!(ClassicPolicy.select_children(&children, 50, &range).is_empty());
    }

    #[test]
    fn test_create_node() {
        let layout = NodeLayout::new(4096, 10);
        let node: Node<i64> = ClassicPolicy.create_node(NodeType::Leaf, 4, Some(1), 77, layout);
        assert_eq!(node.seq(), 4);
        assert_eq!(node.parent(), Some(1));
        assert_eq!(node.start(), 77);
        assert!(!node.is_sealed());
    }
}

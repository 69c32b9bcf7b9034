//! Fixed-size tree nodes.
//!
//! A node is one `block_size` block in the tree file. Leaf nodes hold only
//! intervals; core nodes additionally hold up to `max_children` child
//! references. Both kinds keep their intervals sorted by end time.
//!
//! Block layout:
//! - common header (29 bytes, see [`NodeHeader`])
//! - core header (core only): child count (4 bytes) followed by
//!   `max_children` slots of child seq (4 bytes) + child start (8 bytes)
//! - packed intervals
//! - zero padding up to `block_size`

use crate::codec::IntervalCodec;
use crate::interval::Interval;
use crate::policy::BranchPolicy;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use histree_common::block::{NodeHeader, NodeType, OPEN_NODE_END};
use histree_common::config::CHILD_SLOT_SIZE;
use histree_common::{HistreeError, Result, TimeRange};

/// Reference from a core node to one of its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildRef {
    /// Child sequence number.
    pub seq: u32,
    /// Child start time.
    pub start: i64,
}

/// Geometry shared by all nodes of a tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeLayout {
    /// Size of every node block.
    pub block_size: usize,
    /// Maximum children per core node.
    pub max_children: usize,
}

impl NodeLayout {
    /// Creates a layout.
    pub fn new(block_size: usize, max_children: usize) -> Self {
        Self {
            block_size,
            max_children,
        }
    }

    /// Returns the size of the core-specific header.
    #[inline]
    pub fn core_header_size(&self) -> usize {
        4 + self.max_children * CHILD_SLOT_SIZE
    }

    /// Returns the total header size of a node of the given kind.
    #[inline]
    pub fn header_size(&self, node_type: NodeType) -> usize {
        match node_type {
            NodeType::Leaf => NodeHeader::SIZE,
            NodeType::Core => NodeHeader::SIZE + self.core_header_size(),
        }
    }

    /// Returns the largest interval an empty node of any kind can take.
    #[inline]
    pub fn max_interval_size(&self) -> usize {
        self.block_size
            .saturating_sub(self.header_size(NodeType::Core))
    }
}

/// A node of the history tree.
#[derive(Debug, Clone)]
pub struct Node<V> {
    node_type: NodeType,
    seq: u32,
    parent: Option<u32>,
    start: i64,
    end: i64,
    sealed: bool,
    layout: NodeLayout,
    /// Sorted by (end, start).
    intervals: Vec<Interval<V>>,
    children: Vec<ChildRef>,
    /// Encoded size of all intervals.
    interval_bytes: usize,
}

impl<V> Node<V> {
    /// Creates an empty open node.
    pub fn new(
        node_type: NodeType,
        seq: u32,
        parent: Option<u32>,
        start: i64,
        layout: NodeLayout,
    ) -> Self {
        Self {
            node_type,
            seq,
            parent,
            start,
            end: OPEN_NODE_END,
            sealed: false,
            layout,
            intervals: Vec::new(),
            children: Vec::new(),
            interval_bytes: 0,
        }
    }

    /// Returns the node kind.
    #[inline]
    pub fn node_type(&self) -> NodeType {
        self.node_type
    }

    /// Returns true for core nodes.
    #[inline]
    pub fn is_core(&self) -> bool {
        self.node_type == NodeType::Core
    }

    /// Returns the sequence number.
    #[inline]
    pub fn seq(&self) -> u32 {
        self.seq
    }

    /// Returns the parent sequence number, None for the root.
    #[inline]
    pub fn parent(&self) -> Option<u32> {
        self.parent
    }

    /// Returns the start time.
    #[inline]
    pub fn start(&self) -> i64 {
        self.start
    }

    /// Returns the end time, `OPEN_NODE_END` while open.
    #[inline]
    pub fn end(&self) -> i64 {
        self.end
    }

    /// Returns true once the node is sealed.
    #[inline]
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Returns the stored intervals, sorted by end time.
    pub fn intervals(&self) -> &[Interval<V>] {
        &self.intervals
    }

    /// Returns the number of stored intervals.
    pub fn interval_count(&self) -> usize {
        self.intervals.len()
    }

    /// Returns the child references (empty for leaves).
    pub fn children(&self) -> &[ChildRef] {
        &self.children
    }

    /// Returns the number of children.
    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    /// Returns the node geometry.
    pub fn layout(&self) -> NodeLayout {
        self.layout
    }

    /// Returns the total header size of this node.
    pub fn header_size(&self) -> usize {
        self.layout.header_size(self.node_type)
    }

    /// Returns the encoded size of the node without padding.
    pub fn used_size(&self) -> usize {
        self.header_size() + self.interval_bytes
    }

    /// Returns the bytes still available for intervals.
    pub fn free_space(&self) -> usize {
        self.layout.block_size.saturating_sub(self.used_size())
    }

    /// Returns the percentage of the payload region in use.
    pub fn usage_percent(&self) -> u8 {
        let payload = self.layout.block_size.saturating_sub(self.header_size());
        if payload == 0 {
            return 100;
        }
        ((self.interval_bytes * 100) / payload).min(100) as u8
    }

    /// Returns true if an interval of `size` encoded bytes fits.
    #[inline]
    pub fn fits(&self, size: usize) -> bool {
        size <= self.free_space()
    }

    /// Adds an interval if it fits.
    ///
    /// Returns `Ok(None)` once stored, or hands the interval back untouched
    /// when the block has no room for it. `size` must be the interval's
    /// encoded size.
    pub fn try_add(&mut self, interval: Interval<V>, size: usize) -> Result<Option<Interval<V>>> {
        if self.sealed {
            return Err(HistreeError::NodeSealed { seq: self.seq });
        }
        if !self.fits(size) {
            return Ok(Some(interval));
        }
        debug_assert!(interval.start() >= self.start);

        let key = (interval.end(), interval.start());
        let pos = self
            .intervals
            .partition_point(|i| (i.end(), i.start()) <= key);
        self.intervals.insert(pos, interval);
        self.interval_bytes += size;
        Ok(None)
    }

    /// Seals the node at `end`.
    ///
    /// A node may be sealed before its own start only while it is empty.
    pub fn seal(&mut self, end: i64) -> Result<()> {
        if self.sealed {
            return Err(HistreeError::NodeSealed { seq: self.seq });
        }
        if let Some(last) = self.intervals.last() {
            if end < last.end() {
                return Err(HistreeError::SealBeforeContent {
                    seq: self.seq,
                    end,
                    content_end: last.end(),
                });
            }
        }
        self.end = end;
        self.sealed = true;
        Ok(())
    }

    /// Sets the parent sequence number.
    pub fn set_parent(&mut self, parent: u32) {
        self.parent = Some(parent);
    }

    /// Appends a child reference.
    pub fn link_child(&mut self, seq: u32, start: i64) -> Result<()> {
        if !self.is_core() {
            return Err(HistreeError::NotCoreNode { seq: self.seq });
        }
        if self.sealed {
            return Err(HistreeError::NodeSealed { seq: self.seq });
        }
        if self.children.len() >= self.layout.max_children {
            return Err(HistreeError::ChildCapacityExceeded {
                seq: self.seq,
                max: self.layout.max_children,
            });
        }
        self.children.push(ChildRef { seq, start });
        Ok(())
    }

    /// Returns the sequence numbers of the children that intersect `range`.
    pub fn select_children<P: BranchPolicy>(&self, policy: &P, range: &TimeRange) -> Vec<u32> {
        policy
            .select_children(&self.children, self.end, range)
            .into_iter()
            .map(|i| self.children[i].seq)
            .collect()
    }

    /// Returns the common header describing this node.
    pub fn header(&self) -> NodeHeader {
        NodeHeader {
            node_type: self.node_type,
            seq: self.seq,
            parent: self.parent,
            start: self.start,
            end: self.end,
            interval_count: self.intervals.len() as u32,
        }
    }
}

impl<V: Clone> Node<V> {
    /// Appends to `out` the intervals intersecting `range` that pass `filter`.
    pub fn query_intervals<F>(&self, range: &TimeRange, filter: F, out: &mut Vec<Interval<V>>)
    where
        F: Fn(&Interval<V>) -> bool,
    {
        let first = self.intervals.partition_point(|i| i.end() < range.min());
        for interval in &self.intervals[first..] {
            if interval.start() <= range.max() && filter(interval) {
                out.push(interval.clone());
            }
        }
    }

    /// Serializes the node into a full block.
    pub fn encode<C>(&self, codec: &C) -> Result<Bytes>
    where
        C: IntervalCodec<Value = V>,
    {
        let block_size = self.layout.block_size;
        let mut buf = BytesMut::with_capacity(block_size);

        buf.put_slice(&self.header().to_bytes());

        if self.is_core() {
            buf.put_i32_le(self.children.len() as i32);
            for child in &self.children {
                buf.put_i32_le(child.seq as i32);
                buf.put_i64_le(child.start);
            }
            let unused = self.layout.max_children - self.children.len();
            buf.put_bytes(0, unused * CHILD_SLOT_SIZE);
        }

        for interval in &self.intervals {
            interval.encode(codec, &mut buf);
        }

        if buf.len() > block_size {
            return Err(HistreeError::NodeCorrupted {
                seq: self.seq,
                reason: format!("{} bytes do not fit a {} byte block", buf.len(), block_size),
            });
        }

        buf.resize(block_size, 0);
        Ok(buf.freeze())
    }

    /// Deserializes a sealed node from a full block.
    pub fn decode<C>(data: &[u8], layout: NodeLayout, codec: &C) -> Result<Self>
    where
        C: IntervalCodec<Value = V>,
    {
        let header = NodeHeader::from_bytes(data)?;
        let seq = header.seq;
        let corrupted = |reason: String| HistreeError::NodeCorrupted { seq, reason };

        if data.len() != layout.block_size {
            return Err(corrupted(format!(
                "block is {} bytes, expected {}",
                data.len(),
                layout.block_size
            )));
        }

        let mut buf = &data[NodeHeader::SIZE..];

        let mut children = Vec::new();
        if header.node_type == NodeType::Core {
            if buf.len() < layout.core_header_size() {
                return Err(corrupted("core header truncated".to_string()));
            }
            let count = buf.get_i32_le();
            if count < 0 || count as usize > layout.max_children {
                return Err(corrupted(format!("invalid child count {}", count)));
            }
            children.reserve(count as usize);
            for _ in 0..count {
                let child_seq = buf.get_i32_le();
                let child_start = buf.get_i64_le();
                if child_seq < 0 {
                    return Err(corrupted(format!("negative child seq {}", child_seq)));
                }
                children.push(ChildRef {
                    seq: child_seq as u32,
                    start: child_start,
                });
            }
            buf.advance((layout.max_children - count as usize) * CHILD_SLOT_SIZE);
        }

        let payload_len = buf.len();
        let fit = payload_len / Interval::<V>::FIXED_SIZE;
        if header.interval_count as usize > fit {
            return Err(corrupted(format!(
                "{} intervals cannot fit in {} payload bytes",
                header.interval_count, payload_len
            )));
        }
        let mut intervals = Vec::with_capacity(header.interval_count as usize);
        for _ in 0..header.interval_count {
            let interval =
                Interval::decode(codec, &mut buf).map_err(|e| corrupted(e.to_string()))?;
            intervals.push(interval);
        }

        Ok(Self {
            node_type: header.node_type,
            seq,
            parent: header.parent,
            start: header.start,
            end: header.end,
            sealed: true,
            layout,
            intervals,
            children,
            interval_bytes: payload_len - buf.len(),
        })
    }
}

impl<V> std::fmt::Display for Node<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Node #{}, ", self.seq)?;
        match self.parent {
            Some(parent) => write!(f, "parent #{}, ", parent)?,
            None => write!(f, "root, ")?,
        }
        write!(f, "{}", self.node_type)?;
        if self.is_core() {
            write!(f, " ({} children)", self.children.len())?;
        }
        write!(
            f,
            ", {} intervals ({}% used), [{} - ",
            self.intervals.len(),
            self.usage_percent(),
            self.start
        )?;
        if self.sealed {
            write!(f, "{}]", self.end)
        } else {
            write!(f, "...]")
        }
    }
}

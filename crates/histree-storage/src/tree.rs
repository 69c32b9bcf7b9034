//! The history tree engine.
//!
//! A tree is built by a single writer that appends intervals to the open
//! chain, the path of mutable nodes from the root to the latest leaf. When
//! a node runs out of room the engine seals part of the chain, writes the
//! sealed nodes to disk and grows a new branch, or a new root when every
//! level is full. Readers may query concurrently at any time.
//!
//! Lock order is branch, then node. Sealed nodes are immutable and shared
//! through the node cache without locking.

use crate::codec::IntervalCodec;
use crate::disk::BlockFile;
use crate::header::TreeHeader;
use crate::interval::Interval;
use crate::node::{Node, NodeLayout};
use crate::policy::{BranchPolicy, ClassicPolicy};
use histree_cache::{CacheStats, NodeCache};
use histree_common::block::{NodeType, TREE_HEADER_SIZE};
use histree_common::{HistreeError, Result, TimeRange, TreeConfig};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

type SharedNode<V> = Arc<RwLock<Node<V>>>;

/// An open node with the fields that never change while it is open.
struct OpenSlot<V> {
    seq: u32,
    start: i64,
    node_type: NodeType,
    node: SharedNode<V>,
}

impl<V> OpenSlot<V> {
    fn new(node: Node<V>) -> Self {
        Self {
            seq: node.seq(),
            start: node.start(),
            node_type: node.node_type(),
            node: Arc::new(RwLock::new(node)),
        }
    }
}

/// The open chain and root bookkeeping.
struct Branch<V> {
    root_seq: u32,
    depth: usize,
    /// Root first, latest leaf last. Empty once the tree is read-only.
    nodes: Vec<OpenSlot<V>>,
}

impl<V> Branch<V> {
    /// Returns the deepest open node that may hold an interval starting at `start`.
    fn home_depth(&self, start: i64) -> usize {
        self.nodes
            .iter()
            .rposition(|slot| slot.start <= start)
            .unwrap_or(0)
    }
}

/// A node as seen by a reader.
enum NodeHandle<V> {
    Open(SharedNode<V>),
    Sealed(Arc<Node<V>>),
}

impl<V> NodeHandle<V> {
    fn with<R>(&self, f: impl FnOnce(&Node<V>) -> R) -> R {
        match self {
            NodeHandle::Open(node) => f(&*node.read()),
            NodeHandle::Sealed(node) => f(node),
        }
    }
}

/// Disk-resident index of attribute intervals.
pub struct HistoryTree<C: IntervalCodec, P: BranchPolicy = ClassicPolicy> {
    codec: C,
    policy: P,
    file: BlockFile,
    layout: NodeLayout,
    provider_version: i32,
    tree_start: i64,
    /// Largest end time committed so far.
    tree_end: AtomicI64,
    node_count: AtomicU32,
    read_only: AtomicBool,
    branch: RwLock<Branch<C::Value>>,
    /// Serializes inserts and close.
    writer: Mutex<()>,
    cache: NodeCache<Node<C::Value>>,
}

fn build_cache<V>(cache_nodes: usize, block_size: usize) -> NodeCache<V> {
    if cache_nodes == 0 {
        NodeCache::auto_sized(block_size)
    } else {
        NodeCache::new(cache_nodes)
    }
}

impl<C: IntervalCodec, P: BranchPolicy> HistoryTree<C, P> {
    /// Creates an empty tree in build mode, truncating any existing file.
    pub fn create(config: TreeConfig, codec: C, policy: P) -> Result<Self> {
        config.validate()?;

        let file = BlockFile::create(&config.path, config.block_size, config.fsync_enabled)?;
        let layout = NodeLayout::new(config.block_size, config.max_children);
        let root = policy.create_node(NodeType::Leaf, 0, None, config.tree_start, layout);

        info!(
            path = %config.path.display(),
            block_size = config.block_size,
            max_children = config.max_children,
            provider_version = config.provider_version,
            tree_start = config.tree_start,
            "created history tree"
        );

        Ok(Self {
            codec,
            policy,
            file,
            layout,
            provider_version: config.provider_version,
            tree_start: config.tree_start,
            tree_end: AtomicI64::new(config.tree_start),
            node_count: AtomicU32::new(1),
            read_only: AtomicBool::new(false),
            branch: RwLock::new(Branch {
                root_seq: 0,
                depth: 1,
                nodes: vec![OpenSlot::new(root)],
            }),
            writer: Mutex::new(()),
            cache: build_cache(config.cache_nodes, config.block_size),
        })
    }

    /// Opens a closed tree file in read-only mode.
    ///
    /// The file is rejected unless its header matches the policy and
    /// `expected_provider_version` (or `IGNORE_PROVIDER_VERSION` is given),
    /// and its root node agrees with the header.
    pub fn open(
        path: impl AsRef<Path>,
        expected_provider_version: i32,
        codec: C,
        policy: P,
        cache_nodes: usize,
    ) -> Result<Self> {
        let path = path.as_ref();
        let reject = |err: HistreeError| {
            warn!(path = %path.display(), error = %err, "rejecting history file");
            err
        };

        let mut file = BlockFile::open(path, TREE_HEADER_SIZE)?;
        let header = TreeHeader::from_bytes(&file.read_header().map_err(reject)?);
        header
            .validate(
                policy.magic_number(),
                policy.file_version(),
                expected_provider_version,
            )
            .map_err(reject)?;

        let block_size = header.block_size as usize;
        let max_children = header.max_children as usize;
        TreeConfig::new(path)
            .with_block_size(block_size)
            .with_max_children(max_children)
            .validate()
            .map_err(|e| reject(HistreeError::InconsistentTree(e.to_string())))?;
        file.set_block_size(block_size);

        let blocks = file.num_blocks()?;
        if header.node_count == 0 || blocks < header.node_count {
            return Err(reject(HistreeError::InconsistentTree(format!(
                "header declares {} nodes, file holds {} blocks",
                header.node_count, blocks
            ))));
        }
        if header.root_seq >= header.node_count {
            return Err(reject(HistreeError::InconsistentTree(format!(
                "root #{} outside {} nodes",
                header.root_seq, header.node_count
            ))));
        }
        if header.branch_depth == 0 || header.branch_depth > header.node_count {
            return Err(reject(HistreeError::InconsistentTree(format!(
                "depth {} impossible with {} nodes",
                header.branch_depth, header.node_count
            ))));
        }

        let tree = Self {
            codec,
            policy,
            file,
            layout: NodeLayout::new(block_size, max_children),
            provider_version: header.provider_version,
            tree_start: header.tree_start,
            tree_end: AtomicI64::new(header.tree_end),
            node_count: AtomicU32::new(header.node_count),
            read_only: AtomicBool::new(true),
            branch: RwLock::new(Branch {
                root_seq: header.root_seq,
                depth: header.branch_depth as usize,
                nodes: Vec::new(),
            }),
            writer: Mutex::new(()),
            cache: build_cache(cache_nodes, block_size),
        };

        let root = tree.fetch_sealed(header.root_seq).map_err(reject)?;
        if root.start() != header.tree_start || root.end() != header.tree_end {
            return Err(reject(HistreeError::InconsistentTree(format!(
                "root covers [{}, {}], header declares [{}, {}]",
                root.start(),
                root.end(),
                header.tree_start,
                header.tree_end
            ))));
        }

        info!(
            path = %path.display(),
            nodes = header.node_count,
            depth = header.branch_depth,
            tree_start = header.tree_start,
            tree_end = header.tree_end,
            "opened history tree"
        );

        Ok(tree)
    }

    // ------------------------------------------------------------------
    // Building
    // ------------------------------------------------------------------

    /// Inserts an interval.
    ///
    /// The interval goes to the deepest open node whose start does not
    /// exceed its own; when that node is full the chain is split first.
    pub fn insert(&self, interval: Interval<C::Value>) -> Result<()> {
        let _writer = self.writer.lock();

        if self.is_read_only() {
            return Err(HistreeError::TreeClosed);
        }
        if interval.start() < self.tree_start {
            return Err(HistreeError::IntervalBeforeTreeStart {
                start: interval.start(),
                tree_start: self.tree_start,
            });
        }
        let size = interval.size_on_disk(&self.codec);
        let max = self.layout.max_interval_size();
        if size > max {
            return Err(HistreeError::IntervalTooLarge { size, max });
        }

        let mut pending = interval;
        loop {
            let depth = {
                let branch = self.branch.read();
                let depth = branch.home_depth(pending.start());
                let end = pending.end();
                let mut node = branch.nodes[depth].node.write();
                match node.try_add(pending, size)? {
                    None => {
                        self.tree_end.fetch_max(end, Ordering::AcqRel);
                        return Ok(());
                    }
                    Some(rejected) => {
                        pending = rejected;
                        depth
                    }
                }
            };

            let new_start = self
                .policy
                .new_branch_start(self.tree_end(), depth, pending.start());
            self.add_sibling(depth, new_start)?;
        }
    }

    /// Seals the whole open chain at `end_time`, writes the file header and
    /// switches the tree to read-only mode.
    pub fn close(&self, end_time: i64) -> Result<()> {
        let _writer = self.writer.lock();

        if self.is_read_only() {
            return Err(HistreeError::TreeClosed);
        }
        let tree_end = self.tree_end();
        if end_time < tree_end {
            return Err(HistreeError::CloseBeforeTreeEnd {
                requested: end_time,
                tree_end,
            });
        }

        let mut branch = self.branch.write();
        self.tree_end.store(end_time, Ordering::Release);
        self.close_branch(&branch, 0, end_time)?;
        branch.depth = branch.nodes.len();
        branch.nodes.clear();

        let header = TreeHeader {
            magic: self.policy.magic_number(),
            file_version: self.policy.file_version(),
            provider_version: self.provider_version,
            block_size: self.layout.block_size as u32,
            max_children: self.layout.max_children as u32,
            node_count: self.node_count(),
            root_seq: branch.root_seq,
            tree_start: self.tree_start,
            tree_end: end_time,
            branch_depth: branch.depth as u32,
            checksum: 0,
        }
        .seal();
        self.file.write_header(&header.to_bytes())?;
        self.file.flush()?;
        self.read_only.store(true, Ordering::Release);

        info!(
            path = %self.file.path().display(),
            nodes = header.node_count,
            depth = header.branch_depth,
            tree_end = end_time,
            "closed history tree"
        );
        Ok(())
    }

    /// Releases the tree and removes its file.
    pub fn delete_file(&self) -> Result<()> {
        let _writer = self.writer.lock();
        self.read_only.store(true, Ordering::Release);
        self.branch.write().nodes.clear();
        self.cache.clear();
        self.file.delete()?;
        info!(path = %self.file.path().display(), "deleted history file");
        Ok(())
    }

    /// Allocates the next sequence number and creates an empty node.
    fn new_node(&self, node_type: NodeType, parent: Option<u32>, start: i64) -> Node<C::Value> {
        let seq = self.node_count.fetch_add(1, Ordering::AcqRel);
        self.policy
            .create_node(node_type, seq, parent, start, self.layout)
    }

    /// Adds a sibling to the node at `depth`, walking up while the parent
    /// cannot take another child.
    fn add_sibling(&self, depth: usize, new_start: i64) -> Result<()> {
        let mut branch = self.branch.write();
        let split_time = self.tree_end();

        let mut depth = depth;
        loop {
            if depth == 0 {
                return self.add_new_root(&mut branch, new_start, split_time);
            }
            let parent = branch.nodes[depth - 1].node.read();
            if parent.child_count() < self.layout.max_children && parent.start() <= new_start {
                break;
            }
            depth -= 1;
        }

        self.close_branch(&branch, depth, split_time)?;

        // Each new node joins the chain before its parent links it.
        for i in depth..branch.nodes.len() {
            let parent_seq = branch.nodes[i - 1].seq;
            let node = self.new_node(branch.nodes[i].node_type, Some(parent_seq), new_start);
            let seq = node.seq();
            branch.nodes[i] = OpenSlot::new(node);
            branch.nodes[i - 1].node.write().link_child(seq, new_start)?;
        }

        debug!(depth, split_time, new_start, nodes = self.node_count(), "split open branch");
        Ok(())
    }

    /// Replaces the open chain with a taller one under a new root.
    fn add_new_root(
        &self,
        branch: &mut Branch<C::Value>,
        new_start: i64,
        split_time: i64,
    ) -> Result<()> {
        let depth = branch.nodes.len();
        let mut new_root = self.new_node(NodeType::Core, None, self.tree_start);

        let old_root_seq = branch.nodes[0].seq;
        let old_root_start = branch.nodes[0].start;
        branch.nodes[0].node.write().set_parent(new_root.seq());

        self.close_branch(branch, 0, split_time)?;
        new_root.link_child(old_root_seq, old_root_start)?;

        let root_seq = new_root.seq();
        branch.nodes.clear();
        branch.nodes.push(OpenSlot::new(new_root));

        for i in 1..=depth {
            let node_type = if i < depth {
                NodeType::Core
            } else {
                NodeType::Leaf
            };
            let parent_seq = branch.nodes[i - 1].seq;
            let node = self.new_node(node_type, Some(parent_seq), new_start);
            let seq = node.seq();
            branch.nodes.push(OpenSlot::new(node));
            branch.nodes[i - 1].node.write().link_child(seq, new_start)?;
        }

        branch.root_seq = root_seq;
        branch.depth = depth + 1;

        debug!(
            root = root_seq,
            depth = depth + 1,
            split_time,
            new_start,
            "added new root"
        );
        Ok(())
    }

    /// Seals the chain from the leaf up to `shallowest` and persists it.
    ///
    /// The sealed nodes stay in the chain; the caller replaces them.
    fn close_branch(&self, branch: &Branch<C::Value>, shallowest: usize, end: i64) -> Result<()> {
        for slot in branch.nodes[shallowest..].iter().rev() {
            let sealed = {
                let mut node = slot.node.write();
                node.seal(end)?;
                node.clone()
            };
            self.persist(sealed)?;
        }
        Ok(())
    }

    /// Writes a sealed node to disk and publishes it in the cache.
    fn persist(&self, node: Node<C::Value>) -> Result<()> {
        let block = node.encode(&self.codec)?;
        self.file.write_block(node.seq(), &block)?;
        self.cache.insert(node.seq(), Arc::new(node));
        Ok(())
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Returns every interval intersecting `range`.
    ///
    /// The range is clipped to the tree coverage; a range entirely outside
    /// it yields an empty result.
    pub fn query(&self, range: TimeRange) -> Result<Vec<Interval<C::Value>>> {
        self.query_filtered(range, |_| true)
    }

    /// Returns the intervals intersecting `range` that pass `filter`.
    pub fn query_filtered<F>(&self, range: TimeRange, filter: F) -> Result<Vec<Interval<C::Value>>>
    where
        F: Fn(&Interval<C::Value>) -> bool,
    {
        let mut results = Vec::new();
        let Some(range) = range.clip(self.tree_start, self.tree_end()) else {
            return Ok(results);
        };

        let mut pending = vec![self.root_seq()];
        while let Some(seq) = pending.pop() {
            let handle = self.fetch(seq)?;
            handle.with(|node| {
                node.query_intervals(&range, &filter, &mut results);
                if node.is_core() {
                    pending.extend(node.select_children(&self.policy, &range));
                }
            });
        }
        Ok(results)
    }

    /// Returns every interval containing `t`.
    pub fn query_at(&self, t: i64) -> Result<Vec<Interval<C::Value>>> {
        self.query(TimeRange::singleton(t))
    }

    /// Returns the interval of `quark` containing `t`, if any.
    pub fn value_at(&self, quark: u32, t: i64) -> Result<Option<Interval<C::Value>>> {
        let found = self.query_filtered(TimeRange::singleton(t), |i| i.quark() == quark)?;
        Ok(found.into_iter().next())
    }

    /// Returns the state of every attribute at `t`, keyed by quark.
    pub fn full_state_at(&self, t: i64) -> Result<BTreeMap<u32, Interval<C::Value>>> {
        let mut state = BTreeMap::new();
        for interval in self.query_at(t)? {
            state.entry(interval.quark()).or_insert(interval);
        }
        Ok(state)
    }

    /// Looks a node up in the open chain, then the cache, then the file.
    fn fetch(&self, seq: u32) -> Result<NodeHandle<C::Value>> {
        {
            let branch = self.branch.read();
            if let Some(slot) = branch.nodes.iter().find(|slot| slot.seq == seq) {
                return Ok(NodeHandle::Open(Arc::clone(&slot.node)));
            }
        }
        self.fetch_sealed(seq).map(NodeHandle::Sealed)
    }

    /// Returns a sealed node from the cache, reading it from disk on a miss.
    fn fetch_sealed(&self, seq: u32) -> Result<Arc<Node<C::Value>>> {
        if let Some(node) = self.cache.get(seq) {
            return Ok(node);
        }
        if seq >= self.node_count() {
            return Err(HistreeError::NodeNotFound { seq });
        }

        let block = self.file.read_block(seq)?;
        let node = Node::decode(&block, self.layout, &self.codec)?;
        if node.seq() != seq {
            return Err(HistreeError::NodeCorrupted {
                seq,
                reason: format!("block holds node #{}", node.seq()),
            });
        }
        Ok(self.cache.insert(seq, Arc::new(node)))
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    /// Returns a snapshot of node `seq`.
    pub fn read_node(&self, seq: u32) -> Result<Arc<Node<C::Value>>> {
        match self.fetch(seq)? {
            NodeHandle::Open(node) => Ok(Arc::new(node.read().clone())),
            NodeHandle::Sealed(node) => Ok(node),
        }
    }

    /// Returns the sequence numbers of the open chain, root first.
    ///
    /// Empty once the tree is read-only.
    pub fn latest_branch(&self) -> Vec<u32> {
        self.branch.read().nodes.iter().map(|slot| slot.seq).collect()
    }

    /// Returns the number of nodes.
    pub fn node_count(&self) -> u32 {
        self.node_count.load(Ordering::Acquire)
    }

    /// Returns the height of the tree.
    pub fn depth(&self) -> usize {
        self.branch.read().depth
    }

    /// Returns the root sequence number.
    pub fn root_seq(&self) -> u32 {
        self.branch.read().root_seq
    }

    /// Returns the earliest instant of the tree.
    pub fn tree_start(&self) -> i64 {
        self.tree_start
    }

    /// Returns the latest committed end time.
    pub fn tree_end(&self) -> i64 {
        self.tree_end.load(Ordering::Acquire)
    }

    /// Returns true once the tree no longer accepts inserts.
    pub fn is_read_only(&self) -> bool {
        self.read_only.load(Ordering::Acquire)
    }

    /// Returns the provider version stamped in the tree.
    pub fn provider_version(&self) -> i32 {
        self.provider_version
    }

    /// Returns the node geometry.
    pub fn layout(&self) -> NodeLayout {
        self.layout
    }

    /// Returns the path of the tree file.
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Returns the size of the tree file in bytes.
    pub fn file_size(&self) -> Result<u64> {
        self.file.file_size()
    }

    /// Returns node cache statistics.
    pub fn cache_stats(&self) -> &CacheStats {
        self.cache.stats()
    }

    /// Walks every node and verifies the structural invariants.
    ///
    /// Checks node fit, parent links, interval containment and ordering,
    /// and that each child covers exactly the range its parent assigns to
    /// it under the branch policy. Meant for quiescent trees.
    pub fn check_integrity(&self) -> Result<()> {
        let inconsistent = |msg: String| Err(HistreeError::InconsistentTree(msg));

        let root = self.read_node(self.root_seq())?;
        if let Some(parent) = root.parent() {
            return inconsistent(format!("root #{} has parent #{}", root.seq(), parent));
        }
        if root.start() != self.tree_start {
            return inconsistent(format!(
                "root starts at {}, tree starts at {}",
                root.start(),
                self.tree_start
            ));
        }

        let mut visited = 0u32;
        let mut pending = vec![root];
        while let Some(node) = pending.pop() {
            visited += 1;
            self.check_node(&node)?;

            for (i, child_ref) in node.children().iter().enumerate() {
                let child = self.read_node(child_ref.seq)?;
                let assigned_end = self.policy.child_end(node.children(), i, node.end());

                if child.parent() != Some(node.seq()) {
                    return inconsistent(format!(
                        "node #{} is linked from #{} but names parent {:?}",
                        child.seq(),
                        node.seq(),
                        child.parent()
                    ));
                }
                if child.start() != child_ref.start || child.start() < node.start() {
                    return inconsistent(format!(
                        "node #{} starts at {}, parent #{} records {}",
                        child.seq(),
                        child.start(),
                        node.seq(),
                        child_ref.start
                    ));
                }
                if child.end() != assigned_end {
                    return inconsistent(format!(
                        "node #{} ends at {}, parent #{} assigns it up to {}",
                        child.seq(),
                        child.end(),
                        node.seq(),
                        assigned_end
                    ));
                }
                pending.push(child);
            }
        }

        if visited != self.node_count() {
            return inconsistent(format!(
                "reached {} nodes, tree holds {}",
                visited,
                self.node_count()
            ));
        }
        Ok(())
    }

    fn check_node(&self, node: &Node<C::Value>) -> Result<()> {
        let block = node.encode(&self.codec)?;
        if block.len() != self.layout.block_size || node.used_size() > self.layout.block_size {
            return Err(HistreeError::InconsistentTree(format!(
                "node #{} does not fit its block",
                node.seq()
            )));
        }

        let mut previous: Option<(i64, i64)> = None;
        for interval in node.intervals() {
            if interval.start() < node.start() || interval.end() > node.end() {
                return Err(HistreeError::InconsistentTree(format!(
                    "node #{} [{}, {}] holds interval [{}, {}]",
                    node.seq(),
                    node.start(),
                    node.end(),
                    interval.start(),
                    interval.end()
                )));
            }
            let key = (interval.end(), interval.start());
            if previous.is_some_and(|p| p > key) {
                return Err(HistreeError::InconsistentTree(format!(
                    "node #{} intervals are not sorted by end time",
                    node.seq()
                )));
            }
            previous = Some(key);
        }
        Ok(())
    }
}

impl<C: IntervalCodec, P: BranchPolicy> std::fmt::Display for HistoryTree<C, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "History tree {}", self.path().display())?;
        writeln!(f, "Block size: {}", self.layout.block_size)?;
        writeln!(f, "Max children per node: {}", self.layout.max_children)?;
        writeln!(f, "Number of nodes: {}", self.node_count())?;
        writeln!(f, "Depth of the tree: {}", self.depth())?;
        writeln!(f, "Time range: [{}, {}]", self.tree_start, self.tree_end())?;
        write!(f, "Root node: #{}", self.root_seq())?;
        if let Some(leaf) = self.latest_branch().last() {
            write!(f, "\nLatest leaf: #{}", leaf)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{I64Codec, StateValue, StateValueCodec};
    use tempfile::tempdir;

    /// Encoded size of an `I64Codec` interval.
    const INTERVAL_SIZE: usize = 28;

    fn create_small_tree(
        max_children: usize,
        tree_start: i64,
    ) -> (HistoryTree<I64Codec>, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let config = TreeConfig::new(dir.path().join("tree.ht"))
            .with_block_size(4096)
            .with_max_children(max_children)
            .with_tree_start(tree_start)
            .with_cache_nodes(16)
            .with_fsync(false);
        let tree = HistoryTree::create(config, I64Codec, ClassicPolicy).unwrap();
        (tree, dir)
    }

    fn interval(start: i64, end: i64) -> Interval<i64> {
        Interval::new(0, start, end, start).unwrap()
    }

    /// Fills the latest leaf with `[t, t + 1]` intervals, returning the next time.
    fn fill_latest_leaf(tree: &HistoryTree<I64Codec>, mut time: i64) -> i64 {
        let leaf = *tree.latest_branch().last().unwrap();
        let mut free = tree.read_node(leaf).unwrap().free_space();
        while free >= INTERVAL_SIZE {
            tree.insert(interval(time, time + 1)).unwrap();
            time += 2;
            free -= INTERVAL_SIZE;
        }
        time
    }

    #[test]
    fn test_new_tree() {
        let (tree, _dir) = create_small_tree(3, 10);
        assert_eq!(tree.node_count(), 1);
        assert_eq!(tree.depth(), 1);
        assert_eq!(tree.root_seq(), 0);
        assert_eq!(tree.latest_branch(), vec![0]);
        assert_eq!(tree.tree_start(), 10);
        assert_eq!(tree.tree_end(), 10);
        assert!(!tree.is_read_only());
        assert!(tree.query(TimeRange::new(0, 100).unwrap()).unwrap().is_empty());
    }

    #[test]
    fn test_depth_growth() {
        let (tree, _dir) = create_small_tree(3, 0);

        let mut time = fill_latest_leaf(&tree, 1);
        assert_eq!(tree.node_count(), 1);
        assert_eq!(tree.depth(), 1);

        // Overflowing the only leaf adds a sibling under a new root
        tree.insert(interval(time, time + 1)).unwrap();
        time += 2;
        assert_eq!(tree.node_count(), 3);
        assert_eq!(tree.depth(), 2);

        time = fill_latest_leaf(&tree, time);
        tree.insert(interval(time, time + 1)).unwrap();
        time += 2;
        assert_eq!(tree.node_count(), 4);
        assert_eq!(tree.depth(), 2);

        // The root is full, so the next split grows a new level
        time = fill_latest_leaf(&tree, time);
        tree.insert(interval(time, time + 1)).unwrap();
        time += 2;
        assert_eq!(tree.node_count(), 7);
        assert_eq!(tree.depth(), 3);

        while tree.depth() < 4 {
            time = fill_latest_leaf(&tree, time);
            tree.insert(interval(time, time + 1)).unwrap();
            time += 2;
        }
        assert_eq!(tree.depth(), 4);

        tree.check_integrity().unwrap();
        tree.close(tree.tree_end()).unwrap();
        tree.check_integrity().unwrap();
    }

    #[test]
    fn test_node_sequence_numbers() {
        let (tree, _dir) = create_small_tree(2, 0);

        let mut time = fill_latest_leaf(&tree, 1);
        assert_eq!(tree.latest_branch(), vec![0]);
        assert_eq!(tree.read_node(0).unwrap().parent(), None);

        tree.insert(interval(time, time + 1)).unwrap();
        time = fill_latest_leaf(&tree, time + 2);
        assert_eq!(tree.node_count(), 3);
        assert_eq!(tree.depth(), 2);

        let first = tree.read_node(0).unwrap();
        assert_eq!(first.parent(), Some(1));
        assert!(first.is_sealed());

        assert_eq!(tree.latest_branch(), vec![1, 2]);
        assert_eq!(tree.read_node(1).unwrap().parent(), None);
        assert_eq!(tree.read_node(2).unwrap().parent(), Some(1));

        tree.insert(interval(time, time + 1)).unwrap();
        fill_latest_leaf(&tree, time + 2);
        assert_eq!(tree.node_count(), 6);
        assert_eq!(tree.depth(), 3);

        assert_eq!(tree.read_node(0).unwrap().parent(), Some(1));
        assert_eq!(tree.read_node(1).unwrap().parent(), Some(3));
        assert_eq!(tree.read_node(2).unwrap().parent(), Some(1));

        assert_eq!(tree.latest_branch(), vec![3, 4, 5]);
        assert_eq!(tree.read_node(3).unwrap().parent(), None);
        assert_eq!(tree.read_node(4).unwrap().parent(), Some(3));
        assert_eq!(tree.read_node(5).unwrap().parent(), Some(4));

        tree.close(tree.tree_end()).unwrap();
        tree.check_integrity().unwrap();
    }

    #[test]
    fn test_siblings_are_contiguous() {
        let (tree, _dir) = create_small_tree(3, 0);
        let mut time = 1;
        for _ in 0..2 {
            time = fill_latest_leaf(&tree, time);
            tree.insert(interval(time, time + 1)).unwrap();
            time += 2;
        }

        let root = tree.read_node(tree.root_seq()).unwrap();
        assert_eq!(root.child_count(), 3);
        let children = root.children();
        for pair in children.windows(2) {
            let sealed = tree.read_node(pair[0].seq).unwrap();
            assert!(sealed.is_sealed());
            assert_eq!(sealed.end() + 1, pair[1].start);
        }
    }

    #[test]
    fn test_insert_before_tree_start() {
        let (tree, _dir) = create_small_tree(3, 100);
        assert!(matches!(
            tree.insert(interval(99, 200)),
            Err(HistreeError::IntervalBeforeTreeStart {
                start: 99,
                tree_start: 100
            })
        ));
    }

    #[test]
    fn test_insert_too_large() {
        let dir = tempdir().unwrap();
        let config = TreeConfig::new(dir.path().join("big.ht"))
            .with_block_size(4096)
            .with_max_children(10)
            .with_fsync(false);
        let tree = HistoryTree::create(config, StateValueCodec, ClassicPolicy).unwrap();

        let value = StateValue::Str("x".repeat(5000));
        let big = Interval::new(0, 0, 1, value).unwrap();
        assert!(matches!(
            tree.insert(big),
            Err(HistreeError::IntervalTooLarge { max, .. }) if max == 4096 - 29 - 124
        ));
        assert_eq!(tree.node_count(), 1);
    }

    #[test]
    fn test_early_interval_goes_to_ancestor() {
        let (tree, _dir) = create_small_tree(3, 0);
        let time = fill_latest_leaf(&tree, 1);
        tree.insert(interval(time, time + 1)).unwrap();

        // Starts before the new leaf, so only the root can hold it
        let early = Interval::new(7, 2, time + 1, -1).unwrap();
        tree.insert(early.clone()).unwrap();

        let root = tree.read_node(tree.root_seq()).unwrap();
        assert!(root.is_core());
        assert_eq!(root.intervals(), &[early.clone()]);

        assert_eq!(tree.value_at(7, 3).unwrap(), Some(early.clone()));
        assert_eq!(tree.value_at(7, time + 1).unwrap(), Some(early));
        tree.check_integrity().unwrap();
    }

    #[test]
    fn test_query_clipping() {
        let (tree, _dir) = create_small_tree(3, 0);
        for t in 0..100 {
            tree.insert(interval(t * 10, t * 10 + 9)).unwrap();
        }
        assert_eq!(tree.tree_end(), 999);

        let after = TimeRange::new(2000, 3000).unwrap();
        assert!(tree.query(after).unwrap().is_empty());

        let partial = TimeRange::new(990, 5000).unwrap();
        let found = tree.query(partial).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].start(), 990);
    }

    #[test]
    fn test_point_helpers() {
        let (tree, _dir) = create_small_tree(3, 0);
        tree.insert(Interval::new(1, 0, 10, 100).unwrap()).unwrap();
        tree.insert(Interval::new(2, 0, 15, 200).unwrap()).unwrap();
        tree.insert(Interval::new(1, 11, 30, 101).unwrap()).unwrap();

        let at_5 = tree.full_state_at(5).unwrap();
        assert_eq!(at_5.len(), 2);
        assert_eq!(*at_5[&1].value(), 100);
        assert_eq!(*at_5[&2].value(), 200);

        let at_20 = tree.full_state_at(20).unwrap();
        assert_eq!(at_20.len(), 1);
        assert_eq!(*at_20[&1].value(), 101);

        assert_eq!(tree.value_at(2, 20).unwrap(), None);
        assert_eq!(tree.query_at(11).unwrap().len(), 2);
    }

    #[test]
    fn test_query_filtered() {
        let (tree, _dir) = create_small_tree(3, 0);
        for t in 0..50 {
            tree.insert(Interval::new((t % 5) as u32, t, t, t).unwrap()).unwrap();
        }
        let range = TimeRange::new(0, 49).unwrap();
        let found = tree.query_filtered(range, |i| i.quark() == 3).unwrap();
        assert_eq!(found.len(), 10);
        assert!(found.iter().all(|i| i.quark() == 3));
    }

    #[test]
    fn test_close() {
        let (tree, _dir) = create_small_tree(3, 0);
        let time = fill_latest_leaf(&tree, 1);
        tree.insert(interval(time, time + 1)).unwrap();

        assert!(matches!(
            tree.close(5),
            Err(HistreeError::CloseBeforeTreeEnd { requested: 5, .. })
        ));

        let end = tree.tree_end() + 50;
        tree.close(end).unwrap();
        assert!(tree.is_read_only());
        assert!(tree.latest_branch().is_empty());
        assert_eq!(tree.depth(), 2);
        assert_eq!(tree.tree_end(), end);
        assert_eq!(tree.read_node(tree.root_seq()).unwrap().end(), end);
        assert_eq!(
            tree.file_size().unwrap(),
            (TREE_HEADER_SIZE + 3 * 4096) as u64
        );

        assert!(matches!(
            tree.insert(interval(end + 1, end + 2)),
            Err(HistreeError::TreeClosed)
        ));
        assert!(matches!(tree.close(end), Err(HistreeError::TreeClosed)));

        // Still queryable from disk and cache
        assert_eq!(tree.query_at(1).unwrap().len(), 1);
        tree.check_integrity().unwrap();
    }

    #[test]
    fn test_close_empty_tree() {
        let (tree, dir) = create_small_tree(3, 0);
        tree.close(0).unwrap();

        let reopened: HistoryTree<I64Codec> =
            HistoryTree::open(dir.path().join("tree.ht"), 0, I64Codec, ClassicPolicy, 8).unwrap();
        assert_eq!(reopened.node_count(), 1);
        assert!(reopened.query_at(0).unwrap().is_empty());
    }

    #[test]
    fn test_read_node_not_found() {
        let (tree, _dir) = create_small_tree(3, 0);
        assert!(matches!(
            tree.read_node(5),
            Err(HistreeError::NodeNotFound { seq: 5 })
        ));
    }

    #[test]
    fn test_delete_file() {
        let (tree, _dir) = create_small_tree(3, 0);
        let path = tree.path().to_path_buf();
        tree.insert(interval(0, 1)).unwrap();
        assert!(path.exists());

        tree.delete_file().unwrap();
        assert!(!path.exists());
        assert!(tree.is_read_only());
        assert!(matches!(
            tree.insert(interval(2, 3)),
            Err(HistreeError::TreeClosed)
        ));
    }

    #[test]
    fn test_display() {
        let (tree, _dir) = create_small_tree(3, 0);
        let text = tree.to_string();
        assert!(text.contains("Block size: 4096"));
        assert!(text.contains("Max children per node: 3"));
        assert!(text.contains("Number of nodes: 1"));
        assert!(text.contains("Latest leaf: #0"));
    }

    #[test]
    fn test_sealed_nodes_served_from_cache() {
        let (tree, _dir) = create_small_tree(3, 0);
        let time = fill_latest_leaf(&tree, 1);
        tree.insert(interval(time, time + 1)).unwrap();

        let before = tree.cache_stats().hits();
        tree.read_node(0).unwrap();
        assert_eq!(tree.cache_stats().hits(), before + 1);
    }
}

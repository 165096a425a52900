use std::collections::{BinaryHeap, HashMap, HashSet};

use strata_codec::ObjectCodec;
use strata_store::ObjectStore;
use strata_types::{CancelToken, StorageRef};
use tracing::debug;

use crate::error::TreeResult;
use crate::node::{Node, TreeRoot};

/// Link from a node to its parent: the parent's arena index and the child
/// slot this node occupies in the parent.
#[derive(Clone, Copy, Debug)]
pub(crate) struct ParentLink {
    pub arena: usize,
    pub index: usize,
}

/// A node held in memory during one operation.
///
/// Back-references are arena indices, so parent/child cycles cost nothing:
/// the whole arena drops with the operation.
#[derive(Debug)]
pub(crate) struct MemNode {
    /// Monotonic id within the operation, for flush-order tie-breaks.
    pub id: u32,
    /// 0 at the root, increasing downward.
    pub depth: u32,
    pub parent: Option<ParentLink>,
    pub node: Node,
    /// Children explicitly touched this operation, by child slot.
    pub loaded_children: HashMap<usize, usize>,
}

/// Per-operation context: the arena of in-memory nodes and the set of
/// nodes awaiting flush.
pub(crate) struct OpContext {
    arena: Vec<MemNode>,
    dirty: HashSet<usize>,
    next_id: u32,
    pub root_idx: usize,
}

impl OpContext {
    /// Start an operation with a copy of the current root node.
    pub fn new(root_node: Node) -> Self {
        let root = MemNode {
            id: 1,
            depth: 0,
            parent: None,
            node: root_node,
            loaded_children: HashMap::new(),
        };
        Self {
            arena: vec![root],
            dirty: HashSet::new(),
            next_id: 1,
            root_idx: 0,
        }
    }

    /// Allocate a fresh node. New nodes are always dirty.
    pub fn new_node(&mut self) -> usize {
        self.next_id += 1;
        let idx = self.arena.len();
        self.arena.push(MemNode {
            id: self.next_id,
            depth: 0,
            parent: None,
            node: Node::default(),
            loaded_children: HashMap::new(),
        });
        self.dirty.insert(idx);
        idx
    }

    pub fn node(&self, idx: usize) -> &MemNode {
        &self.arena[idx]
    }

    pub fn node_mut(&mut self, idx: usize) -> &mut MemNode {
        &mut self.arena[idx]
    }

    /// Queue a node for flushing.
    pub fn mark_dirty(&mut self, idx: usize) {
        self.dirty.insert(idx);
    }

    /// Link `child` under `parent` at child slot `index`.
    pub fn set_parent(&mut self, child: usize, parent: usize, index: usize) {
        let depth = self.arena[parent].depth + 1;
        self.arena[parent].loaded_children.insert(index, child);
        let child_node = &mut self.arena[child];
        child_node.parent = Some(ParentLink {
            arena: parent,
            index,
        });
        child_node.depth = depth;
    }

    /// Take the finished root node payload out of the arena.
    pub fn take_root_node(&mut self) -> Node {
        std::mem::take(&mut self.arena[self.root_idx].node)
    }

    /// Write every dirty node, deepest first, then the root node and the
    /// root record. Returns the new reference to the root record.
    ///
    /// Each flushed node writes its fresh content address into its
    /// parent's `children_refs` and re-queues the parent, so a parent is
    /// persisted only after all of its dirty descendants.
    pub fn flush(
        &mut self,
        cancel: &CancelToken,
        store: &ObjectStore,
        codec: &dyn ObjectCodec,
        tree_root: &mut TreeRoot,
    ) -> TreeResult<StorageRef> {
        let mut queue: BinaryHeap<(u32, u32, usize)> = self
            .dirty
            .iter()
            .map(|&idx| (self.arena[idx].depth, self.arena[idx].id, idx))
            .collect();
        self.dirty.clear();

        let mut flushed: HashSet<usize> = HashSet::new();
        let mut writes = 0usize;

        while let Some((_, _, idx)) = queue.pop() {
            if !flushed.insert(idx) {
                continue;
            }
            let Some(link) = self.arena[idx].parent else {
                // The root is written once, after the drain.
                continue;
            };

            // Sweep child slots left empty by reparenting; the surviving
            // refs are exactly the children that were not touched.
            self.arena[idx].node.children_refs.retain(Option::is_some);

            let (node_ref, _) = store.store_object(cancel, &self.arena[idx].node, codec)?;
            writes += 1;

            self.arena[link.arena].node.children_refs[link.index] = Some(node_ref);
            if !flushed.contains(&link.arena) {
                let parent = &self.arena[link.arena];
                queue.push((parent.depth, parent.id, link.arena));
            }
        }

        let root = &mut self.arena[self.root_idx];
        root.node.children_refs.retain(Option::is_some);
        let (root_node_ref, _) = store.store_object(cancel, &root.node, codec)?;
        tree_root.root_node_ref = root_node_ref;
        let (root_ref, _) = store.store_object(cancel, tree_root, codec)?;

        debug!(nodes = writes + 1, length = tree_root.length, "flushed tree operation");
        Ok(root_ref)
    }
}

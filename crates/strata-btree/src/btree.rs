use std::sync::{Arc, Mutex};

use strata_codec::ObjectCodec;
use strata_store::ObjectStore;
use strata_types::{CancelToken, StorageRef};

use crate::error::{TreeError, TreeResult};
use crate::node::{Item, Node, TreeRoot, MAX_ITEMS};
use crate::op::OpContext;

/// Persistent ordered map from string keys to storage references.
///
/// Every node is a content-addressed object in the backing [`ObjectStore`];
/// a mutation buffers its changes in memory and flushes them bottom-up in
/// one pass, so the previous root reference stays valid until the whole
/// operation has been persisted. Mutations on one tree are serialized; any
/// retained root reference can be re-opened with [`BTree::load`] as an
/// immutable snapshot.
pub struct BTree {
    inner: Mutex<TreeInner>,
}

struct TreeInner {
    store: Arc<ObjectStore>,
    codec: Arc<dyn ObjectCodec>,
    /// Reference to the persisted [`TreeRoot`] record.
    root_ref: StorageRef,
    tree_root: TreeRoot,
    /// The root node, kept loaded between operations.
    root_node: Node,
}

impl BTree {
    /// Build a new empty tree, writing its initial state to the store.
    pub fn new(
        store: Arc<ObjectStore>,
        codec: Arc<dyn ObjectCodec>,
        cancel: &CancelToken,
    ) -> TreeResult<Self> {
        let root_node = Node::default();
        let (root_node_ref, _) = store.store_object(cancel, &root_node, codec.as_ref())?;
        let tree_root = TreeRoot {
            root_node_ref,
            length: 0,
        };
        let (root_ref, _) = store.store_object(cancel, &tree_root, codec.as_ref())?;

        Ok(Self {
            inner: Mutex::new(TreeInner {
                store,
                codec,
                root_ref,
                tree_root,
                root_node,
            }),
        })
    }

    /// Load a tree by following the reference to its root record.
    pub fn load(
        store: Arc<ObjectStore>,
        codec: Arc<dyn ObjectCodec>,
        cancel: &CancelToken,
        root_ref: StorageRef,
    ) -> TreeResult<Self> {
        let tree_root: TreeRoot = store.follow_ref(cancel, &root_ref, codec.as_ref())?;
        let root_node: Node =
            store.follow_ref(cancel, &tree_root.root_node_ref, codec.as_ref())?;

        Ok(Self {
            inner: Mutex::new(TreeInner {
                store,
                codec,
                root_ref,
                tree_root,
                root_node,
            }),
        })
    }

    /// Number of items in the tree.
    pub fn len(&self) -> u64 {
        self.inner.lock().expect("lock poisoned").tree_root.length
    }

    /// Returns `true` if the tree holds no items.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The reference to the current persisted root record.
    pub fn root_ref(&self) -> StorageRef {
        self.inner.lock().expect("lock poisoned").root_ref.clone()
    }

    /// Insert a key/value pair, replacing any existing value for the key.
    ///
    /// Returns the replaced value if the key was already present. An empty
    /// key is silently ignored. On error nothing is persisted and the
    /// previous root reference remains authoritative.
    pub fn replace_or_insert(
        &self,
        cancel: &CancelToken,
        key: &str,
        value: StorageRef,
    ) -> TreeResult<Option<StorageRef>> {
        if key.is_empty() {
            return Ok(None);
        }

        let mut inner = self.inner.lock().expect("lock poisoned");
        let inner = &mut *inner;
        let pre_root = inner.tree_root.clone();

        let mut op = OpContext::new(inner.root_node.clone());
        let item = Item::new(key, value);

        let result = insert_root(inner, &mut op, cancel, item).and_then(|replaced| {
            if replaced.is_none() {
                inner.tree_root.length += 1;
            }
            let root_ref = op.flush(
                cancel,
                &inner.store,
                inner.codec.as_ref(),
                &mut inner.tree_root,
            )?;
            Ok((replaced, root_ref))
        });

        match result {
            Ok((replaced, root_ref)) => {
                inner.root_ref = root_ref;
                inner.root_node = op.take_root_node();
                Ok(replaced.map(|item| item.value))
            }
            Err(e) => {
                // Dirty state is discarded with the arena; the pre-op
                // record stays authoritative.
                inner.tree_root = pre_root;
                Err(e)
            }
        }
    }

    /// Look up the value stored for a key.
    pub fn get(&self, cancel: &CancelToken, key: &str) -> TreeResult<Option<StorageRef>> {
        let inner = self.inner.lock().expect("lock poisoned");
        let mut node = inner.root_node.clone();
        loop {
            let (i, found) = node.find(key);
            if found {
                return Ok(Some(node.items[i].value.clone()));
            }
            if node.is_leaf() {
                return Ok(None);
            }
            let child_ref = node.children_refs[i]
                .clone()
                .ok_or_else(|| TreeError::Corruption(format!("dangling child ref at {i}")))?;
            node = inner
                .store
                .follow_ref(cancel, &child_ref, inner.codec.as_ref())?;
        }
    }

    /// All items in key order.
    pub fn items_in_order(&self, cancel: &CancelToken) -> TreeResult<Vec<Item>> {
        let inner = self.inner.lock().expect("lock poisoned");
        let mut out = Vec::with_capacity(inner.tree_root.length as usize);
        collect_in_order(&inner.store, inner.codec.as_ref(), cancel, &inner.root_node, &mut out)?;
        Ok(out)
    }
}

impl std::fmt::Debug for BTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BTree").field("length", &self.len()).finish()
    }
}

/// Top of the insert: handle the empty tree and a full root, then descend.
fn insert_root(
    inner: &TreeInner,
    op: &mut OpContext,
    cancel: &CancelToken,
    item: Item,
) -> TreeResult<Option<Item>> {
    if inner.tree_root.length == 0 {
        op.node_mut(op.root_idx).node.items.push(item);
        op.mark_dirty(op.root_idx);
        return Ok(None);
    }

    if op.node(op.root_idx).node.items.len() >= MAX_ITEMS {
        let old_root = op.root_idx;
        let (middle, sibling) = split_node(op, old_root, MAX_ITEMS / 2);

        let new_root = op.new_node();
        op.node_mut(new_root).node.items.push(middle);
        op.node_mut(new_root).node.children_refs = vec![None, None];
        op.set_parent(old_root, new_root, 0);
        op.set_parent(sibling, new_root, 1);
        op.mark_dirty(old_root);
        op.mark_dirty(sibling);
        op.root_idx = new_root;
    }

    let root_idx = op.root_idx;
    insert_to_node(inner, op, cancel, root_idx, item)
}

/// Insert an item into the subtree rooted at `n_idx`, keeping every node
/// at or below `MAX_ITEMS` items. Returns the replaced item, if any.
fn insert_to_node(
    inner: &TreeInner,
    op: &mut OpContext,
    cancel: &CancelToken,
    n_idx: usize,
    item: Item,
) -> TreeResult<Option<Item>> {
    // Every node on the descent path is rewritten: its child addresses
    // change when the children below it do.
    op.mark_dirty(n_idx);

    let (mut i, found) = op.node(n_idx).node.find(&item.key);
    if found {
        let slot = &mut op.node_mut(n_idx).node.items[i];
        return Ok(Some(std::mem::replace(slot, item)));
    }

    if op.node(n_idx).node.is_leaf() {
        op.node_mut(n_idx).node.items.insert(i, item);
        return Ok(None);
    }

    let initial = i;
    let mut child = follow_child(inner, op, cancel, n_idx, i)?;

    if maybe_split_child(op, n_idx, child, i) {
        // The middle item of the split landed at position i; pick a side.
        let middle_key = op.node(n_idx).node.items[i].key.clone();
        if item.key > middle_key {
            i += 1;
        } else if item.key == middle_key {
            let slot = &mut op.node_mut(n_idx).node.items[i];
            return Ok(Some(std::mem::replace(slot, item)));
        }
    }

    if i != initial {
        child = follow_child(inner, op, cancel, n_idx, i)?;
    }

    insert_to_node(inner, op, cancel, child, item)
}

/// Split the child at slot `i` of `n_idx` if it is full. Returns whether a
/// split happened.
fn maybe_split_child(op: &mut OpContext, n_idx: usize, child: usize, i: usize) -> bool {
    if op.node(child).node.items.len() < MAX_ITEMS {
        return false;
    }

    let (middle, sibling) = split_node(op, child, MAX_ITEMS / 2);
    op.node_mut(n_idx).node.items.insert(i, middle);
    insert_child_at(op, n_idx, sibling, i + 1);

    op.mark_dirty(child);
    op.mark_dirty(sibling);
    op.mark_dirty(n_idx);
    true
}

/// Split the node at index `i`: the node keeps items `..i` and children
/// `..=i`; a new sibling takes items `i+1..` and children `i+1..`. Returns
/// the middle item and the sibling's arena index.
fn split_node(op: &mut OpContext, n_idx: usize, i: usize) -> (Item, usize) {
    let sibling = op.new_node();

    let n = op.node_mut(n_idx);
    let middle = n.node.items[i].clone();
    let upper_items: Vec<Item> = n.node.items.drain(i..).skip(1).collect();
    let upper_children: Vec<Option<StorageRef>> = if n.node.children_refs.is_empty() {
        Vec::new()
    } else {
        n.node.children_refs.drain(i + 1..).collect()
    };

    // Loaded children right of the split move to the sibling.
    let moved: Vec<(usize, usize)> = n
        .loaded_children
        .iter()
        .filter(|(slot, _)| **slot > i)
        .map(|(slot, child)| (*slot, *child))
        .collect();
    for (slot, _) in &moved {
        op.node_mut(n_idx).loaded_children.remove(slot);
    }

    let s = op.node_mut(sibling);
    s.node.items = upper_items;
    s.node.children_refs = upper_children;

    for (slot, child) in moved {
        op.set_parent(child, sibling, slot - (i + 1));
    }

    (middle, sibling)
}

/// Insert `child` as a fresh child of `n_idx` at slot `i`, shifting the
/// slots of later loaded children.
fn insert_child_at(op: &mut OpContext, n_idx: usize, child: usize, i: usize) {
    let shifted: Vec<(usize, usize)> = op
        .node(n_idx)
        .loaded_children
        .iter()
        .map(|(slot, c)| (*slot, *c))
        .collect();
    op.node_mut(n_idx).loaded_children.clear();
    for (slot, c) in shifted {
        let new_slot = if slot >= i { slot + 1 } else { slot };
        op.set_parent(c, n_idx, new_slot);
    }

    op.node_mut(n_idx).node.children_refs.insert(i, None);
    op.set_parent(child, n_idx, i);
}

/// Resolve the child at slot `i` of `n_idx`, loading it from the store if
/// it has not been touched this operation.
fn follow_child(
    inner: &TreeInner,
    op: &mut OpContext,
    cancel: &CancelToken,
    n_idx: usize,
    i: usize,
) -> TreeResult<usize> {
    if let Some(&child) = op.node(n_idx).loaded_children.get(&i) {
        return Ok(child);
    }

    let child_ref = op
        .node(n_idx)
        .node
        .children_refs
        .get(i)
        .cloned()
        .flatten()
        .ok_or_else(|| TreeError::Corruption(format!("dangling child ref at {i}")))?;

    let node: Node = inner
        .store
        .follow_ref(cancel, &child_ref, inner.codec.as_ref())?;
    let child = op.new_node();
    op.node_mut(child).node = node;
    op.set_parent(child, n_idx, i);
    Ok(child)
}

/// Depth-first in-order walk over the persisted tree.
fn collect_in_order(
    store: &ObjectStore,
    codec: &dyn ObjectCodec,
    cancel: &CancelToken,
    node: &Node,
    out: &mut Vec<Item>,
) -> TreeResult<()> {
    if node.is_leaf() {
        out.extend(node.items.iter().cloned());
        return Ok(());
    }

    for (i, item) in node.items.iter().enumerate() {
        let child = follow_node(store, codec, cancel, &node.children_refs, i)?;
        collect_in_order(store, codec, cancel, &child, out)?;
        out.push(item.clone());
    }
    let last = follow_node(store, codec, cancel, &node.children_refs, node.items.len())?;
    collect_in_order(store, codec, cancel, &last, out)
}

fn follow_node(
    store: &ObjectStore,
    codec: &dyn ObjectCodec,
    cancel: &CancelToken,
    children: &[Option<StorageRef>],
    i: usize,
) -> TreeResult<Node> {
    let child_ref = children
        .get(i)
        .and_then(Option::as_ref)
        .ok_or_else(|| TreeError::Corruption(format!("dangling child ref at {i}")))?;
    Ok(store.follow_ref(cancel, child_ref, codec)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_codec::PlainCodec;
    use strata_db::MemoryDb;
    use strata_store::{LocalDb, MemoryRemoteStore, RemoteStore};
    use strata_types::Digest;

    fn never() -> CancelToken {
        CancelToken::never()
    }

    fn local_tree() -> BTree {
        let store = Arc::new(ObjectStore::new(
            LocalDb::new(Arc::new(MemoryDb::new())),
            None,
        ));
        BTree::new(store, Arc::new(PlainCodec), &never()).unwrap()
    }

    fn remote_tree() -> BTree {
        let remote: Arc<dyn RemoteStore> = Arc::new(MemoryRemoteStore::new());
        let store = Arc::new(ObjectStore::new(
            LocalDb::new(Arc::new(MemoryDb::new())),
            Some(remote),
        ));
        BTree::new(store, Arc::new(PlainCodec), &never()).unwrap()
    }

    fn value_for(key: &str) -> StorageRef {
        StorageRef::local(Digest::compute(key.as_bytes()))
    }

    // -----------------------------------------------------------------------
    // Basic insert / replace / get
    // -----------------------------------------------------------------------

    #[test]
    fn new_tree_is_empty() {
        let tree = local_tree();
        assert_eq!(tree.len(), 0);
        assert!(tree.is_empty());
        assert!(!tree.root_ref().is_null());
    }

    #[test]
    fn insert_then_get() {
        let tree = local_tree();
        let replaced = tree
            .replace_or_insert(&never(), "test", value_for("test"))
            .unwrap();
        assert!(replaced.is_none());
        assert_eq!(tree.len(), 1);

        let got = tree.get(&never(), "test").unwrap();
        assert_eq!(got, Some(value_for("test")));
    }

    #[test]
    fn insert_same_key_replaces_and_returns_old_value() {
        let tree = local_tree();
        tree.replace_or_insert(&never(), "test", value_for("v1"))
            .unwrap();
        let replaced = tree
            .replace_or_insert(&never(), "test", value_for("v2"))
            .unwrap();
        assert_eq!(replaced, Some(value_for("v1")));
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.get(&never(), "test").unwrap(), Some(value_for("v2")));
    }

    #[test]
    fn empty_key_is_a_silent_noop() {
        let tree = local_tree();
        let replaced = tree
            .replace_or_insert(&never(), "", value_for("x"))
            .unwrap();
        assert!(replaced.is_none());
        assert_eq!(tree.len(), 0);
    }

    #[test]
    fn get_missing_key_returns_none() {
        let tree = local_tree();
        tree.replace_or_insert(&never(), "present", StorageRef::null())
            .unwrap();
        assert!(tree.get(&never(), "absent").unwrap().is_none());
    }

    #[test]
    fn null_values_are_storable() {
        let tree = local_tree();
        tree.replace_or_insert(&never(), "k", StorageRef::null())
            .unwrap();
        assert_eq!(tree.get(&never(), "k").unwrap(), Some(StorageRef::null()));
    }

    // -----------------------------------------------------------------------
    // Splits
    // -----------------------------------------------------------------------

    #[test]
    fn root_splits_at_the_fourth_insert() {
        let tree = local_tree();
        for key in ["a", "b", "c"] {
            tree.replace_or_insert(&never(), key, StorageRef::null())
                .unwrap();
        }
        assert_eq!(tree.len(), 3);
        // The fourth insert forces the full root to split.
        tree.replace_or_insert(&never(), "d", StorageRef::null())
            .unwrap();
        assert_eq!(tree.len(), 4);
        for key in ["a", "b", "c", "d"] {
            assert!(tree.get(&never(), key).unwrap().is_some(), "lost {key}");
        }
    }

    #[test]
    fn every_value_survives_many_splits() {
        let tree = local_tree();
        // Two-character keys in a shuffled order force deep splits.
        let keys: Vec<String> = "hcbgfadeijqponmlkrstzyxwvu"
            .chars()
            .map(|c| format!("k{c}"))
            .collect();
        for key in &keys {
            tree.replace_or_insert(&never(), key, value_for(key)).unwrap();
        }
        assert_eq!(tree.len(), keys.len() as u64);
        for key in &keys {
            assert_eq!(tree.get(&never(), key).unwrap(), Some(value_for(key)));
        }
    }

    #[test]
    fn replace_during_descent_after_child_split() {
        let tree = local_tree();
        for key in ["a", "b", "c", "d", "e", "f", "g"] {
            tree.replace_or_insert(&never(), key, value_for(key)).unwrap();
        }
        // Replacing keys that sit at split positions must still return old
        // values and not bump the length.
        let len = tree.len();
        for key in ["a", "d", "g"] {
            let replaced = tree
                .replace_or_insert(&never(), key, value_for("new"))
                .unwrap();
            assert_eq!(replaced, Some(value_for(key)));
        }
        assert_eq!(tree.len(), len);
    }

    // -----------------------------------------------------------------------
    // Ordered iteration (end-to-end)
    // -----------------------------------------------------------------------

    #[test]
    fn in_order_traversal_is_sorted() {
        let tree = remote_tree();
        let keys = ["m", "b", "t", "a", "k", "p", "z", "c", "e", "q"];
        for key in keys {
            tree.replace_or_insert(&never(), key, StorageRef::null())
                .unwrap();
        }
        assert_eq!(tree.len(), 10);

        let items = tree.items_in_order(&never()).unwrap();
        let got: Vec<&str> = items.iter().map(|item| item.key.as_str()).collect();

        let mut sorted = keys.to_vec();
        sorted.sort_unstable();
        assert_eq!(got, sorted);
    }

    #[test]
    fn node_occupancy_invariant_holds() {
        let tree = local_tree();
        for key in ["m", "b", "t", "a", "k", "p", "z", "c", "e", "q"] {
            tree.replace_or_insert(&never(), key, StorageRef::null())
                .unwrap();
        }

        // Walk the persisted tree and check every non-root node's size.
        let inner = tree.inner.lock().expect("lock poisoned");
        fn walk(
            store: &ObjectStore,
            codec: &dyn ObjectCodec,
            node: &Node,
            is_root: bool,
        ) {
            if !is_root {
                assert!(
                    (1..=MAX_ITEMS).contains(&node.items.len()),
                    "node has {} items",
                    node.items.len()
                );
            }
            if !node.is_leaf() {
                assert_eq!(node.children_refs.len(), node.items.len() + 1);
                for child_ref in &node.children_refs {
                    let child: Node = store
                        .follow_ref(&CancelToken::never(), child_ref.as_ref().unwrap(), codec)
                        .unwrap();
                    walk(store, codec, &child, false);
                }
            }
            // Keys strictly sorted within the node.
            for pair in node.items.windows(2) {
                assert!(pair[0].key < pair[1].key);
            }
        }
        walk(&inner.store, inner.codec.as_ref(), &inner.root_node, true);
    }

    // -----------------------------------------------------------------------
    // Persistence / snapshots
    // -----------------------------------------------------------------------

    #[test]
    fn load_reopens_a_persisted_tree() {
        let remote: Arc<dyn RemoteStore> = Arc::new(MemoryRemoteStore::new());
        let store = Arc::new(ObjectStore::new(
            LocalDb::new(Arc::new(MemoryDb::new())),
            Some(remote),
        ));
        let codec: Arc<dyn ObjectCodec> = Arc::new(PlainCodec);

        let tree = BTree::new(store.clone(), codec.clone(), &never()).unwrap();
        for key in ["x", "y", "z"] {
            tree.replace_or_insert(&never(), key, value_for(key)).unwrap();
        }
        let root_ref = tree.root_ref();

        let reopened = BTree::load(store, codec, &never(), root_ref).unwrap();
        assert_eq!(reopened.len(), 3);
        assert_eq!(reopened.get(&never(), "y").unwrap(), Some(value_for("y")));
    }

    #[test]
    fn old_root_ref_is_an_immutable_snapshot() {
        let store = Arc::new(ObjectStore::new(
            LocalDb::new(Arc::new(MemoryDb::new())),
            None,
        ));
        let codec: Arc<dyn ObjectCodec> = Arc::new(PlainCodec);

        let tree = BTree::new(store.clone(), codec.clone(), &never()).unwrap();
        tree.replace_or_insert(&never(), "a", value_for("a")).unwrap();
        let snapshot_ref = tree.root_ref();

        tree.replace_or_insert(&never(), "b", value_for("b")).unwrap();

        let snapshot = BTree::load(store, codec, &never(), snapshot_ref).unwrap();
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.get(&never(), "b").unwrap().is_none());
        assert_eq!(tree.len(), 2);
    }

    #[test]
    fn cancelled_token_fails_and_preserves_state() {
        let tree = local_tree();
        tree.replace_or_insert(&never(), "a", value_for("a")).unwrap();
        let root_before = tree.root_ref();

        let token = CancelToken::new();
        token.cancel();
        assert!(tree.replace_or_insert(&token, "b", value_for("b")).is_err());

        assert_eq!(tree.len(), 1);
        assert_eq!(tree.root_ref(), root_before);
        assert!(tree.get(&never(), "b").unwrap().is_none());
    }
}

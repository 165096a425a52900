use serde::{Deserialize, Serialize};
use strata_codec::TypedObject;
use strata_types::StorageRef;

/// Branching factor `t`. Nodes hold at most `2t - 1` items.
pub const DEGREE: usize = 2;

/// Maximum number of items per node.
pub const MAX_ITEMS: usize = DEGREE * 2 - 1;

/// One key/value pair in a node. Values are storage references; the null
/// reference is a legal value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub key: String,
    pub value: StorageRef,
}

impl Item {
    /// Create an item.
    pub fn new(key: impl Into<String>, value: StorageRef) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

/// Persisted B-tree node record.
///
/// Invariants at rest:
/// - `items` is strictly sorted by key.
/// - `children_refs` is empty for a leaf, otherwise `items.len() + 1` long
///   with every entry present. `None` entries exist only mid-operation,
///   for children that were loaded and reparented but not yet flushed.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub items: Vec<Item>,
    pub children_refs: Vec<Option<StorageRef>>,
}

impl Node {
    /// Returns `true` if this node has no children.
    pub fn is_leaf(&self) -> bool {
        self.children_refs.is_empty()
    }

    /// Find where a key lives or would be inserted.
    ///
    /// Returns `(i, true)` when `items[i]` holds the key, otherwise
    /// `(i, false)` where `i` is the insertion point (also the index of the
    /// child subtree covering the key).
    pub fn find(&self, key: &str) -> (usize, bool) {
        let i = self.items.partition_point(|item| item.key.as_str() <= key);
        if i > 0 && self.items[i - 1].key == key {
            (i - 1, true)
        } else {
            (i, false)
        }
    }
}

impl TypedObject for Node {
    const TYPE_ID: &'static str = "/objstore/btree/node/0.0.1";
}

/// Persisted tree root record: points at the root node and tracks the
/// total item count.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TreeRoot {
    pub root_node_ref: StorageRef,
    pub length: u64,
}

impl TypedObject for TreeRoot {
    const TYPE_ID: &'static str = "/objstore/btree/root/0.0.1";
}

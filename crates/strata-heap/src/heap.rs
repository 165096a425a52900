use std::sync::{Arc, Mutex, MutexGuard};

use strata_db::Db;
use strata_types::CancelToken;
use tracing::debug;

use crate::entry::HeapEntry;
use crate::error::{HeapError, HeapResult};
use crate::state::{CacheSlot, HeapInner};

/// Persistent min-priority queue backed by a [`Db`].
///
/// Entries are addressed by caller-chosen string ids. Mutations take the
/// heap lock, run against a write-back entry cache, and flush on success
/// with the root record written last; a failed operation discards the
/// cache and leaves the persistent heap at its pre-operation state.
pub struct FibHeap {
    inner: Mutex<HeapInner>,
}

impl FibHeap {
    /// Open a heap over the given database, loading its root record or
    /// writing the empty one.
    pub fn open(db: Arc<dyn Db>, cancel: &CancelToken) -> HeapResult<Self> {
        let mut inner = HeapInner::new(db);
        inner.read_state(cancel)?;
        Ok(Self {
            inner: Mutex::new(inner),
        })
    }

    /// Number of entries in the heap.
    pub fn size(&self) -> u64 {
        self.lock().root.size
    }

    /// Returns `true` if the heap holds no entries.
    pub fn is_empty(&self) -> bool {
        self.lock().root.min.is_empty()
    }

    /// The minimum entry and its priority, without removing it.
    pub fn min(&self) -> Option<(String, f64)> {
        let inner = self.lock();
        if inner.root.min.is_empty() {
            None
        } else {
            Some((inner.root.min.clone(), inner.root.min_priority))
        }
    }

    /// Add an entry, re-enqueuing if the id already exists with a
    /// different priority. Enqueuing an existing id at its current
    /// priority is a no-op.
    pub fn enqueue(&self, cancel: &CancelToken, id: &str, priority: f64) -> HeapResult<()> {
        self.with_op(cancel, |inner| inner.enqueue_inner(cancel, id, priority))
    }

    /// Remove and return the minimum entry.
    pub fn dequeue_min(&self, cancel: &CancelToken) -> HeapResult<Option<(String, f64)>> {
        {
            let inner = self.lock();
            if inner.root.min.is_empty() {
                return Ok(None);
            }
        }
        self.with_op(cancel, |inner| inner.dequeue_min_entry(cancel))
    }

    /// Decrease the priority of an entry.
    ///
    /// Fails with [`HeapError::NotFound`] for an unknown id and with
    /// [`HeapError::PriorityNotDecreased`] when the new priority is not
    /// strictly below the current one.
    pub fn decrease_key(&self, cancel: &CancelToken, id: &str, priority: f64) -> HeapResult<()> {
        self.with_op(cancel, |inner| {
            if inner.root.min.is_empty() || !inner.load_entry(cancel, id)? {
                return Err(HeapError::NotFound(id.to_string()));
            }
            let current = inner.entry(id)?.priority;
            if priority >= current {
                return Err(HeapError::PriorityNotDecreased {
                    new: priority,
                    current,
                });
            }
            inner.decrease_entry(cancel, id, priority)
        })
    }

    /// Remove an entry by id. A missing id is a silent no-op.
    pub fn delete(&self, cancel: &CancelToken, id: &str) -> HeapResult<()> {
        self.with_op(cancel, |inner| {
            if !inner.load_entry(cancel, id)? {
                return Ok(());
            }
            inner.dequeue_by_id(cancel, id)
        })
    }

    /// Merge `other` into `self`, consuming `other`'s contents.
    ///
    /// Ids already present in `self` are dropped from `other` first, so
    /// the merge doubles as a one-time de-duplication. The surviving
    /// entries are re-persisted under `self`'s key domain. Locks are taken
    /// `self` first, then `other`; merging two heaps into each other
    /// concurrently is a caller error.
    pub fn merge(&self, cancel: &CancelToken, other: &FibHeap) -> HeapResult<()> {
        let mut inner = self.lock();
        let mut other_inner = other.inner.lock().expect("lock poisoned");
        let pre_root = inner.root.clone();

        let result = merge_into(&mut inner, &mut other_inner, cancel)
            .and_then(|()| inner.flush_cache(cancel));

        // Other's cache is discarded either way: its persistent state has
        // been consumed by the merge.
        other_inner.cache.clear();

        match result {
            Ok(()) => Ok(()),
            Err(e) => {
                inner.cache.clear();
                inner.root = pre_root;
                Err(e)
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, HeapInner> {
        self.inner.lock().expect("lock poisoned")
    }

    /// Run one mutation: on success flush the entry cache and root, on
    /// failure discard the cache and restore the pre-operation root.
    fn with_op<R>(
        &self,
        cancel: &CancelToken,
        op: impl FnOnce(&mut HeapInner) -> HeapResult<R>,
    ) -> HeapResult<R> {
        let mut inner = self.lock();
        let pre_root = inner.root.clone();

        let result = op(&mut inner).and_then(|value| {
            inner.flush_cache(cancel)?;
            Ok(value)
        });

        match result {
            Ok(value) => Ok(value),
            Err(e) => {
                inner.cache.clear();
                inner.root = pre_root;
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for FibHeap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("FibHeap")
            .field("size", &inner.root.size)
            .field("min", &inner.root.min)
            .finish()
    }
}

impl HeapInner {
    fn enqueue_inner(&mut self, cancel: &CancelToken, id: &str, priority: f64) -> HeapResult<()> {
        if self.load_entry(cancel, id)? {
            if self.entry(id)?.priority == priority {
                return Ok(());
            }
            self.dequeue_by_id(cancel, id)?;
        }

        self.insert_entry(id, HeapEntry::singleton(id, priority));

        let min_id = self.root.min.clone();
        let new_min = self.merge_rings(cancel, &min_id, id)?;
        self.root.min_priority = self.entry(&new_min)?.priority;
        self.root.min = new_min;
        self.root.size += 1;
        Ok(())
    }

    /// Remove the minimum entry, splice its children into the root list,
    /// and consolidate. Returns the removed id and priority.
    pub(crate) fn dequeue_min_entry(
        &mut self,
        cancel: &CancelToken,
    ) -> HeapResult<Option<(String, f64)>> {
        let min_id = self.root.min.clone();
        if self.root.size == 0 || min_id.is_empty() {
            return Ok(None);
        }
        if !self.load_entry(cancel, &min_id)? {
            return Ok(None);
        }
        let min_priority = self.entry(&min_id)?.priority;

        // Unlink the minimum from the root ring.
        let min_next = self.entry(&min_id)?.next.clone();
        if min_next == min_id {
            self.root.min = String::new();
            self.root.min_priority = 0.0;
        } else {
            let min_prev = self.entry(&min_id)?.prev.clone();
            self.require_entry(cancel, &min_prev)?;
            self.entry_mut(&min_prev)?.next = min_next.clone();
            self.require_entry(cancel, &min_next)?;
            self.entry_mut(&min_next)?.prev = min_prev;
            self.root.min_priority = self.entry(&min_next)?.priority;
            self.root.min = min_next;
        }
        let remaining = self.root.min.clone();

        // Orphan the minimum's children.
        let child_id = self.entry(&min_id)?.child.clone();
        if !child_id.is_empty() {
            let mut curr = child_id.clone();
            loop {
                self.require_entry(cancel, &curr)?;
                self.entry_mut(&curr)?.parent.clear();
                curr = self.entry(&curr)?.next.clone();
                if curr == child_id {
                    break;
                }
            }
        }

        // Splice the child ring into the remaining root ring.
        let merged = self.merge_rings(cancel, &remaining, &child_id)?;
        self.root.size = self.root.size.saturating_sub(1);
        self.root.min_priority = if merged.is_empty() {
            0.0
        } else {
            self.entry(&merged)?.priority
        };
        self.root.min = merged.clone();
        self.remove_entry(&min_id);

        if !merged.is_empty() {
            self.consolidate(cancel, &merged)?;
        }
        Ok(Some((min_id, min_priority)))
    }

    /// Pairwise-link root trees of equal degree until every root tree has
    /// a distinct degree, tracking the minimum along the way.
    fn consolidate(&mut self, cancel: &CancelToken, start: &str) -> HeapResult<()> {
        // Snapshot the root ring before any relinking.
        let mut to_visit: Vec<String> = Vec::new();
        let mut curr = start.to_string();
        loop {
            self.require_entry(cancel, &curr)?;
            to_visit.push(curr.clone());
            curr = self.entry(&curr)?.next.clone();
            if curr == to_visit[0] {
                break;
            }
        }
        debug!(roots = to_visit.len(), "consolidating root list");

        let mut trees: Vec<Option<String>> = Vec::new();
        for visit_id in &to_visit {
            let mut curr_id = visit_id.clone();
            loop {
                let degree = self.entry(&curr_id)?.degree as usize;
                while degree >= trees.len() {
                    trees.push(None);
                }

                let Some(other_id) = trees[degree].take() else {
                    trees[degree] = Some(curr_id.clone());
                    break;
                };

                // Lower-priority root wins; the other becomes its child.
                let (min_id, max_id) =
                    if self.entry(&other_id)?.priority < self.entry(&curr_id)?.priority {
                        (other_id, curr_id.clone())
                    } else {
                        (curr_id.clone(), other_id)
                    };

                // Cut the loser out of the root ring and make it a
                // singleton so it can be spliced under the winner.
                let max_prev = self.entry(&max_id)?.prev.clone();
                let max_next = self.entry(&max_id)?.next.clone();
                self.require_entry(cancel, &max_next)?;
                self.entry_mut(&max_next)?.prev = max_prev.clone();
                self.require_entry(cancel, &max_prev)?;
                self.entry_mut(&max_prev)?.next = max_next;
                {
                    let max_entry = self.entry_mut(&max_id)?;
                    max_entry.prev = max_id.clone();
                    max_entry.next = max_id.clone();
                }

                let min_child = self.entry(&min_id)?.child.clone();
                let new_child = self.merge_rings(cancel, &min_child, &max_id)?;
                self.entry_mut(&min_id)?.child = new_child;

                self.entry_mut(&max_id)?.parent = min_id.clone();
                self.entry_mut(&max_id)?.marked = false;
                self.entry_mut(&min_id)?.degree += 1;

                curr_id = min_id;
            }

            // `<=` rather than `<`: after linking equal-priority trees the
            // min pointer must land on the one still in the root ring.
            let priority = self.entry(&curr_id)?.priority;
            if priority <= self.root.min_priority {
                self.root.min = curr_id.clone();
                self.root.min_priority = priority;
            }
        }
        Ok(())
    }

    /// Internal delete: force the entry to the bottom and dequeue it.
    ///
    /// Bypasses the monotonicity check so that an entry already at the
    /// sentinel priority still deletes.
    fn dequeue_by_id(&mut self, cancel: &CancelToken, id: &str) -> HeapResult<()> {
        self.decrease_entry(cancel, id, f64::NEG_INFINITY)?;
        self.dequeue_min_entry(cancel)?;
        Ok(())
    }

    /// Set an entry's priority, cutting it to the root list when heap
    /// order would be violated. The caller has already validated the new
    /// priority (or is the internal delete, which does not).
    fn decrease_entry(&mut self, cancel: &CancelToken, id: &str, priority: f64) -> HeapResult<()> {
        self.entry_mut(id)?.priority = priority;

        let parent_id = self.entry(id)?.parent.clone();
        if !parent_id.is_empty()
            && self.load_entry(cancel, &parent_id)?
            && priority <= self.entry(&parent_id)?.priority
        {
            self.cut_entry(cancel, id)?;
        }

        if priority <= self.root.min_priority {
            self.root.min = id.to_string();
            self.root.min_priority = priority;
        }
        Ok(())
    }

    /// Move an entry from its parent's child ring to the root ring, then
    /// cascade: a marked parent is cut as well, an unmarked one is marked.
    fn cut_entry(&mut self, cancel: &CancelToken, id: &str) -> HeapResult<()> {
        if !self.load_entry(cancel, id)? {
            return Ok(());
        }
        self.entry_mut(id)?.marked = false;

        let parent_id = self.entry(id)?.parent.clone();
        if parent_id.is_empty() || !self.load_entry(cancel, &parent_id)? {
            return Ok(());
        }

        let prev_id = self.entry(id)?.prev.clone();
        let next_id = self.entry(id)?.next.clone();
        if !self.load_entry(cancel, &next_id)? {
            return Err(HeapError::Corruption(format!(
                "cannot find next: {id} -> {next_id}"
            )));
        }
        if !self.load_entry(cancel, &prev_id)? {
            return Err(HeapError::Corruption(format!(
                "cannot find prev: {id} -> {prev_id}"
            )));
        }

        // Rewire siblings around the cut entry.
        if next_id != id {
            self.entry_mut(&next_id)?.prev = prev_id.clone();
            self.entry_mut(&prev_id)?.next = next_id.clone();
        }

        // Advance the parent's representative child if it was this entry.
        if self.entry(&parent_id)?.child == id {
            let new_child = if next_id != id {
                next_id.clone()
            } else {
                String::new()
            };
            self.entry_mut(&parent_id)?.child = new_child;
        }
        self.entry_mut(&parent_id)?.degree -= 1;

        // Splice the now-singleton entry into the root ring.
        {
            let entry = self.entry_mut(id)?;
            entry.prev = id.to_string();
            entry.next = id.to_string();
        }
        let root_min = self.root.min.clone();
        let merged = self.merge_rings(cancel, &root_min, id)?;
        if merged != self.root.min {
            self.root.min_priority = self.entry(&merged)?.priority;
            self.root.min = merged;
        }

        self.entry_mut(id)?.parent.clear();
        if self.entry(&parent_id)?.marked {
            self.cut_entry(cancel, &parent_id)
        } else {
            self.entry_mut(&parent_id)?.marked = true;
            Ok(())
        }
    }

    /// Splice two circular sibling rings into one.
    ///
    /// Either id may be empty ("no ring"). Returns the id of the
    /// lower-priority head, which becomes the representative of the
    /// combined ring.
    pub(crate) fn merge_rings(
        &mut self,
        cancel: &CancelToken,
        a: &str,
        b: &str,
    ) -> HeapResult<String> {
        match (a.is_empty(), b.is_empty()) {
            (true, true) => return Ok(String::new()),
            (false, true) => return Ok(a.to_string()),
            (true, false) => return Ok(b.to_string()),
            (false, false) => {}
        }
        self.require_entry(cancel, a)?;
        self.require_entry(cancel, b)?;

        let a_old_next = self.entry(a)?.next.clone();
        let b_next = self.entry(b)?.next.clone();

        self.entry_mut(a)?.next = b_next.clone();
        self.require_entry(cancel, &b_next)?;
        self.entry_mut(&b_next)?.prev = a.to_string();

        self.entry_mut(b)?.next = a_old_next.clone();
        self.require_entry(cancel, &a_old_next)?;
        self.entry_mut(&a_old_next)?.prev = b.to_string();

        if self.entry(a)?.priority < self.entry(b)?.priority {
            Ok(a.to_string())
        } else {
            Ok(b.to_string())
        }
    }

    /// Load an entry that the ring invariants say must exist.
    fn require_entry(&mut self, cancel: &CancelToken, id: &str) -> HeapResult<()> {
        if self.load_entry(cancel, id)? {
            Ok(())
        } else {
            Err(HeapError::Corruption(format!("missing ring entry: {id}")))
        }
    }
}

/// The merge algorithm, run with both heaps locked.
///
/// Collision dequeues run against `other` first so its ring relinking is
/// visible; the survivors are then copied into `self`'s cache (and so are
/// re-persisted under `self`'s key domain at flush) before the root rings
/// are spliced.
fn merge_into(
    inner: &mut HeapInner,
    other: &mut HeapInner,
    cancel: &CancelToken,
) -> HeapResult<()> {
    let mut result_size = inner.root.size;
    let other_ids = other.list_ids(cancel)?;

    // Drop colliding ids from `other`.
    let mut collided: Vec<bool> = Vec::with_capacity(other_ids.len());
    for id in &other_ids {
        if !other.load_entry(cancel, id)? {
            return Err(HeapError::Corruption(format!("cannot find entry: {id}")));
        }
        let exists_in_self = inner.load_entry(cancel, id)?;
        if exists_in_self {
            other.dequeue_by_id(cancel, id)?;
        }
        collided.push(exists_in_self);
    }

    // Transfer the survivors, with any ring relinking the collision
    // dequeues performed.
    for (id, was_collision) in other_ids.iter().zip(&collided) {
        if *was_collision {
            continue;
        }
        match other.cache.get(id) {
            Some(CacheSlot::Entry(entry)) => {
                inner.insert_entry(id, entry.clone());
                result_size += 1;
            }
            Some(CacheSlot::Tombstone) | None => {
                return Err(HeapError::Corruption(format!("cannot find entry: {id}")));
            }
        }
    }

    // Splice the root rings.
    let self_min = inner.root.min.clone();
    let other_min = other.root.min.clone();
    let merged = inner.merge_rings(cancel, &self_min, &other_min)?;
    inner.root.min_priority = if merged.is_empty() {
        0.0
    } else {
        inner.entry(&merged)?.priority
    };
    inner.root.min = merged;
    inner.root.size = result_size;
    Ok(())
}

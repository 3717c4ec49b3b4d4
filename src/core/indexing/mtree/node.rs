use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use log::trace;

use crate::core::common::{ConsistencyViolation, MTreeError, NodeId, NO_ID};
use crate::core::distance::{Distance, IndexedObject};
use crate::core::indexing::mtree::entry::{DirectoryEntry, Entry, LeafEntry};
use crate::core::indexing::mtree::page_io::PageFile;

/// Size of the fixed node header: node id, parent id, index in parent, entry count.
pub const NODE_HEADER_SIZE: usize = 4 * 4;

/// A fixed-capacity M-Tree node, either a leaf or a directory.
///
/// A node of capacity `c` holds at most `c - 1` entries between mutations; the
/// last slot absorbs one overflowing insert until the node is split.
///
/// The entry array sits behind a mutex so that enumeration through
/// [`MTreeNode::children`] sees a consistent `(count, entry)` pair for every
/// element it produces.
#[derive(Debug)]
pub struct MTreeNode<O, D> {
    node_id: Option<NodeId>,
    parent_id: Option<NodeId>,
    index: Option<usize>,
    is_leaf: bool,
    capacity: usize,
    entries: Mutex<Vec<Entry<O, D>>>,
}

impl<O: Clone, D: Clone> Clone for MTreeNode<O, D> {
    fn clone(&self) -> Self {
        Self {
            node_id: self.node_id,
            parent_id: self.parent_id,
            index: self.index,
            is_leaf: self.is_leaf,
            capacity: self.capacity,
            entries: Mutex::new(self.lock_entries().clone()),
        }
    }
}

impl<O, D> MTreeNode<O, D> {
    /// Creates an empty node that has not been written to a page file yet.
    #[must_use]
    pub fn new(capacity: usize, is_leaf: bool) -> Self {
        Self {
            node_id: None,
            parent_id: None,
            index: None,
            is_leaf,
            capacity,
            entries: Mutex::new(Vec::with_capacity(capacity)),
        }
    }

    #[must_use]
    pub fn new_leaf(capacity: usize) -> Self {
        Self::new(capacity, true)
    }

    #[must_use]
    pub fn new_directory(capacity: usize) -> Self {
        Self::new(capacity, false)
    }

    // --- Node Properties ---
    pub const fn node_id(&self) -> Option<NodeId> {
        self.node_id
    }

    /// The node id, or `-1` for a node that was never persisted.
    pub fn id(&self) -> NodeId {
        self.node_id.unwrap_or(NO_ID)
    }

    pub(crate) fn set_node_id(&mut self, id: NodeId) {
        self.node_id = Some(id);
    }

    /// Id of the node holding the directory entry for this node; `None` for the root.
    pub const fn parent_id(&self) -> Option<NodeId> {
        self.parent_id
    }

    /// Position of this node's entry in its parent; `None` for the root.
    pub const fn index_in_parent(&self) -> Option<usize> {
        self.index
    }

    pub(crate) fn detach(&mut self) {
        self.parent_id = None;
        self.index = None;
    }

    pub const fn is_leaf(&self) -> bool {
        self.is_leaf
    }

    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of entries a node may keep once it is not mid-split.
    pub const fn max_entries(&self) -> usize {
        self.capacity.saturating_sub(1)
    }

    pub fn num_entries(&self) -> usize {
        self.lock_entries().len()
    }

    /// True once the overflow slot is in use and the node must be split.
    pub fn is_overflowing(&self) -> bool {
        self.num_entries() > self.max_entries()
    }

    pub(crate) fn lock_entries(&self) -> MutexGuard<'_, Vec<Entry<O, D>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn entries_mut(&mut self) -> &mut Vec<Entry<O, D>> {
        self.entries.get_mut().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn clear_entries(&mut self) {
        let capacity = self.capacity;
        *self.entries_mut() = Vec::with_capacity(capacity);
    }

    fn ensure_free_slot(&self) -> Result<(), MTreeError> {
        if self.num_entries() >= self.capacity {
            return Err(MTreeError::CapacityExceeded { node_id: self.id(), capacity: self.capacity });
        }
        Ok(())
    }

    /// Appends a leaf entry. Capacity is enforced only against the overflow slot;
    /// callers split the node once it overflows.
    pub fn add_leaf_entry(&mut self, entry: LeafEntry<O, D>) -> Result<(), MTreeError> {
        if !self.is_leaf {
            return Err(MTreeError::InvalidOperation(format!(
                "Node {} is not a leaf node!",
                self.id()
            )));
        }
        self.ensure_free_slot()?;
        self.entries_mut().push(Entry::Leaf(entry));
        Ok(())
    }

    /// Replaces the entry at `index` with an entry of the same kind.
    pub(crate) fn replace_entry(&mut self, index: usize, entry: Entry<O, D>) -> Result<(), MTreeError> {
        if entry.is_leaf_entry() != self.is_leaf {
            return Err(MTreeError::InvalidOperation(format!(
                "Cannot store a {} entry in node {}",
                entry.kind_name(),
                self.id()
            )));
        }
        let num_entries = self.num_entries();
        let slot = self
            .entries_mut()
            .get_mut(index)
            .ok_or(MTreeError::OutOfBounds { index, num_entries })?;
        *slot = entry;
        Ok(())
    }
}

impl<O: Clone, D: Clone> MTreeNode<O, D> {
    /// Returns a copy of the entry at `index`.
    pub fn entry_at(&self, index: usize) -> Result<Entry<O, D>, MTreeError> {
        let entries = self.lock_entries();
        entries
            .get(index)
            .cloned()
            .ok_or(MTreeError::OutOfBounds { index, num_entries: entries.len() })
    }

    /// Snapshot of all entries in order.
    pub fn entries(&self) -> Vec<Entry<O, D>> {
        self.lock_entries().clone()
    }

    /// Enumerates the entries of this node. The entry lock is held only while
    /// each element is produced, so every element reflects a consistent
    /// snapshot at that instant, not the node across the whole enumeration.
    pub const fn children(&self) -> Children<'_, O, D> {
        Children { node: self, cursor: 0 }
    }
}

impl<O: IndexedObject, D: Distance> MTreeNode<O, D> {
    /// Appends a directory entry for `child` and attaches the child to this node:
    /// its parent id and index are updated and it is written to `file`.
    ///
    /// This is the only node operation that persists a node other than itself.
    pub fn add_child_node<P>(
        &mut self,
        child: &mut Self,
        routing_object: O,
        parent_distance: Option<D>,
        covering_radius: D,
        file: &mut P,
    ) -> Result<(), MTreeError>
    where
        P: PageFile<O, D> + ?Sized,
    {
        if self.is_leaf {
            return Err(MTreeError::InvalidOperation(format!(
                "Node {} is a leaf node!",
                self.id()
            )));
        }
        let parent_id = self.node_id.ok_or_else(|| {
            MTreeError::InvalidOperation("Directory node must be persisted before it adopts children".to_string())
        })?;
        let child_id = child.node_id.ok_or_else(|| {
            MTreeError::InvalidOperation("Child node must be persisted before it is attached".to_string())
        })?;
        self.ensure_free_slot()?;

        let entries = self.entries_mut();
        entries.push(Entry::Directory(DirectoryEntry::new(
            routing_object,
            parent_distance,
            child_id,
            covering_radius,
        )));
        let index = entries.len() - 1;

        child.parent_id = Some(parent_id);
        child.index = Some(index);
        trace!("Attached node {} to node {} at index {}", child_id, parent_id, index);
        file.write_page(child).map_err(|e| {
            MTreeError::storage_failure(
                format!("persisting child {} of node {}", child_id, parent_id),
                e,
            )
        })?;
        Ok(())
    }

    /// Compares this node with another copy of itself.
    ///
    /// Returns `Ok(false)` for different nodes and `Ok(true)` for identical
    /// copies. Two copies with the same id that disagree in any other field are
    /// a corrupted invariant and yield a violation instead of "not equal".
    pub fn check_identity(&self, other: &Self) -> Result<bool, ConsistencyViolation> {
        if self.node_id != other.node_id {
            return Ok(false);
        }
        if std::ptr::eq(self, other) {
            return Ok(true);
        }
        let node_id = self.id();
        let mismatch = |field: &'static str, left: String, right: String| {
            Err(ConsistencyViolation::IdentityMismatch { node_id, field, left, right })
        };
        if self.parent_id != other.parent_id {
            return mismatch("parentID", format!("{:?}", self.parent_id), format!("{:?}", other.parent_id));
        }
        if self.index != other.index {
            return mismatch("index", format!("{:?}", self.index), format!("{:?}", other.index));
        }
        let mine = self.lock_entries();
        let theirs = other.lock_entries();
        if mine.len() != theirs.len() {
            return mismatch("numEntries", mine.len().to_string(), theirs.len().to_string());
        }
        for (e1, e2) in mine.iter().zip(theirs.iter()) {
            if e1 != e2 {
                return mismatch("entry", e1.to_string(), e2.to_string());
            }
        }
        Ok(true)
    }

    // --- Serialization / Deserialization ---

    /// Serializes the node: four big-endian `i32` (node id, parent id, index in
    /// parent, entry count) followed by the entry block.
    ///
    /// The entry block holds the node kind, the capacity and exactly `capacity`
    /// slots; unused trailing slots are encoded as null.
    pub fn to_bytes(&self) -> Result<Vec<u8>, MTreeError> {
        let entries = self.lock_entries();
        let header = [
            self.node_id.unwrap_or(NO_ID),
            self.parent_id.unwrap_or(NO_ID),
            encode_count(self.index, "index")?,
            encode_count(Some(entries.len()), "numEntries")?,
        ];
        let capacity = u32::try_from(self.capacity)
            .map_err(|_| MTreeError::CorruptData(format!("capacity {} too large", self.capacity)))?;
        let slots: Vec<Option<&Entry<O, D>>> =
            (0..self.capacity).map(|i| entries.get(i)).collect();

        let mut bytes = Vec::with_capacity(NODE_HEADER_SIZE);
        for field in header {
            bytes.extend_from_slice(&field.to_be_bytes());
        }
        bincode::serialize_into(&mut bytes, &(self.is_leaf, capacity, slots)).map_err(|e| {
            MTreeError::storage_failure(
                format!("serializing node {}", self.id()),
                MTreeError::CorruptData(e.to_string()),
            )
        })?;
        Ok(bytes)
    }

    /// Restores a node written by [`MTreeNode::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MTreeError> {
        if bytes.len() < NODE_HEADER_SIZE {
            return Err(MTreeError::CorruptData(format!(
                "node header needs {} bytes, got {}",
                NODE_HEADER_SIZE,
                bytes.len()
            )));
        }
        let node_id = read_i32(bytes, 0);
        let parent_id = read_i32(bytes, 4);
        let index = read_i32(bytes, 8);
        let num_entries = read_i32(bytes, 12);

        let (is_leaf, capacity, slots): (bool, u32, Vec<Option<Entry<O, D>>>) =
            bincode::deserialize(&bytes[NODE_HEADER_SIZE..])
                .map_err(|e| MTreeError::CorruptData(format!("entry block of node {}: {}", node_id, e)))?;
        let capacity = capacity as usize;

        if slots.len() != capacity {
            return Err(MTreeError::CorruptData(format!(
                "node {} has capacity {} but {} slots",
                node_id,
                capacity,
                slots.len()
            )));
        }
        let num_entries = decode_count(num_entries, "numEntries")?
            .ok_or_else(|| MTreeError::CorruptData(format!("node {} has no entry count", node_id)))?;
        let mut entries = Vec::with_capacity(capacity);
        let mut trailing_empty = false;
        for (i, slot) in slots.into_iter().enumerate() {
            match slot {
                Some(_) if trailing_empty => {
                    return Err(MTreeError::CorruptData(format!(
                        "node {} has an entry in slot {} after an empty slot",
                        node_id, i
                    )));
                }
                Some(entry) if entry.is_leaf_entry() != is_leaf => {
                    return Err(MTreeError::CorruptData(format!(
                        "node {} holds a {} entry in slot {}",
                        node_id,
                        entry.kind_name(),
                        i
                    )));
                }
                Some(entry) => entries.push(entry),
                None => trailing_empty = true,
            }
        }
        if entries.len() != num_entries {
            return Err(MTreeError::CorruptData(format!(
                "node {} declares {} entries but its entry block holds {}",
                node_id,
                num_entries,
                entries.len()
            )));
        }

        Ok(Self {
            node_id: decode_id(node_id, "nodeID")?,
            parent_id: decode_id(parent_id, "parentID")?,
            index: decode_count(index, "index")?,
            is_leaf,
            capacity,
            entries: Mutex::new(entries),
        })
    }
}

fn encode_count(value: Option<usize>, field: &str) -> Result<i32, MTreeError> {
    value.map_or(Ok(NO_ID), |v| {
        i32::try_from(v).map_err(|_| MTreeError::CorruptData(format!("{} {} does not fit 32 bits", field, v)))
    })
}

fn decode_count(value: i32, field: &str) -> Result<Option<usize>, MTreeError> {
    if value == NO_ID {
        return Ok(None);
    }
    usize::try_from(value)
        .map(Some)
        .map_err(|_| MTreeError::CorruptData(format!("negative {}: {}", field, value)))
}

fn decode_id(value: i32, field: &str) -> Result<Option<NodeId>, MTreeError> {
    match value {
        NO_ID => Ok(None),
        v if v < 0 => Err(MTreeError::CorruptData(format!("negative {}: {}", field, v))),
        v => Ok(Some(v)),
    }
}

fn read_i32(bytes: &[u8], offset: usize) -> i32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[offset..offset + 4]);
    i32::from_be_bytes(buf)
}

impl<O, D> fmt::Display for MTreeNode<O, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_leaf {
            write!(f, "LeafNode {}", self.id())
        } else {
            write!(f, "DirNode {}", self.id())
        }
    }
}

/// Iterator over the entries of a node, see [`MTreeNode::children`].
#[derive(Debug)]
pub struct Children<'a, O, D> {
    node: &'a MTreeNode<O, D>,
    cursor: usize,
}

impl<O: Clone, D: Clone> Iterator for Children<'_, O, D> {
    type Item = Entry<O, D>;

    fn next(&mut self) -> Option<Self::Item> {
        let entries = self.node.lock_entries();
        let entry = entries.get(self.cursor).cloned()?;
        self.cursor += 1;
        Some(entry)
    }
}

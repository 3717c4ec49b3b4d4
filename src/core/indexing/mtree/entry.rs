use crate::core::common::NodeId;
use crate::core::distance::{Distance, IndexedObject};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Entry of a leaf node: an indexed object and its cached distance to the
/// routing object of the entry pointing at the containing node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeafEntry<O, D> {
    pub object: O,
    /// `None` only while the containing node is the root.
    pub parent_distance: Option<D>,
}

impl<O, D> LeafEntry<O, D> {
    pub const fn new(object: O, parent_distance: Option<D>) -> Self {
        Self { object, parent_distance }
    }
}

/// Entry of a directory node: a routing object, the subtree it covers and the
/// covering radius bounding every object in that subtree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectoryEntry<O, D> {
    pub routing_object: O,
    pub parent_distance: Option<D>,
    pub child_id: NodeId,
    /// Upper bound of `distance(routing_object, o)` for every object `o` below
    /// `child_id`. May be looser than the true maximum, never tighter.
    pub covering_radius: D,
}

impl<O, D> DirectoryEntry<O, D> {
    pub const fn new(
        routing_object: O,
        parent_distance: Option<D>,
        child_id: NodeId,
        covering_radius: D,
    ) -> Self {
        Self { routing_object, parent_distance, child_id, covering_radius }
    }
}

/// Membership record of a node. Leaf nodes hold only `Leaf` entries and
/// directory nodes only `Directory` entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Entry<O, D> {
    Leaf(LeafEntry<O, D>),
    Directory(DirectoryEntry<O, D>),
}

impl<O, D> Entry<O, D> {
    /// The object itself for a leaf entry, the routing object for a directory entry.
    pub const fn routing_object(&self) -> &O {
        match self {
            Self::Leaf(e) => &e.object,
            Self::Directory(e) => &e.routing_object,
        }
    }

    pub const fn parent_distance(&self) -> Option<&D> {
        match self {
            Self::Leaf(e) => e.parent_distance.as_ref(),
            Self::Directory(e) => e.parent_distance.as_ref(),
        }
    }

    pub fn set_parent_distance(&mut self, distance: Option<D>) {
        match self {
            Self::Leaf(e) => e.parent_distance = distance,
            Self::Directory(e) => e.parent_distance = distance,
        }
    }

    pub const fn is_leaf_entry(&self) -> bool {
        matches!(self, Self::Leaf(_))
    }

    pub const fn as_directory(&self) -> Option<&DirectoryEntry<O, D>> {
        match self {
            Self::Directory(e) => Some(e),
            Self::Leaf(_) => None,
        }
    }

    pub const fn kind_name(&self) -> &'static str {
        if self.is_leaf_entry() {
            "leaf"
        } else {
            "directory"
        }
    }
}

impl<O: IndexedObject, D: Distance> Entry<O, D> {
    /// Covering radius of a directory entry; leaf entries cover only themselves.
    pub fn covering_radius(&self) -> D {
        match self {
            Self::Leaf(_) => D::null_distance(),
            Self::Directory(e) => e.covering_radius,
        }
    }
}

impl<O: IndexedObject, D: Distance> fmt::Display for Entry<O, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Leaf(e) => write!(f, "LeafEntry(o_{}, pd {:?})", e.object.id(), e.parent_distance),
            Self::Directory(e) => write!(
                f,
                "DirEntry(o_{}, pd {:?}, child {}, cr {:?})",
                e.routing_object.id(),
                e.parent_distance,
                e.child_id,
                e.covering_radius
            ),
        }
    }
}

impl<O, D> From<LeafEntry<O, D>> for Entry<O, D> {
    fn from(entry: LeafEntry<O, D>) -> Self {
        Self::Leaf(entry)
    }
}

impl<O, D> From<DirectoryEntry<O, D>> for Entry<O, D> {
    fn from(entry: DirectoryEntry<O, D>) -> Self {
        Self::Directory(entry)
    }
}

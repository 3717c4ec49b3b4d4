//! Consistency checks over nodes and subtrees.
//!
//! These are verification passes for debug builds and tests. They recompute
//! distances for every entry visited and must not be used on a query path.

use std::cmp::Ordering;

use crate::core::common::{ConsistencyViolation, MTreeError};
use crate::core::distance::{Distance, DistanceFunction, IndexedObject};
use crate::core::indexing::mtree::entry::DirectoryEntry;
use crate::core::indexing::mtree::node::MTreeNode;
use crate::core::indexing::mtree::page_io::PageFile;

const fn kind_of(is_leaf: bool) -> &'static str {
    if is_leaf {
        "leaf"
    } else {
        "directory"
    }
}

impl<O: IndexedObject, D: Distance> MTreeNode<O, D> {
    /// Checks capacity, entry kind homogeneity, the parent id and index of every
    /// child, and that all children are of the same kind.
    pub fn check_structure<P>(&self, file: &P) -> Result<(), MTreeError>
    where
        P: PageFile<O, D> + ?Sized,
    {
        let num_entries = self.num_entries();
        if num_entries > self.capacity() {
            return Err(ConsistencyViolation::Overfull {
                node_id: self.id(),
                num_entries,
                capacity: self.capacity(),
            }
            .into());
        }

        let mut child_kind: Option<bool> = None;
        for (index, entry) in self.children().enumerate() {
            if entry.is_leaf_entry() != self.is_leaf() {
                return Err(ConsistencyViolation::EntryKindMismatch {
                    node_id: self.id(),
                    index,
                    expected: kind_of(self.is_leaf()),
                    found: entry.kind_name(),
                }
                .into());
            }
            let Some(dir) = entry.as_directory() else {
                continue;
            };

            let child = file.read_page(dir.child_id)?;
            if child.parent_id() != self.node_id() {
                return Err(ConsistencyViolation::WrongParent {
                    child_id: dir.child_id,
                    expected: self.id(),
                    actual: child.parent_id(),
                }
                .into());
            }
            if child.index_in_parent() != Some(index) {
                return Err(ConsistencyViolation::WrongIndex {
                    child_id: dir.child_id,
                    parent_id: self.id(),
                    expected: index,
                    actual: child.index_in_parent(),
                }
                .into());
            }
            match child_kind {
                None => child_kind = Some(child.is_leaf()),
                Some(expected) if expected != child.is_leaf() => {
                    return Err(ConsistencyViolation::MixedChildKinds {
                        node_id: self.id(),
                        index,
                        child_id: dir.child_id,
                        expected: kind_of(expected),
                        found: kind_of(child.is_leaf()),
                    }
                    .into());
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// Every entry of this node must lie within the covering radius of the
    /// directory entry pointing at this node. Skipped for the root.
    pub fn test_covering_radius<F>(
        &self,
        enclosing: Option<&DirectoryEntry<O, D>>,
        distance_fn: &F,
    ) -> Result<(), ConsistencyViolation>
    where
        F: DistanceFunction<O, Output = D>,
    {
        let Some(enclosing) = enclosing else {
            return Ok(());
        };
        for (index, entry) in self.children().enumerate() {
            let distance = distance_fn.distance(entry.routing_object(), &enclosing.routing_object);
            if distance.compare(&enclosing.covering_radius) == Ordering::Greater {
                return Err(ConsistencyViolation::CoveringRadiusExceeded {
                    node_id: self.id(),
                    index,
                    object_id: entry.routing_object().id(),
                    routing_object_id: enclosing.routing_object.id(),
                    distance: format!("{:?}", distance),
                    covering_radius: format!("{:?}", enclosing.covering_radius),
                });
            }
        }
        Ok(())
    }

    /// Every cached parent distance must equal the distance to `routing_object`
    /// exactly. Without a routing object (the root) no entry may carry one.
    pub fn test_parent_distance<F>(&self, routing_object: Option<&O>, distance_fn: &F) -> Result<(), ConsistencyViolation>
    where
        F: DistanceFunction<O, Output = D>,
    {
        for (index, entry) in self.children().enumerate() {
            let object_id = entry.routing_object().id();
            match (routing_object, entry.parent_distance()) {
                (None, None) => {}
                (None, Some(stored)) => {
                    return Err(ConsistencyViolation::UnexpectedParentDistance {
                        node_id: self.id(),
                        index,
                        object_id,
                        stored: format!("{:?}", stored),
                    });
                }
                (Some(routing), stored) => {
                    let computed = distance_fn.distance(entry.routing_object(), routing);
                    if stored != Some(&computed) {
                        return Err(ConsistencyViolation::ParentDistanceMismatch {
                            node_id: self.id(),
                            index,
                            object_id,
                            routing_object_id: routing.id(),
                            stored: stored.map_or_else(|| "null".to_string(), |d| format!("{:?}", d)),
                            computed: format!("{:?}", computed),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Runs the structural, covering radius and parent distance checks on this
    /// node, given the directory entry that points at it (`None` for the root).
    pub fn check_consistency<F, P>(
        &self,
        enclosing: Option<&DirectoryEntry<O, D>>,
        distance_fn: &F,
        file: &P,
    ) -> Result<(), MTreeError>
    where
        F: DistanceFunction<O, Output = D>,
        P: PageFile<O, D> + ?Sized,
    {
        self.check_structure(file)?;
        self.test_covering_radius(enclosing, distance_fn)?;
        self.test_parent_distance(enclosing.map(|e| &e.routing_object), distance_fn)?;
        Ok(())
    }
}

/// Checks `node` and everything below it.
///
/// Besides the per-node checks, every leaf object is tested against the
/// covering radius of each of its ancestors, not just the nearest one.
pub(crate) fn check_subtree<O, D, F, P>(
    node: &MTreeNode<O, D>,
    ancestors: &mut Vec<DirectoryEntry<O, D>>,
    distance_fn: &F,
    file: &P,
) -> Result<(), MTreeError>
where
    O: IndexedObject,
    D: Distance,
    F: DistanceFunction<O, Output = D>,
    P: PageFile<O, D> + ?Sized,
{
    node.check_consistency(ancestors.last(), distance_fn, file)?;

    if node.is_leaf() {
        let outer = ancestors.len().saturating_sub(1);
        for (index, entry) in node.children().enumerate() {
            let object = entry.routing_object();
            for ancestor in &ancestors[..outer] {
                let distance = distance_fn.distance(object, &ancestor.routing_object);
                if distance.compare(&ancestor.covering_radius) == Ordering::Greater {
                    return Err(ConsistencyViolation::CoveringRadiusExceeded {
                        node_id: node.id(),
                        index,
                        object_id: object.id(),
                        routing_object_id: ancestor.routing_object.id(),
                        distance: format!("{:?}", distance),
                        covering_radius: format!("{:?}", ancestor.covering_radius),
                    }
                    .into());
                }
            }
        }
        return Ok(());
    }

    for entry in node.children() {
        let Some(dir) = entry.as_directory().cloned() else {
            continue;
        };
        let child = file.read_page(dir.child_id)?;
        ancestors.push(dir);
        let result = check_subtree(&child, ancestors, distance_fn, file);
        ancestors.pop();
        result?;
    }
    Ok(())
}

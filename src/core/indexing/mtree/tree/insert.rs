use std::cmp::Ordering;

use log::{debug, info};

use crate::core::common::{MTreeError, NodeId};
use crate::core::distance::{Distance, DistanceFunction, IndexedObject};
use crate::core::indexing::mtree::entry::{DirectoryEntry, Entry, LeafEntry};
use crate::core::indexing::mtree::node::MTreeNode;
use crate::core::indexing::mtree::page_io::PageFile;
use crate::core::indexing::mtree::policy::{Assignments, SplitPolicy};

use super::MTreeIndex;

impl<O, D, F, P, S> MTreeIndex<O, F, P, S>
where
    O: IndexedObject,
    D: Distance,
    F: DistanceFunction<O, Output = D>,
    P: PageFile<O, D>,
    S: SplitPolicy<O, D>,
{
    /// Inserts `object` into the leaf reached by choose-subtree descent.
    ///
    /// Covering radii along the descent are widened to include the object. A
    /// leaf reaching its capacity is split, and splits propagate upwards until
    /// a node has room or the root itself splits and the tree grows by a level.
    ///
    /// A `StorageFailure` leaves the tree in an unspecified state; reopen it
    /// from the page file before using it again.
    pub fn insert(&mut self, object: O) -> Result<(), MTreeError> {
        let mut node = self.read_node(self.root_id)?;
        let mut enclosing: Option<O> = None;

        while !node.is_leaf() {
            let (index, mut entry, distance) = self.choose_subtree(&node, &object)?;
            if distance.compare(&entry.covering_radius) == Ordering::Greater {
                entry.covering_radius = distance;
                node.replace_entry(index, Entry::Directory(entry.clone()))?;
                self.write_node(&mut node)?;
            }
            let child = self.read_node(entry.child_id)?;
            enclosing = Some(entry.routing_object);
            node = child;
        }

        let parent_distance = enclosing.as_ref().map(|routing| self.distance_fn.distance(&object, routing));
        node.add_leaf_entry(LeafEntry::new(object, parent_distance))?;

        if node.is_overflowing() {
            self.handle_overflow(node)?;
        } else {
            self.write_node(&mut node)?;
        }
        self.verify_if_enabled()
    }

    /// Picks the entry of `node` to descend into: among entries already covering
    /// the object the nearest one, otherwise the one needing the least enlargement.
    fn choose_subtree(
        &self,
        node: &MTreeNode<O, D>,
        object: &O,
    ) -> Result<(usize, DirectoryEntry<O, D>, D), MTreeError> {
        let mut covering: Option<(usize, DirectoryEntry<O, D>, D)> = None;
        let mut enlarging: Option<(usize, DirectoryEntry<O, D>, D, D)> = None;

        for (index, entry) in node.children().enumerate() {
            let Entry::Directory(dir) = entry else {
                return Err(MTreeError::CorruptData(format!(
                    "leaf entry {} in directory node {}",
                    index,
                    node.id()
                )));
            };
            let distance = self.distance_fn.distance(object, &dir.routing_object);
            if distance.compare(&dir.covering_radius) != Ordering::Greater {
                if covering.as_ref().map_or(true, |(_, _, best)| distance.compare(best) == Ordering::Less) {
                    covering = Some((index, dir, distance));
                }
            } else {
                let enlargement = distance - dir.covering_radius;
                if enlarging
                    .as_ref()
                    .map_or(true, |(_, _, _, best)| enlargement.compare(best) == Ordering::Less)
                {
                    enlarging = Some((index, dir, distance, enlargement));
                }
            }
        }

        covering
            .or_else(|| enlarging.map(|(index, dir, distance, _)| (index, dir, distance)))
            .ok_or_else(|| MTreeError::CorruptData(format!("directory node {} has no entries", node.id())))
    }

    /// Splits `node` and records the result in its parent, recursing while
    /// parents overflow in turn.
    fn handle_overflow(&mut self, mut node: MTreeNode<O, D>) -> Result<(), MTreeError> {
        let entries = node.entries();
        let Assignments {
            first_routing_object,
            first_covering_radius,
            first,
            second_routing_object,
            second_covering_radius,
            second,
        } = self.policy.split(&entries, &self.distance_fn)?;

        let mut sibling = node.split_entries(first, second, &mut self.page_file)?;

        let Some(parent_id) = node.parent_id() else {
            return self.grow_root(
                node,
                sibling,
                (first_routing_object, first_covering_radius),
                (second_routing_object, second_covering_radius),
            );
        };

        let mut parent = self.read_node(parent_id)?;
        let index = node.index_in_parent().ok_or_else(|| {
            MTreeError::CorruptData(format!("node {} has parent {} but no index", node.id(), parent_id))
        })?;
        let parent_routing = self.enclosing_routing_object(&parent)?;
        let parent_distance =
            |object: &O| parent_routing.as_ref().map(|routing| self.distance_fn.distance(object, routing));

        let first_parent_distance = parent_distance(&first_routing_object);
        let second_parent_distance = parent_distance(&second_routing_object);
        parent.replace_entry(
            index,
            Entry::Directory(DirectoryEntry::new(
                first_routing_object,
                first_parent_distance,
                node.id(),
                first_covering_radius,
            )),
        )?;
        self.write_node(&mut node)
            .map_err(|e| MTreeError::storage_failure(format!("writing split node {}", node.id()), e))?;
        parent.add_child_node(
            &mut sibling,
            second_routing_object,
            second_parent_distance,
            second_covering_radius,
            &mut self.page_file,
        )?;

        if parent.is_overflowing() {
            debug!("Split of node {} overflows parent {}", node.id(), parent_id);
            self.handle_overflow(parent)
        } else {
            self.write_node(&mut parent)
                .map_err(|e| MTreeError::storage_failure(format!("writing parent {}", parent_id), e))?;
            Ok(())
        }
    }

    /// Puts the two halves of the former root under a new directory root.
    fn grow_root(
        &mut self,
        mut first: MTreeNode<O, D>,
        mut second: MTreeNode<O, D>,
        (first_routing_object, first_covering_radius): (O, D),
        (second_routing_object, second_covering_radius): (O, D),
    ) -> Result<(), MTreeError> {
        let mut root = MTreeNode::new_directory(self.config().dir_capacity);
        let root_id = self
            .write_node(&mut root)
            .map_err(|e| MTreeError::storage_failure("allocating new root", e))?;

        root.add_child_node(&mut first, first_routing_object, None, first_covering_radius, &mut self.page_file)?;
        root.add_child_node(&mut second, second_routing_object, None, second_covering_radius, &mut self.page_file)?;
        self.write_node(&mut root)
            .map_err(|e| MTreeError::storage_failure(format!("writing new root {}", root_id), e))?;
        self.page_file
            .set_root_id(root_id)
            .map_err(|e| MTreeError::storage_failure("recording new root", e))?;

        let old_root: NodeId = self.root_id;
        self.root_id = root_id;
        info!("M-Tree root split: node {} replaced by directory root {}", old_root, root_id);
        Ok(())
    }

    /// Routing object of the directory entry pointing at `node`, `None` for the root.
    fn enclosing_routing_object(&self, node: &MTreeNode<O, D>) -> Result<Option<O>, MTreeError> {
        let Some(parent_id) = node.parent_id() else {
            return Ok(None);
        };
        let index = node
            .index_in_parent()
            .ok_or_else(|| MTreeError::CorruptData(format!("node {} has no index in its parent", node.id())))?;
        let parent = self.read_node(parent_id)?;
        let entry = parent.entry_at(index)?;
        Ok(Some(entry.routing_object().clone()))
    }

    fn verify_if_enabled(&self) -> Result<(), MTreeError> {
        if cfg!(debug_assertions) && self.config().verify_after_mutation {
            self.check_consistency()
        } else {
            Ok(())
        }
    }
}

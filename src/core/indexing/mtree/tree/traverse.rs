use std::collections::VecDeque;
use std::marker::PhantomData;

use log::debug;

use crate::core::common::{MTreeError, NodeId};
use crate::core::distance::{Distance, DistanceFunction, IndexedObject};
use crate::core::indexing::mtree::check::check_subtree;
use crate::core::indexing::mtree::entry::{DirectoryEntry, Entry};
use crate::core::indexing::mtree::node::MTreeNode;
use crate::core::indexing::mtree::page_io::PageFile;
use crate::core::indexing::mtree::policy::SplitPolicy;

use super::MTreeIndex;

/// Shape of a tree, computed by a full traversal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TreeStatistics {
    /// Number of levels; a tree consisting of a single leaf has height 1.
    pub height: usize,
    pub num_nodes: usize,
    pub num_directory_nodes: usize,
    pub num_leaf_nodes: usize,
    pub num_objects: usize,
}

/// Level-order iterator over the nodes of a subtree.
///
/// A failed page read is yielded once and ends the iteration.
#[derive(Debug)]
pub struct BreadthFirst<'a, O, D, P: ?Sized> {
    page_file: &'a P,
    queue: VecDeque<NodeId>,
    _marker: PhantomData<fn() -> (O, D)>,
}

impl<'a, O, D, P: ?Sized> BreadthFirst<'a, O, D, P> {
    pub fn new(page_file: &'a P, start: NodeId) -> Self {
        Self { page_file, queue: VecDeque::from([start]), _marker: PhantomData }
    }
}

impl<O, D, P> Iterator for BreadthFirst<'_, O, D, P>
where
    O: IndexedObject,
    D: Distance,
    P: PageFile<O, D> + ?Sized,
{
    type Item = Result<MTreeNode<O, D>, MTreeError>;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.queue.pop_front()?;
        match self.page_file.read_page(id) {
            Ok(node) => {
                self.queue.extend(node.children().filter_map(|e| e.as_directory().map(|d| d.child_id)));
                Some(Ok(node))
            }
            Err(e) => {
                self.queue.clear();
                Some(Err(e))
            }
        }
    }
}

impl<O, D, F, P, S> MTreeIndex<O, F, P, S>
where
    O: IndexedObject,
    D: Distance,
    F: DistanceFunction<O, Output = D>,
    P: PageFile<O, D>,
    S: SplitPolicy<O, D>,
{
    /// Enumerates all nodes level by level, starting at the root.
    pub fn breadth_first(&self) -> BreadthFirst<'_, O, D, P> {
        BreadthFirst::new(&self.page_file, self.root_id)
    }

    pub fn statistics(&self) -> Result<TreeStatistics, MTreeError> {
        let mut stats = TreeStatistics::default();
        for node in self.breadth_first() {
            let node = node?;
            stats.num_nodes += 1;
            if node.is_leaf() {
                stats.num_leaf_nodes += 1;
                stats.num_objects += node.num_entries();
            } else {
                stats.num_directory_nodes += 1;
            }
        }

        // The tree is balanced: any root-to-leaf path gives the height.
        let mut node = self.root()?;
        stats.height = 1;
        while !node.is_leaf() {
            let Entry::Directory(dir) = node.entry_at(0)? else {
                break;
            };
            node = self.read_node(dir.child_id)?;
            stats.height += 1;
        }
        Ok(stats)
    }

    /// Largest distance from the routing object of `entry` to any object in
    /// its subtree, found by scanning the subtree.
    ///
    /// The stored covering radius of the entry is an upper bound of this value.
    pub fn exact_covering_radius(&self, entry: &DirectoryEntry<O, D>) -> Result<D, MTreeError> {
        let mut radius = D::null_distance();
        for node in BreadthFirst::new(&self.page_file, entry.child_id) {
            let node = node?;
            if !node.is_leaf() {
                continue;
            }
            for leaf in node.children() {
                radius = radius.max_of(self.distance_fn.distance(leaf.routing_object(), &entry.routing_object));
            }
        }
        Ok(radius)
    }

    /// Runs the consistency checks over the whole tree.
    pub fn check_consistency(&self) -> Result<(), MTreeError> {
        let root = self.root()?;
        if root.parent_id().is_some() {
            return Err(MTreeError::CorruptData(format!("root node {} has a parent", root.id())));
        }
        check_subtree(&root, &mut Vec::new(), &self.distance_fn, &self.page_file)?;
        debug!("Consistency check passed for tree rooted at {}", self.root_id);
        Ok(())
    }
}

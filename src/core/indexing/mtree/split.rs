use log::debug;

use crate::core::common::MTreeError;
use crate::core::distance::{Distance, IndexedObject};
use crate::core::indexing::mtree::entry::Entry;
use crate::core::indexing::mtree::node::MTreeNode;
use crate::core::indexing::mtree::page_io::PageFile;

impl<O: IndexedObject, D: Distance> MTreeNode<O, D> {
    /// Redistributes the entries of this node between itself and a new sibling.
    ///
    /// `first` stays in this node and `second` moves to the sibling, which has
    /// the same kind and capacity and is written to `file` before any entry is
    /// moved. For directory nodes every child is re-read, re-attached under its
    /// new parent and index, and persisted again.
    ///
    /// The two lists must be non-empty and together hold exactly the current
    /// entries of this node. Entries are added in the given order; their parent
    /// distances are taken as given. This node itself is not written back, that
    /// is left to the caller together with the parent entry update.
    pub fn split_entries<P>(
        &mut self,
        first: Vec<Entry<O, D>>,
        second: Vec<Entry<O, D>>,
        file: &mut P,
    ) -> Result<Self, MTreeError>
    where
        P: PageFile<O, D> + ?Sized,
    {
        self.validate_partition(&first, &second)?;

        let mut sibling = Self::new(self.capacity(), self.is_leaf());
        let sibling_id = file
            .write_page(&mut sibling)
            .map_err(|e| MTreeError::storage_failure(format!("allocating sibling of node {}", self.id()), e))?;

        debug!(
            "Splitting node {} ({} entries): {} stay, {} move to node {}",
            self.id(),
            first.len() + second.len(),
            first.len(),
            second.len(),
            sibling_id
        );

        self.clear_entries();
        for entry in first {
            self.re_add(entry, file)?;
        }
        for entry in second {
            sibling.re_add(entry, file)?;
        }
        Ok(sibling)
    }

    /// Appends an entry that previously lived in a node of the same kind.
    fn re_add<P>(&mut self, entry: Entry<O, D>, file: &mut P) -> Result<(), MTreeError>
    where
        P: PageFile<O, D> + ?Sized,
    {
        match entry {
            Entry::Leaf(leaf) => self.add_leaf_entry(leaf),
            Entry::Directory(dir) => {
                let mut child = file.read_page(dir.child_id).map_err(|e| {
                    MTreeError::storage_failure(format!("reading child {} during split", dir.child_id), e)
                })?;
                self.add_child_node(
                    &mut child,
                    dir.routing_object,
                    dir.parent_distance,
                    dir.covering_radius,
                    file,
                )
            }
        }
    }

    /// Checks that `first` and `second` are a partition of the current entries.
    fn validate_partition(&self, first: &[Entry<O, D>], second: &[Entry<O, D>]) -> Result<(), MTreeError> {
        if first.is_empty() || second.is_empty() {
            return Err(MTreeError::InvalidPartition(format!(
                "node {}: both sides of a split must be non-empty ({} / {})",
                self.id(),
                first.len(),
                second.len()
            )));
        }
        if let Some(entry) = first.iter().chain(second).find(|e| e.is_leaf_entry() != self.is_leaf()) {
            return Err(MTreeError::InvalidPartition(format!(
                "node {}: {} entry {} assigned to a {} node",
                self.id(),
                entry.kind_name(),
                entry,
                if self.is_leaf() { "leaf" } else { "directory" }
            )));
        }

        // Parent distances legitimately change during a split; everything
        // else must match an entry of the node exactly once.
        let mut unmatched = self.entries();
        for entry in first.iter().chain(second) {
            let Some(pos) = unmatched.iter().position(|e| same_entry(e, entry)) else {
                return Err(MTreeError::InvalidPartition(format!(
                    "node {}: {} entry {} is not an entry of the node",
                    self.id(),
                    entry.kind_name(),
                    entry
                )));
            };
            unmatched.swap_remove(pos);
        }
        if !unmatched.is_empty() {
            return Err(MTreeError::InvalidPartition(format!(
                "node {}: assignments leave {} entries unassigned",
                self.id(),
                unmatched.len()
            )));
        }
        Ok(())
    }
}

/// Equality of two entries, ignoring their parent distances.
fn same_entry<O: IndexedObject, D: Distance>(a: &Entry<O, D>, b: &Entry<O, D>) -> bool {
    match (a, b) {
        (Entry::Leaf(a), Entry::Leaf(b)) => a.object == b.object,
        (Entry::Directory(a), Entry::Directory(b)) => {
            a.child_id == b.child_id
                && a.routing_object == b.routing_object
                && a.covering_radius == b.covering_radius
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::common::NodeId;
    use crate::core::indexing::mtree::entry::LeafEntry;
    use crate::core::indexing::mtree::page_io::{MemoryPageFile, PageFileStatistics};
    use crate::core::types::FeatureVector;

    type Node = MTreeNode<FeatureVector, f64>;
    type File = MemoryPageFile<FeatureVector, f64>;

    fn obj(id: u64) -> FeatureVector {
        FeatureVector::new(id, vec![id as f64])
    }

    fn leaf_entry(id: u64) -> Entry<FeatureVector, f64> {
        Entry::Leaf(LeafEntry::new(obj(id), Some(id as f64)))
    }

    fn full_leaf(file: &mut File) -> Node {
        let mut node = Node::new_leaf(4);
        file.write_page(&mut node).unwrap();
        for id in [1, 2, 3, 4] {
            node.add_leaf_entry(LeafEntry::new(obj(id), Some(id as f64))).unwrap();
        }
        node
    }

    fn ids(node: &Node) -> Vec<u64> {
        node.children().map(|e| e.routing_object().id).collect()
    }

    #[test]
    fn test_split_leaf_node() {
        let mut file = File::new();
        // [A, B, C] plus the overflowing D.
        let mut node = full_leaf(&mut file);
        assert!(node.is_overflowing());

        let sibling = node
            .split_entries(vec![leaf_entry(1), leaf_entry(3)], vec![leaf_entry(2), leaf_entry(4)], &mut file)
            .unwrap();

        assert_eq!(ids(&node), vec![1, 3]);
        assert_eq!(ids(&sibling), vec![2, 4]);
        assert!(sibling.is_leaf());
        assert_eq!(sibling.capacity(), 4);
        assert_ne!(sibling.node_id(), node.node_id());

        // The sibling was persisted before entries moved in; the in-memory copy is newer.
        let stored = file.read_page(sibling.id()).unwrap();
        assert_eq!(stored.num_entries(), 0);
    }

    #[test]
    fn test_split_rejects_missing_entry() {
        let mut file = File::new();
        let mut node = full_leaf(&mut file);
        let result = node.split_entries(vec![leaf_entry(1)], vec![leaf_entry(2), leaf_entry(4)], &mut file);
        assert!(matches!(result, Err(MTreeError::InvalidPartition(_))));
        assert_eq!(ids(&node), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_split_rejects_empty_side() {
        let mut file = File::new();
        let mut node = full_leaf(&mut file);
        let all = node.entries();
        let result = node.split_entries(all, Vec::new(), &mut file);
        assert!(matches!(result, Err(MTreeError::InvalidPartition(_))));
        assert_eq!(file.statistics().pages, 1);
    }

    #[test]
    fn test_split_rejects_foreign_entry() {
        let mut file = File::new();
        let mut node = full_leaf(&mut file);
        let result = node.split_entries(
            vec![leaf_entry(1), leaf_entry(2)],
            vec![leaf_entry(3), leaf_entry(99)],
            &mut file,
        );
        assert!(matches!(result, Err(MTreeError::InvalidPartition(_))));
    }

    #[test]
    fn test_split_rejects_changed_object_with_same_id() {
        let mut file = File::new();
        let mut node = full_leaf(&mut file);
        let impostor = Entry::Leaf(LeafEntry::new(FeatureVector::new(4, vec![999.0]), Some(4.0)));
        let result = node.split_entries(vec![leaf_entry(1), leaf_entry(2)], vec![leaf_entry(3), impostor], &mut file);
        assert!(matches!(result, Err(MTreeError::InvalidPartition(_))));
        assert_eq!(ids(&node), vec![1, 2, 3, 4]);
        assert_eq!(node.entry_at(3).unwrap().routing_object().values, vec![4.0]);
        assert_eq!(file.statistics().pages, 1);
    }

    #[test]
    fn test_split_rejects_changed_covering_radius() {
        let mut file = File::new();
        let (mut dir, _) = full_directory(&mut file);
        let mut entries = dir.entries();
        if let Entry::Directory(d) = &mut entries[2] {
            d.covering_radius = 50.0;
        }
        let result = dir.split_entries(entries[..2].to_vec(), entries[2..].to_vec(), &mut file);
        assert!(matches!(result, Err(MTreeError::InvalidPartition(_))));
    }

    #[test]
    fn test_split_accepts_recomputed_parent_distances() {
        let mut file = File::new();
        let mut node = full_leaf(&mut file);
        let moved = |id: u64| Entry::Leaf(LeafEntry::new(obj(id), Some(0.5)));
        let sibling =
            node.split_entries(vec![leaf_entry(1), leaf_entry(2)], vec![moved(3), moved(4)], &mut file).unwrap();
        assert_eq!(sibling.entry_at(1).unwrap().parent_distance(), Some(&0.5));
    }

    /// Directory node with four persisted leaf children, the last one overflowing it.
    fn full_directory(file: &mut File) -> (Node, Vec<NodeId>) {
        let mut dir = Node::new_directory(4);
        file.write_page(&mut dir).unwrap();

        let mut child_ids: Vec<NodeId> = Vec::new();
        for id in 1..=4u64 {
            let mut child = Node::new_leaf(4);
            child.add_leaf_entry(LeafEntry::new(obj(id), Some(0.0))).unwrap();
            file.write_page(&mut child).unwrap();
            dir.add_child_node(&mut child, obj(id), Some(id as f64), 0.0, &mut *file).unwrap();
            child_ids.push(child.id());
        }
        file.write_page(&mut dir).unwrap();
        (dir, child_ids)
    }

    #[test]
    fn test_split_directory_reattaches_children() {
        let mut file = File::new();
        let (mut dir, child_ids) = full_directory(&mut file);

        let entries = dir.entries();
        let first = vec![entries[3].clone(), entries[0].clone()];
        let second = vec![entries[1].clone(), entries[2].clone()];
        let sibling = dir.split_entries(first, second, &mut file).unwrap();

        let moved = file.read_page(child_ids[1]).unwrap();
        assert_eq!(moved.parent_id(), sibling.node_id());
        assert_eq!(moved.index_in_parent(), Some(0));

        let reordered = file.read_page(child_ids[3]).unwrap();
        assert_eq!(reordered.parent_id(), dir.node_id());
        assert_eq!(reordered.index_in_parent(), Some(0));

        let kept = file.read_page(child_ids[0]).unwrap();
        assert_eq!(kept.index_in_parent(), Some(1));

        assert_eq!(ids(&dir), vec![4, 1]);
        assert_eq!(ids(&sibling), vec![2, 3]);
    }

    /// Page file that refuses writes once its budget is used up.
    #[derive(Debug)]
    struct FailingPageFile {
        inner: File,
        writes_left: usize,
    }

    impl PageFile<FeatureVector, f64> for FailingPageFile {
        fn write_page(&mut self, node: &mut Node) -> Result<NodeId, MTreeError> {
            if self.writes_left == 0 {
                return Err(MTreeError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk full")));
            }
            self.writes_left -= 1;
            self.inner.write_page(node)
        }

        fn read_page(&self, id: NodeId) -> Result<Node, MTreeError> {
            self.inner.read_page(id)
        }

        fn root_id(&self) -> Option<NodeId> {
            self.inner.root_id()
        }

        fn set_root_id(&mut self, id: NodeId) -> Result<(), MTreeError> {
            self.inner.set_root_id(id)
        }

        fn statistics(&self) -> PageFileStatistics {
            self.inner.statistics()
        }
    }

    #[test]
    fn test_split_reports_storage_failure() {
        let mut file = FailingPageFile { inner: File::new(), writes_left: 1 };
        let mut node = Node::new_leaf(4);
        file.write_page(&mut node).unwrap();
        for id in [1, 2, 3, 4] {
            node.add_leaf_entry(LeafEntry::new(obj(id), None)).unwrap();
        }
        let all = node.entries();
        let result = node.split_entries(all[..2].to_vec(), all[2..].to_vec(), &mut file);
        match result {
            Err(err @ MTreeError::StorageFailure { .. }) => assert!(err.is_fatal()),
            other => panic!("expected a storage failure, got {:?}", other),
        }
    }

    #[test]
    fn test_split_reports_missing_child_page() {
        let mut file = File::new();
        let (mut dir, child_ids) = full_directory(&mut file);
        assert!(file.invalidate(child_ids[2]));

        let entries = dir.entries();
        let result = dir.split_entries(entries[..2].to_vec(), entries[2..].to_vec(), &mut file);
        match result {
            Err(err @ MTreeError::StorageFailure { .. }) => {
                assert!(err.is_fatal());
                assert!(err.to_string().contains(&child_ids[2].to_string()));
            }
            other => panic!("expected a storage failure, got {:?}", other),
        }
    }
}

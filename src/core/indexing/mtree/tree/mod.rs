use std::marker::PhantomData;

use log::{debug, warn};

mod insert;
mod search;
mod traverse;


pub use search::QueryResult;
pub use traverse::{BreadthFirst, TreeStatistics};

use crate::core::common::{MTreeError, NodeId};
use crate::core::config::MTreeConfig;
use crate::core::distance::{Distance, DistanceFunction, IndexedObject};
use crate::core::indexing::mtree::node::MTreeNode;
use crate::core::indexing::mtree::page_io::{MemoryPageFile, PageFile};
use crate::core::indexing::mtree::policy::{FarthestPairSplit, SplitPolicy};

/// A paged M-Tree over objects of type `O` under the metric `F`.
///
/// Nodes are read from and written to the page file `P`; overflowing nodes are
/// split with the policy `S`. Structural mutations take `&mut self`, so a tree
/// has a single writer at a time.
#[derive(Debug)]
pub struct MTreeIndex<O, F, P, S = FarthestPairSplit> {
    config: MTreeConfig,
    distance_fn: F,
    page_file: P,
    policy: S,
    root_id: NodeId,
    _marker: PhantomData<fn() -> O>,
}

impl<O, D, F, P, S> MTreeIndex<O, F, P, S>
where
    O: IndexedObject,
    D: Distance,
    F: DistanceFunction<O, Output = D>,
    P: PageFile<O, D>,
    S: SplitPolicy<O, D>,
{
    /// Creates an empty tree in `page_file`. The root starts out as an empty leaf.
    pub fn create(config: MTreeConfig, distance_fn: F, mut page_file: P, policy: S) -> Result<Self, MTreeError> {
        config.validate()?;
        if let Some(existing) = page_file.root_id() {
            return Err(MTreeError::InvalidOperation(format!(
                "page file already holds a tree rooted at node {}",
                existing
            )));
        }

        let mut root = MTreeNode::new_leaf(config.leaf_capacity);
        let root_id = page_file.write_page(&mut root)?;
        page_file.set_root_id(root_id)?;
        debug!(
            "Created M-Tree ({}, dir capacity {}, leaf capacity {}) with root {}",
            distance_fn.name(),
            config.dir_capacity,
            config.leaf_capacity,
            root_id
        );

        Ok(Self { config, distance_fn, page_file, policy, root_id, _marker: PhantomData })
    }

    /// Opens the tree stored in `page_file`.
    pub fn open(config: MTreeConfig, distance_fn: F, page_file: P, policy: S) -> Result<Self, MTreeError> {
        config.validate()?;
        let root_id = page_file
            .root_id()
            .ok_or_else(|| MTreeError::InvalidOperation("page file holds no tree".to_string()))?;
        let root = page_file.read_page(root_id)?;
        if root.parent_id().is_some() {
            return Err(MTreeError::CorruptData(format!("root node {} has a parent", root_id)));
        }
        let expected = if root.is_leaf() { config.leaf_capacity } else { config.dir_capacity };
        if root.capacity() != expected {
            warn!(
                "Capacity mismatch on open. Configured: {}, root node {}: {}. New nodes use the configured capacity.",
                expected,
                root_id,
                root.capacity()
            );
        }
        debug!("Opened M-Tree with root {}", root_id);

        Ok(Self { config, distance_fn, page_file, policy, root_id, _marker: PhantomData })
    }

    pub const fn config(&self) -> &MTreeConfig {
        &self.config
    }

    pub const fn distance_function(&self) -> &F {
        &self.distance_fn
    }

    pub const fn page_file(&self) -> &P {
        &self.page_file
    }

    pub fn into_page_file(self) -> P {
        self.page_file
    }

    pub const fn root_id(&self) -> NodeId {
        self.root_id
    }

    pub fn root(&self) -> Result<MTreeNode<O, D>, MTreeError> {
        self.read_node(self.root_id)
    }

    /// Flushes the page file.
    pub fn sync(&self) -> Result<(), MTreeError> {
        self.page_file.sync()
    }

    pub(super) fn read_node(&self, id: NodeId) -> Result<MTreeNode<O, D>, MTreeError> {
        self.page_file.read_page(id)
    }

    pub(super) fn write_node(&mut self, node: &mut MTreeNode<O, D>) -> Result<NodeId, MTreeError> {
        self.page_file.write_page(node)
    }
}

impl<O, D, F> MTreeIndex<O, F, MemoryPageFile<O, D>, FarthestPairSplit>
where
    O: IndexedObject,
    D: Distance,
    F: DistanceFunction<O, Output = D>,
{
    /// A tree kept entirely in memory, split with [`FarthestPairSplit`].
    pub fn in_memory(config: MTreeConfig, distance_fn: F) -> Result<Self, MTreeError> {
        Self::create(config, distance_fn, MemoryPageFile::new(), FarthestPairSplit)
    }
}

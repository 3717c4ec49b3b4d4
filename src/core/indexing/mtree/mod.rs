//! M-Tree Indexing Structures
//!
//! A paged, balanced metric tree. Leaf nodes hold the indexed objects, directory
//! nodes hold routing objects with covering radii bounding their subtrees, and
//! every non-root entry caches its distance to the routing object of its parent.
//!
//! Nodes live in a [`PageFile`] and refer to each other only by node id.

pub mod check;
pub mod entry;
pub mod node;
pub mod page_io;
pub mod policy;
pub mod split;
pub mod tree;

pub use entry::{DirectoryEntry, Entry, LeafEntry};
pub use node::{Children, MTreeNode};
pub use page_io::{MemoryPageFile, PageFile, PageFileStatistics, PersistentPageFile};
pub use policy::{Assignments, FarthestPairSplit, RandomSplit, SplitPolicy};
pub use tree::{BreadthFirst, MTreeIndex, QueryResult, TreeStatistics};

pub use crate::core::common::ConsistencyViolation;

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::missing_docs_in_private_items)]
#![warn(clippy::panic)]
#![warn(clippy::arithmetic_side_effects)]
#![warn(clippy::cast_possible_truncation)]
#![warn(clippy::cast_possible_wrap)]
#![warn(clippy::cast_precision_loss)]
#![warn(clippy::cast_sign_loss)]
#![forbid(unsafe_code)]
#![deny(deprecated, clippy::todo, clippy::module_inception, clippy::wildcard_imports, clippy::correctness, clippy::perf)]
#![warn(unused, clippy::style, clippy::complexity, clippy::nursery, clippy::pedantic)]
#![warn(clippy::missing_const_for_fn, clippy::approx_constant, clippy::all)]

//! # oxidb-mtree: a paged M-Tree for metric similarity search
//!
//! `oxidb-mtree` indexes arbitrary objects under a metric distance function.
//! It features:
//! - Page-oriented node storage behind a pluggable `PageFile`
//! - Routing objects, covering radii and cached parent distances for pruning
//! - Node splitting driven by a pluggable promotion/partition policy
//! - Range and k-nearest-neighbor queries
//! - A debug consistency checker for the structural and metric invariants
//!
//! All cross-node references are node identifiers resolved through the page
//! file, so a tree never holds in-memory ownership cycles.

pub mod core;

// Re-export key types for easier use by library consumers
pub use crate::core::common::{MTreeError, NodeId};
pub use crate::core::config::{ConfigBuilder, MTreeConfig};
pub use crate::core::distance::{
    Distance, DistanceFunction, EuclideanDistance, IndexedObject, ManhattanDistance,
};
pub use crate::core::indexing::mtree::{
    ConsistencyViolation, DirectoryEntry, Entry, FarthestPairSplit, LeafEntry, MTreeIndex,
    MTreeNode, MemoryPageFile, PageFile, PersistentPageFile, QueryResult, RandomSplit,
    SplitPolicy, TreeStatistics,
};
pub use crate::core::types::FeatureVector;

/// Core result type for the library
pub type Result<T> = std::result::Result<T, MTreeError>;

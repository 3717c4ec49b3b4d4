//! Error types for the M-Tree index.
//!
//! `MTreeError` is returned by every fallible operation in the crate. Structural
//! and metric invariant violations found by the consistency checker are carried
//! as a `ConsistencyViolation`, which keeps the offending identifiers and the
//! stored versus computed distances for diagnosis.

use crate::core::common::types::{NodeId, ObjectId};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MTreeError {
    /// A leaf-only operation was called on a directory node, or vice versa.
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Entry index {index} out of bounds (node holds {num_entries} entries)")]
    OutOfBounds { index: usize, num_entries: usize },

    #[error("Node {node_id} is full: capacity {capacity} reached")]
    CapacityExceeded { node_id: NodeId, capacity: usize },

    /// The split assignments do not exactly cover the node, or one side is empty.
    #[error("Invalid partition: {0}")]
    InvalidPartition(String),

    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    /// The in-progress mutation failed against the page file. The tree must be
    /// reloaded from its last persisted state rather than retried in place.
    #[error("Storage failure: {context}")]
    StorageFailure {
        context: String,
        #[source]
        source: Option<Box<MTreeError>>,
    },

    #[error("Corrupt data: {0}")]
    CorruptData(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Consistency violation: {0}")]
    Consistency(#[from] ConsistencyViolation),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl MTreeError {
    /// Wraps `source` as a `StorageFailure` with the given context. An error that
    /// already is a storage failure is returned unchanged.
    #[must_use]
    pub fn storage_failure(context: impl Into<String>, source: Self) -> Self {
        match source {
            Self::StorageFailure { .. } => source,
            other => Self::StorageFailure { context: context.into(), source: Some(Box::new(other)) },
        }
    }

    /// Errors after which the tree may be inconsistent and must not be used further
    /// without reloading.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::StorageFailure { .. } | Self::Consistency(_) | Self::CorruptData(_))
    }
}

/// A broken structural or metric invariant, found by the consistency checker
/// or by the node identity check.
///
/// Distances are rendered with their `Debug` form so the violation does not
/// depend on the distance type.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsistencyViolation {
    #[error("node {node_id} holds {num_entries} entries, capacity is {capacity}")]
    Overfull { node_id: NodeId, num_entries: usize, capacity: usize },

    #[error("node {node_id} entry {index}: {found} entry in a {expected} node")]
    EntryKindMismatch {
        node_id: NodeId,
        index: usize,
        expected: &'static str,
        found: &'static str,
    },

    #[error("node {node_id} entry {index}: child {child_id} is a {found} node, siblings are {expected} nodes")]
    MixedChildKinds {
        node_id: NodeId,
        index: usize,
        child_id: NodeId,
        expected: &'static str,
        found: &'static str,
    },

    #[error("wrong parent in node {child_id}: {actual:?} != {expected}")]
    WrongParent { child_id: NodeId, expected: NodeId, actual: Option<NodeId> },

    #[error("wrong index in node {child_id}: {actual:?} != {expected}, parent is {parent_id}")]
    WrongIndex { child_id: NodeId, parent_id: NodeId, expected: usize, actual: Option<usize> },

    #[error("dist > cr: {distance} > {covering_radius} in node {node_id} at entry {index} (distance({object_id} - {routing_object_id}))")]
    CoveringRadiusExceeded {
        node_id: NodeId,
        index: usize,
        object_id: ObjectId,
        routing_object_id: ObjectId,
        distance: String,
        covering_radius: String,
    },

    #[error("entry.pd != dist: {stored} != {computed} in node {node_id} at entry {index} (distance({object_id} - {routing_object_id}))")]
    ParentDistanceMismatch {
        node_id: NodeId,
        index: usize,
        object_id: ObjectId,
        routing_object_id: ObjectId,
        stored: String,
        computed: String,
    },

    #[error("entry.pd != null: {stored} in root node {node_id} at entry {index} (object {object_id})")]
    UnexpectedParentDistance { node_id: NodeId, index: usize, object_id: ObjectId, stored: String },

    #[error("node {node_id} differs from its stored copy in {field}: {left} != {right}")]
    IdentityMismatch { node_id: NodeId, field: &'static str, left: String, right: String },
}

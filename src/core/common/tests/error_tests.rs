use crate::core::common::error::{ConsistencyViolation, MTreeError};
use std::error::Error; // Import the Error trait
use std::io;

#[test]
fn test_error_display_and_source() {
    let io_err = MTreeError::Io(io::Error::new(io::ErrorKind::NotFound, "file not found"));
    assert_eq!(format!("{}", io_err), "I/O error: file not found");
    assert!(io_err.source().is_some());

    let oob = MTreeError::OutOfBounds { index: 5, num_entries: 3 };
    assert_eq!(format!("{}", oob), "Entry index 5 out of bounds (node holds 3 entries)");
    assert!(oob.source().is_none());

    let not_found = MTreeError::NodeNotFound(42);
    assert_eq!(format!("{}", not_found), "Node not found: 42");
}

#[test]
fn test_from_std_io_error() {
    let std_io_err = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
    let err: MTreeError = std_io_err.into();
    match err {
        MTreeError::Io(e) => assert_eq!(e.kind(), io::ErrorKind::PermissionDenied),
        _ => panic!("Expected MTreeError::Io variant"),
    }
}

#[test]
fn test_storage_failure_wraps_once() {
    let wrapped = MTreeError::storage_failure("re-attaching child 7", MTreeError::NodeNotFound(7));
    assert!(wrapped.is_fatal());
    assert!(wrapped.to_string().contains("re-attaching child 7"));
    let source = wrapped.source().expect("storage failure keeps its cause");
    assert_eq!(source.to_string(), "Node not found: 7");

    let rewrapped = MTreeError::storage_failure("outer context", wrapped);
    match rewrapped {
        MTreeError::StorageFailure { context, .. } => assert_eq!(context, "re-attaching child 7"),
        other => panic!("Expected StorageFailure, got {:?}", other),
    }
}

#[test]
fn test_consistency_violation_reports_distances() {
    let violation = ConsistencyViolation::ParentDistanceMismatch {
        node_id: 3,
        index: 1,
        object_id: 10,
        routing_object_id: 11,
        stored: "2.0".to_string(),
        computed: "2.5".to_string(),
    };
    let err: MTreeError = violation.clone().into();
    assert!(err.is_fatal());
    let msg = err.to_string();
    assert!(msg.contains("2.0 != 2.5"));
    assert!(msg.contains("node 3"));
    assert!(matches!(err, MTreeError::Consistency(v) if v == violation));
}

#[test]
fn test_caller_bugs_are_not_fatal() {
    assert!(!MTreeError::InvalidOperation("Node is a leaf node!".to_string()).is_fatal());
    assert!(!MTreeError::InvalidPartition("empty side".to_string()).is_fatal());
    assert!(!MTreeError::OutOfBounds { index: 0, num_entries: 0 }.is_fatal());
}

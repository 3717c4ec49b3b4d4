pub mod error;
pub use error::{ConsistencyViolation, MTreeError};
pub mod types;
pub use types::{NodeId, ObjectId, NO_ID};

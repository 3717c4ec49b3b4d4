/// Identifier of a node in a page file. Serialized as a 32-bit signed integer.
pub type NodeId = i32;

/// Identifier of an indexed object, used in results and diagnostics.
pub type ObjectId = u64;

/// On-page encoding of an absent node identifier or index.
pub const NO_ID: i32 = -1;

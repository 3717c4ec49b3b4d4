pub mod mtree;

pub use mtree::MTreeIndex;

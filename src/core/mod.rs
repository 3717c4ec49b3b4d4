pub mod common;
pub mod config;
pub mod distance;
pub mod indexing;
pub mod types;
pub use self::config::MTreeConfig;

//! Storage engine for history trees.
//!
//! This crate provides:
//! - Block file for fixed-offset header and node I/O
//! - Interval codecs and the attribute interval type
//! - Core and leaf nodes with their on-disk block layout
//! - Branch policies deciding branch placement and child selection
//! - The history tree engine: build, close, reopen and query

mod codec;
mod disk;
mod header;
mod interval;
mod node;
mod policy;
mod tree;

pub use codec::{I64Codec, IntervalCodec, StateValue, StateValueCodec};
pub use disk::BlockFile;
pub use header::TreeHeader;
pub use interval::Interval;
pub use node::{ChildRef, Node, NodeLayout};
pub use policy::{BranchPolicy, ClassicPolicy, CLASSIC_FILE_VERSION, CLASSIC_MAGIC_NUMBER};
pub use tree::HistoryTree;

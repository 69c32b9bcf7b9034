//! Error types for the history tree.

use thiserror::Error;

/// Result type alias using HistreeError.
pub type Result<T> = std::result::Result<T, HistreeError>;

/// Errors that can occur while building or querying a history tree.
#[derive(Debug, Error)]
pub enum HistreeError {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Block {seq} truncated: expected {expected} bytes, got {actual}")]
    BlockTruncated {
        seq: u32,
        expected: usize,
        actual: usize,
    },

    #[error("Node {seq} corrupted: {reason}")]
    NodeCorrupted { seq: u32, reason: String },

    #[error("Decode error: {0}")]
    Decode(String),

    // File header errors
    #[error("History file does not exist: {0}")]
    FileNotFound(String),

    #[error("History file is empty: {0}")]
    EmptyFile(String),

    #[error("History file header truncated: expected {expected} bytes, got {actual}")]
    HeaderTruncated { expected: usize, actual: usize },

    #[error("Wrong magic number: expected {expected:#010x}, got {actual:#010x}")]
    BadMagic { expected: u32, actual: u32 },

    #[error("File format version mismatch: expected {expected}, got {actual}")]
    FileVersionMismatch { expected: u32, actual: u32 },

    #[error("Provider version mismatch: expected {expected}, got {actual}")]
    ProviderVersionMismatch { expected: i32, actual: i32 },

    #[error("History file header checksum mismatch: stored={stored:#010x}, computed={computed:#010x}")]
    HeaderChecksumMismatch { stored: u32, computed: u32 },

    #[error("Inconsistent history tree: {0}")]
    InconsistentTree(String),

    // Insertion errors
    #[error("Interval start {start} precedes tree start {tree_start}")]
    IntervalBeforeTreeStart { start: i64, tree_start: i64 },

    #[error("Invalid interval: start {start} > end {end}")]
    InvalidInterval { start: i64, end: i64 },

    #[error("Interval too large: {size} bytes (max {max})")]
    IntervalTooLarge { size: usize, max: usize },

    #[error("Node {seq} is sealed")]
    NodeSealed { seq: u32 },

    #[error("Node {seq} already has {max} children")]
    ChildCapacityExceeded { seq: u32, max: usize },

    #[error("Node {seq} is not a core node")]
    NotCoreNode { seq: u32 },

    #[error("Cannot seal node {seq} at {end}: it holds an interval ending at {content_end}")]
    SealBeforeContent { seq: u32, end: i64, content_end: i64 },

    #[error("History tree is closed for writing")]
    TreeClosed,

    #[error("Cannot close tree at {requested}: intervals already reach {tree_end}")]
    CloseBeforeTreeEnd { requested: i64, tree_end: i64 },

    // Query errors
    #[error("Invalid time range: min {min} > max {max}")]
    InvalidRange { min: i64, max: i64 },

    #[error("Node not found: {seq}")]
    NodeNotFound { seq: u32 },

    // Configuration errors
    #[error("Configuration error: {0}")]
    InvalidConfig(String),
}

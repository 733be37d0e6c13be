//! Crate-wide error type for the paging engine.

use std::io;

/// Result type for paging-engine operations.
pub type VtResult<T> = Result<T, VirtualTextureError>;

/// Errors surfaced by the paging engine.
///
/// Configuration problems indicate a programming or setup bug and are raised
/// at construction time. Store problems are runtime conditions; the caller
/// decides whether to fall back or treat the asset as unavailable.
#[derive(Debug, thiserror::Error)]
pub enum VirtualTextureError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("store I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("corrupted store: {0}")]
    CorruptedStore(String),

    #[error("store version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("codec error: {0}")]
    Codec(String),

    #[error("atlas capacity exceeded: {0}")]
    CapacityExceeded(String),
}

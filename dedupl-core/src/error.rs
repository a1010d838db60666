use thiserror::Error;

#[derive(Error, Debug)]
pub enum DedupError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Format error: {0}")]
    Format(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error(
        "out of range: {offset}+{length} exceeds storage_{segment_size} size {store_size}"
    )]
    OutOfRange {
        segment_size: usize,
        offset: u64,
        length: u64,
        store_size: u64,
    },

    #[error("corrupt segment #{chunk_index} (offset={offset}, length={length}): {reason}")]
    CorruptSegment {
        chunk_index: u64,
        offset: u64,
        length: u64,
        reason: String,
    },

    #[error("no recipe for file {file_id} at {segment_size}_{algorithm}")]
    RecipeNotFound {
        file_id: u64,
        segment_size: usize,
        algorithm: String,
    },

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl<T> From<std::sync::PoisonError<T>> for DedupError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        DedupError::StorageUnavailable(format!("lock poisoned: {e}"))
    }
}

// Convenient crate-wide result type
pub type Result<T> = std::result::Result<T, DedupError>;

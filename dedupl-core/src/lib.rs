#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod layout;

pub mod util {
    pub mod hash_forward;
    pub mod varint;
}

pub mod chunking {
    pub mod fixed;
}

pub mod hash;

pub mod container {
    pub mod journal;
}

pub mod catalog;
pub mod recipe;
pub mod registry;
pub mod store;

pub mod source;
pub mod stats;

pub mod ingest;

pub mod restore {
    pub mod reconstruct;
    pub mod stream;
}

pub mod domain;
pub mod repo;
pub mod repo_factory;
pub mod repo_fs;

// Re-exports: stable API surface
pub use config::EngineConfig;
pub use error::{DedupError, Result};
pub use hash::{CONTENT_ALGORITHM, Digest, HashAlgorithm};
pub use ingest::Ingestor;
pub use layout::TableKey;
pub use repo::DedupRepo;
pub use repo_factory::{Backend, open_repo};
pub use repo_fs::FsDedupRepo;
pub use restore::reconstruct::Reconstructor;
pub use source::{FileSource, MemorySource, Source};
pub use stats::{IngestOutcome, IngestReport};

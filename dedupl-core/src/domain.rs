// dedupl_core/src/domain.rs
use serde::Serialize;

#[derive(Clone, Debug, Serialize)]
pub struct FileRow {
    pub file_id: u64,
    pub name: String,
    pub content_hash: String,
    pub size: u64,
    /// Completed passes as `"<segment_size>_<algorithm>"`.
    pub processing_done: Vec<String>,
    pub registered_at: i64,
}

#[derive(Clone, Debug, Serialize)]
pub struct ChunkRow {
    pub chunk_index: u64,
    pub digest: String,
    pub offset: u64,
    pub length: u64,
    pub ref_count: u64,
    pub file_off: u64,
    pub pct_end: f32,
}

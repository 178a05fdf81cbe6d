//! Domain types shared by the chunker, vector store and engine.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub type ChunkId = String;

/// Open, ordered string-keyed map carrying pass-through record fields.
/// `serde_json::Map` with `preserve_order` keeps source field order and
/// guarantees key uniqueness.
pub type Meta = serde_json::Map<String, Value>;

/// Tag for the retrievable unit type. Only question/answer pairs exist
/// today; the enum leaves room for other chunk shapes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    QaPair,
}

/// A retrievable unit derived from one question/answer record.
///
/// - `id`: stable identifier, content-derived (blake3 of `text`) when the
///   source record carries no natural id
/// - `text`: the "Question: ...\nAnswer: ..." payload used for embedding
/// - `metadata`: `question`, `answer`, timestamps and all remaining source
///   fields, verbatim
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub id: ChunkId,
    pub text: String,
    pub metadata: Meta,
    pub kind: ChunkKind,
}

/// One search hit as returned to callers.
///
/// `similarity` is in `[0, 1]`, higher is better. `rank` is 1-based and
/// assigned after threshold filtering, so ranks are always contiguous.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: ChunkId,
    pub text: String,
    pub metadata: Meta,
    pub similarity: f32,
    pub rank: usize,
}

/// Health of one tenant's index as reported by `stats`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "status", content = "error")]
pub enum IndexStatus {
    Ready,
    Error(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexStats {
    pub tenant: String,
    pub count: usize,
    #[serde(flatten)]
    pub status: IndexStatus,
}

use crate::error::Result;
use crate::types::{Chunk, ChunkId, SearchResult};

/// A pluggable embedding model. Implementations return raw pooled vectors;
/// normalization and caching live above this trait.
pub trait Embedder: Send + Sync {
    /// Stable identity of the backend (e.g. `e5-multilingual-large:d1024`).
    /// Determines dimension hints and query prefixing.
    fn id(&self) -> &str;

    /// Dimensionality, if statically known for this backend identity.
    /// `None` means the service probes it with a throwaway embed call.
    fn dim_hint(&self) -> Option<usize>;

    /// Maximum input length in tokens; longer inputs are truncated.
    fn max_len(&self) -> usize;

    fn embed_text(&self, text: &str) -> Result<Vec<f32>>;
}

/// A pluggable nearest-neighbor store holding per-tenant collections of
/// (chunk, vector) pairs keyed by chunk id.
///
/// "Tenant never indexed" and "tenant indexed but empty" are deliberately
/// indistinguishable: both read as count 0 and empty search results.
#[async_trait::async_trait]
pub trait VectorIndex: Send + Sync {
    /// Lazily create the tenant's collection. Idempotent.
    async fn get_or_create(&self, tenant: &str) -> Result<()>;

    /// Insert semantics: a chunk id already present in the collection, or
    /// repeated within `entries`, fails the whole call.
    async fn add(&self, tenant: &str, entries: &[(Chunk, Vec<f32>)]) -> Result<()>;

    /// Overwrite-by-id semantics; re-upserting unchanged content is a no-op
    /// in effect.
    async fn upsert(&self, tenant: &str, entries: &[(Chunk, Vec<f32>)]) -> Result<()>;

    /// At most `top_k` results, descending similarity, stable ties,
    /// 1-based rank. Fewer results when the collection is smaller.
    async fn search(&self, tenant: &str, query: &[f32], top_k: usize) -> Result<Vec<SearchResult>>;

    /// Absent ids are a successful no-op.
    async fn delete(&self, tenant: &str, ids: &[ChunkId]) -> Result<()>;

    async fn count(&self, tenant: &str) -> Result<usize>;

    /// Removes the tenant's persisted state entirely. Irreversible.
    async fn drop_collection(&self, tenant: &str) -> Result<()>;
}

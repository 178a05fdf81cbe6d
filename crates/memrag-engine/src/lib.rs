#![deny(warnings)]
#![deny(dead_code)]
#![deny(unused_variables)]
#![deny(unused_imports)]

//! Orchestration layer: export-file reconciliation ([`IndexManager`]) and
//! the query façade ([`RagEngine`]).

pub mod engine;
pub mod indexer;
mod locks;

pub use engine::{RagEngine, DEFAULT_QUERY_CACHE_CAPACITY, DEFAULT_THRESHOLD, DEFAULT_TOP_K};
pub use indexer::IndexManager;

use std::sync::Arc;
use std::time::Duration;

use memrag_core::error::{Error, Result};
use memrag_embed::EmbeddingService;

pub(crate) const DEFAULT_EMBED_TIMEOUT: Duration = Duration::from_secs(60);

/// Run a batch embed on the blocking pool under a timeout. Embedding is
/// CPU-bound model inference; it must never stall the async executor or
/// block an operation indefinitely.
pub(crate) async fn embed_blocking(
    embeddings: Arc<EmbeddingService>,
    texts: Vec<String>,
    timeout: Duration,
) -> Result<Vec<Vec<f32>>> {
    let task = tokio::task::spawn_blocking(move || embeddings.embed_batch(&texts));
    match tokio::time::timeout(timeout, task).await {
        Err(_) => Err(Error::Timeout(format!("embedding exceeded {}s", timeout.as_secs()))),
        Ok(Err(join_err)) => Err(Error::Embedding(format!("embedding task failed: {join_err}"))),
        Ok(Ok(result)) => result,
    }
}

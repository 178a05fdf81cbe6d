//! Top-level query façade.
//!
//! `search` is fail-open: embedding or store errors degrade to an empty
//! result list with a warning, never an error to the caller. Index-mutation
//! paths return explicit results and synchronously evict the tenant's query
//! cache before returning, so a search that starts after `update_index`
//! returns can never observe pre-update cached results.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use lru::LruCache;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use memrag_core::error::Result;
use memrag_core::traits::VectorIndex;
use memrag_core::types::SearchResult;
use memrag_embed::EmbeddingService;

use crate::indexer::IndexManager;
use crate::{embed_blocking, DEFAULT_EMBED_TIMEOUT};

pub const DEFAULT_TOP_K: usize = 5;
pub const DEFAULT_THRESHOLD: f32 = 0.5;
pub const DEFAULT_QUERY_CACHE_CAPACITY: usize = 256;

/// Query-cache key. The threshold is keyed by bit pattern so the `f32`
/// stays hashable without equality surprises.
#[derive(Clone, PartialEq, Eq, Hash)]
struct QueryKey {
    tenant: String,
    query: String,
    top_k: usize,
    threshold_bits: u32,
}

pub struct RagEngine {
    indexer: IndexManager,
    store: Arc<dyn VectorIndex>,
    embeddings: Arc<EmbeddingService>,
    cache: Mutex<LruCache<QueryKey, Vec<SearchResult>>>,
    // Bumped by invalidation. A search snapshots its tenant's generation
    // before hitting the store and only caches results if the generation is
    // still current, so an in-flight search overlapping an index update can
    // never re-populate the cache with pre-update results.
    generations: Mutex<HashMap<String, u64>>,
    embed_timeout: Duration,
    cancel: CancellationToken,
}

impl RagEngine {
    pub fn new(
        store: Arc<dyn VectorIndex>,
        embeddings: Arc<EmbeddingService>,
        export_dir: PathBuf,
    ) -> Self {
        let indexer =
            IndexManager::new(Arc::clone(&store), Arc::clone(&embeddings), export_dir);
        let capacity = NonZeroUsize::new(DEFAULT_QUERY_CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        Self {
            indexer,
            store,
            embeddings,
            cache: Mutex::new(LruCache::new(capacity)),
            generations: Mutex::new(HashMap::new()),
            embed_timeout: DEFAULT_EMBED_TIMEOUT,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_query_cache_capacity(mut self, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        self.cache = Mutex::new(LruCache::new(capacity));
        self
    }

    pub fn with_embed_timeout(mut self, embed_timeout: Duration) -> Self {
        self.indexer = self.indexer.with_embed_timeout(embed_timeout);
        self.embed_timeout = embed_timeout;
        self
    }

    pub fn index_manager(&self) -> &IndexManager {
        &self.indexer
    }

    /// Token observed by long-running reconciliation passes; cancel it to
    /// stop them between lines.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// `search` with the default `top_k` and similarity threshold.
    pub async fn search_default(&self, query: &str, tenant: &str) -> Vec<SearchResult> {
        self.search(query, tenant, DEFAULT_TOP_K, DEFAULT_THRESHOLD).await
    }

    /// Most relevant QA chunks for `query` in `tenant`'s collection, highest
    /// similarity first, below-threshold hits dropped, ranks contiguous.
    /// Never fails: any internal error yields an empty list.
    pub async fn search(
        &self,
        query: &str,
        tenant: &str,
        top_k: usize,
        threshold: f32,
    ) -> Vec<SearchResult> {
        let key = QueryKey {
            tenant: tenant.to_string(),
            query: query.to_string(),
            top_k,
            threshold_bits: threshold.to_bits(),
        };
        if let Some(hit) = self.lock_cache().get(&key) {
            return hit.clone();
        }

        let generation = self.generation(tenant);
        match self.search_inner(query, tenant, top_k, threshold).await {
            Ok(results) => {
                // The generation check runs under the cache lock: either the
                // invalidation bumped the generation before this check (no
                // insert), or its eviction sweep is still queued behind this
                // lock and removes the entry right after.
                let mut cache = self.lock_cache();
                if self.generation(tenant) == generation {
                    cache.put(key, results.clone());
                }
                drop(cache);
                results
            }
            Err(e) => {
                warn!(tenant, error = %e, "search degraded to empty results");
                vec![]
            }
        }
    }

    async fn search_inner(
        &self,
        query: &str,
        tenant: &str,
        top_k: usize,
        threshold: f32,
    ) -> Result<Vec<SearchResult>> {
        let vectors = embed_blocking(
            Arc::clone(&self.embeddings),
            vec![query.to_string()],
            self.embed_timeout,
        )
        .await?;
        let query_vector = vectors.into_iter().next().unwrap_or_default();

        let raw = self.store.search(tenant, &query_vector, top_k).await?;
        let mut filtered: Vec<SearchResult> = raw
            .into_iter()
            .filter(|r| r.similarity >= threshold)
            .collect();
        for (i, r) in filtered.iter_mut().enumerate() {
            r.rank = i + 1;
        }
        Ok(filtered)
    }

    /// Reconcile one tenant, then evict that tenant's cached queries before
    /// returning. Returns the number of chunks upserted.
    pub async fn update_index(&self, tenant: &str) -> Result<usize> {
        let result = self.indexer.update_tenant_index(tenant, &self.cancel).await;
        self.invalidate_tenant(tenant);
        result
    }

    /// Reconcile many tenants independently; failures are per tenant. Every
    /// touched tenant's cache entries are evicted before this returns.
    pub async fn batch_update_indices(&self, tenants: &[String]) -> HashMap<String, bool> {
        let results = self.indexer.rebuild_all(tenants, &self.cancel).await;
        for tenant in results.keys() {
            self.invalidate_tenant(tenant);
        }
        results
    }

    pub fn clear_query_cache(&self) {
        self.lock_cache().clear();
    }

    fn invalidate_tenant(&self, tenant: &str) {
        {
            let mut generations = self
                .generations
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            *generations.entry(tenant.to_string()).or_insert(0) += 1;
        }
        let mut cache = self.lock_cache();
        let stale: Vec<QueryKey> = cache
            .iter()
            .filter(|(k, _)| k.tenant == tenant)
            .map(|(k, _)| k.clone())
            .collect();
        for key in stale {
            cache.pop(&key);
        }
    }

    fn generation(&self, tenant: &str) -> u64 {
        let generations = self
            .generations
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        generations.get(tenant).copied().unwrap_or(0)
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, LruCache<QueryKey, Vec<SearchResult>>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

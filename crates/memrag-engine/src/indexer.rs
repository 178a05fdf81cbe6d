//! Reconciles per-tenant export files into the vector index.
//!
//! The export file (`<export_dir>/<tenant>.jsonl`) is the durable source of
//! truth; the index is a rebuildable derivative. A reconciliation pass is
//! partial-failure tolerant: malformed lines and invalid chunks are skipped
//! with a warning, everything valid is embedded and upserted in one batch.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use memrag_core::chunker::Chunker;
use memrag_core::error::{Error, Result};
use memrag_core::traits::VectorIndex;
use memrag_core::types::{Chunk, IndexStats, IndexStatus, Meta};
use memrag_embed::EmbeddingService;

use crate::locks::TenantLocks;
use crate::{embed_blocking, DEFAULT_EMBED_TIMEOUT};

pub struct IndexManager {
    store: Arc<dyn VectorIndex>,
    embeddings: Arc<EmbeddingService>,
    chunker: Chunker,
    export_dir: PathBuf,
    locks: TenantLocks,
    embed_timeout: Duration,
}

impl IndexManager {
    pub fn new(
        store: Arc<dyn VectorIndex>,
        embeddings: Arc<EmbeddingService>,
        export_dir: PathBuf,
    ) -> Self {
        Self {
            store,
            embeddings,
            chunker: Chunker::default(),
            export_dir,
            locks: TenantLocks::default(),
            embed_timeout: DEFAULT_EMBED_TIMEOUT,
        }
    }

    pub fn with_embed_timeout(mut self, embed_timeout: Duration) -> Self {
        self.embed_timeout = embed_timeout;
        self
    }

    pub fn export_path(&self, tenant: &str) -> PathBuf {
        self.export_dir.join(format!("{tenant}.jsonl"))
    }

    /// Full reconciliation pass for one tenant. Returns the number of chunks
    /// upserted. A missing export file means an empty tenant: the collection
    /// is ensured and the pass succeeds with 0.
    ///
    /// Holds the tenant's write lock for the whole pass; passes for other
    /// tenants run independently.
    pub async fn update_tenant_index(
        &self,
        tenant: &str,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        let lock = self.locks.for_tenant(tenant);
        let _guard = lock.lock().await;
        self.reconcile(tenant, cancel).await
    }

    async fn reconcile(&self, tenant: &str, cancel: &CancellationToken) -> Result<usize> {
        let path = self.export_path(tenant);
        if !path.exists() {
            info!(tenant, path = %path.display(), "no export file, ensuring empty collection");
            self.store.get_or_create(tenant).await?;
            return Ok(0);
        }

        let file = File::open(&path)
            .map_err(|e| Error::Export(format!("open {}: {e}", path.display())))?;
        let mut chunks: Vec<Chunk> = Vec::new();
        let mut skipped = 0usize;
        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line_no = idx + 1;
            if cancel.is_cancelled() {
                return Err(Error::Cancelled(format!(
                    "reconciliation of {tenant} stopped at line {line_no}"
                )));
            }
            let line = line
                .map_err(|e| Error::Export(format!("read {} line {line_no}: {e}", path.display())))?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let record: Meta = match serde_json::from_str(line) {
                Ok(record) => record,
                Err(e) => {
                    let err = Error::Parse { line: line_no, message: e.to_string() };
                    warn!(tenant, error = %err, "skipping malformed export line");
                    skipped += 1;
                    continue;
                }
            };
            let chunk = self.chunker.from_record(&record);
            if let Err(e) = self.chunker.validate(&chunk) {
                warn!(tenant, line = line_no, error = %e, "skipping invalid chunk");
                skipped += 1;
                continue;
            }
            chunks.push(chunk);
        }

        if chunks.is_empty() {
            info!(tenant, skipped, "export file held no valid records");
            self.store.get_or_create(tenant).await?;
            return Ok(0);
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors =
            embed_blocking(Arc::clone(&self.embeddings), texts, self.embed_timeout).await?;
        let entries: Vec<(Chunk, Vec<f32>)> = chunks.into_iter().zip(vectors).collect();
        self.store.upsert(tenant, &entries).await?;
        info!(tenant, upserted = entries.len(), skipped, "reconciliation complete");
        Ok(entries.len())
    }

    /// Real-time single-record path: validate, embed and upsert one chunk
    /// without a full re-export.
    pub async fn update_single(&self, tenant: &str, chunk: Chunk) -> Result<()> {
        self.chunker.validate(&chunk)?;
        let vectors = embed_blocking(
            Arc::clone(&self.embeddings),
            vec![chunk.text.clone()],
            self.embed_timeout,
        )
        .await?;
        let vector = vectors
            .into_iter()
            .next()
            .ok_or_else(|| Error::Embedding("empty embedding batch".into()))?;

        let lock = self.locks.for_tenant(tenant);
        let _guard = lock.lock().await;
        self.store.upsert(tenant, &[(chunk, vector)]).await
    }

    pub async fn delete_chunk(&self, tenant: &str, id: &str) -> Result<()> {
        let lock = self.locks.for_tenant(tenant);
        let _guard = lock.lock().await;
        self.store.delete(tenant, &[id.to_string()]).await
    }

    /// Rebuild every listed tenant; one tenant failing never stops the
    /// others. Cancellation stops the sweep at the current tenant.
    pub async fn rebuild_all(
        &self,
        tenants: &[String],
        cancel: &CancellationToken,
    ) -> HashMap<String, bool> {
        let mut results = HashMap::new();
        for tenant in tenants {
            match self.update_tenant_index(tenant, cancel).await {
                Ok(n) => {
                    info!(tenant, upserted = n, "rebuilt tenant index");
                    results.insert(tenant.clone(), true);
                }
                Err(Error::Cancelled(msg)) => {
                    warn!(tenant, %msg, "rebuild cancelled");
                    results.insert(tenant.clone(), false);
                    break;
                }
                Err(e) => {
                    error!(tenant, error = %e, "tenant rebuild failed");
                    results.insert(tenant.clone(), false);
                }
            }
        }
        results
    }

    /// Count-backed health report. `Ready` whenever the count query
    /// succeeds, including for empty or never-synced tenants.
    pub async fn stats(&self, tenant: &str) -> IndexStats {
        match self.store.count(tenant).await {
            Ok(count) => IndexStats {
                tenant: tenant.to_string(),
                count,
                status: IndexStatus::Ready,
            },
            Err(e) => IndexStats {
                tenant: tenant.to_string(),
                count: 0,
                status: IndexStatus::Error(e.to_string()),
            },
        }
    }
}

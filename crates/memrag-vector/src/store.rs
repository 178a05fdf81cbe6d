//! LanceDB-backed vector index: one table per tenant, cosine distance.
//!
//! The store is a derived, rebuildable cache of the export files. A missing
//! tenant table reads as an empty collection everywhere, so "never indexed"
//! and "indexed but empty" are indistinguishable by design.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use arrow_array::{
    FixedSizeListArray, Float32Array, RecordBatch, RecordBatchIterator, StringArray,
    types::Float32Type,
};
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{connect, Connection, DistanceType};

use memrag_core::error::{Error, Result};
use memrag_core::traits::VectorIndex;
use memrag_core::types::{Chunk, ChunkId, ChunkKind, SearchResult};

use crate::schema::build_collection_schema;

pub const DEFAULT_OP_TIMEOUT: Duration = Duration::from_secs(30);

pub struct LanceVectorIndex {
    db: Connection,
    dim: usize,
    op_timeout: Duration,
}

impl LanceVectorIndex {
    /// Open (or create) a store at `uri`. `dim` fixes the vector dimension
    /// for every collection in this store; vectors of any other length are
    /// rejected at write time.
    pub async fn open(uri: &str, dim: usize) -> Result<Self> {
        let db = connect(uri)
            .execute()
            .await
            .map_err(|e| Error::Store(format!("open {uri}: {e}")))?;
        Ok(Self { db, dim, op_timeout: DEFAULT_OP_TIMEOUT })
    }

    pub fn with_op_timeout(mut self, op_timeout: Duration) -> Self {
        self.op_timeout = op_timeout;
        self
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    async fn timed<T, F>(&self, what: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(res) => res,
            Err(_) => Err(Error::Timeout(format!(
                "{what} exceeded {}s",
                self.op_timeout.as_secs()
            ))),
        }
    }

    async fn table_exists(&self, name: &str) -> Result<bool> {
        let names = self
            .db
            .table_names()
            .execute()
            .await
            .map_err(|e| Error::Store(format!("list tables: {e}")))?;
        Ok(names.contains(&name.to_string()))
    }

    async fn ensure_collection(&self, name: &str) -> Result<()> {
        if self.table_exists(name).await? {
            return Ok(());
        }
        let schema = build_collection_schema(self.dim);
        let iter = RecordBatchIterator::new(vec![].into_iter(), schema);
        match self.db.create_table(name, Box::new(iter)).execute().await {
            Ok(_) => Ok(()),
            Err(e) => {
                // Lost a creation race: fine, the table is there.
                if self.table_exists(name).await.unwrap_or(false) {
                    tracing::debug!(table = name, error = %e, "create_table raced, table exists");
                    Ok(())
                } else {
                    Err(Error::Store(format!("create table {name}: {e}")))
                }
            }
        }
    }

    fn entries_to_batch(&self, entries: &[(Chunk, Vec<f32>)]) -> Result<RecordBatch> {
        let mut ids = Vec::with_capacity(entries.len());
        let mut texts = Vec::with_capacity(entries.len());
        let mut metas = Vec::with_capacity(entries.len());
        let mut kinds = Vec::with_capacity(entries.len());
        let mut vectors: Vec<Option<Vec<Option<f32>>>> = Vec::with_capacity(entries.len());
        for (chunk, vector) in entries {
            if vector.len() != self.dim {
                return Err(Error::Store(format!(
                    "vector for chunk {} has dim {}, store expects {}",
                    chunk.id,
                    vector.len(),
                    self.dim
                )));
            }
            ids.push(chunk.id.clone());
            texts.push(chunk.text.clone());
            metas.push(
                serde_json::to_string(&chunk.metadata)
                    .map_err(|e| Error::Store(format!("serialize metadata: {e}")))?,
            );
            kinds.push(kind_tag(chunk.kind).to_string());
            vectors.push(Some(vector.iter().map(|&x| Some(x)).collect()));
        }
        let schema = build_collection_schema(self.dim);
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(ids)),
                Arc::new(StringArray::from(texts)),
                Arc::new(StringArray::from(metas)),
                Arc::new(StringArray::from(kinds)),
                Arc::new(FixedSizeListArray::from_iter_primitive::<Float32Type, _, _>(
                    vectors.into_iter(),
                    self.dim as i32,
                )),
            ],
        )
        .map_err(|e| Error::Store(format!("build record batch: {e}")))
    }

    async fn add_inner(&self, tenant: &str, entries: &[(Chunk, Vec<f32>)]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let name = collection_name(tenant);
        let mut seen = std::collections::HashSet::new();
        for (chunk, _) in entries {
            if !seen.insert(chunk.id.as_str()) {
                return Err(Error::Store(format!(
                    "duplicate chunk id {} within one add call",
                    chunk.id
                )));
            }
        }
        self.ensure_collection(&name).await?;
        let table = self.open_table(&name).await?;
        // LanceDB does not enforce unique ids, so insert semantics need an
        // explicit collision check.
        let filter = id_filter(entries.iter().map(|(c, _)| c.id.as_str()));
        let existing = table
            .count_rows(Some(filter))
            .await
            .map_err(|e| Error::Store(format!("check ids in {name}: {e}")))?;
        if existing > 0 {
            return Err(Error::Store(format!(
                "{existing} chunk id(s) already present in {name}; use upsert to overwrite"
            )));
        }
        let batch = self.entries_to_batch(entries)?;
        let schema = batch.schema();
        let reader = Box::new(RecordBatchIterator::new(vec![Ok(batch)].into_iter(), schema));
        table
            .add(reader)
            .execute()
            .await
            .map_err(|e| Error::Store(format!("add to {name}: {e}")))?;
        Ok(())
    }

    async fn upsert_inner(&self, tenant: &str, entries: &[(Chunk, Vec<f32>)]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let name = collection_name(tenant);
        self.ensure_collection(&name).await?;
        let table = self.open_table(&name).await?;
        let batch = self.entries_to_batch(entries)?;
        let schema = batch.schema();
        let reader = Box::new(RecordBatchIterator::new(vec![Ok(batch)].into_iter(), schema));
        let mut merge = table.merge_insert(&["id"]);
        merge.when_matched_update_all(None).when_not_matched_insert_all();
        merge
            .execute(reader)
            .await
            .map_err(|e| Error::Store(format!("upsert into {name}: {e}")))?;
        Ok(())
    }

    async fn search_inner(
        &self,
        tenant: &str,
        query: &[f32],
        top_k: usize,
    ) -> Result<Vec<SearchResult>> {
        let name = collection_name(tenant);
        if top_k == 0 || !self.table_exists(&name).await? {
            return Ok(vec![]);
        }
        let table = self.open_table(&name).await?;
        let mut stream = table
            .vector_search(query)
            .map_err(|e| Error::Store(format!("build query on {name}: {e}")))?
            .distance_type(DistanceType::Cosine)
            .limit(top_k)
            .execute()
            .await
            .map_err(|e| Error::Store(format!("search {name}: {e}")))?;

        let mut results = Vec::new();
        while let Some(batch) = stream
            .try_next()
            .await
            .map_err(|e| Error::Store(format!("read results from {name}: {e}")))?
        {
            collect_hits(&batch, &mut results)?;
        }
        // LanceDB returns ascending distance; the stable sort keeps storage
        // order for ties.
        results.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(top_k);
        for (i, r) in results.iter_mut().enumerate() {
            r.rank = i + 1;
        }
        Ok(results)
    }

    async fn delete_inner(&self, tenant: &str, ids: &[ChunkId]) -> Result<()> {
        let name = collection_name(tenant);
        if ids.is_empty() || !self.table_exists(&name).await? {
            return Ok(());
        }
        let table = self.open_table(&name).await?;
        let filter = id_filter(ids.iter().map(String::as_str));
        table
            .delete(&filter)
            .await
            .map_err(|e| Error::Store(format!("delete from {name}: {e}")))?;
        Ok(())
    }

    async fn count_inner(&self, tenant: &str) -> Result<usize> {
        let name = collection_name(tenant);
        if !self.table_exists(&name).await? {
            return Ok(0);
        }
        let table = self.open_table(&name).await?;
        table
            .count_rows(None)
            .await
            .map_err(|e| Error::Store(format!("count {name}: {e}")))
    }

    async fn drop_inner(&self, tenant: &str) -> Result<()> {
        let name = collection_name(tenant);
        if !self.table_exists(&name).await? {
            return Ok(());
        }
        self.db
            .drop_table(&name)
            .await
            .map_err(|e| Error::Store(format!("drop {name}: {e}")))
    }

    async fn open_table(&self, name: &str) -> Result<lancedb::Table> {
        self.db
            .open_table(name)
            .execute()
            .await
            .map_err(|e| Error::Store(format!("open table {name}: {e}")))
    }
}

#[async_trait::async_trait]
impl VectorIndex for LanceVectorIndex {
    async fn get_or_create(&self, tenant: &str) -> Result<()> {
        let name = collection_name(tenant);
        self.timed("get_or_create", self.ensure_collection(&name)).await
    }

    async fn add(&self, tenant: &str, entries: &[(Chunk, Vec<f32>)]) -> Result<()> {
        self.timed("add", self.add_inner(tenant, entries)).await
    }

    async fn upsert(&self, tenant: &str, entries: &[(Chunk, Vec<f32>)]) -> Result<()> {
        self.timed("upsert", self.upsert_inner(tenant, entries)).await
    }

    async fn search(&self, tenant: &str, query: &[f32], top_k: usize) -> Result<Vec<SearchResult>> {
        self.timed("search", self.search_inner(tenant, query, top_k)).await
    }

    async fn delete(&self, tenant: &str, ids: &[ChunkId]) -> Result<()> {
        self.timed("delete", self.delete_inner(tenant, ids)).await
    }

    async fn count(&self, tenant: &str) -> Result<usize> {
        self.timed("count", self.count_inner(tenant)).await
    }

    async fn drop_collection(&self, tenant: &str) -> Result<()> {
        self.timed("drop_collection", self.drop_inner(tenant)).await
    }
}

/// Tenant → table name. Identifier-safe characters pass through; anything
/// else is replaced and the name disambiguated with a content hash so
/// distinct tenants can never share a table.
pub fn collection_name(tenant: &str) -> String {
    let mut sanitized = String::with_capacity(tenant.len());
    let mut changed = false;
    for ch in tenant.chars() {
        if ch.is_ascii_alphanumeric() || ch == '_' || ch == '-' {
            sanitized.push(ch);
        } else {
            sanitized.push('_');
            changed = true;
        }
    }
    if sanitized.is_empty() {
        changed = true;
    }
    if changed {
        let digest = blake3::hash(tenant.as_bytes()).to_hex().to_string();
        format!("qa_{sanitized}_{}", &digest[..8])
    } else {
        format!("qa_{sanitized}")
    }
}

fn kind_tag(kind: ChunkKind) -> &'static str {
    match kind {
        ChunkKind::QaPair => "qa_pair",
    }
}

/// `id IN ('a', 'b')` filter with single quotes escaped.
fn id_filter<'a>(ids: impl Iterator<Item = &'a str>) -> String {
    let quoted: Vec<String> = ids.map(|id| format!("'{}'", id.replace('\'', "''"))).collect();
    format!("id IN ({})", quoted.join(", "))
}

fn collect_hits(batch: &RecordBatch, out: &mut Vec<SearchResult>) -> Result<()> {
    let ids = string_column(batch, "id")?;
    let texts = string_column(batch, "text")?;
    let metas = string_column(batch, "metadata")?;
    let distances = batch
        .column_by_name("_distance")
        .and_then(|c| c.as_any().downcast_ref::<Float32Array>());
    for i in 0..batch.num_rows() {
        let distance = distances.map(|d| d.value(i)).unwrap_or(0.0);
        let similarity = (1.0 - distance).clamp(0.0, 1.0);
        let metadata = serde_json::from_str(metas.value(i))
            .map_err(|e| Error::Store(format!("corrupt metadata for {}: {e}", ids.value(i))))?;
        out.push(SearchResult {
            id: ids.value(i).to_string(),
            text: texts.value(i).to_string(),
            metadata,
            similarity,
            rank: 0,
        });
    }
    Ok(())
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| Error::Store(format!("column {name} missing or mistyped")))
}

#![deny(warnings)]
#![deny(dead_code)]
#![deny(unused_variables)]
#![deny(unused_imports)]

//! Embedding layer: pluggable backends behind a caching service.
//!
//! `EmbeddingService` owns one [`Embedder`] backend plus a bounded LRU cache
//! keyed by `(text, normalize)`. Model-specific query prefixing and L2
//! normalization happen here so callers never see them.

pub mod device;
pub mod hash;
pub mod model;
pub mod tokenize;

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock, PoisonError};

use lru::LruCache;
use tracing::warn;

use memrag_core::error::{Error, Result};
use memrag_core::traits::Embedder;

use crate::hash::HashEmbedder;
use crate::model::XlmRobertaEmbedder;

pub const DEFAULT_CACHE_CAPACITY: usize = 4096;
const FAKE_DIM: usize = 1024;

type CacheKey = (String, bool);

pub struct EmbeddingService {
    backend: Box<dyn Embedder>,
    cache: Mutex<LruCache<CacheKey, Vec<f32>>>,
    dim: OnceLock<usize>,
}

impl EmbeddingService {
    pub fn new(backend: Box<dyn Embedder>, cache_capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(cache_capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            backend,
            cache: Mutex::new(LruCache::new(capacity)),
            dim: OnceLock::new(),
        }
    }

    pub fn backend_id(&self) -> &str {
        self.backend.id()
    }

    /// Embed one text. Cache hit short-circuits; on a miss the text is
    /// prefixed per backend identity, embedded, optionally L2-normalized
    /// and cached.
    pub fn embed(&self, text: &str, normalize: bool) -> Result<Vec<f32>> {
        let key = (text.to_string(), normalize);
        if let Some(hit) = self.lock_cache().get(&key) {
            return Ok(hit.clone());
        }

        let prefixed;
        let input = match query_prefix(self.backend.id()) {
            Some(prefix) => {
                prefixed = format!("{prefix}{text}");
                prefixed.as_str()
            }
            None => text,
        };
        let mut vector = self.backend.embed_text(input)?;
        if normalize {
            l2_normalize(&mut vector);
        }
        let _ = self.dim.set(vector.len());
        self.lock_cache().put(key, vector.clone());
        Ok(vector)
    }

    /// Embed many texts, normalized, 1:1 with input order. One item failing
    /// yields a zero vector for that slot and a warning; it never fails the
    /// batch. Only an unusable backend (dimension unknown) errors.
    pub fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let dim = self.dimension()?;
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            match self.embed(text, true) {
                Ok(v) => out.push(v),
                Err(e) => {
                    warn!(error = %e, "embedding failed for one batch item, using zero vector");
                    out.push(vec![0f32; dim]);
                }
            }
        }
        Ok(out)
    }

    /// Embedding dimension `D`: backend hint when known, otherwise probed
    /// once with a throwaway embed call and memoized.
    pub fn dimension(&self) -> Result<usize> {
        if let Some(d) = self.dim.get() {
            return Ok(*d);
        }
        if let Some(hint) = self.backend.dim_hint() {
            let _ = self.dim.set(hint);
            return Ok(hint);
        }
        let probe = self.embed("dimension probe", true)?;
        Ok(probe.len())
    }

    /// Liveness probe: true when the backend can produce a vector.
    pub fn is_ready(&self) -> bool {
        self.dimension().is_ok()
    }

    pub fn clear_cache(&self) {
        self.lock_cache().clear();
    }

    /// Drop the backend and the cache, releasing model resources.
    pub fn unload(self) {
        drop(self);
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, LruCache<CacheKey, Vec<f32>>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Cosine similarity mapped to `[0, 1]` via `(cos + 1) / 2`, clamped to
/// absorb floating-point overshoot. Zero-norm inputs score 0.
pub fn similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    let cos = dot / (na * nb);
    ((cos + 1.0) / 2.0).clamp(0.0, 1.0)
}

fn l2_normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// e5-family models expect a "query: " prefix on inputs; a configuration
/// concern keyed off the backend identity, invisible to callers.
fn query_prefix(backend_id: &str) -> Option<&'static str> {
    if backend_id.to_lowercase().contains("e5") {
        Some("query: ")
    } else {
        None
    }
}

#[derive(Debug, Clone, Default)]
pub struct EmbedOptions {
    pub model_dir: Option<PathBuf>,
    pub fallback_model_dir: Option<PathBuf>,
    pub cache_capacity: Option<usize>,
    pub use_fake: bool,
}

/// Build the service from explicit options: primary model first, then the
/// fallback identity, then fail fatally. This is a startup-time failure,
/// never a per-call one.
pub fn build_service(opts: &EmbedOptions) -> Result<EmbeddingService> {
    let capacity = opts.cache_capacity.unwrap_or(DEFAULT_CACHE_CAPACITY);
    if opts.use_fake {
        tracing::info!("using deterministic hash embedder");
        return Ok(EmbeddingService::new(Box::new(HashEmbedder::new(FAKE_DIM)), capacity));
    }

    let primary = opts
        .model_dir
        .clone()
        .or_else(|| resolve_model_dir(PRIMARY_MODEL_DIRS, "APP_MODEL_DIR"))
        .ok_or_else(|| Error::BackendUnavailable("no embedding model directory found".into()))?;
    let primary_err = match XlmRobertaEmbedder::load(&primary) {
        Ok(backend) => return Ok(EmbeddingService::new(Box::new(backend), capacity)),
        Err(e) => e,
    };
    warn!(error = %primary_err, "primary embedding backend failed, trying fallback");

    let fallback = opts
        .fallback_model_dir
        .clone()
        .or_else(|| resolve_model_dir(FALLBACK_MODEL_DIRS, "APP_FALLBACK_MODEL_DIR"));
    if let Some(dir) = fallback {
        match XlmRobertaEmbedder::load(&dir) {
            Ok(backend) => return Ok(EmbeddingService::new(Box::new(backend), capacity)),
            Err(fallback_err) => {
                return Err(Error::BackendUnavailable(format!(
                    "primary: {primary_err}; fallback: {fallback_err}"
                )));
            }
        }
    }
    Err(Error::BackendUnavailable(format!(
        "primary: {primary_err}; no fallback model directory found"
    )))
}

/// Env-driven construction: `APP_USE_FAKE_EMBEDDINGS=1` selects the hash
/// embedder, otherwise the local model directories are probed.
pub fn default_service() -> Result<EmbeddingService> {
    let use_fake = std::env::var("APP_USE_FAKE_EMBEDDINGS")
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    build_service(&EmbedOptions { use_fake, ..EmbedOptions::default() })
}

const PRIMARY_MODEL_DIRS: [&str; 2] =
    ["../models/multilingual-e5-large", "models/multilingual-e5-large"];
const FALLBACK_MODEL_DIRS: [&str; 2] =
    ["../models/bge-large-zh-v1.5", "models/bge-large-zh-v1.5"];

fn resolve_model_dir(candidates: [&str; 2], env_key: &str) -> Option<PathBuf> {
    if let Ok(dir) = std::env::var(env_key) {
        let p = PathBuf::from(&dir);
        if p.exists() {
            return Some(p);
        }
    }
    candidates
        .iter()
        .map(Path::new)
        .find(|p| p.exists())
        .map(Path::to_path_buf)
}

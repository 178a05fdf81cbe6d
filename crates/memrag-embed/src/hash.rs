//! Deterministic feature-hashing embedder.
//!
//! Buckets whitespace tokens plus character unigrams and bigrams with
//! xxhash, so texts sharing substrings land near each other in the vector
//! space. No model
//! weights, no I/O: fast, deterministic, good enough for tests and offline
//! development. Selected with `APP_USE_FAKE_EMBEDDINGS=1`.

use std::hash::{Hash, Hasher};

use twox_hash::XxHash64;

use memrag_core::error::Result;
use memrag_core::traits::Embedder;

pub struct HashEmbedder {
    dim: usize,
    id: String,
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self {
        let id = format!("hash-features:d{dim}");
        Self { dim, id }
    }
}

fn bucket(feature: &str, dim: usize) -> usize {
    let mut hasher = XxHash64::with_seed(0);
    feature.hash(&mut hasher);
    (hasher.finish() as usize) % dim
}

impl Embedder for HashEmbedder {
    fn id(&self) -> &str {
        &self.id
    }

    fn dim_hint(&self) -> Option<usize> {
        Some(self.dim)
    }

    fn max_len(&self) -> usize {
        8192
    }

    fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        let mut v = vec![0f32; self.dim];
        for token in text.split_whitespace() {
            v[bucket(token, self.dim)] += 1.0;
        }
        // Character unigrams and bigrams catch scripts without whitespace
        // word breaks.
        let chars: Vec<char> = text.chars().filter(|c| !c.is_whitespace()).collect();
        for ch in &chars {
            v[bucket(&ch.to_string(), self.dim)] += 1.0;
        }
        for pair in chars.windows(2) {
            let feature: String = pair.iter().collect();
            v[bucket(&feature, self.dim)] += 1.0;
        }
        Ok(v)
    }
}

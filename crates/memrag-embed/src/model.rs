//! Candle-backed XLM-Roberta encoder (multilingual-e5 / bge family).
//!
//! Loads tokenizer, config and weights from a local model directory and
//! produces the first-token (CLS) representation, the pooling convention of
//! the e5 models. Normalization is applied above, in the service.

use std::path::{Path, PathBuf};

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::xlm_roberta::{Config as XLMRobertaConfig, XLMRobertaModel};
use tokenizers::Tokenizer;

use memrag_core::error::{Error, Result};
use memrag_core::traits::Embedder;

use crate::device::select_device;
use crate::tokenize::tokenize_on_device;

const MAX_LEN: usize = 512;

pub struct XlmRobertaEmbedder {
    model: XLMRobertaModel,
    tokenizer: Tokenizer,
    device: Device,
    id: String,
    dim: usize,
}

impl XlmRobertaEmbedder {
    /// Load a model from `model_dir` (tokenizer.json + config.json +
    /// model.safetensors or pytorch_model.bin). Any failure here is a
    /// startup failure, reported as `BackendUnavailable` by the service.
    pub fn load(model_dir: &Path) -> Result<Self> {
        let device = select_device();
        tracing::info!(dir = %model_dir.display(), "loading embedding model");

        let tokenizer_path = model_dir.join("tokenizer.json");
        let tokenizer = Tokenizer::from_file(&tokenizer_path).map_err(|e| {
            Error::Embedding(format!("load tokenizer {}: {e}", tokenizer_path.display()))
        })?;

        let config_path = model_dir.join("config.json");
        let config_text = std::fs::read_to_string(&config_path)
            .map_err(|e| Error::Embedding(format!("read {}: {e}", config_path.display())))?;
        let config: XLMRobertaConfig = serde_json::from_str(&config_text)
            .map_err(|e| Error::Embedding(format!("parse {}: {e}", config_path.display())))?;

        let dtype = DType::F32;
        let vb = load_weights(model_dir, dtype, &device)?;
        let model = XLMRobertaModel::new(&config, vb)
            .map_err(|e| Error::Embedding(format!("build model: {e}")))?;

        let dim = config.hidden_size;
        let model_name = model_dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "xlm-roberta".to_string());
        let id = format!("{model_name}:d{dim}");
        tracing::info!(%id, "embedding model loaded");
        Ok(Self { model, tokenizer, device, id, dim })
    }
}

fn load_weights(model_dir: &Path, dtype: DType, device: &Device) -> Result<VarBuilder<'static>> {
    let safetensors = model_dir.join("model.safetensors");
    if safetensors.exists() {
        // Safety: mmap of a file we just checked exists; candle validates
        // the safetensors header before use.
        return unsafe { VarBuilder::from_mmaped_safetensors(&[safetensors], dtype, device) }
            .map_err(|e| Error::Embedding(format!("load safetensors: {e}")));
    }
    let pickle: PathBuf = model_dir.join("pytorch_model.bin");
    let weights = candle_core::pickle::read_all(&pickle)
        .map_err(|e| Error::Embedding(format!("load {}: {e}", pickle.display())))?;
    let weights_map: std::collections::HashMap<String, Tensor> = weights.into_iter().collect();
    Ok(VarBuilder::from_tensors(weights_map, dtype, device))
}

impl Embedder for XlmRobertaEmbedder {
    fn id(&self) -> &str {
        &self.id
    }

    fn dim_hint(&self) -> Option<usize> {
        Some(self.dim)
    }

    fn max_len(&self) -> usize {
        MAX_LEN
    }

    fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        let (input_ids, attention_mask) =
            tokenize_on_device(&self.tokenizer, text, MAX_LEN, &self.device)?;
        let token_type_ids = Tensor::zeros((1, MAX_LEN), DType::I64, &self.device)
            .map_err(|e| Error::Embedding(format!("token_type_ids: {e}")))?;

        let hidden = self
            .model
            .forward(&input_ids, &attention_mask, &token_type_ids, None, None, None)
            .map_err(|e| Error::Embedding(format!("forward pass: {e}")))?;

        // First-token (CLS) pooling: hidden[:, 0, :]
        let cls = hidden
            .narrow(1, 0, 1)
            .and_then(|t| t.squeeze(1))
            .and_then(|t| t.squeeze(0))
            .map_err(|e| Error::Embedding(format!("pooling: {e}")))?;
        let out: Vec<f32> = cls
            .to_device(&Device::Cpu)
            .and_then(|t| t.to_vec1())
            .map_err(|e| Error::Embedding(format!("extract vector: {e}")))?;
        if out.len() != self.dim {
            return Err(Error::Embedding(format!(
                "expected {} dims, model produced {}",
                self.dim,
                out.len()
            )));
        }
        Ok(out)
    }
}

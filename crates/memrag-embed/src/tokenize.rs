use candle_core::{Device, Tensor};
use tokenizers::Tokenizer;

use memrag_core::error::{Error, Result};

/// Encode `text` to fixed-length id/mask tensors on `device`. Inputs longer
/// than `max_len` are truncated, shorter ones padded with the XLM-R pad id.
pub fn tokenize_on_device(
    tokenizer: &Tokenizer,
    text: &str,
    max_len: usize,
    device: &Device,
) -> Result<(Tensor, Tensor)> {
    let enc = tokenizer
        .encode(text, true)
        .map_err(|e| Error::Embedding(format!("tokenization failed: {e}")))?;
    let mut ids = enc.get_ids().to_vec();
    let mut mask = enc.get_attention_mask().to_vec();
    if ids.len() > max_len {
        ids.truncate(max_len);
        mask.truncate(max_len);
    }
    if ids.len() < max_len {
        let pad = max_len - ids.len();
        ids.extend(std::iter::repeat(1).take(pad));
        mask.extend(std::iter::repeat(0).take(pad));
    }
    let input_ids = tensor_2d(ids, max_len, device)?;
    let attention_mask = tensor_2d(mask, max_len, device)?;
    Ok((input_ids, attention_mask))
}

fn tensor_2d(values: Vec<u32>, max_len: usize, device: &Device) -> Result<Tensor> {
    Tensor::from_iter(values, device)
        .and_then(|t| t.reshape((1, max_len)))
        .map_err(|e| Error::Embedding(format!("tensor build failed: {e}")))
}

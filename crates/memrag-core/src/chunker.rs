//! Turns question/answer records into validated, uniquely-identified chunks.
//!
//! Ids are stable: an explicit record id wins, otherwise the blake3 hash of
//! the chunk text, so re-chunking unchanged content always yields the same
//! chunk and re-indexing stays idempotent.

use chrono::Utc;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::types::{Chunk, ChunkKind, Meta};

/// Record fields consumed while building the chunk; everything else passes
/// through to metadata verbatim.
const CONSUMED_FIELDS: [&str; 4] = ["_id", "id", "question", "answer"];

/// Sentence-terminal punctuation, half-width and full-width.
const SENTENCE_TERMINALS: [char; 6] = ['.', '!', '?', '。', '！', '？'];

pub struct Chunker {
    max_chunk_size: usize,
}

impl Default for Chunker {
    fn default() -> Self {
        Self { max_chunk_size: 1000 }
    }
}

impl Chunker {
    pub fn new(max_chunk_size: usize) -> Self {
        Self { max_chunk_size }
    }

    /// Build a chunk from one source record (a parsed export line).
    ///
    /// `question`/`answer` default to the empty string when absent. The id
    /// comes from `_id` or `id` when the record carries one, else from the
    /// content hash. `createdAt`/`updatedAt` are defaulted to now when the
    /// source record lacks them, matching what the record store emits.
    pub fn from_record(&self, record: &Meta) -> Chunk {
        let question = string_field(record, "question");
        let answer = string_field(record, "answer");
        let text = qa_text(&question, &answer);

        let id = record_id(record).unwrap_or_else(|| content_id(&text));

        let mut metadata = Meta::new();
        metadata.insert("question".to_string(), Value::String(question));
        metadata.insert("answer".to_string(), Value::String(answer));
        for (key, value) in record {
            if CONSUMED_FIELDS.contains(&key.as_str()) {
                continue;
            }
            metadata.insert(key.clone(), value.clone());
        }
        let now = Utc::now().to_rfc3339();
        for ts_key in ["createdAt", "updatedAt"] {
            metadata
                .entry(ts_key.to_string())
                .or_insert_with(|| Value::String(now.clone()));
        }

        Chunk { id, text, metadata, kind: ChunkKind::QaPair }
    }

    /// Build a chunk directly from a question/answer pair. The id is always
    /// content-derived. `extra` fields override the defaults on collision.
    pub fn from_pair(&self, question: &str, answer: &str, extra: Option<Meta>) -> Chunk {
        let text = qa_text(question, answer);
        let id = content_id(&text);

        let mut metadata = Meta::new();
        metadata.insert("question".to_string(), Value::String(question.to_string()));
        metadata.insert("answer".to_string(), Value::String(answer.to_string()));
        if let Some(extra) = extra {
            for (key, value) in extra {
                metadata.insert(key, value);
            }
        }

        Chunk { id, text, metadata, kind: ChunkKind::QaPair }
    }

    /// Split `text` into segments of at most `max_size` characters along
    /// sentence boundaries.
    ///
    /// Terminal punctuation stays with its sentence. Sentences are packed
    /// greedily; a single sentence longer than `max_size` is emitted whole
    /// rather than force-split. Concatenating the segments reproduces the
    /// input exactly.
    pub fn split_long_text(&self, text: &str, max_size: Option<usize>) -> Vec<String> {
        let max_size = max_size.unwrap_or(self.max_chunk_size).max(1);
        if text.chars().count() <= max_size {
            return vec![text.to_string()];
        }

        let mut segments = Vec::new();
        let mut current = String::new();
        let mut current_len = 0usize;
        for (sentence, len) in split_sentences(text) {
            if current_len + len <= max_size {
                current.push_str(&sentence);
                current_len += len;
                continue;
            }
            if !current.is_empty() {
                segments.push(std::mem::take(&mut current));
                current_len = 0;
            }
            if len > max_size {
                // Oversized sentence: emit whole, never split mid-sentence.
                segments.push(sentence);
            } else {
                current = sentence;
                current_len = len;
            }
        }
        if !current.is_empty() {
            segments.push(current);
        }
        segments
    }

    /// Check the chunk invariants: non-blank id and text, `qa_pair` kind.
    /// Metadata key uniqueness is guaranteed by the `Meta` type itself.
    /// Failures are returned, not panicked, so batch callers can skip the
    /// item and continue.
    pub fn validate(&self, chunk: &Chunk) -> Result<()> {
        if chunk.id.trim().is_empty() {
            return Err(Error::Validation("id is empty".to_string()));
        }
        if chunk.text.trim().is_empty() {
            return Err(Error::Validation("text is empty".to_string()));
        }
        if chunk.kind != ChunkKind::QaPair {
            return Err(Error::Validation("kind must be qa_pair".to_string()));
        }
        Ok(())
    }
}

/// Serialize a chunk to one line of JSON. Lossless round trip with
/// [`from_line`] for all fields.
pub fn to_line(chunk: &Chunk) -> Result<String> {
    serde_json::to_string(chunk).map_err(|e| Error::Validation(format!("serialize chunk: {e}")))
}

pub fn from_line(line: &str) -> Result<Chunk> {
    serde_json::from_str(line).map_err(|e| Error::Validation(format!("deserialize chunk: {e}")))
}

/// Content-derived chunk id: blake3 of the chunk text.
pub fn content_id(text: &str) -> String {
    blake3::hash(text.as_bytes()).to_hex().to_string()
}

fn qa_text(question: &str, answer: &str) -> String {
    format!("Question: {question}\nAnswer: {answer}")
}

fn string_field(record: &Meta, key: &str) -> String {
    match record.get(key) {
        Some(Value::String(s)) => s.clone(),
        _ => String::new(),
    }
}

/// Explicit record id, if the record carries a usable one.
fn record_id(record: &Meta) -> Option<String> {
    for key in ["_id", "id"] {
        match record.get(key) {
            Some(Value::String(s)) if !s.trim().is_empty() => return Some(s.clone()),
            Some(Value::Number(n)) => return Some(n.to_string()),
            _ => {}
        }
    }
    None
}

/// Iterate sentences with their terminal punctuation attached, yielding
/// `(sentence, char_count)`. A trailing run without terminal punctuation is
/// yielded as the final sentence, so no characters are ever dropped.
fn split_sentences(text: &str) -> Vec<(String, usize)> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;
    let mut in_terminal_run = false;
    for ch in text.chars() {
        let is_terminal = SENTENCE_TERMINALS.contains(&ch);
        if in_terminal_run && !is_terminal {
            sentences.push((std::mem::take(&mut current), current_len));
            current_len = 0;
        }
        current.push(ch);
        current_len += 1;
        in_terminal_run = is_terminal;
    }
    if !current.is_empty() {
        sentences.push((current, current_len));
    }
    sentences
}

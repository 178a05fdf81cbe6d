use serde_json::{json, Value};

use memrag_core::chunker::{self, Chunker};
use memrag_core::types::{ChunkKind, Meta};

fn record(value: Value) -> Meta {
    match value {
        Value::Object(map) => map,
        _ => panic!("expected object"),
    }
}

#[test]
fn from_record_builds_text_and_metadata() {
    let chunker = Chunker::default();
    let rec = record(json!({
        "question": "你的童年在哪里度过？",
        "answer": "我在江南水乡长大",
        "relationshipType": "family",
        "custom_field": 42
    }));

    let chunk = chunker.from_record(&rec);

    assert_eq!(chunk.text, "Question: 你的童年在哪里度过？\nAnswer: 我在江南水乡长大");
    assert_eq!(chunk.kind, ChunkKind::QaPair);
    assert_eq!(chunk.metadata["question"], "你的童年在哪里度过？");
    assert_eq!(chunk.metadata["answer"], "我在江南水乡长大");
    // Unknown fields pass through verbatim
    assert_eq!(chunk.metadata["relationshipType"], "family");
    assert_eq!(chunk.metadata["custom_field"], 42);
    // Timestamps are defaulted when the record lacks them
    assert!(chunk.metadata.contains_key("createdAt"));
    assert!(chunk.metadata.contains_key("updatedAt"));
}

#[test]
fn explicit_record_id_wins_over_content_hash() {
    let chunker = Chunker::default();
    let rec = record(json!({"_id": "rec-7", "question": "q", "answer": "a"}));
    assert_eq!(chunker.from_record(&rec).id, "rec-7");

    let rec = record(json!({"id": 12, "question": "q", "answer": "a"}));
    assert_eq!(chunker.from_record(&rec).id, "12");
}

#[test]
fn content_id_is_stable_across_paths() {
    let chunker = Chunker::default();
    let rec = record(json!({"question": "q1", "answer": "a1"}));

    let from_record = chunker.from_record(&rec);
    let from_pair = chunker.from_pair("q1", "a1", None);
    let again = chunker.from_pair("q1", "a1", None);

    assert_eq!(from_record.id, from_pair.id, "same content, same id");
    assert_eq!(from_pair.id, again.id, "id is deterministic");
    assert!(!from_pair.id.is_empty());
}

#[test]
fn from_pair_extra_metadata_overrides_defaults() {
    let chunker = Chunker::default();
    let extra = record(json!({"source": "api", "question": "overridden"}));
    let chunk = chunker.from_pair("q", "a", Some(extra));

    assert_eq!(chunk.metadata["source"], "api");
    assert_eq!(chunk.metadata["question"], "overridden");
    assert_eq!(chunk.metadata["answer"], "a");
}

#[test]
fn missing_question_and_answer_default_to_empty() {
    let chunker = Chunker::default();
    let rec = record(json!({"other": true}));
    let chunk = chunker.from_record(&rec);
    assert_eq!(chunk.text, "Question: \nAnswer: ");
}

#[test]
fn split_preserves_every_character() {
    let chunker = Chunker::default();
    let text = "第一句话。第二句话！第三句话？Short one. And a tail without punctuation";
    let segments = chunker.split_long_text(text, Some(8));

    let rejoined: String = segments.concat();
    assert_eq!(rejoined, text, "no characters lost or reordered");
    assert!(segments.len() > 1);
}

#[test]
fn split_respects_max_size_except_oversized_sentences() {
    let chunker = Chunker::default();
    let text = "短句。这一句话特别长远远超过了限制所以必须整句输出。又一短句。";
    let max = 6;
    let segments = chunker.split_long_text(text, Some(max));

    for seg in &segments {
        let len = seg.chars().count();
        if len > max {
            // Only a single oversized sentence may exceed the limit
            let terminals = seg.chars().filter(|c| "。！？.!?".contains(*c)).count();
            assert_eq!(terminals, 1, "oversized segment is one sentence: {seg}");
        }
    }
    assert_eq!(segments.concat(), text);
}

#[test]
fn split_keeps_punctuation_with_its_sentence() {
    let chunker = Chunker::default();
    let segments = chunker.split_long_text("Hello there! 你好吗？", Some(13));
    assert_eq!(segments, vec!["Hello there!".to_string(), " 你好吗？".to_string()]);
}

#[test]
fn short_text_is_returned_whole() {
    let chunker = Chunker::default();
    let segments = chunker.split_long_text("tiny", Some(100));
    assert_eq!(segments, vec!["tiny".to_string()]);
}

#[test]
fn validate_rejects_blank_fields() {
    let chunker = Chunker::default();
    let good = chunker.from_pair("q", "a", None);
    assert!(chunker.validate(&good).is_ok());

    let mut blank_id = good.clone();
    blank_id.id = "   ".to_string();
    assert!(chunker.validate(&blank_id).is_err());

    let mut blank_text = good.clone();
    blank_text.text = String::new();
    assert!(chunker.validate(&blank_text).is_err());
}

#[test]
fn line_round_trip_is_lossless() {
    let chunker = Chunker::default();
    let extra = record(json!({"tags": ["a", "b"], "weight": 0.5}));
    let chunk = chunker.from_pair("你的童年在哪里度过？", "我在江南水乡长大", Some(extra));

    let line = chunker::to_line(&chunk).expect("serialize");
    assert!(!line.contains('\n'), "single-line record");

    let back = chunker::from_line(&line).expect("deserialize");
    assert_eq!(back, chunk);
}

#[test]
fn from_line_rejects_garbage() {
    assert!(chunker::from_line("not-json").is_err());
}

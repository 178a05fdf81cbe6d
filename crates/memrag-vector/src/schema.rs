use arrow_schema::{DataType, Field, Schema};
use std::sync::Arc;

/// Arrow schema for one tenant collection. `metadata` is the chunk's
/// metadata map serialized to a JSON string; the vector dimension is fixed
/// per store instance.
pub fn build_collection_schema(dim: usize) -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new("text", DataType::Utf8, false),
        Field::new("metadata", DataType::Utf8, false),
        Field::new("kind", DataType::Utf8, false),
        Field::new(
            "vector",
            DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), dim as i32),
            true,
        ),
    ]))
}

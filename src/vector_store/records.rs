// Arrow conversions for the `documents` table

use anyhow::{Context, Result, anyhow};
use arrow::array::{Array, FixedSizeListArray, Float32Array, StringArray, UInt32Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Metadata of a chunk as returned from search
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub file_name: String,
    pub file_type: String,
    pub file_path: Option<String>,
    pub page_label: Option<String>,
}

/// One row of the `documents` table
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub metadata: ChunkMetadata,
    pub chunk_index: u32,
    pub text: String,
    pub indexed_at: String,
}

/// A chunk returned from similarity search
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedChunk {
    pub text: String,
    pub metadata: ChunkMetadata,
    pub chunk_index: u32,
    /// Cosine similarity, higher is closer
    pub score: f32,
}

/// Schema of the `documents` table for vectors of `dimension` floats
#[inline]
pub fn table_schema(dimension: usize) -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new(
            "vector",
            DataType::FixedSizeList(
                Arc::new(Field::new("item", DataType::Float32, true)),
                dimension as i32,
            ),
            false,
        ),
        Field::new("file_name", DataType::Utf8, false),
        Field::new("file_type", DataType::Utf8, false),
        Field::new("file_path", DataType::Utf8, true),
        Field::new("page_label", DataType::Utf8, true),
        Field::new("chunk_index", DataType::UInt32, false),
        Field::new("text", DataType::Utf8, false),
        Field::new("indexed_at", DataType::Utf8, false),
    ]))
}

/// Vector dimension declared by a `documents` table schema
#[inline]
pub fn schema_dimension(schema: &Schema) -> Option<usize> {
    schema
        .fields()
        .iter()
        .find(|field| field.name() == "vector")
        .and_then(|field| match field.data_type() {
            DataType::FixedSizeList(_, size) => Some(*size as usize),
            _ => None,
        })
}

#[inline]
pub fn records_to_batch(records: &[ChunkRecord], dimension: usize) -> Result<RecordBatch> {
    let len = records.len();

    let mut flat_values = Vec::with_capacity(len * dimension);
    for record in records {
        if record.vector.len() != dimension {
            return Err(anyhow!(
                "Embedding for chunk {} has {} dimensions, table expects {}",
                record.id,
                record.vector.len(),
                dimension
            ));
        }
        flat_values.extend_from_slice(&record.vector);
    }

    let field = Arc::new(Field::new("item", DataType::Float32, true));
    let vector_array = FixedSizeListArray::try_new(
        field,
        dimension as i32,
        Arc::new(Float32Array::from(flat_values)),
        None,
    )
    .context("Failed to create vector array")?;

    let arrays: Vec<Arc<dyn Array>> = vec![
        Arc::new(StringArray::from_iter_values(
            records.iter().map(|r| r.id.as_str()),
        )),
        Arc::new(vector_array),
        Arc::new(StringArray::from_iter_values(
            records.iter().map(|r| r.metadata.file_name.as_str()),
        )),
        Arc::new(StringArray::from_iter_values(
            records.iter().map(|r| r.metadata.file_type.as_str()),
        )),
        Arc::new(StringArray::from(
            records
                .iter()
                .map(|r| r.metadata.file_path.as_deref())
                .collect::<Vec<_>>(),
        )),
        Arc::new(StringArray::from(
            records
                .iter()
                .map(|r| r.metadata.page_label.as_deref())
                .collect::<Vec<_>>(),
        )),
        Arc::new(UInt32Array::from_iter_values(
            records.iter().map(|r| r.chunk_index),
        )),
        Arc::new(StringArray::from_iter_values(
            records.iter().map(|r| r.text.as_str()),
        )),
        Arc::new(StringArray::from_iter_values(
            records.iter().map(|r| r.indexed_at.as_str()),
        )),
    ];

    RecordBatch::try_new(table_schema(dimension), arrays).context("Failed to create record batch")
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .ok_or_else(|| anyhow!("Missing {} column", name))?
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| anyhow!("Invalid {} column type", name))
}

fn optional_value(column: &StringArray, row: usize) -> Option<String> {
    (!column.is_null(row)).then(|| column.value(row).to_string())
}

/// Parse one batch of search results; `_distance` is cosine distance
#[inline]
pub fn batch_to_chunks(batch: &RecordBatch) -> Result<Vec<RetrievedChunk>> {
    let texts = string_column(batch, "text")?;
    let file_names = string_column(batch, "file_name")?;
    let file_types = string_column(batch, "file_type")?;
    let file_paths = string_column(batch, "file_path")?;
    let page_labels = string_column(batch, "page_label")?;
    let chunk_indices = batch
        .column_by_name("chunk_index")
        .ok_or_else(|| anyhow!("Missing chunk_index column"))?
        .as_any()
        .downcast_ref::<UInt32Array>()
        .ok_or_else(|| anyhow!("Invalid chunk_index column type"))?;
    let distances = batch
        .column_by_name("_distance")
        .ok_or_else(|| anyhow!("Missing _distance column"))?
        .as_any()
        .downcast_ref::<Float32Array>()
        .ok_or_else(|| anyhow!("Invalid _distance column type"))?;

    let chunks = (0..batch.num_rows())
        .map(|row| {
            // A null distance scores as orthogonal
            let distance = if distances.is_null(row) {
                1.0
            } else {
                distances.value(row)
            };
            RetrievedChunk {
                text: texts.value(row).to_string(),
                metadata: ChunkMetadata {
                    file_name: file_names.value(row).to_string(),
                    file_type: file_types.value(row).to_string(),
                    file_path: optional_value(file_paths, row),
                    page_label: optional_value(page_labels, row),
                },
                chunk_index: chunk_indices.value(row),
                score: 1.0 - distance,
            }
        })
        .collect();

    Ok(chunks)
}

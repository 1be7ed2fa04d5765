/// Vector tables on LanceDB, one per catalog language.
///
/// Columns: `id`, `title` and `text` (the embedded text) as non-null Utf8, and `embedding`
/// as a non-null `FixedSizeList<Float32, d>`.
///
/// Search is exhaustive (flat) with cosine distance, so `1 - _distance` is the cosine
/// similarity of the query and the stored vector.
use std::sync::Arc;

use arrow_array::{
    Array, ArrayRef, FixedSizeListArray, Float32Array, RecordBatch, RecordBatchIterator,
    StringArray,
};
use arrow_schema::{DataType, Field, Schema};
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::DistanceType;
use tracing::{info, warn};

use crate::error::CommonError;

const EMBEDDING_COLUMN: &str = "embedding";

/// One row to be written into a vector table.
#[derive(Debug, Clone)]
pub struct VectorRow {
    pub id: String,
    pub title: String,
    pub text: String,
    pub embedding: Vec<f32>,
}

/// One nearest-neighbour hit: the row id and its cosine distance to the query.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit {
    pub id: String,
    pub distance: f32,
}

impl VectorHit {
    /// Cosine similarity clamped to [0, 1].
    pub fn similarity(&self) -> f32 {
        (1.0 - self.distance).clamp(0.0, 1.0)
    }
}

/// Size and shape of a stored table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableStats {
    pub row_count: usize,
    pub dimension: usize,
}

pub struct VectorDb {
    db: lancedb::Connection,
}

impl VectorDb {
    /// Open (or create) the database directory at `path`.
    pub async fn connect(path: &str) -> Result<Self, CommonError> {
        let db = lancedb::connect(path)
            .execute()
            .await
            .map_err(|e| CommonError::VectorDb(format!("connection failed: {e}")))?;
        Ok(Self { db })
    }

    pub async fn table_exists(&self, table_name: &str) -> Result<bool, CommonError> {
        let names = self
            .db
            .table_names()
            .execute()
            .await
            .map_err(|e| CommonError::VectorDb(format!("listing tables failed: {e}")))?;
        Ok(names.iter().any(|n| n == table_name))
    }

    /// Drop `table_name` if present and write `rows` as a fresh table.
    pub async fn create_or_replace_table(
        &self,
        table_name: &str,
        rows: &[VectorRow],
        dimension: usize,
    ) -> Result<(), CommonError> {
        let batch = build_record_batch(rows, dimension)?;
        let schema = batch.schema();

        // Table may not exist yet.
        let _ = self.db.drop_table(table_name).await;

        let batch_iter = RecordBatchIterator::new(vec![Ok(batch)], schema);
        self.db
            .create_table(table_name, Box::new(batch_iter))
            .execute()
            .await
            .map_err(|e| CommonError::VectorDb(format!("create table failed: {e}")))?;

        info!(table = table_name, rows = rows.len(), dimension, "vector table created");
        Ok(())
    }

    /// The `limit` rows closest to `query_embedding` by cosine distance, nearest first.
    pub async fn search(
        &self,
        table_name: &str,
        query_embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<VectorHit>, CommonError> {
        let table = self
            .db
            .open_table(table_name)
            .execute()
            .await
            .map_err(|e| CommonError::VectorDb(format!("open table failed: {e}")))?;

        let results = table
            .vector_search(query_embedding)
            .map_err(|e| CommonError::VectorDb(format!("vector search setup failed: {e}")))?
            .column(EMBEDDING_COLUMN)
            .distance_type(DistanceType::Cosine)
            .limit(limit)
            .execute()
            .await
            .map_err(|e| CommonError::VectorDb(format!("vector search failed: {e}")))?;

        let batches: Vec<RecordBatch> = futures::TryStreamExt::try_collect(results)
            .await
            .map_err(|e| CommonError::VectorDb(format!("collecting search results failed: {e}")))?;

        let mut hits = extract_hits(&batches);
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        Ok(hits)
    }

    /// Row count and embedding dimension of an existing table.
    pub async fn table_stats(&self, table_name: &str) -> Result<TableStats, CommonError> {
        let table = self
            .db
            .open_table(table_name)
            .execute()
            .await
            .map_err(|e| CommonError::VectorDb(format!("open table failed: {e}")))?;

        let row_count = table
            .count_rows(None)
            .await
            .map_err(|e| CommonError::VectorDb(format!("count rows failed: {e}")))?;

        let schema = table
            .schema()
            .await
            .map_err(|e| CommonError::VectorDb(format!("reading schema failed: {e}")))?;

        let dimension = match schema.field_with_name(EMBEDDING_COLUMN).map(|f| f.data_type()) {
            Ok(DataType::FixedSizeList(_, size)) => *size as usize,
            _ => {
                return Err(CommonError::VectorDb(format!(
                    "table {table_name} has no fixed-size embedding column"
                )))
            }
        };

        Ok(TableStats {
            row_count,
            dimension,
        })
    }
}

/// Build an Arrow RecordBatch from rows and their embeddings.
fn build_record_batch(rows: &[VectorRow], dimension: usize) -> Result<RecordBatch, CommonError> {
    if let Some(bad) = rows.iter().find(|r| r.embedding.len() != dimension) {
        return Err(CommonError::VectorDb(format!(
            "row {} has {} dimensions, expected {dimension}",
            bad.id,
            bad.embedding.len()
        )));
    }
    let dim = i32::try_from(dimension)
        .map_err(|_| CommonError::VectorDb(format!("dimension {dimension} too large")))?;

    let ids: Vec<&str> = rows.iter().map(|r| r.id.as_str()).collect();
    let titles: Vec<&str> = rows.iter().map(|r| r.title.as_str()).collect();
    let texts: Vec<&str> = rows.iter().map(|r| r.text.as_str()).collect();

    let id_array: ArrayRef = Arc::new(StringArray::from(ids));
    let title_array: ArrayRef = Arc::new(StringArray::from(titles));
    let text_array: ArrayRef = Arc::new(StringArray::from(texts));

    let item_field = Arc::new(Field::new("item", DataType::Float32, true));
    let flat_values: Vec<f32> = rows.iter().flat_map(|r| r.embedding.iter().copied()).collect();
    let embedding_array: ArrayRef = Arc::new(
        FixedSizeListArray::try_new(
            Arc::clone(&item_field),
            dim,
            Arc::new(Float32Array::from(flat_values)),
            None,
        )
        .map_err(|e| CommonError::VectorDb(format!("failed to build embedding array: {e}")))?,
    );

    let schema = Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new("title", DataType::Utf8, false),
        Field::new("text", DataType::Utf8, false),
        Field::new(EMBEDDING_COLUMN, DataType::FixedSizeList(item_field, dim), false),
    ]));

    RecordBatch::try_new(schema, vec![id_array, title_array, text_array, embedding_array])
        .map_err(|e| CommonError::VectorDb(format!("failed to build record batch: {e}")))
}

fn extract_hits(batches: &[RecordBatch]) -> Vec<VectorHit> {
    let mut hits = Vec::new();

    for batch in batches {
        let schema = batch.schema();
        let id_col: Option<&StringArray> = get_column(batch, &schema, "id");
        let distance_col: Option<&Float32Array> = get_column(batch, &schema, "_distance");

        let (Some(id_col), Some(distance_col)) = (id_col, distance_col) else {
            warn!("search result batch missing expected columns");
            continue;
        };

        for row in 0..batch.num_rows() {
            hits.push(VectorHit {
                id: id_col.value(row).to_string(),
                distance: distance_col.value(row),
            });
        }
    }

    hits
}

fn get_column<'a, T: Array + 'static>(
    batch: &'a RecordBatch,
    schema: &Schema,
    name: &str,
) -> Option<&'a T> {
    let idx = schema.index_of(name).ok()?;
    batch.column(idx).as_any().downcast_ref::<T>()
}

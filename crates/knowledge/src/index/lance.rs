//! LanceDB-backed vector index.
//!
//! One table holds every session; `session_id` is a column. All reads,
//! counts and deletes carry a session filter, and search results are checked
//! against the requested session again after decoding.

use super::{
    by_score_then, check_dimensions, check_session, cosine_similarity, normalize, VectorIndex,
};
use crate::types::{DocumentId, Passage, PassageId, Position, ScoredPassage, SessionId};
use arrow_array::{
    Array, FixedSizeListArray, Float32Array, Int64Array, RecordBatch, RecordBatchIterator,
    StringArray, UInt32Array, UInt64Array,
};
use arrow_schema::{DataType, Field, Schema};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::Table;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use synapse_core::{AppError, AppResult};

/// Persistent vector index stored in a LanceDB table.
pub struct LanceDbIndex {
    table: Table,
    dimensions: usize,
}

impl LanceDbIndex {
    /// Open the table at `db_path`, creating it if needed.
    pub async fn open(db_path: &Path, table_name: &str, dimensions: usize) -> AppResult<Self> {
        std::fs::create_dir_all(db_path)
            .map_err(|e| AppError::Retrieval(format!("Failed to create index directory: {}", e)))?;

        let uri = db_path.to_string_lossy().to_string();
        let conn = lancedb::connect(&uri)
            .execute()
            .await
            .map_err(|e| AppError::Retrieval(format!("Failed to connect to LanceDB: {}", e)))?;

        let table_names = conn
            .table_names()
            .execute()
            .await
            .map_err(|e| AppError::Retrieval(format!("Failed to list tables: {}", e)))?;

        let table = if table_names.iter().any(|n| n == table_name) {
            conn.open_table(table_name)
                .execute()
                .await
                .map_err(|e| AppError::Retrieval(format!("Failed to open table: {}", e)))?
        } else {
            let schema = schema(dimensions);
            let empty = RecordBatch::new_empty(schema.clone());
            conn.create_table(table_name, RecordBatchIterator::new(vec![Ok(empty)], schema))
                .execute()
                .await
                .map_err(|e| AppError::Retrieval(format!("Failed to create table: {}", e)))?
        };

        tracing::debug!("Opened LanceDB index at {:?}", db_path);
        Ok(Self { table, dimensions })
    }

    async fn exists(&self, passage: &Passage) -> AppResult<bool> {
        let filter = format!(
            "{} AND content_hash = '{}' AND document_name = '{}' AND page = {} AND byte_start = {}",
            session_filter(passage.session_id),
            escape(&passage.content_hash),
            escape(&passage.document_name),
            passage.position.page,
            passage.position.byte_start
        );
        let n = self
            .table
            .count_rows(Some(filter))
            .await
            .map_err(|e| AppError::Retrieval(format!("Failed to count rows: {}", e)))?;
        Ok(n > 0)
    }

    async fn add(&self, rows: &[(&Passage, Vec<f32>)]) -> AppResult<()> {
        let batch = to_batch(self.dimensions, rows)?;
        let schema = batch.schema();
        self.table
            .add(RecordBatchIterator::new(vec![Ok(batch)], schema))
            .execute()
            .await
            .map_err(|e| AppError::Retrieval(format!("Failed to add passages: {}", e)))?;
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for LanceDbIndex {
    fn backend_name(&self) -> &'static str {
        "lancedb"
    }

    async fn insert(
        &self,
        session: SessionId,
        passage: &Passage,
        vector: &[f32],
    ) -> AppResult<bool> {
        check_session(session, passage)?;
        check_dimensions(self.dimensions, vector)?;

        if self.exists(passage).await? {
            return Ok(false);
        }
        self.add(&[(passage, normalize(vector))]).await?;
        Ok(true)
    }

    async fn insert_batch(
        &self,
        session: SessionId,
        entries: &[(Passage, Vec<f32>)],
    ) -> AppResult<usize> {
        let mut seen = HashSet::new();
        let mut rows = Vec::with_capacity(entries.len());

        for (passage, vector) in entries {
            check_session(session, passage)?;
            check_dimensions(self.dimensions, vector)?;
            if !seen.insert(passage.fingerprint()) || self.exists(passage).await? {
                continue;
            }
            rows.push((passage, normalize(vector)));
        }

        if !rows.is_empty() {
            self.add(&rows).await?;
        }
        tracing::debug!("Inserted {} passages into LanceDB", rows.len());
        Ok(rows.len())
    }

    async fn search(
        &self,
        session: SessionId,
        query: &[f32],
        k: usize,
    ) -> AppResult<Vec<ScoredPassage>> {
        check_dimensions(self.dimensions, query)?;
        if k == 0 {
            return Ok(Vec::new());
        }

        // Over-fetch so equal scores at the cut can still be ordered by age
        let batches: Vec<RecordBatch> = self
            .table
            .query()
            .only_if(session_filter(session))
            .nearest_to(normalize(query))
            .map_err(|e| AppError::Retrieval(format!("Failed to create query: {}", e)))?
            .limit(k * 2)
            .execute()
            .await
            .map_err(|e| AppError::Retrieval(format!("Failed to execute search: {}", e)))?
            .try_collect()
            .await
            .map_err(|e| AppError::Retrieval(format!("Failed to collect results: {}", e)))?;

        let mut scored = Vec::new();
        for batch in &batches {
            for row in 0..batch.num_rows() {
                let (passage, vector) = from_row(batch, row)?;
                if passage.session_id != session {
                    tracing::error!(
                        requested = %session,
                        found = %passage.session_id,
                        "Discarding row from another session"
                    );
                    continue;
                }
                let score = cosine_similarity(query, &vector);
                scored.push(ScoredPassage::new(passage, score));
            }
        }

        scored.sort_by(|a, b| {
            by_score_then(
                (a.score, (a.passage.ingested_at, a.passage.ordinal)),
                (b.score, (b.passage.ingested_at, b.passage.ordinal)),
            )
        });
        scored.truncate(k);
        Ok(scored)
    }

    async fn delete_session(&self, session: SessionId) -> AppResult<usize> {
        let filter = session_filter(session);
        let count = self
            .table
            .count_rows(Some(filter.clone()))
            .await
            .map_err(|e| AppError::Retrieval(format!("Failed to count rows: {}", e)))?;

        if count > 0 {
            self.table
                .delete(&filter)
                .await
                .map_err(|e| AppError::Retrieval(format!("Failed to delete session: {}", e)))?;
        }
        tracing::debug!(session = %session, removed = count, "Deleted session from LanceDB");
        Ok(count)
    }

    async fn count(&self, session: SessionId) -> AppResult<usize> {
        self.table
            .count_rows(Some(session_filter(session)))
            .await
            .map_err(|e| AppError::Retrieval(format!("Failed to count rows: {}", e)))
    }
}

fn schema(dimensions: usize) -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new("session_id", DataType::Utf8, false),
        Field::new("document_id", DataType::Utf8, false),
        Field::new("document_name", DataType::Utf8, false),
        Field::new("page", DataType::UInt32, false),
        Field::new("byte_start", DataType::UInt64, false),
        Field::new("byte_end", DataType::UInt64, false),
        Field::new("ordinal", DataType::UInt32, false),
        // Microseconds since the Unix epoch
        Field::new("ingested_at", DataType::Int64, false),
        Field::new("content_hash", DataType::Utf8, false),
        Field::new("text", DataType::Utf8, false),
        Field::new(
            "embedding",
            DataType::FixedSizeList(
                Arc::new(Field::new("item", DataType::Float32, true)),
                dimensions as i32,
            ),
            false,
        ),
    ]))
}

fn session_filter(session: SessionId) -> String {
    format!("session_id = '{}'", session)
}

/// Quote a value for a SQL string literal.
fn escape(value: &str) -> String {
    value.replace('\'', "''")
}

fn to_batch(dimensions: usize, rows: &[(&Passage, Vec<f32>)]) -> AppResult<RecordBatch> {
    let ids: Vec<String> = rows.iter().map(|(p, _)| p.id.to_string()).collect();
    let sessions: Vec<String> = rows.iter().map(|(p, _)| p.session_id.to_string()).collect();
    let documents: Vec<String> = rows.iter().map(|(p, _)| p.document_id.to_string()).collect();
    let flat: Vec<f32> = rows.iter().flat_map(|(_, v)| v.iter().copied()).collect();

    let embedding = FixedSizeListArray::new(
        Arc::new(Field::new("item", DataType::Float32, true)),
        dimensions as i32,
        Arc::new(Float32Array::from(flat)),
        None,
    );

    RecordBatch::try_new(
        schema(dimensions),
        vec![
            Arc::new(StringArray::from(ids)),
            Arc::new(StringArray::from(sessions)),
            Arc::new(StringArray::from(documents)),
            Arc::new(StringArray::from_iter_values(
                rows.iter().map(|(p, _)| p.document_name.as_str()),
            )),
            Arc::new(UInt32Array::from_iter_values(
                rows.iter().map(|(p, _)| p.position.page),
            )),
            Arc::new(UInt64Array::from_iter_values(
                rows.iter().map(|(p, _)| p.position.byte_start as u64),
            )),
            Arc::new(UInt64Array::from_iter_values(
                rows.iter().map(|(p, _)| p.position.byte_end as u64),
            )),
            Arc::new(UInt32Array::from_iter_values(rows.iter().map(|(p, _)| p.ordinal))),
            Arc::new(Int64Array::from_iter_values(
                rows.iter().map(|(p, _)| p.ingested_at.timestamp_micros()),
            )),
            Arc::new(StringArray::from_iter_values(
                rows.iter().map(|(p, _)| p.content_hash.as_str()),
            )),
            Arc::new(StringArray::from_iter_values(
                rows.iter().map(|(p, _)| p.text.as_str()),
            )),
            Arc::new(embedding),
        ],
    )
    .map_err(|e| AppError::Retrieval(format!("Failed to create RecordBatch: {}", e)))
}

fn column<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> AppResult<&'a T> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<T>())
        .ok_or_else(|| AppError::Retrieval(format!("Invalid {} column", name)))
}

fn parse_id<T: std::str::FromStr<Err = AppError>>(raw: &str) -> AppResult<T> {
    raw.parse()
        .map_err(|e: AppError| AppError::Retrieval(format!("Corrupt row: {}", e)))
}

fn from_row(batch: &RecordBatch, row: usize) -> AppResult<(Passage, Vec<f32>)> {
    let embedding = column::<FixedSizeListArray>(batch, "embedding")?.value(row);
    let values = embedding
        .as_any()
        .downcast_ref::<Float32Array>()
        .ok_or_else(|| AppError::Retrieval("Invalid embedding values".to_string()))?;
    let vector: Vec<f32> = values.values().to_vec();

    let micros = column::<Int64Array>(batch, "ingested_at")?.value(row);
    let ingested_at: DateTime<Utc> = DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| AppError::Retrieval(format!("Corrupt timestamp {}", micros)))?;

    let passage = Passage {
        id: parse_id::<PassageId>(column::<StringArray>(batch, "id")?.value(row))?,
        session_id: parse_id::<SessionId>(column::<StringArray>(batch, "session_id")?.value(row))?,
        document_id: parse_id::<DocumentId>(
            column::<StringArray>(batch, "document_id")?.value(row),
        )?,
        document_name: column::<StringArray>(batch, "document_name")?
            .value(row)
            .to_string(),
        text: column::<StringArray>(batch, "text")?.value(row).to_string(),
        position: Position {
            page: column::<UInt32Array>(batch, "page")?.value(row),
            byte_start: column::<UInt64Array>(batch, "byte_start")?.value(row) as usize,
            byte_end: column::<UInt64Array>(batch, "byte_end")?.value(row) as usize,
        },
        ordinal: column::<UInt32Array>(batch, "ordinal")?.value(row),
        ingested_at,
        content_hash: column::<StringArray>(batch, "content_hash")?
            .value(row)
            .to_string(),
    };

    Ok((passage, vector))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::content_hash;
    use tempfile::TempDir;

    fn passage(session: SessionId, text: &str, ordinal: u32) -> Passage {
        Passage {
            id: PassageId::new(),
            session_id: session,
            document_id: DocumentId::new(),
            document_name: "it's.txt".to_string(),
            text: text.to_string(),
            position: Position {
                page: 1,
                byte_start: ordinal as usize * 10,
                byte_end: ordinal as usize * 10 + text.len(),
            },
            ordinal,
            ingested_at: Utc::now(),
            content_hash: content_hash(text),
        }
    }

    #[tokio::test]
    async fn test_lancedb_roundtrip_and_isolation() {
        let temp = TempDir::new().unwrap();
        let index = LanceDbIndex::open(&temp.path().join("index"), "passages", 3)
            .await
            .unwrap();

        let a = SessionId::new();
        let b = SessionId::new();
        let east = passage(a, "east", 0);
        index.insert(a, &east, &[1.0, 0.0, 0.0]).await.unwrap();
        index
            .insert(a, &passage(a, "north", 1), &[0.0, 1.0, 0.0])
            .await
            .unwrap();
        index
            .insert(b, &passage(b, "east too", 0), &[1.0, 0.0, 0.0])
            .await
            .unwrap();

        let results = index.search(a, &[1.0, 0.1, 0.0], 5).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].passage.id, east.id);
        assert_eq!(results[0].passage.document_name, "it's.txt");
        assert!(results.iter().all(|r| r.passage.session_id == a));

        // Same content, document and position is not stored twice
        let mut again = east.clone();
        again.id = PassageId::new();
        assert!(!index.insert(a, &again, &[1.0, 0.0, 0.0]).await.unwrap());
        assert_eq!(index.count(a).await.unwrap(), 2);

        assert_eq!(index.delete_session(a).await.unwrap(), 2);
        assert!(index.search(a, &[1.0, 0.0, 0.0], 5).await.unwrap().is_empty());
        assert_eq!(index.count(b).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_lancedb_equal_scores_order_by_age_then_ordinal() {
        let temp = TempDir::new().unwrap();
        let index = LanceDbIndex::open(&temp.path().join("index"), "passages", 2)
            .await
            .unwrap();
        let session = SessionId::new();
        let earlier = DateTime::from_timestamp_micros(1_700_000_000_000_000).unwrap();
        let later = DateTime::from_timestamp_micros(1_700_000_001_000_000).unwrap();

        let mut newest = passage(session, "newest", 0);
        newest.ingested_at = later;
        let mut second = passage(session, "second", 2);
        second.ingested_at = earlier;
        let mut first = passage(session, "first", 1);
        first.ingested_at = earlier;

        for p in [&newest, &second, &first] {
            assert!(index.insert(session, p, &[0.6, 0.8]).await.unwrap());
        }

        let results = index.search(session, &[0.6, 0.8], 3).await.unwrap();
        let ids: Vec<PassageId> = results.iter().map(|r| r.passage.id).collect();
        assert_eq!(ids, vec![first.id, second.id, newest.id]);
        assert!(results.windows(2).all(|w| w[0].score == w[1].score));

        let cut = index.search(session, &[0.6, 0.8], 2).await.unwrap();
        let ids: Vec<PassageId> = cut.iter().map(|r| r.passage.id).collect();
        assert_eq!(ids, vec![first.id, second.id]);
    }

    #[tokio::test]
    async fn test_lancedb_batch_reinsert_is_deduplicated() {
        let temp = TempDir::new().unwrap();
        let index = LanceDbIndex::open(&temp.path().join("index"), "passages", 2)
            .await
            .unwrap();
        let session = SessionId::new();

        let one = passage(session, "one", 0);
        let two = passage(session, "two", 1);
        let mut twin = one.clone();
        twin.id = PassageId::new();
        let entries = vec![
            (one.clone(), vec![1.0, 0.0]),
            (two.clone(), vec![0.0, 1.0]),
            (twin, vec![1.0, 0.0]),
        ];
        assert_eq!(index.insert_batch(session, &entries).await.unwrap(), 2);
        assert_eq!(index.count(session).await.unwrap(), 2);

        let replay: Vec<(Passage, Vec<f32>)> = entries
            .iter()
            .map(|(p, v)| {
                let mut p = p.clone();
                p.id = PassageId::new();
                (p, v.clone())
            })
            .collect();
        assert_eq!(index.insert_batch(session, &replay).await.unwrap(), 0);
        assert_eq!(index.count(session).await.unwrap(), 2);
        assert_eq!(index.search(session, &[1.0, 0.0], 5).await.unwrap().len(), 2);
    }
}

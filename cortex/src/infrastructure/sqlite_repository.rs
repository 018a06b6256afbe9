// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! SQLite Repository
//!
//! Durable implementation of all three repository traits over one `sqlx`
//! SQLite pool.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure Layer
//! - **Purpose:** Persist patterns, embeddings and adaptive thresholds
//!
//! # Schema
//!
//! | Table | Key | Payload |
//! |-------|-----|---------|
//! | `patterns` | `id` | `data` holds the whole pattern as bincode; `confidence`, `usage_count`, timestamps are queryable copies |
//! | `pattern_embeddings` | `id` (pattern id) | `vector` holds `i8` bytes when `compressed`, little-endian `f32` bytes otherwise |
//! | `adaptive_thresholds` | `(agent_type, file_type)` | `file_type = ''` stands for "any file type" |
//!
//! Timestamps are RFC 3339 strings with fixed microsecond precision so that
//! they order lexically.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool};
use std::sync::Arc;
use tracing::{debug, info};

use crate::domain::embedding::{EmbeddingPayload, VectorEmbedding};
use crate::domain::pattern::{Pattern, PatternId, PatternType};
use crate::domain::repository::{
    CortexRepositories, EmbeddingRepository, PatternRepository, RepositoryError, ThresholdRepository,
};
use crate::domain::threshold::{AdaptiveThreshold, ConfidenceInterval, ThresholdKey};

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

const ANY_FILE_TYPE: &str = "";

const SCHEMA: [&str; 5] = [
    r#"
    CREATE TABLE IF NOT EXISTS patterns (
        id TEXT PRIMARY KEY,
        pattern_type TEXT NOT NULL,
        data BLOB NOT NULL,
        confidence REAL NOT NULL,
        usage_count INTEGER NOT NULL,
        created_at TEXT NOT NULL,
        last_used TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_patterns_type ON patterns(pattern_type)",
    r#"
    CREATE TABLE IF NOT EXISTS pattern_embeddings (
        id TEXT PRIMARY KEY,
        model TEXT NOT NULL,
        dims INTEGER NOT NULL,
        vector BLOB NOT NULL,
        compressed INTEGER NOT NULL,
        min_val REAL,
        max_val REAL,
        sequence INTEGER NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_embeddings_model ON pattern_embeddings(model, sequence)",
    r#"
    CREATE TABLE IF NOT EXISTS adaptive_thresholds (
        agent_type TEXT NOT NULL,
        file_type TEXT NOT NULL DEFAULT '',
        base_threshold REAL NOT NULL,
        adjusted_threshold REAL NOT NULL,
        confidence_min REAL NOT NULL,
        confidence_max REAL NOT NULL,
        sample_size INTEGER NOT NULL,
        last_updated TEXT NOT NULL,
        PRIMARY KEY (agent_type, file_type)
    )
    "#,
];

const UPSERT_PATTERN: &str = r#"
    INSERT INTO patterns (id, pattern_type, data, confidence, usage_count, created_at, last_used)
    VALUES (?, ?, ?, ?, ?, ?, ?)
    ON CONFLICT(id) DO UPDATE SET
        pattern_type = excluded.pattern_type,
        data = excluded.data,
        confidence = excluded.confidence,
        usage_count = excluded.usage_count,
        created_at = excluded.created_at,
        last_used = excluded.last_used
"#;

/// Pattern columns ready for binding.
struct PatternRow {
    id: String,
    pattern_type: &'static str,
    data: Vec<u8>,
    confidence: f64,
    usage_count: i64,
    created_at: String,
    last_used: Option<String>,
}

impl PatternRow {
    fn encode(pattern: &Pattern) -> Result<Self, RepositoryError> {
        Ok(Self {
            id: pattern.id.to_string(),
            pattern_type: pattern.pattern_type.as_str(),
            data: bincode::serialize(pattern)?,
            confidence: pattern.confidence,
            usage_count: to_i64(pattern.usage_count)?,
            created_at: timestamp(&pattern.created_at),
            last_used: pattern.last_used.as_ref().map(timestamp),
        })
    }

    fn bind<'q>(&'q self, query: SqliteQuery<'q>) -> SqliteQuery<'q> {
        query
            .bind(self.id.as_str())
            .bind(self.pattern_type)
            .bind(self.data.as_slice())
            .bind(self.confidence)
            .bind(self.usage_count)
            .bind(self.created_at.as_str())
            .bind(self.last_used.as_deref())
    }
}

/// SQLite-backed store for patterns, embeddings and thresholds.
#[derive(Clone)]
pub struct SqliteCortexStore {
    pool: SqlitePool,
}

impl SqliteCortexStore {
    /// Open (creating if needed) a database file and migrate it.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, RepositoryError> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        info!(path = %path.as_ref().display(), "Opened SQLite pattern store");
        Ok(store)
    }

    /// A private in-memory database. Kept on a single connection that never
    /// expires, since every new connection would see an empty database.
    pub async fn in_memory() -> Result<Self, RepositoryError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Wrap an existing pool. Call [`migrate`](Self::migrate) before use.
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create tables and indexes. Safe to run repeatedly.
    pub async fn migrate(&self) -> Result<(), RepositoryError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!("SQLite schema ready");
        Ok(())
    }

    /// All three repositories backed by this store.
    pub fn repositories(self: Arc<Self>) -> CortexRepositories {
        CortexRepositories {
            patterns: self.clone(),
            embeddings: self.clone(),
            thresholds: self,
        }
    }
}

#[async_trait]
impl PatternRepository for SqliteCortexStore {
    async fn save(&self, pattern: &Pattern) -> Result<(), RepositoryError> {
        let row = PatternRow::encode(pattern)?;
        row.bind(sqlx::query(UPSERT_PATTERN)).execute(&self.pool).await?;
        Ok(())
    }

    async fn find_by_id(&self, id: PatternId) -> Result<Option<Pattern>, RepositoryError> {
        let row = sqlx::query("SELECT data FROM patterns WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| decode_pattern(&r)).transpose()
    }

    async fn find_by_type(&self, pattern_type: PatternType) -> Result<Vec<Pattern>, RepositoryError> {
        let rows = sqlx::query("SELECT data FROM patterns WHERE pattern_type = ? ORDER BY created_at, id")
            .bind(pattern_type.as_str())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(decode_pattern).collect()
    }

    async fn list_all(&self) -> Result<Vec<Pattern>, RepositoryError> {
        let rows = sqlx::query("SELECT data FROM patterns ORDER BY created_at, id")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(decode_pattern).collect()
    }

    async fn delete(&self, id: PatternId) -> Result<bool, RepositoryError> {
        let id = id.to_string();
        let mut tx = self.pool.begin().await?;

        let removed = sqlx::query("DELETE FROM patterns WHERE id = ?")
            .bind(id.as_str())
            .execute(&mut *tx)
            .await?
            .rows_affected();
        sqlx::query("DELETE FROM pattern_embeddings WHERE id = ?")
            .bind(id.as_str())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(removed > 0)
    }

    async fn apply_merge(&self, survivor: &Pattern, removed: PatternId) -> Result<(), RepositoryError> {
        let row = PatternRow::encode(survivor)?;
        let removed = removed.to_string();
        let mut tx = self.pool.begin().await?;

        row.bind(sqlx::query(UPSERT_PATTERN)).execute(&mut *tx).await?;
        sqlx::query("DELETE FROM patterns WHERE id = ?")
            .bind(removed.as_str())
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM pattern_embeddings WHERE id = ?")
            .bind(removed.as_str())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn count(&self) -> Result<usize, RepositoryError> {
        let count: i64 = sqlx::query("SELECT COUNT(*) AS n FROM patterns")
            .fetch_one(&self.pool)
            .await?
            .try_get("n")?;
        Ok(count.max(0) as usize)
    }
}

#[async_trait]
impl EmbeddingRepository for SqliteCortexStore {
    async fn save(&self, embedding: &VectorEmbedding) -> Result<(), RepositoryError> {
        let (bytes, min, max) = match &embedding.payload {
            EmbeddingPayload::Quantized { values, min, max } => (
                values.iter().map(|v| *v as u8).collect::<Vec<u8>>(),
                Some(*min as f64),
                Some(*max as f64),
            ),
            EmbeddingPayload::Raw(values) => (
                values.iter().flat_map(|v| v.to_le_bytes()).collect::<Vec<u8>>(),
                None,
                None,
            ),
        };

        sqlx::query(
            r#"
            INSERT INTO pattern_embeddings (id, model, dims, vector, compressed, min_val, max_val, sequence)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                model = excluded.model,
                dims = excluded.dims,
                vector = excluded.vector,
                compressed = excluded.compressed,
                min_val = excluded.min_val,
                max_val = excluded.max_val,
                sequence = excluded.sequence
            "#,
        )
        .bind(embedding.pattern_id.to_string())
        .bind(embedding.model.as_str())
        .bind(to_i64(embedding.dims as u64)?)
        .bind(bytes)
        .bind(embedding.is_compressed())
        .bind(min)
        .bind(max)
        .bind(to_i64(embedding.sequence)?)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_id(&self, id: PatternId) -> Result<Option<VectorEmbedding>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, model, dims, vector, compressed, min_val, max_val, sequence FROM pattern_embeddings WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| decode_embedding(&r)).transpose()
    }

    async fn list_by_model(&self, model: &str) -> Result<Vec<VectorEmbedding>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT id, model, dims, vector, compressed, min_val, max_val, sequence
            FROM pattern_embeddings
            WHERE model = ?
            ORDER BY sequence
            "#,
        )
        .bind(model)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(decode_embedding).collect()
    }

    async fn delete(&self, id: PatternId) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM pattern_embeddings WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn max_sequence(&self) -> Result<u64, RepositoryError> {
        let max: Option<i64> = sqlx::query("SELECT MAX(sequence) AS max_sequence FROM pattern_embeddings")
            .fetch_one(&self.pool)
            .await?
            .try_get("max_sequence")?;
        Ok(max.unwrap_or(0).max(0) as u64)
    }
}

#[async_trait]
impl ThresholdRepository for SqliteCortexStore {
    async fn save(&self, threshold: &AdaptiveThreshold) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO adaptive_thresholds
                (agent_type, file_type, base_threshold, adjusted_threshold,
                 confidence_min, confidence_max, sample_size, last_updated)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(agent_type, file_type) DO UPDATE SET
                base_threshold = excluded.base_threshold,
                adjusted_threshold = excluded.adjusted_threshold,
                confidence_min = excluded.confidence_min,
                confidence_max = excluded.confidence_max,
                sample_size = excluded.sample_size,
                last_updated = excluded.last_updated
            "#,
        )
        .bind(threshold.key.agent_type.as_str())
        .bind(threshold.key.file_type.as_deref().unwrap_or(ANY_FILE_TYPE))
        .bind(threshold.base_threshold)
        .bind(threshold.adjusted_threshold)
        .bind(threshold.interval.low)
        .bind(threshold.interval.high)
        .bind(to_i64(threshold.sample_size)?)
        .bind(timestamp(&threshold.last_updated))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find(&self, key: &ThresholdKey) -> Result<Option<AdaptiveThreshold>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM adaptive_thresholds WHERE agent_type = ? AND file_type = ?")
            .bind(key.agent_type.as_str())
            .bind(key.file_type.as_deref().unwrap_or(ANY_FILE_TYPE))
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| decode_threshold(&r)).transpose()
    }

    async fn list_all(&self) -> Result<Vec<AdaptiveThreshold>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM adaptive_thresholds ORDER BY agent_type, file_type")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(decode_threshold).collect()
    }
}

fn decode_pattern(row: &SqliteRow) -> Result<Pattern, RepositoryError> {
    let data: Vec<u8> = row.try_get("data")?;
    Ok(bincode::deserialize(&data)?)
}

fn decode_embedding(row: &SqliteRow) -> Result<VectorEmbedding, RepositoryError> {
    let id: String = row.try_get("id")?;
    let pattern_id = PatternId::parse(&id).map_err(|e| RepositoryError::Serialization(e.to_string()))?;
    let dims: i64 = row.try_get("dims")?;
    let bytes: Vec<u8> = row.try_get("vector")?;
    let compressed: bool = row.try_get("compressed")?;
    let min_val: Option<f64> = row.try_get("min_val")?;
    let max_val: Option<f64> = row.try_get("max_val")?;
    let sequence: i64 = row.try_get("sequence")?;

    let payload = if compressed {
        let (Some(min), Some(max)) = (min_val, max_val) else {
            return Err(RepositoryError::Serialization(format!(
                "quantized embedding {} has no value range",
                id
            )));
        };
        EmbeddingPayload::Quantized {
            values: bytes.iter().map(|b| *b as i8).collect(),
            min: min as f32,
            max: max as f32,
        }
    } else {
        if bytes.len() % 4 != 0 {
            return Err(RepositoryError::Serialization(format!(
                "embedding {} has {} bytes, not a whole number of f32 values",
                id,
                bytes.len()
            )));
        }
        EmbeddingPayload::Raw(
            bytes
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
        )
    };

    let stored = match &payload {
        EmbeddingPayload::Quantized { values, .. } => values.len(),
        EmbeddingPayload::Raw(values) => values.len(),
    };
    if stored as i64 != dims {
        return Err(RepositoryError::Serialization(format!(
            "embedding {} declares {} dimensions but stores {}",
            id, dims, stored
        )));
    }

    Ok(VectorEmbedding {
        pattern_id,
        model: row.try_get("model")?,
        dims: stored,
        payload,
        sequence: sequence.max(0) as u64,
    })
}

fn decode_threshold(row: &SqliteRow) -> Result<AdaptiveThreshold, RepositoryError> {
    let file_type: String = row.try_get("file_type")?;
    let sample_size: i64 = row.try_get("sample_size")?;
    let last_updated: String = row.try_get("last_updated")?;

    Ok(AdaptiveThreshold {
        key: ThresholdKey {
            agent_type: row.try_get("agent_type")?,
            file_type: (file_type != ANY_FILE_TYPE).then_some(file_type),
        },
        base_threshold: row.try_get("base_threshold")?,
        adjusted_threshold: row.try_get("adjusted_threshold")?,
        interval: ConfidenceInterval {
            low: row.try_get("confidence_min")?,
            high: row.try_get("confidence_max")?,
        },
        sample_size: sample_size.max(0) as u64,
        last_updated: parse_timestamp(&last_updated)?,
    })
}

fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Serialization(format!("invalid timestamp '{}': {}", value, e)))
}

fn to_i64(value: u64) -> Result<i64, RepositoryError> {
    i64::try_from(value).map_err(|_| RepositoryError::Serialization(format!("{} does not fit in INTEGER", value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamps_order_lexically() {
        let earlier = Utc::now();
        let later = earlier + chrono::Duration::milliseconds(1500);
        assert!(timestamp(&earlier) < timestamp(&later));
        assert_eq!(parse_timestamp(&timestamp(&earlier)).unwrap().timestamp_micros(), earlier.timestamp_micros());
    }

    #[test]
    fn test_pattern_row_encoding() {
        let pattern = Pattern::new(PatternType::Testing, "Bash -> Test", "", vec!["Bash".to_string()]);
        let row = PatternRow::encode(&pattern).unwrap();
        assert_eq!(row.pattern_type, "testing");
        assert!(row.last_used.is_none());

        let decoded: Pattern = bincode::deserialize(&row.data).unwrap();
        assert_eq!(decoded, pattern);
    }

    #[test]
    fn test_to_i64_rejects_overflow() {
        assert!(to_i64(u64::MAX).is_err());
        assert_eq!(to_i64(42).unwrap(), 42);
    }
}

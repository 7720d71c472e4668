//! SQLite-backed [`IndexStore`] implementation.
//!
//! Each `add`, `remove` and `clear` runs in one transaction, and `query` reads inside
//! one read transaction, so in WAL mode a query sees a committed snapshot:
//! never half of a document, never a half-cleared index.
//!
//! Term frequencies are stored as JSON, vectors as little-endian f32 BLOBs.
//! Scoring is a scan over all chunks using the same
//! [`similarity`](jedai_core::representation::similarity) function as the
//! in-memory store.

use std::collections::BTreeMap;

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use jedai_core::embedding::{blob_to_vec, vec_to_blob};
use jedai_core::error::{CoreError, Result};
use jedai_core::models::{Chunk, PageSpan};
use jedai_core::representation::{similarity, Representation};
use jedai_core::store::{
    check_scheme, rank, validate_add, DocumentRecord, IndexStore, ScoredChunk, StoreCounts,
};

const SCHEME_KEY: &str = "representation_scheme";

/// SQLite implementation of the [`IndexStore`] trait.
pub struct SqliteIndexStore {
    pool: SqlitePool,
}

impl SqliteIndexStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Representation scheme id the index was built with, if any.
    pub async fn scheme(&self) -> Result<Option<String>> {
        sqlx::query_scalar("SELECT value FROM index_meta WHERE key = ?")
            .bind(SCHEME_KEY)
            .fetch_optional(&self.pool)
            .await
            .map_err(CoreError::storage)
    }
}

fn page_bound(value: Option<i64>) -> Option<u32> {
    value.and_then(|v| u32::try_from(v).ok())
}

fn row_to_scored(row: &SqliteRow, query: &Representation, alpha: f64) -> Result<ScoredChunk> {
    let terms_json: String = row.get("terms_json");
    let terms: BTreeMap<String, u32> =
        serde_json::from_str(&terms_json).map_err(CoreError::storage)?;
    let embedding: Option<Vec<u8>> = row.get("embedding");
    let rep = Representation {
        terms,
        vector: embedding.as_deref().map(blob_to_vec),
    };

    let chunk = Chunk {
        id: row.get("id"),
        document_id: row.get("document_id"),
        chunk_index: row.get("chunk_index"),
        text: row.get("text"),
        pages: PageSpan::from_bounds(
            page_bound(row.get("page_start")),
            page_bound(row.get("page_end")),
        ),
        hash: row.get("hash"),
    };

    Ok(ScoredChunk {
        score: similarity(query, &rep, alpha),
        source: row.get("label"),
        chunk,
    })
}

#[async_trait]
impl IndexStore for SqliteIndexStore {
    async fn add(
        &self,
        doc: &DocumentRecord,
        chunks: &[Chunk],
        reps: &[Representation],
        scheme: &str,
    ) -> Result<()> {
        validate_add(doc, chunks, reps)?;
        let mut tx = self.pool.begin().await.map_err(CoreError::storage)?;

        sqlx::query("INSERT INTO index_meta (key, value) VALUES (?, ?) ON CONFLICT(key) DO NOTHING")
            .bind(SCHEME_KEY)
            .bind(scheme)
            .execute(&mut *tx)
            .await
            .map_err(CoreError::storage)?;
        let indexed: String = sqlx::query_scalar("SELECT value FROM index_meta WHERE key = ?")
            .bind(SCHEME_KEY)
            .fetch_one(&mut *tx)
            .await
            .map_err(CoreError::storage)?;
        check_scheme(Some(&indexed), scheme)?;

        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(&doc.id)
            .execute(&mut *tx)
            .await
            .map_err(CoreError::storage)?;

        sqlx::query(
            r#"
            INSERT INTO documents (id, label, kind, indexed_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                label = excluded.label,
                kind = excluded.kind,
                indexed_at = excluded.indexed_at
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.label)
        .bind(doc.kind.as_str())
        .bind(chrono::Utc::now().timestamp())
        .execute(&mut *tx)
        .await
        .map_err(CoreError::storage)?;

        for (chunk, rep) in chunks.iter().zip(reps) {
            let (page_start, page_end) = chunk.pages.bounds();
            let terms_json = serde_json::to_string(&rep.terms).map_err(CoreError::storage)?;
            let blob = rep.vector.as_deref().map(vec_to_blob);
            sqlx::query(
                r#"
                INSERT INTO chunks (id, document_id, chunk_index, text, page_start, page_end,
                                    hash, terms_json, embedding)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk.id)
            .bind(&chunk.document_id)
            .bind(chunk.chunk_index)
            .bind(&chunk.text)
            .bind(page_start.map(i64::from))
            .bind(page_end.map(i64::from))
            .bind(&chunk.hash)
            .bind(&terms_json)
            .bind(blob)
            .execute(&mut *tx)
            .await
            .map_err(CoreError::storage)?;
        }

        tx.commit().await.map_err(CoreError::storage)?;
        Ok(())
    }

    async fn remove(&self, document_id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await.map_err(CoreError::storage)?;
        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await
            .map_err(CoreError::storage)?;
        let removed = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await
            .map_err(CoreError::storage)?
            .rows_affected();
        tx.commit().await.map_err(CoreError::storage)?;
        Ok(removed > 0)
    }

    async fn document_ids(&self) -> Result<Vec<String>> {
        sqlx::query_scalar("SELECT id FROM documents ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(CoreError::storage)
    }

    async fn clear(&self) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(CoreError::storage)?;
        for statement in [
            "DELETE FROM chunks",
            "DELETE FROM documents",
            "DELETE FROM index_meta",
        ] {
            sqlx::query(statement)
                .execute(&mut *tx)
                .await
                .map_err(CoreError::storage)?;
        }
        tx.commit().await.map_err(CoreError::storage)?;
        Ok(())
    }

    async fn is_indexed(&self) -> Result<bool> {
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM documents)")
            .fetch_one(&self.pool)
            .await
            .map_err(CoreError::storage)
    }

    async fn query(
        &self,
        query: &Representation,
        scheme: &str,
        alpha: f64,
        k: usize,
    ) -> Result<Vec<ScoredChunk>> {
        if k == 0 {
            return Err(CoreError::invalid("k must be at least 1"));
        }
        let mut tx = self.pool.begin().await.map_err(CoreError::storage)?;

        let rows = sqlx::query(
            r#"
            SELECT c.id, c.document_id, c.chunk_index, c.text, c.page_start, c.page_end,
                   c.hash, c.terms_json, c.embedding, d.label
            FROM chunks c
            JOIN documents d ON d.id = c.document_id
            "#,
        )
        .fetch_all(&mut *tx)
        .await
        .map_err(CoreError::storage)?;

        let indexed: Option<String> =
            sqlx::query_scalar("SELECT value FROM index_meta WHERE key = ?")
                .bind(SCHEME_KEY)
                .fetch_optional(&mut *tx)
                .await
                .map_err(CoreError::storage)?;
        tx.commit().await.map_err(CoreError::storage)?;

        if rows.is_empty() {
            return Ok(Vec::new());
        }
        check_scheme(indexed.as_deref(), scheme)?;

        let candidates = rows
            .iter()
            .map(|row| row_to_scored(row, query, alpha))
            .collect::<Result<Vec<_>>>()?;
        Ok(rank(candidates, k))
    }

    async fn counts(&self) -> Result<StoreCounts> {
        let row = sqlx::query(
            "SELECT (SELECT COUNT(*) FROM documents) AS documents, (SELECT COUNT(*) FROM chunks) AS chunks",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(CoreError::storage)?;
        let documents: i64 = row.get("documents");
        let chunks: i64 = row.get("chunks");
        Ok(StoreCounts {
            documents: documents as usize,
            chunks: chunks as usize,
        })
    }
}

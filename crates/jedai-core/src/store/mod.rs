//! Storage abstraction for the chunk index.
//!
//! The [`IndexStore`] trait defines what the indexer and retriever need
//! from a backend: append a document's chunks with their representations,
//! clear everything, report whether anything is indexed, and return the
//! top-k chunks for a query representation.
//!
//! Implementations must be `Send + Sync` and safe under concurrent
//! readers and a writer: a query never observes a partially written
//! document.

pub mod memory;

use std::cmp::Ordering;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::{CoreError, Result};
use crate::models::{Chunk, Document, DocumentKind};
use crate::representation::Representation;

/// Document-level metadata written alongside its chunks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentRecord {
    pub id: String,
    pub label: String,
    pub kind: DocumentKind,
}

impl From<&Document> for DocumentRecord {
    fn from(doc: &Document) -> Self {
        Self {
            id: doc.id.clone(),
            label: doc.label.clone(),
            kind: doc.kind,
        }
    }
}

/// A chunk scored against one query.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f64,
    /// Label of the parent document.
    pub source: String,
}

/// Point-in-time sizes of the index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreCounts {
    pub documents: usize,
    pub chunks: usize,
}

/// Abstract index backend.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`add`](IndexStore::add) | Atomically append one document's chunks |
/// | [`remove`](IndexStore::remove) | Drop one document and its chunks |
/// | [`document_ids`](IndexStore::document_ids) | Ids of every stored document |
/// | [`clear`](IndexStore::clear) | Remove everything, including the scheme id |
/// | [`is_indexed`](IndexStore::is_indexed) | At least one document stored |
/// | [`query`](IndexStore::query) | Top-k chunks by score |
/// | [`counts`](IndexStore::counts) | Document and chunk totals |
#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Append a document and its chunks. Re-adding a document id replaces
    /// its previous chunks. `scheme` is the representation scheme id; the
    /// first add fixes it until the next [`clear`](IndexStore::clear).
    ///
    /// # Errors
    ///
    /// - [`CoreError::InvalidArgument`] when `chunks` and `reps` differ in
    ///   length or a chunk belongs to another document.
    /// - [`CoreError::RepresentationMismatch`] when `scheme` differs from
    ///   the one the index was built with.
    async fn add(
        &self,
        doc: &DocumentRecord,
        chunks: &[Chunk],
        reps: &[Representation],
        scheme: &str,
    ) -> Result<()>;

    /// Drop a document and all of its chunks in one step. Returns `false`
    /// when the id was not stored. The scheme id is kept.
    async fn remove(&self, document_id: &str) -> Result<bool>;

    /// Stored document ids in ascending order.
    async fn document_ids(&self) -> Result<Vec<String>>;

    async fn clear(&self) -> Result<()>;

    async fn is_indexed(&self) -> Result<bool>;

    /// Return at most `k` chunks, best first, ties broken by document id
    /// then chunk index.
    ///
    /// # Errors
    ///
    /// - [`CoreError::InvalidArgument`] when `k == 0`.
    /// - [`CoreError::RepresentationMismatch`] when the store is non-empty
    ///   and `scheme` differs from the indexed one.
    async fn query(
        &self,
        query: &Representation,
        scheme: &str,
        alpha: f64,
        k: usize,
    ) -> Result<Vec<ScoredChunk>>;

    async fn counts(&self) -> Result<StoreCounts>;
}

/// Shared argument checks for [`IndexStore::add`].
pub fn validate_add(doc: &DocumentRecord, chunks: &[Chunk], reps: &[Representation]) -> Result<()> {
    if chunks.len() != reps.len() {
        return Err(CoreError::invalid(format!(
            "{} chunks but {} representations for document '{}'",
            chunks.len(),
            reps.len(),
            doc.id
        )));
    }
    if let Some(stray) = chunks.iter().find(|c| c.document_id != doc.id) {
        return Err(CoreError::invalid(format!(
            "chunk {} belongs to '{}', not '{}'",
            stray.id, stray.document_id, doc.id
        )));
    }
    Ok(())
}

/// Fail with [`CoreError::RepresentationMismatch`] unless the schemes agree.
pub fn check_scheme(indexed: Option<&str>, requested: &str) -> Result<()> {
    match indexed {
        Some(indexed) if indexed != requested => Err(CoreError::RepresentationMismatch {
            indexed: indexed.to_string(),
            requested: requested.to_string(),
        }),
        _ => Ok(()),
    }
}

/// Total order used by every backend for ranking.
pub fn compare_ranked(a: &ScoredChunk, b: &ScoredChunk) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.chunk.document_id.cmp(&b.chunk.document_id))
        .then_with(|| a.chunk.chunk_index.cmp(&b.chunk.chunk_index))
}

/// Sort candidates by [`compare_ranked`] and keep the best `k`.
pub fn rank(mut candidates: Vec<ScoredChunk>, k: usize) -> Vec<ScoredChunk> {
    candidates.sort_by(compare_ranked);
    candidates.truncate(k);
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PageSpan;

    fn scored(doc: &str, idx: i64, score: f64) -> ScoredChunk {
        ScoredChunk {
            chunk: Chunk {
                id: format!("{}-{}", doc, idx),
                document_id: doc.into(),
                chunk_index: idx,
                text: String::new(),
                pages: PageSpan::Unknown,
                hash: String::new(),
            },
            score,
            source: doc.into(),
        }
    }

    #[test]
    fn rank_orders_by_score_then_document_then_index() {
        let ranked = rank(
            vec![
                scored("b", 0, 0.5),
                scored("a", 1, 0.5),
                scored("a", 0, 0.5),
                scored("c", 0, 0.9),
            ],
            3,
        );
        let ids: Vec<_> = ranked.iter().map(|s| s.chunk.id.as_str()).collect();
        assert_eq!(ids, vec!["c-0", "a-0", "a-1"]);
    }

    #[test]
    fn scheme_check() {
        assert!(check_scheme(None, "x").is_ok());
        assert!(check_scheme(Some("x"), "x").is_ok());
        assert!(matches!(
            check_scheme(Some("x"), "y"),
            Err(CoreError::RepresentationMismatch { .. })
        ));
    }
}

//! Query-time retrieval.
//!
//! The [`Retriever`] represents a query with the same
//! [`RepresentationScheme`] the [`Indexer`](crate::index::Indexer) used,
//! delegates ranking to the [`IndexStore`], drops results below the
//! configured score floor, and denormalizes the rest into
//! [`RetrievedChunk`]s.
//!
//! # Ranking
//!
//! 1. Represent the query (terms, plus a vector when the scheme is dense).
//! 2. `store.query(rep, scheme_id, α, k)`: score every chunk, sort by
//!    score (desc), document id (asc), chunk index (asc), keep `k`.
//! 3. Drop results with `score < min_score`.

use std::sync::Arc;

use crate::error::{CoreError, Result};
use crate::models::RetrievedChunk;
use crate::representation::RepresentationScheme;
use crate::store::IndexStore;

/// Default number of results for a search.
pub const DEFAULT_K: i64 = 5;

/// Retrieval tuning parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchParams {
    /// Weight for dense vs lexical: `score = (1-α)*lexical + α*dense`.
    pub hybrid_alpha: f64,
    /// Results scoring below this are dropped.
    pub min_score: f64,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            hybrid_alpha: 0.5,
            min_score: 0.0,
        }
    }
}

/// Read-only view over an [`IndexStore`].
pub struct Retriever {
    store: Arc<dyn IndexStore>,
    scheme: Arc<RepresentationScheme>,
    params: SearchParams,
}

impl Retriever {
    pub fn new(
        store: Arc<dyn IndexStore>,
        scheme: Arc<RepresentationScheme>,
        params: SearchParams,
    ) -> Self {
        Self {
            store,
            scheme,
            params,
        }
    }

    /// Top-`k` chunks for `query`, best first.
    ///
    /// # Errors
    ///
    /// - [`CoreError::InvalidArgument`] if `k < 1` or the query is blank.
    /// - [`CoreError::RepresentationMismatch`] if the index was built with a
    ///   different scheme.
    pub async fn search(&self, query: &str, k: i64) -> Result<Vec<RetrievedChunk>> {
        if k < 1 {
            return Err(CoreError::invalid(format!("k must be at least 1, got {}", k)));
        }
        if query.trim().is_empty() {
            return Err(CoreError::invalid("query must not be blank"));
        }
        let k = usize::try_from(k).map_err(|_| CoreError::invalid("k is too large"))?;

        let rep = self.scheme.represent_query(query).await;
        let scored = self
            .store
            .query(&rep, &self.scheme.id(), self.params.hybrid_alpha, k)
            .await?;

        let results: Vec<RetrievedChunk> = scored
            .into_iter()
            .filter(|s| s.score >= self.params.min_score)
            .map(|s| RetrievedChunk {
                chunk: s.chunk,
                score: s.score,
                source: s.source,
            })
            .collect();

        tracing::debug!(query, k, hits = results.len(), "search complete");
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::chunk_text;
    use crate::representation::Representation;
    use crate::store::memory::InMemoryIndexStore;
    use crate::store::DocumentRecord;
    use crate::models::DocumentKind;

    async fn seeded(params: SearchParams) -> Retriever {
        let store = Arc::new(InMemoryIndexStore::new());
        for (id, text) in [
            ("doc1", "Recursion is a function calling itself."),
            ("doc2", "Loops repeat a block. Recursion can replace loops."),
            ("doc3", "Hash maps store key value pairs."),
        ] {
            let chunks = chunk_text(id, text, 100);
            let reps: Vec<_> = chunks
                .iter()
                .map(|c| Representation::lexical(&c.text))
                .collect();
            let record = DocumentRecord {
                id: id.into(),
                label: format!("{}.md", id),
                kind: DocumentKind::Markdown,
            };
            store.add(&record, &chunks, &reps, "lexical-v1").await.unwrap();
        }
        Retriever::new(store, Arc::new(RepresentationScheme::lexical()), params)
    }

    #[tokio::test]
    async fn test_rejects_non_positive_k_and_blank_query() {
        let r = seeded(SearchParams::default()).await;
        for k in [0, -1] {
            assert!(matches!(
                r.search("recursion", k).await,
                Err(CoreError::InvalidArgument(_))
            ));
        }
        assert!(matches!(
            r.search("   ", 3).await,
            Err(CoreError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_k_larger_than_corpus_returns_everything() {
        let r = seeded(SearchParams::default()).await;
        let hits = r.search("recursion", 50).await.unwrap();
        assert_eq!(hits.len(), 3);
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
        assert_eq!(hits[0].source, "doc1.md");
    }

    #[tokio::test]
    async fn test_min_score_drops_unrelated_chunks() {
        let r = seeded(SearchParams {
            hybrid_alpha: 0.5,
            min_score: 0.01,
        })
        .await;
        let hits = r.search("recursion", 5).await.unwrap();
        let docs: Vec<_> = hits.iter().map(|h| h.document_id()).collect();
        assert_eq!(docs, vec!["doc1", "doc2"]);
    }
}

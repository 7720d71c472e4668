//! Comparable representations of chunk and query text.
//!
//! Every chunk is stored with a [`Representation`]: a bag of normalized
//! terms, plus a dense vector when an [`EmbeddingProvider`] is configured.
//! Queries go through the same [`RepresentationScheme`] so the two sides
//! are always comparable; the store rejects queries built under a
//! different scheme id.
//!
//! # Scoring
//!
//! ```text
//! lexical = cosine(term frequencies)
//! dense   = max(0, cosine(vectors))
//! score   = (1 - α) × lexical + α × dense     when both sides carry vectors
//!         = lexical                          otherwise
//! ```
//!
//! The result is clamped to `[0.0, 1.0]`.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::embedding::{cosine_similarity, EmbeddingProvider};
use crate::error::{CoreError, Result};

/// Identifier of the term-only scheme.
pub const LEXICAL_SCHEME: &str = "lexical-v1";

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "do", "does", "for", "how", "i", "in", "is",
    "it", "of", "on", "or", "that", "the", "this", "to", "was", "what", "when", "where", "which",
    "why", "with", "you",
];

/// Lowercased alphanumeric tokens with common English stopwords removed.
pub fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
}

/// Comparable form of one text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Representation {
    /// Term frequencies. Ordered so that float sums are reproducible.
    pub terms: BTreeMap<String, u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f32>>,
}

impl Representation {
    pub fn lexical(text: &str) -> Self {
        let mut terms = BTreeMap::new();
        for token in tokenize(text) {
            *terms.entry(token).or_insert(0) += 1;
        }
        Self {
            terms,
            vector: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty() && self.vector.is_none()
    }
}

/// Relevance of `candidate` to `query` in `[0.0, 1.0]`.
pub fn similarity(query: &Representation, candidate: &Representation, alpha: f64) -> f64 {
    let lexical = term_cosine(&query.terms, &candidate.terms);
    let score = match (&query.vector, &candidate.vector) {
        (Some(q), Some(c)) => {
            let dense = f64::from(cosine_similarity(q, c).max(0.0));
            let alpha = alpha.clamp(0.0, 1.0);
            (1.0 - alpha) * lexical + alpha * dense
        }
        _ => lexical,
    };
    if score.is_finite() {
        score.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

fn term_cosine(a: &BTreeMap<String, u32>, b: &BTreeMap<String, u32>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    let dot: f64 = small
        .iter()
        .filter_map(|(t, &x)| large.get(t).map(|&y| f64::from(x) * f64::from(y)))
        .sum();
    let norm = |m: &BTreeMap<String, u32>| {
        m.values()
            .map(|&v| f64::from(v) * f64::from(v))
            .sum::<f64>()
            .sqrt()
    };
    let denom = norm(a) * norm(b);
    if denom == 0.0 {
        0.0
    } else {
        dot / denom
    }
}

/// Turns texts into [`Representation`]s.
///
/// Shared by the indexer and the retriever; the [`id`](Self::id) is
/// recorded with the index so a mismatched query can be detected.
#[derive(Clone)]
pub struct RepresentationScheme {
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    batch_size: usize,
}

impl fmt::Debug for RepresentationScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepresentationScheme")
            .field("id", &self.id())
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

impl Default for RepresentationScheme {
    fn default() -> Self {
        Self::lexical()
    }
}

impl RepresentationScheme {
    pub const DEFAULT_BATCH_SIZE: usize = 64;

    /// Terms only, no embedding calls.
    pub fn lexical() -> Self {
        Self {
            embedder: None,
            batch_size: Self::DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_embedder(embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            embedder: Some(embedder),
            batch_size: Self::DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Stable identifier, e.g. `lexical-v1` or `lexical-v1+nomic-embed-text/768`.
    pub fn id(&self) -> String {
        match &self.embedder {
            None => LEXICAL_SCHEME.to_string(),
            Some(e) => format!("{}+{}/{}", LEXICAL_SCHEME, e.model_name(), e.dims()),
        }
    }

    pub fn is_dense(&self) -> bool {
        self.embedder.is_some()
    }

    /// Represent a batch of chunk texts, in order.
    ///
    /// # Errors
    ///
    /// [`CoreError::Embedding`] when the embedder fails or returns the
    /// wrong number of vectors.
    pub async fn represent(&self, texts: &[String]) -> Result<Vec<Representation>> {
        let mut reps: Vec<Representation> =
            texts.iter().map(|t| Representation::lexical(t)).collect();

        let Some(embedder) = &self.embedder else {
            return Ok(reps);
        };

        let mut offset = 0;
        for batch in texts.chunks(self.batch_size) {
            let vectors = embedder.embed(batch).await.map_err(as_embedding_error)?;
            if vectors.len() != batch.len() {
                return Err(CoreError::Embedding(format!(
                    "{} returned {} vectors for {} texts",
                    embedder.model_name(),
                    vectors.len(),
                    batch.len()
                )));
            }
            for (rep, vector) in reps[offset..].iter_mut().zip(vectors) {
                rep.vector = Some(vector);
            }
            offset += batch.len();
        }
        Ok(reps)
    }

    /// Represent a query. Falls back to terms only if embedding fails.
    pub async fn represent_query(&self, query: &str) -> Representation {
        let mut rep = Representation::lexical(query);
        if let Some(embedder) = &self.embedder {
            match embedder.embed(&[query.to_string()]).await {
                Ok(mut vectors) if vectors.len() == 1 => rep.vector = vectors.pop(),
                Ok(vectors) => tracing::warn!(
                    count = vectors.len(),
                    "query embedding returned unexpected vector count, using terms only"
                ),
                Err(e) => tracing::warn!(error = %e, "query embedding failed, using terms only"),
            }
        }
        rep
    }
}

fn as_embedding_error(err: CoreError) -> CoreError {
    match err {
        CoreError::Embedding(_) => err,
        other => CoreError::Embedding(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbedder;

    #[test]
    fn tokenize_drops_stopwords_and_punctuation() {
        let tokens: Vec<String> = tokenize("What is Recursion? It's a function!").collect();
        assert_eq!(tokens, vec!["recursion", "s", "function"]);
    }

    #[test]
    fn lexical_similarity_prefers_shared_terms() {
        let q = Representation::lexical("recursion");
        let hit = Representation::lexical("Recursion is a function calling itself.");
        let miss = Representation::lexical("Sorting algorithms: quicksort, mergesort.");
        assert!(similarity(&q, &hit, 0.5) > 0.0);
        assert_eq!(similarity(&q, &miss, 0.5), 0.0);
    }

    #[test]
    fn similarity_is_bounded() {
        let a = Representation::lexical("alpha beta");
        assert!((similarity(&a, &a, 0.5) - 1.0).abs() < 1e-9);
        assert_eq!(similarity(&Representation::default(), &a, 0.5), 0.0);
    }

    #[test]
    fn scheme_ids_differ_by_embedder() {
        assert_eq!(RepresentationScheme::lexical().id(), "lexical-v1");
        let dense = RepresentationScheme::with_embedder(Arc::new(HashingEmbedder::new(32)));
        assert_eq!(dense.id(), "lexical-v1+hashing/32");
    }

    #[tokio::test]
    async fn represent_batches_and_keeps_order() {
        let scheme =
            RepresentationScheme::with_embedder(Arc::new(HashingEmbedder::new(16))).with_batch_size(2);
        let texts: Vec<String> = ["one", "two", "three"].iter().map(|s| s.to_string()).collect();
        let reps = scheme.represent(&texts).await.unwrap();
        assert_eq!(reps.len(), 3);
        assert!(reps.iter().all(|r| r.vector.as_ref().map(Vec::len) == Some(16)));
        assert!(reps[2].terms.contains_key("three"));
    }
}

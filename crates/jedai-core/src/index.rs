//! Batch ingestion: extract, chunk, represent, store.
//!
//! The [`Indexer`] walks a batch of [`Document`]s one at a time. A document
//! that fails at any stage is recorded in the [`IndexReport`] and the batch
//! moves on; stats only count chunks that actually reached the store.
//!
//! Extracted text is cached per `(document id, content hash)` so re-indexing
//! unchanged material skips the parsers. [`Indexer::clear_index`] drops the
//! cache along with the store contents, and [`Indexer::prune`] drops the
//! entries of documents it removes.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

use crate::chunk::{Chunker, ChunkerConfig};
use crate::error::Result;
use crate::extract::{Extracted, ExtractorRegistry};
use crate::models::{Chunk, Document, IndexFailure, IndexReport};
use crate::representation::RepresentationScheme;
use crate::store::{DocumentRecord, IndexStore};

type ExtractionCache = HashMap<String, (String, Arc<Extracted>)>;

/// Orchestrates ingestion into an [`IndexStore`].
pub struct Indexer {
    store: Arc<dyn IndexStore>,
    scheme: Arc<RepresentationScheme>,
    chunker: Chunker,
    extractors: ExtractorRegistry,
    cache: RwLock<ExtractionCache>,
}

impl Indexer {
    pub fn new(
        store: Arc<dyn IndexStore>,
        scheme: Arc<RepresentationScheme>,
        extractors: ExtractorRegistry,
        chunking: ChunkerConfig,
    ) -> Self {
        Self {
            store,
            scheme,
            chunker: Chunker::new(chunking),
            extractors,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Index a batch, best effort.
    ///
    /// Never fails as a whole: per-document errors end up in
    /// [`IndexReport::failures`].
    pub async fn index(&self, documents: &[Document]) -> IndexReport {
        let started = Instant::now();
        let mut report = IndexReport::default();
        report.stats.total_documents = documents.len();

        for doc in documents {
            match self.index_one(doc).await {
                Ok(written) => {
                    tracing::debug!(document = %doc.id, chunks = written, "indexed document");
                    report.stats.total_chunks += written;
                }
                Err(error) => {
                    tracing::warn!(document = %doc.id, error = %error, "skipping document");
                    report.failures.push(IndexFailure {
                        document_id: doc.id.clone(),
                        error,
                    });
                }
            }
        }

        report.stats.indexing_time_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            documents = report.stats.total_documents,
            failed = report.failures.len(),
            chunks = report.stats.total_chunks,
            elapsed_ms = report.stats.indexing_time_ms,
            "indexing finished"
        );
        report
    }

    async fn index_one(&self, doc: &Document) -> Result<usize> {
        let extracted = self.extract_cached(doc)?;
        let chunks: Vec<Chunk> = self
            .chunker
            .chunk(&doc.id, &extracted.text, &extracted.layout)
            .collect();
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let reps = self.scheme.represent(&texts).await?;
        self.store
            .add(&DocumentRecord::from(doc), &chunks, &reps, &self.scheme.id())
            .await?;
        Ok(chunks.len())
    }

    fn extract_cached(&self, doc: &Document) -> Result<Arc<Extracted>> {
        let hash = doc.content_hash();
        {
            let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
            if let Some((cached_hash, extracted)) = cache.get(&doc.id) {
                if *cached_hash == hash {
                    return Ok(Arc::clone(extracted));
                }
            }
        }

        let extracted = Arc::new(self.extractors.extract(doc)?);
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(doc.id.clone(), (hash, Arc::clone(&extracted)));
        Ok(extracted)
    }

    pub async fn is_indexed(&self) -> Result<bool> {
        self.store.is_indexed().await
    }

    /// Empty the store and forget cached extractions.
    pub async fn clear_index(&self) -> Result<()> {
        self.store.clear().await?;
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        tracing::info!("index cleared");
        Ok(())
    }

    /// Remove every stored document whose id is not in `keep`.
    ///
    /// Returns the removed ids in ascending order.
    pub async fn prune(&self, keep: &HashSet<&str>) -> Result<Vec<String>> {
        let mut removed = Vec::new();
        for id in self.store.document_ids().await? {
            if keep.contains(id.as_str()) {
                continue;
            }
            if self.store.remove(&id).await? {
                tracing::info!(document = %id, "removed stale document");
                removed.push(id);
            }
        }
        if !removed.is_empty() {
            let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
            for id in &removed {
                cache.remove(id);
            }
        }
        Ok(removed)
    }

    pub fn cached_extractions(&self) -> usize {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use crate::extract::Extractor;
    use crate::models::DocumentKind;
    use crate::store::memory::InMemoryIndexStore;

    struct FailingExtractor;

    impl Extractor for FailingExtractor {
        fn name(&self) -> &str {
            "failing"
        }

        fn extract(&self, doc: &Document) -> Result<Extracted> {
            Err(CoreError::ExtractionFailure {
                document_id: doc.id.clone(),
                reason: "corrupt file".into(),
            })
        }
    }

    fn indexer() -> (Indexer, Arc<InMemoryIndexStore>) {
        let store = Arc::new(InMemoryIndexStore::new());
        let mut extractors = ExtractorRegistry::plain_text();
        extractors.register(DocumentKind::Pdf, Arc::new(FailingExtractor));
        let indexer = Indexer::new(
            store.clone(),
            Arc::new(RepresentationScheme::lexical()),
            extractors,
            ChunkerConfig::default(),
        );
        (indexer, store)
    }

    #[tokio::test]
    async fn test_partial_failure_counts_only_written_chunks() {
        let (indexer, store) = indexer();
        let docs = vec![
            Document::text("a.txt", "Alpha content."),
            Document::new("b.pdf", DocumentKind::Pdf, b"%PDF".to_vec()),
            Document::text("c.txt", "Gamma content."),
        ];
        let report = indexer.index(&docs).await;
        assert_eq!(report.stats.total_documents, 3);
        assert_eq!(report.stats.total_chunks, 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].document_id, "b.pdf");
        assert_eq!(report.succeeded(), 2);
        assert_eq!(store.counts().await.unwrap().documents, 2);
    }

    #[tokio::test]
    async fn test_clear_index_drops_cache() {
        let (indexer, _) = indexer();
        indexer
            .index(&[Document::text("a.txt", "Alpha content.")])
            .await;
        assert!(indexer.is_indexed().await.unwrap());
        assert_eq!(indexer.cached_extractions(), 1);

        indexer.clear_index().await.unwrap();
        assert!(!indexer.is_indexed().await.unwrap());
        assert_eq!(indexer.cached_extractions(), 0);
    }

    #[tokio::test]
    async fn test_prune_removes_documents_not_kept() {
        let (indexer, store) = indexer();
        indexer
            .index(&[
                Document::text("old.txt", "Quicksort partitions around a pivot."),
                Document::text("new.txt", "Quicksort picks a pivot."),
            ])
            .await;
        assert_eq!(indexer.cached_extractions(), 2);

        let keep: HashSet<&str> = ["new.txt"].into_iter().collect();
        let removed = indexer.prune(&keep).await.unwrap();
        assert_eq!(removed, vec!["old.txt".to_string()]);
        assert_eq!(store.document_ids().await.unwrap(), vec!["new.txt".to_string()]);
        assert_eq!(indexer.cached_extractions(), 1);

        assert!(indexer.prune(&keep).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_whitespace_document_writes_no_chunks() {
        let (indexer, _) = indexer();
        let report = indexer.index(&[Document::text("blank.txt", "   \n")]).await;
        assert!(report.failures.is_empty());
        assert_eq!(report.stats.total_chunks, 0);
    }
}

//! The course assistant: one handle wiring the SQLite index, the
//! configured embedder and language model into the core pipeline.
//!
//! ```text
//! materials ──▶ Indexer ──▶ SqliteIndexStore ◀── Retriever ──▶ AnswerSynthesizer
//! ```
//!
//! Every CLI command goes through an [`Assistant`]; nothing else opens
//! the database.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use tokio_util::sync::CancellationToken;

use jedai_core::answer::{AnswerSynthesizer, DeltaSink, SynthesizerConfig};
use jedai_core::error::CoreError;
use jedai_core::index::Indexer;
use jedai_core::models::{Answer, Document, IdeContext, IndexReport, RetrievedChunk};
use jedai_core::representation::RepresentationScheme;
use jedai_core::search::Retriever;
use jedai_core::store::IndexStore;

use crate::config::Config;
use crate::connector_fs::scan_materials;
use crate::embedding::create_provider;
use crate::extract::default_registry;
use crate::llm::create_model;
use crate::sqlite_store::SqliteIndexStore;
use crate::{db, migrate};

/// Snapshot printed by `jedai status`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub indexed: bool,
    pub documents: usize,
    pub chunks: usize,
    /// Scheme the index was built with (`None` when empty).
    pub indexed_scheme: Option<String>,
    /// Scheme the current configuration produces.
    pub configured_scheme: String,
}

impl Status {
    pub fn scheme_matches(&self) -> bool {
        self.indexed_scheme
            .as_deref()
            .map_or(true, |s| s == self.configured_scheme)
    }
}

pub struct Assistant {
    config: Config,
    store: Arc<SqliteIndexStore>,
    scheme: Arc<RepresentationScheme>,
    indexer: Indexer,
    retriever: Retriever,
    synthesizer: AnswerSynthesizer,
}

impl Assistant {
    /// Open the index (creating and migrating it if needed) and build the
    /// providers named in `config`.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::apply(&pool).await?;
        let store = Arc::new(SqliteIndexStore::new(pool));

        let scheme = match create_provider(&config.embedding)? {
            Some(provider) => RepresentationScheme::with_embedder(provider)
                .with_batch_size(config.embedding.batch_size),
            None => RepresentationScheme::lexical(),
        };
        let scheme = Arc::new(scheme);

        let dyn_store: Arc<dyn IndexStore> = store.clone();
        let indexer = Indexer::new(
            dyn_store.clone(),
            scheme.clone(),
            default_registry(),
            config.chunking.to_chunker(),
        );
        let retriever = Retriever::new(dyn_store, scheme.clone(), config.retrieval.to_params());
        let synthesizer = AnswerSynthesizer::new(
            create_model(&config.llm)?,
            SynthesizerConfig {
                timeout: Duration::from_secs(config.llm.timeout_secs),
                max_context_chars: config.llm.max_context_chars,
            },
        );

        tracing::debug!(scheme = %scheme.id(), llm = %config.llm.provider, "assistant ready");

        Ok(Self {
            config: config.clone(),
            store,
            scheme,
            indexer,
            retriever,
            synthesizer,
        })
    }

    /// Scan `[materials]` and index everything found.
    ///
    /// With `rebuild`, the index is cleared first. Without it, an index
    /// built under a different representation scheme is refused up front
    /// rather than failing document by document.
    ///
    /// Entries that could not be read are reported as failures next to
    /// extraction failures. Indexed documents that are no longer under the
    /// root are removed and listed in [`IndexReport::removed`]; unreadable
    /// ones keep their previous chunks.
    pub async fn index_materials(&self, rebuild: bool) -> Result<IndexReport> {
        let Some(materials) = &self.config.materials else {
            bail!("No [materials] section in config; nothing to index");
        };
        let scan = scan_materials(materials)?;

        if rebuild {
            self.indexer.clear_index().await?;
        } else if let Some(indexed) = self.store.scheme().await? {
            let configured = self.scheme.id();
            if indexed != configured {
                bail!(
                    "Index was built with '{}' but config produces '{}'; run `jedai index --rebuild`",
                    indexed,
                    configured
                );
            }
        }

        let mut report = self.index_documents(&scan.documents).await;

        let present: HashSet<&str> = scan
            .documents
            .iter()
            .map(|d| d.id.as_str())
            .chain(scan.failures.iter().map(|f| f.document_id.as_str()))
            .collect();
        report.removed = self.indexer.prune(&present).await?;

        report.stats.total_documents += scan.failures.len();
        report.failures.extend(scan.failures);
        report
            .failures
            .sort_by(|a, b| a.document_id.cmp(&b.document_id));
        Ok(report)
    }

    pub async fn index_documents(&self, documents: &[Document]) -> IndexReport {
        self.indexer.index(documents).await
    }

    /// Retrieve top-`k` chunks; `None` uses `retrieval.default_k`.
    pub async fn search(&self, query: &str, k: Option<i64>) -> jedai_core::Result<Vec<RetrievedChunk>> {
        self.retriever
            .search(query, k.unwrap_or(self.config.retrieval.default_k))
            .await
    }

    /// Retrieve, then answer.
    ///
    /// A retrieval failure is logged and answered from general knowledge;
    /// only cancellation and internal invariant breaks surface as errors.
    pub async fn ask(
        &self,
        question: &str,
        ide: Option<&IdeContext>,
        k: Option<i64>,
        cancel: &CancellationToken,
    ) -> jedai_core::Result<Answer> {
        let chunks = self.retrieve_for(question, k, cancel).await?;
        let ide = ide.filter(|ctx| !ctx.is_empty());
        self.synthesizer
            .generate_answer(question, ide, &chunks, cancel)
            .await
    }

    /// [`ask`](Self::ask), streaming the model's text to `on_delta` as it
    /// arrives. The returned answer is authoritative; see
    /// [`AnswerSynthesizer::generate_answer_streaming`].
    pub async fn ask_streaming(
        &self,
        question: &str,
        ide: Option<&IdeContext>,
        k: Option<i64>,
        cancel: &CancellationToken,
        on_delta: DeltaSink<'_>,
    ) -> jedai_core::Result<Answer> {
        let chunks = self.retrieve_for(question, k, cancel).await?;
        let ide = ide.filter(|ctx| !ctx.is_empty());
        self.synthesizer
            .generate_answer_streaming(question, ide, &chunks, cancel, on_delta)
            .await
    }

    async fn retrieve_for(
        &self,
        question: &str,
        k: Option<i64>,
        cancel: &CancellationToken,
    ) -> jedai_core::Result<Vec<RetrievedChunk>> {
        let retrieved = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CoreError::Cancelled),
            result = self.search(question, k) => result,
        };

        match retrieved {
            Ok(chunks) => Ok(chunks),
            Err(e) => {
                tracing::warn!(error = %e, "retrieval failed, answering without course material");
                Ok(Vec::new())
            }
        }
    }

    pub async fn clear(&self) -> Result<()> {
        self.indexer.clear_index().await?;
        Ok(())
    }

    pub async fn status(&self) -> Result<Status> {
        let counts = self.store.counts().await?;
        Ok(Status {
            indexed: self.store.is_indexed().await?,
            documents: counts.documents,
            chunks: counts.chunks,
            indexed_scheme: self.store.scheme().await?,
            configured_scheme: self.scheme.id(),
        })
    }

    pub async fn close(self) {
        self.store.pool().close().await;
    }
}

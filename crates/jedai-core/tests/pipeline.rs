//! End-to-end scenarios over the in-memory store: index, search, answer.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use jedai_core::answer::{AnswerSynthesizer, LanguageModel, SynthesizerConfig};
use jedai_core::chunk::ChunkerConfig;
use jedai_core::embedding::HashingEmbedder;
use jedai_core::extract::{Extracted, Extractor, ExtractorRegistry};
use jedai_core::index::Indexer;
use jedai_core::models::{Document, DocumentKind};
use jedai_core::prompt::Prompt;
use jedai_core::representation::RepresentationScheme;
use jedai_core::search::{Retriever, SearchParams, DEFAULT_K};
use jedai_core::store::memory::InMemoryIndexStore;
use jedai_core::store::IndexStore;
use jedai_core::CoreError;

/// Echoes a fixed answer and keeps the prompts it was given.
struct ScriptedModel {
    reply: String,
    prompts: Mutex<Vec<Prompt>>,
}

impl ScriptedModel {
    fn replying(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: reply.to_string(),
            prompts: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, prompt: &Prompt) -> jedai_core::Result<String> {
        self.prompts.lock().unwrap().push(prompt.clone());
        Ok(self.reply.clone())
    }
}

/// Stands in for a PDF parser that cannot read the file.
struct BrokenPdf;

impl Extractor for BrokenPdf {
    fn name(&self) -> &str {
        "broken-pdf"
    }

    fn extract(&self, doc: &Document) -> jedai_core::Result<Extracted> {
        Err(CoreError::ExtractionFailure {
            document_id: doc.id.clone(),
            reason: "unexpected end of stream".into(),
        })
    }
}

struct Pipeline {
    store: Arc<InMemoryIndexStore>,
    indexer: Indexer,
    retriever: Retriever,
}

fn pipeline(scheme: RepresentationScheme) -> Pipeline {
    let store = Arc::new(InMemoryIndexStore::new());
    let scheme = Arc::new(scheme);
    let mut extractors = ExtractorRegistry::plain_text();
    extractors.register(DocumentKind::Pdf, Arc::new(BrokenPdf));
    Pipeline {
        indexer: Indexer::new(
            store.clone(),
            scheme.clone(),
            extractors,
            ChunkerConfig::default(),
        ),
        retriever: Retriever::new(store.clone(), scheme, SearchParams::default()),
        store,
    }
}

#[tokio::test]
async fn recursion_lecture_is_found_and_cited() {
    let p = pipeline(RepresentationScheme::lexical());
    let report = p
        .indexer
        .index(&[Document::text(
            "doc1",
            "Lecture 1: Recursion is a function calling itself.",
        )])
        .await;
    assert!(report.failures.is_empty());
    assert_eq!(report.stats.total_chunks, 1);

    let hits = p.retriever.search("What is recursion?", 3).await.unwrap();
    assert!(!hits.is_empty());
    assert!(hits.iter().any(|h| h.document_id() == "doc1"));

    let model = ScriptedModel::replying("Recursion is when a function calls itself [1].");
    let synth = AnswerSynthesizer::new(model.clone(), SynthesizerConfig::default());
    let answer = synth
        .generate_answer("What is recursion?", None, &hits, &CancellationToken::new())
        .await
        .unwrap();

    assert!(!answer.is_general_knowledge());
    assert!(answer.citations().iter().any(|c| c.document_id() == "doc1"));

    let prompts = model.prompts.lock().unwrap();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].user.contains("Recursion is a function calling itself."));
}

#[tokio::test]
async fn empty_store_returns_nothing_and_general_answer() {
    let p = pipeline(RepresentationScheme::lexical());
    assert!(!p.indexer.is_indexed().await.unwrap());

    let hits = p.retriever.search("anything", DEFAULT_K).await.unwrap();
    assert!(hits.is_empty());

    let synth = AnswerSynthesizer::new(
        ScriptedModel::replying("From general knowledge."),
        SynthesizerConfig::default(),
    );
    let answer = synth
        .generate_answer("anything", None, &hits, &CancellationToken::new())
        .await
        .unwrap();
    assert!(answer.is_general_knowledge());
    assert!(answer.citations().is_empty());
}

#[tokio::test]
async fn one_broken_document_does_not_sink_the_batch() {
    let p = pipeline(RepresentationScheme::lexical());
    let docs = vec![
        Document::text("notes/a.txt", "Stacks are last in, first out."),
        Document::new("slides/b.pdf", DocumentKind::Pdf, b"%PDF-1.4 truncated".to_vec()),
        Document::new(
            "notes/c.md",
            DocumentKind::Markdown,
            b"Queues are first in, first out.".to_vec(),
        ),
    ];
    let report = p.indexer.index(&docs).await;

    assert_eq!(report.stats.total_documents, 3);
    assert_eq!(report.stats.total_chunks, 2);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].document_id, "slides/b.pdf");
    assert!(matches!(
        report.failures[0].error,
        CoreError::ExtractionFailure { .. }
    ));
    assert_eq!(p.store.counts().await.unwrap().chunks, 2);
}

#[tokio::test]
async fn reindexing_is_idempotent_and_search_is_deterministic() {
    let p = pipeline(RepresentationScheme::with_embedder(Arc::new(
        HashingEmbedder::new(128),
    )));
    let doc = Document::text(
        "week2.txt",
        "A base case stops recursion. Without a base case recursion never ends. \
         Each recursive call works on a smaller problem.",
    );

    let first = p.indexer.index(std::slice::from_ref(&doc)).await;
    let before = p.retriever.search("base case", 10).await.unwrap();
    let second = p.indexer.index(std::slice::from_ref(&doc)).await;
    let after = p.retriever.search("base case", 10).await.unwrap();

    assert_eq!(first.stats.total_chunks, second.stats.total_chunks);
    assert_eq!(
        p.store.counts().await.unwrap().chunks,
        second.stats.total_chunks
    );
    assert_eq!(before, after);
    assert_eq!(after, p.retriever.search("base case", 10).await.unwrap());
}

#[tokio::test]
async fn k_bounds() {
    let p = pipeline(RepresentationScheme::lexical());
    p.indexer
        .index(&[
            Document::text("a.txt", "Graphs have vertices."),
            Document::text("b.txt", "Trees are acyclic graphs."),
        ])
        .await;

    for k in [0, -1] {
        assert!(matches!(
            p.retriever.search("graphs", k).await,
            Err(CoreError::InvalidArgument(_))
        ));
    }
    assert_eq!(p.retriever.search("graphs", 100).await.unwrap().len(), 2);
    assert_eq!(p.retriever.search("graphs", 1).await.unwrap().len(), 1);
}

#[tokio::test]
async fn clear_index_empties_search() {
    let p = pipeline(RepresentationScheme::lexical());
    p.indexer
        .index(&[Document::text("a.txt", "Heaps keep the minimum on top.")])
        .await;
    assert!(p.indexer.is_indexed().await.unwrap());

    p.indexer.clear_index().await.unwrap();
    assert!(!p.indexer.is_indexed().await.unwrap());
    assert!(p.retriever.search("heaps", 5).await.unwrap().is_empty());
}

fn pointers_document() -> Document {
    let text = (0..40)
        .map(|i| format!("Sentence {} about pointers.", i))
        .collect::<Vec<_>>()
        .join(" ");
    Document::text("pointers.txt", &text)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn queries_read_consistent_documents_while_indexing() {
    let p = Arc::new(pipeline(RepresentationScheme::lexical()));
    let doc = pointers_document();
    p.indexer.index(std::slice::from_ref(&doc)).await;
    let expected = p.store.counts().await.unwrap().chunks;

    let writer = {
        let p = p.clone();
        let doc = doc.clone();
        tokio::spawn(async move {
            for _ in 0..50 {
                let report = p.indexer.index(std::slice::from_ref(&doc)).await;
                assert!(report.failures.is_empty());
                tokio::task::yield_now().await;
            }
        })
    };
    while !writer.is_finished() {
        let hits = p.retriever.search("pointers", 1000).await.unwrap();
        assert_eq!(hits.len(), expected);
        tokio::task::yield_now().await;
    }
    writer.await.unwrap();
    assert_eq!(p.store.counts().await.unwrap().chunks, expected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn queries_see_all_or_nothing_while_clearing() {
    let p = Arc::new(pipeline(RepresentationScheme::lexical()));
    let doc = pointers_document();
    p.indexer.index(std::slice::from_ref(&doc)).await;
    let expected = p.store.counts().await.unwrap().chunks;

    let writer = {
        let p = p.clone();
        let doc = doc.clone();
        tokio::spawn(async move {
            for _ in 0..50 {
                p.indexer.clear_index().await.unwrap();
                tokio::task::yield_now().await;
                p.indexer.index(std::slice::from_ref(&doc)).await;
                tokio::task::yield_now().await;
            }
        })
    };
    while !writer.is_finished() {
        let hits = p.retriever.search("pointers", 1000).await.unwrap();
        assert!(
            hits.is_empty() || hits.len() == expected,
            "saw {} of {} chunks",
            hits.len(),
            expected
        );
        tokio::task::yield_now().await;
    }
    writer.await.unwrap();
}

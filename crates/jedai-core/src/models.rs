//! Core data models used throughout the pipeline.
//!
//! These types represent the documents, chunks, retrieval results, and
//! answers that flow between the indexer, the index store, the retriever,
//! and the answer synthesizer.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{CoreError, Result};

/// The closed set of course-material types the indexer understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Pdf,
    Markdown,
    Slides,
    Text,
}

impl DocumentKind {
    pub const ALL: [DocumentKind; 4] = [
        DocumentKind::Pdf,
        DocumentKind::Markdown,
        DocumentKind::Slides,
        DocumentKind::Text,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Pdf => "pdf",
            DocumentKind::Markdown => "markdown",
            DocumentKind::Slides => "slides",
            DocumentKind::Text => "text",
        }
    }

    /// Map a file extension (without the dot, any case) to a kind.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "pdf" => Some(DocumentKind::Pdf),
            "md" | "markdown" => Some(DocumentKind::Markdown),
            "pptx" => Some(DocumentKind::Slides),
            "txt" | "text" => Some(DocumentKind::Text),
            _ => None,
        }
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        DocumentKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| CoreError::invalid(format!("unknown document kind: '{}'", s)))
    }
}

/// One source file supplied by the document source.
///
/// The content is shared (`Arc<[u8]>`) so cloning a document is cheap.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub kind: DocumentKind,
    /// Human-readable source label used in citations (usually the file name).
    pub label: String,
    content: Arc<[u8]>,
}

impl Document {
    /// Create a document. The label defaults to the last path component of `id`.
    pub fn new(id: impl Into<String>, kind: DocumentKind, content: impl Into<Vec<u8>>) -> Self {
        let id = id.into();
        let label = id
            .rsplit(['/', '\\'])
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or(&id)
            .to_string();
        Self {
            id,
            kind,
            label,
            content: Arc::from(content.into()),
        }
    }

    /// Convenience constructor for in-memory plain text.
    pub fn text(id: impl Into<String>, text: &str) -> Self {
        Self::new(id, DocumentKind::Text, text.as_bytes().to_vec())
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn bytes(&self) -> &[u8] {
        &self.content
    }

    /// SHA-256 of the raw content, hex encoded.
    pub fn content_hash(&self) -> String {
        sha256_hex(&self.content)
    }
}

/// Where a chunk sits in its source document.
///
/// A chunk has at most one of a single page or a page range, so the two
/// can never contradict each other.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PageSpan {
    #[default]
    Unknown,
    Page { page: u32 },
    Range { start: u32, end: u32 },
}

impl PageSpan {
    /// Span covering pages `first..=last`, collapsing to a single page when equal.
    pub fn covering(first: u32, last: u32) -> Self {
        let (start, end) = if first <= last {
            (first, last)
        } else {
            (last, first)
        };
        if start == end {
            PageSpan::Page { page: start }
        } else {
            PageSpan::Range { start, end }
        }
    }

    /// Rebuild a span from stored `(start, end)` columns.
    pub fn from_bounds(start: Option<u32>, end: Option<u32>) -> Self {
        match (start, end) {
            (Some(s), Some(e)) => PageSpan::covering(s, e),
            (Some(p), None) | (None, Some(p)) => PageSpan::Page { page: p },
            (None, None) => PageSpan::Unknown,
        }
    }

    pub fn bounds(&self) -> (Option<u32>, Option<u32>) {
        match *self {
            PageSpan::Unknown => (None, None),
            PageSpan::Page { page } => (Some(page), Some(page)),
            PageSpan::Range { start, end } => (Some(start), Some(end)),
        }
    }

    pub fn page(&self) -> Option<u32> {
        match *self {
            PageSpan::Page { page } => Some(page),
            _ => None,
        }
    }

    pub fn range(&self) -> Option<(u32, u32)> {
        match *self {
            PageSpan::Range { start, end } => Some((start, end)),
            _ => None,
        }
    }
}

impl fmt::Display for PageSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            PageSpan::Unknown => Ok(()),
            PageSpan::Page { page } => write!(f, "p. {}", page),
            PageSpan::Range { start, end } => write!(f, "pp. {}-{}", start, end),
        }
    }
}

/// A contiguous span of extracted document text; the unit of retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Deterministic UUID derived from the document id and chunk index.
    pub id: String,
    pub document_id: String,
    pub chunk_index: i64,
    pub text: String,
    pub pages: PageSpan,
    /// SHA-256 of `text`, used for dedup.
    pub hash: String,
}

/// A chunk returned for one query, with denormalized source fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedChunk {
    pub chunk: Chunk,
    /// Relevance in `[0.0, 1.0]`; higher is more relevant.
    pub score: f64,
    /// Human-readable source document label.
    pub source: String,
}

impl RetrievedChunk {
    pub fn content(&self) -> &str {
        &self.chunk.text
    }

    pub fn document_id(&self) -> &str {
        &self.chunk.document_id
    }

    pub fn page(&self) -> Option<u32> {
        self.chunk.pages.page()
    }

    pub fn page_range(&self) -> Option<(u32, u32)> {
        self.chunk.pages.range()
    }

    /// `"lecture1.pdf, pp. 3-4"` style citation label.
    pub fn citation_label(&self) -> String {
        match self.chunk.pages {
            PageSpan::Unknown => self.source.clone(),
            span => format!("{}, {}", self.source, span),
        }
    }
}

/// Optional snapshot of the caller's editor state.
///
/// Every field is optional; a missing field means "not available".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdeContext {
    pub project_name: Option<String>,
    pub file_path: Option<String>,
    pub selected_code: Option<String>,
    pub language: Option<String>,
    pub line_number: Option<u32>,
}

impl IdeContext {
    pub fn is_empty(&self) -> bool {
        self.project_name.is_none()
            && self.file_path.is_none()
            && self.selected_code.is_none()
            && self.language.is_none()
            && self.line_number.is_none()
    }
}

/// Synthesizer output.
///
/// Fields are private: the only way to build an `Answer` is through
/// [`Answer::new`] (or its two branch helpers), which guarantees
/// `citations.is_empty() == is_general_knowledge`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Answer {
    content: String,
    citations: Vec<RetrievedChunk>,
    is_general_knowledge: bool,
}

impl Answer {
    /// Validated constructor.
    ///
    /// # Errors
    ///
    /// [`CoreError::PostconditionViolated`] when the citations and the
    /// general-knowledge flag disagree.
    pub fn new(
        content: impl Into<String>,
        citations: Vec<RetrievedChunk>,
        is_general_knowledge: bool,
    ) -> Result<Self> {
        if citations.is_empty() != is_general_knowledge {
            return Err(CoreError::PostconditionViolated(format!(
                "answer with {} citation(s) cannot have is_general_knowledge = {}",
                citations.len(),
                is_general_knowledge
            )));
        }
        Ok(Self {
            content: content.into(),
            citations,
            is_general_knowledge,
        })
    }

    pub fn grounded(content: impl Into<String>, citations: Vec<RetrievedChunk>) -> Result<Self> {
        Self::new(content, citations, false)
    }

    pub fn general_knowledge(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            citations: Vec::new(),
            is_general_knowledge: true,
        }
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn citations(&self) -> &[RetrievedChunk] {
        &self.citations
    }

    pub fn is_general_knowledge(&self) -> bool {
        self.is_general_knowledge
    }
}

/// Point-in-time report of one `index` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    /// Documents attempted, including the ones that failed.
    pub total_documents: usize,
    /// Chunks actually written to the store.
    pub total_chunks: usize,
    pub indexing_time_ms: u64,
}

/// A document the indexer could not write, and why.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexFailure {
    pub document_id: String,
    pub error: CoreError,
}

/// Best-effort result of a batch `index` call.
#[derive(Debug, Clone, Default)]
pub struct IndexReport {
    pub stats: IndexStats,
    pub failures: Vec<IndexFailure>,
    /// Previously indexed ids whose source is gone.
    pub removed: Vec<String>,
}

impl IndexReport {
    pub fn succeeded(&self) -> usize {
        self.stats.total_documents - self.failures.len()
    }
}

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

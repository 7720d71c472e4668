//! Text extraction seam.
//!
//! The indexer turns raw [`Document`] bytes into text through an
//! [`Extractor`] registered for the document's [`DocumentKind`]. The core
//! crate only ships plain text; PDF, slide and markdown extractors live in
//! the `jedai` app crate because they pull in parsing dependencies.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::chunk::LayoutHints;
use crate::error::{CoreError, Result};
use crate::models::{Document, DocumentKind};

/// Extracted text plus optional page layout.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extracted {
    pub text: String,
    pub layout: LayoutHints,
}

impl Extracted {
    pub fn unpaged(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            layout: LayoutHints::none(),
        }
    }

    pub fn paged<S: AsRef<str>>(pages: &[S]) -> Self {
        let (text, layout) = LayoutHints::join_pages(pages);
        Self { text, layout }
    }
}

/// Converts one document kind into text.
pub trait Extractor: Send + Sync {
    fn name(&self) -> &str;

    /// # Errors
    ///
    /// Implementations should return [`CoreError::ExtractionFailure`].
    fn extract(&self, doc: &Document) -> Result<Extracted>;
}

/// UTF-8 text extractor. Invalid sequences are an extraction failure.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextExtractor;

impl Extractor for PlainTextExtractor {
    fn name(&self) -> &str {
        "text"
    }

    fn extract(&self, doc: &Document) -> Result<Extracted> {
        let text = std::str::from_utf8(doc.bytes()).map_err(|e| CoreError::ExtractionFailure {
            document_id: doc.id.clone(),
            reason: format!("not valid UTF-8: {}", e),
        })?;
        Ok(Extracted::unpaged(text))
    }
}

/// Maps document kinds to extractors.
#[derive(Clone, Default)]
pub struct ExtractorRegistry {
    extractors: HashMap<DocumentKind, Arc<dyn Extractor>>,
}

impl fmt::Debug for ExtractorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.extractors.keys().map(DocumentKind::as_str).collect();
        kinds.sort_unstable();
        f.debug_struct("ExtractorRegistry")
            .field("kinds", &kinds)
            .finish()
    }
}

impl ExtractorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with [`PlainTextExtractor`] for `text` and `markdown`.
    pub fn plain_text() -> Self {
        let mut registry = Self::new();
        registry.register(DocumentKind::Text, Arc::new(PlainTextExtractor));
        registry.register(DocumentKind::Markdown, Arc::new(PlainTextExtractor));
        registry
    }

    /// Register (or replace) the extractor for `kind`.
    pub fn register(&mut self, kind: DocumentKind, extractor: Arc<dyn Extractor>) -> &mut Self {
        self.extractors.insert(kind, extractor);
        self
    }

    pub fn get(&self, kind: DocumentKind) -> Option<&Arc<dyn Extractor>> {
        self.extractors.get(&kind)
    }

    /// Extract `doc` with the registered extractor.
    ///
    /// # Errors
    ///
    /// [`CoreError::ExtractionFailure`] when no extractor handles the kind
    /// or the extractor fails.
    pub fn extract(&self, doc: &Document) -> Result<Extracted> {
        let extractor = self.get(doc.kind).ok_or_else(|| CoreError::ExtractionFailure {
            document_id: doc.id.clone(),
            reason: format!("no extractor registered for kind '{}'", doc.kind),
        })?;
        extractor.extract(doc).map_err(|e| match e {
            CoreError::ExtractionFailure { .. } => e,
            other => CoreError::ExtractionFailure {
                document_id: doc.id.clone(),
                reason: other.to_string(),
            },
        })
    }
}

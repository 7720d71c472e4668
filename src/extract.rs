//! Per-type text extraction for course materials.
//!
//! Registers one [`Extractor`] per [`DocumentKind`]:
//!
//! | Kind | Extractor | Layout |
//! |------|-----------|--------|
//! | `pdf` | [`PdfExtractor`] (`pdf-extract`) | one page per PDF page |
//! | `slides` | [`SlidesExtractor`] (`.pptx` via `zip` + `quick-xml`) | one page per slide |
//! | `markdown` | [`MarkdownExtractor`] (`pulldown-cmark`) | none |
//! | `text` | [`PlainTextExtractor`] | none |
//!
//! Extraction never panics on bad input; failures come back as
//! [`ExtractError`] and the indexer records them per document.

use std::io::Read;
use std::sync::Arc;

use pulldown_cmark::{Event, Parser, TagEnd};
use quick_xml::events::Event as XmlEvent;

use jedai_core::error::{CoreError, Result};
use jedai_core::extract::{Extracted, Extractor, ExtractorRegistry, PlainTextExtractor};
use jedai_core::models::{Document, DocumentKind};

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("slide deck extraction failed: {0}")]
    Ooxml(String),
    #[error("text is not valid UTF-8: {0}")]
    Encoding(#[from] std::str::Utf8Error),
}

impl ExtractError {
    fn for_document(self, doc: &Document) -> CoreError {
        CoreError::ExtractionFailure {
            document_id: doc.id.clone(),
            reason: self.to_string(),
        }
    }
}

/// Registry with an extractor for every supported kind.
pub fn default_registry() -> ExtractorRegistry {
    let mut registry = ExtractorRegistry::new();
    registry
        .register(DocumentKind::Pdf, Arc::new(PdfExtractor))
        .register(DocumentKind::Slides, Arc::new(SlidesExtractor))
        .register(DocumentKind::Markdown, Arc::new(MarkdownExtractor))
        .register(DocumentKind::Text, Arc::new(PlainTextExtractor));
    registry
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PdfExtractor;

impl Extractor for PdfExtractor {
    fn name(&self) -> &str {
        "pdf"
    }

    fn extract(&self, doc: &Document) -> Result<Extracted> {
        let pages = extract_pdf_pages(doc.bytes()).map_err(|e| e.for_document(doc))?;
        Ok(Extracted::paged(&pages))
    }
}

pub fn extract_pdf_pages(bytes: &[u8]) -> std::result::Result<Vec<String>, ExtractError> {
    pdf_extract::extract_text_from_mem_by_pages(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SlidesExtractor;

impl Extractor for SlidesExtractor {
    fn name(&self) -> &str {
        "pptx"
    }

    fn extract(&self, doc: &Document) -> Result<Extracted> {
        let slides = extract_pptx_slides(doc.bytes()).map_err(|e| e.for_document(doc))?;
        Ok(Extracted::paged(&slides))
    }
}

fn read_zip_entry_bounded(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
    max_bytes: u64,
) -> std::result::Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    if out.len() as u64 >= max_bytes {
        return Err(ExtractError::Ooxml(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        )));
    }
    Ok(out)
}

/// Text of each slide, in slide order.
pub fn extract_pptx_slides(bytes: &[u8]) -> std::result::Result<Vec<String>, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    let mut slide_names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("ppt/slides/slide") && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    if slide_names.is_empty() {
        return Err(ExtractError::Ooxml("no slides found".to_string()));
    }
    slide_names.sort_by_key(|name| {
        name.trim_start_matches("ppt/slides/slide")
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });

    let mut slides = Vec::with_capacity(slide_names.len());
    for name in slide_names {
        let xml = read_zip_entry_bounded(&mut archive, &name, MAX_XML_ENTRY_BYTES)?;
        slides.push(slide_text(&xml)?);
    }
    Ok(slides)
}

/// Concatenate `<a:t>` runs, one line per `<a:p>` paragraph.
fn slide_text(xml: &[u8]) -> std::result::Result<String, ExtractError> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(XmlEvent::Start(e)) if e.local_name().as_ref() == b"t" => {
                if let Ok(XmlEvent::Text(te)) = reader.read_event_into(&mut buf) {
                    out.push_str(te.unescape().unwrap_or_default().as_ref());
                }
            }
            Ok(XmlEvent::End(e)) if e.local_name().as_ref() == b"p" => {
                if !out.is_empty() && !out.ends_with('\n') {
                    out.push('\n');
                }
            }
            Ok(XmlEvent::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out.trim_end().to_string())
}

/// Renders markdown to plain text: markup dropped, block boundaries kept
/// as blank lines so they act as chunk boundaries.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkdownExtractor;

impl Extractor for MarkdownExtractor {
    fn name(&self) -> &str {
        "markdown"
    }

    fn extract(&self, doc: &Document) -> Result<Extracted> {
        let source = std::str::from_utf8(doc.bytes())
            .map_err(|e| ExtractError::from(e).for_document(doc))?;
        Ok(Extracted::unpaged(markdown_to_text(source)))
    }
}

pub fn markdown_to_text(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    for event in Parser::new(source) {
        match event {
            Event::Text(text) | Event::Code(text) => out.push_str(&text),
            Event::SoftBreak => out.push(' '),
            Event::HardBreak => out.push('\n'),
            Event::End(
                TagEnd::Paragraph | TagEnd::Heading(_) | TagEnd::Item | TagEnd::CodeBlock,
            ) => {
                let trimmed = out.trim_end().len();
                out.truncate(trimmed);
                out.push_str("\n\n");
            }
            _ => {}
        }
    }
    out.trim().to_string()
}

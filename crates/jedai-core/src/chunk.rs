//! Sentence-boundary text chunker with overlap and page tracking.
//!
//! Splits extracted document text into [`Chunk`]s bounded by a configurable
//! `max_tokens` limit, sharing a configurable fraction of each chunk with
//! the next one so context is not lost at boundaries.
//!
//! Each chunk receives a deterministic UUID derived from its document ID
//! and index, plus a SHA-256 hash of its text for dedup.
//!
//! # Algorithm
//!
//! 1. Convert `max_tokens` to `max_chars` using a 4 chars/token ratio.
//! 2. Cut the text into pages using the [`LayoutHints`] (a single region
//!    when there are none).
//! 3. Split each page into sentence units on `\n\n` and on `.`, `?`, `!`
//!    followed by whitespace. Units never straddle a page boundary.
//! 4. Hard-split any unit longer than `max_chars` at the nearest space.
//! 5. Greedily pack units into a chunk until the next one would exceed
//!    `max_chars`, then restart from the trailing units that fit in the
//!    overlap budget.
//! 6. A chunk built from units of pages N..M carries `PageSpan::Range`,
//!    one built from a single page carries `PageSpan::Page`.
//!
//! Empty and whitespace-only input produce no chunks.
//!
//! # Example
//!
//! ```rust
//! use jedai_core::chunk::{Chunker, ChunkerConfig, LayoutHints};
//!
//! let chunker = Chunker::new(ChunkerConfig::default());
//! let chunks: Vec<_> = chunker
//!     .chunk("doc-123", "Hello world. Second sentence.", &LayoutHints::none())
//!     .collect();
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].chunk_index, 0);
//! ```

use std::collections::VecDeque;
use std::iter::FusedIterator;

use uuid::Uuid;

use crate::models::{sha256_hex, Chunk, PageSpan};

/// Approximate characters-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

/// Largest accepted overlap fraction; anything above would stall progress.
const MAX_OVERLAP_RATIO: f64 = 0.9;

/// Chunk sizing parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChunkerConfig {
    /// Maximum tokens per chunk (converted to chars via `× 4`).
    pub max_tokens: usize,
    /// Fraction of the chunk size repeated at the start of the next chunk.
    pub overlap_ratio: f64,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_tokens: 125,
            overlap_ratio: 0.2,
        }
    }
}

/// Page boundaries inside an extracted text body.
///
/// `page_starts[i]` is the byte offset where page `i + 1` begins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayoutHints {
    page_starts: Vec<usize>,
}

impl LayoutHints {
    /// No layout information (markdown, plain text).
    pub fn none() -> Self {
        Self::default()
    }

    pub fn from_page_starts(mut page_starts: Vec<usize>) -> Self {
        page_starts.sort_unstable();
        Self { page_starts }
    }

    /// Join per-page texts into one body, recording where each page starts.
    pub fn join_pages<S: AsRef<str>>(pages: &[S]) -> (String, LayoutHints) {
        let mut body = String::new();
        let mut starts = Vec::with_capacity(pages.len());
        for (i, page) in pages.iter().enumerate() {
            if i > 0 {
                body.push_str("\n\n");
            }
            starts.push(body.len());
            body.push_str(page.as_ref());
        }
        (body, LayoutHints { page_starts: starts })
    }

    pub fn page_count(&self) -> usize {
        self.page_starts.len()
    }

    pub fn is_paged(&self) -> bool {
        !self.page_starts.is_empty()
    }

    /// `(page number, start, end)` byte regions of `text`.
    fn regions(&self, text: &str) -> Vec<(Option<u32>, usize, usize)> {
        if self.page_starts.is_empty() {
            return vec![(None, 0, text.len())];
        }
        let mut regions = Vec::with_capacity(self.page_starts.len());
        for (i, &start) in self.page_starts.iter().enumerate() {
            let start = snap_to_char_boundary(text, start.min(text.len()));
            let end = self
                .page_starts
                .get(i + 1)
                .map(|&e| snap_to_char_boundary(text, e.min(text.len())))
                .unwrap_or(text.len());
            if end > start {
                regions.push((Some(i as u32 + 1), start, end));
            }
        }
        // Text before the first recorded page belongs to page 1.
        if let Some(&first) = self.page_starts.first() {
            let first = snap_to_char_boundary(text, first.min(text.len()));
            if first > 0 {
                regions.insert(0, (Some(1), 0, first));
            }
        }
        regions
    }
}

/// Splits documents into overlapping chunks.
#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    max_chars: usize,
    overlap_chars: usize,
}

impl Chunker {
    pub fn new(config: ChunkerConfig) -> Self {
        let max_chars = (config.max_tokens * CHARS_PER_TOKEN).max(1);
        let ratio = if config.overlap_ratio.is_finite() {
            config.overlap_ratio.clamp(0.0, MAX_OVERLAP_RATIO)
        } else {
            0.0
        };
        Self {
            max_chars,
            overlap_chars: (max_chars as f64 * ratio) as usize,
        }
    }

    pub fn max_chars(&self) -> usize {
        self.max_chars
    }

    /// Lazily chunk `text`.
    ///
    /// Sentences are split off `text` only as the iterator needs them, and
    /// only the units of the current window stay buffered. The returned
    /// iterator is `Clone`, so a caller can restart the sequence (or resume
    /// it from any point) by cloning.
    pub fn chunk<'a>(
        &self,
        document_id: &'a str,
        text: &'a str,
        hints: &LayoutHints,
    ) -> ChunkIter<'a> {
        ChunkIter {
            document_id,
            units: Units {
                text,
                regions: hints.regions(text).into_iter(),
                page: None,
                region: "",
                oversized: "",
                max_chars: self.max_chars,
            },
            pending: VecDeque::new(),
            next_index: 0,
            max_chars: self.max_chars,
            overlap_chars: self.overlap_chars,
        }
    }
}

/// Split plain text without layout hints, using the default overlap.
pub fn chunk_text(document_id: &str, text: &str, max_tokens: usize) -> Vec<Chunk> {
    Chunker::new(ChunkerConfig {
        max_tokens,
        ..ChunkerConfig::default()
    })
    .chunk(document_id, text, &LayoutHints::none())
    .collect()
}

#[derive(Debug, Clone, Copy)]
struct Unit<'a> {
    text: &'a str,
    page: Option<u32>,
}

/// Sentence units of one document, split on demand.
///
/// Units never straddle a page region, and a sentence longer than
/// `max_chars` comes out as several pieces.
#[derive(Debug, Clone)]
struct Units<'a> {
    text: &'a str,
    regions: std::vec::IntoIter<(Option<u32>, usize, usize)>,
    page: Option<u32>,
    /// Unsplit rest of the current page region.
    region: &'a str,
    /// Rest of a sentence being hard-split.
    oversized: &'a str,
    max_chars: usize,
}

impl<'a> Iterator for Units<'a> {
    type Item = Unit<'a>;

    fn next(&mut self) -> Option<Unit<'a>> {
        loop {
            if !self.oversized.is_empty() {
                let (piece, rest) = next_piece(self.oversized, self.max_chars);
                self.oversized = rest;
                if !piece.is_empty() {
                    return Some(Unit {
                        text: piece,
                        page: self.page,
                    });
                }
                continue;
            }

            if let Some(sentence) = next_sentence(&mut self.region) {
                let trimmed = sentence.trim();
                if trimmed.is_empty() {
                    continue;
                }
                if trimmed.len() > self.max_chars {
                    self.oversized = trimmed;
                    continue;
                }
                return Some(Unit {
                    text: trimmed,
                    page: self.page,
                });
            }

            let (page, start, end) = self.regions.next()?;
            let text = self.text;
            self.page = page;
            self.region = &text[start..end];
        }
    }
}

/// Lazy, finite sequence of chunks for one document.
#[derive(Debug, Clone)]
pub struct ChunkIter<'a> {
    document_id: &'a str,
    units: Units<'a>,
    /// Units pulled from `units` and not yet retired: the overlap carried
    /// from the previous chunk plus lookahead.
    pending: VecDeque<Unit<'a>>,
    next_index: i64,
    max_chars: usize,
    overlap_chars: usize,
}

impl ChunkIter<'_> {
    /// Pull units until `pending[i]` exists. `false` once the text is
    /// exhausted.
    fn fill(&mut self, i: usize) -> bool {
        while self.pending.len() <= i {
            match self.units.next() {
                Some(unit) => self.pending.push_back(unit),
                None => return false,
            }
        }
        true
    }

    /// First unit of the next chunk: the trailing units of `..end` that
    /// fit in the overlap budget, always past the first.
    fn overlap_start(&self, end: usize) -> usize {
        let mut carried = 0;
        let mut next = end;
        while next > 1 {
            let len = self.pending[next - 1].text.len();
            if carried + len > self.overlap_chars {
                break;
            }
            carried += len;
            next -= 1;
        }
        next
    }
}

impl Iterator for ChunkIter<'_> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        if !self.fill(0) {
            return None;
        }

        let mut end = 0;
        let mut len = 0;
        while self.fill(end) {
            let add = self.pending[end].text.len() + usize::from(end > 0);
            if end > 0 && len + add > self.max_chars {
                break;
            }
            len += add;
            end += 1;
        }

        let mut text = String::with_capacity(len);
        for (i, unit) in self.pending.range(..end).enumerate() {
            if i > 0 {
                text.push(' ');
            }
            text.push_str(unit.text);
        }

        let mut pages = self.pending.range(..end).filter_map(|u| u.page);
        let span = match pages.next() {
            Some(first) => {
                let (lo, hi) = pages.fold((first, first), |(lo, hi), p| (lo.min(p), hi.max(p)));
                PageSpan::covering(lo, hi)
            }
            None => PageSpan::Unknown,
        };

        let chunk = make_chunk(self.document_id, self.next_index, text, span);
        self.next_index += 1;
        if self.fill(end) {
            let keep_from = self.overlap_start(end);
            self.pending.drain(..keep_from);
        } else {
            self.pending.clear();
        }
        Some(chunk)
    }
}

impl FusedIterator for ChunkIter<'_> {}

/// Split the next sentence off the front of `rest`, on `\n\n` or on `.`,
/// `?`, `!` followed by whitespace.
fn next_sentence<'a>(rest: &mut &'a str) -> Option<&'a str> {
    if rest.is_empty() {
        return None;
    }
    let mut end = rest.len();
    let mut iter = rest.char_indices().peekable();
    while let Some((i, c)) = iter.next() {
        let next = iter.peek().map(|&(_, n)| n);
        let boundary = match (c, next) {
            ('\n', Some('\n')) => true,
            ('.' | '?' | '!', Some(n)) => n.is_whitespace(),
            _ => false,
        };
        if boundary {
            end = i + c.len_utf8();
            break;
        }
    }
    let (sentence, tail) = rest.split_at(end);
    *rest = tail;
    Some(sentence)
}

/// Cut the first piece that fits in `max_chars` off an oversized unit,
/// at whitespace when there is any (else at a char boundary). Returns the
/// trimmed piece and the rest.
fn next_piece(s: &str, max_chars: usize) -> (&str, &str) {
    if s.len() <= max_chars {
        return (s.trim(), "");
    }
    let limit = snap_to_char_boundary(s, max_chars);
    let cut = s[..limit]
        .rfind(char::is_whitespace)
        .filter(|&pos| pos > 0)
        .unwrap_or(limit);
    let cut = if cut == 0 {
        s.char_indices().nth(1).map(|(i, _)| i).unwrap_or(s.len())
    } else {
        cut
    };
    let (head, tail) = s.split_at(cut);
    (head.trim(), tail.trim_start())
}

/// Snap a byte index back to the nearest valid UTF-8 char boundary.
fn snap_to_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Create a single [`Chunk`] with a deterministic UUID and SHA-256 content hash.
fn make_chunk(document_id: &str, index: i64, text: String, pages: PageSpan) -> Chunk {
    let id = Uuid::new_v5(
        &Uuid::NAMESPACE_OID,
        format!("{}:{}", document_id, index).as_bytes(),
    );
    Chunk {
        id: id.to_string(),
        document_id: document_id.to_string(),
        chunk_index: index,
        hash: sha256_hex(text.as_bytes()),
        text,
        pages,
    }
}

//! # Jedai Core
//!
//! Retrieval-augmented question answering over course materials: data
//! models, chunking, representation scheme, index store abstraction,
//! indexing, retrieval, and grounded answer synthesis.
//!
//! This crate contains no sqlx, HTTP, or filesystem I/O. Durable storage,
//! document parsers, and remote model providers live in the `jedai` app
//! crate and plug in through the traits defined here:
//!
//! | Seam | Trait |
//! |------|-------|
//! | Index backend | [`store::IndexStore`] |
//! | Per-type text extraction | [`extract::Extractor`] |
//! | Dense vectors | [`embedding::EmbeddingProvider`] |
//! | Completions, plain or streamed | [`answer::LanguageModel`] |

pub mod answer;
pub mod chunk;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod index;
pub mod models;
pub mod prompt;
pub mod representation;
pub mod search;
pub mod store;

pub use error::{CoreError, Result};

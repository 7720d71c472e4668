//! # JedAI
//!
//! Course-material question answering. Lecture slides, PDFs and notes are
//! chunked and indexed into SQLite; questions retrieve the most relevant
//! passages and a chat model answers with citations back to the page or
//! slide they came from. When nothing relevant is indexed, the answer says
//! so and carries no citations.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌──────────────┐
//! │  Materials  │──▶│   Indexer    │──▶│    SQLite    │
//! │ pdf/pptx/md │   │ Chunk+Embed  │   │ terms + vecs │
//! └─────────────┘   └──────────────┘   └──────┬───────┘
//!                                             │
//!                         ┌───────────────────┘
//!                         ▼
//!                   ┌───────────┐     ┌─────────────┐
//!                   │ Retriever │────▶│ Synthesizer │──▶ Answer
//!                   └───────────┘     └─────────────┘
//! ```
//!
//! The pipeline itself (chunking, scoring, prompts, the answer invariant)
//! lives in the `jedai-core` crate and has no I/O. This crate supplies the
//! concrete pieces around it.
//!
//! ## Quick Start
//!
//! ```bash
//! jedai init                        # create database
//! jedai index                       # index [materials] root
//! jedai search "tail recursion"
//! jedai ask "why does my recursion overflow?" --file src/fib.rs --line 12
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`assistant`] | Facade wiring store, providers and pipeline |
//! | [`config`] | TOML configuration parsing |
//! | [`connector_fs`] | Course-material discovery |
//! | [`db`] | Database connection |
//! | [`embedding`] | Embedding providers |
//! | [`extract`] | PDF, slide deck and markdown text extraction |
//! | [`llm`] | Chat model providers |
//! | [`logging`] | Tracing subscriber setup |
//! | [`migrate`] | Schema creation |
//! | [`sqlite_store`] | SQLite index store |

pub mod assistant;
pub mod config;
pub mod connector_fs;
pub mod db;
pub mod embedding;
pub mod extract;
pub mod llm;
pub mod logging;
pub mod migrate;
pub mod sqlite_store;

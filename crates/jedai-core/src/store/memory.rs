//! In-memory [`IndexStore`] implementation for tests and ephemeral use.
//!
//! Everything lives behind one `std::sync::RwLock`, so a query sees either
//! all or none of a document's chunks. Query is a brute-force scan.

use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::error::{CoreError, Result};
use crate::models::Chunk;
use crate::representation::{similarity, Representation};

use super::{
    check_scheme, rank, validate_add, DocumentRecord, IndexStore, ScoredChunk, StoreCounts,
};

struct StoredDocument {
    record: DocumentRecord,
    chunks: Vec<(Chunk, Representation)>,
}

#[derive(Default)]
struct Inner {
    scheme: Option<String>,
    documents: BTreeMap<String, StoredDocument>,
}

/// In-memory index store.
#[derive(Default)]
pub struct InMemoryIndexStore {
    inner: RwLock<Inner>,
}

impl InMemoryIndexStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|_| CoreError::Storage("in-memory index lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|_| CoreError::Storage("in-memory index lock poisoned".into()))
    }
}

#[async_trait]
impl IndexStore for InMemoryIndexStore {
    async fn add(
        &self,
        doc: &DocumentRecord,
        chunks: &[Chunk],
        reps: &[Representation],
        scheme: &str,
    ) -> Result<()> {
        validate_add(doc, chunks, reps)?;
        let mut inner = self.write()?;
        check_scheme(inner.scheme.as_deref(), scheme)?;
        inner.scheme = Some(scheme.to_string());
        inner.documents.insert(
            doc.id.clone(),
            StoredDocument {
                record: doc.clone(),
                chunks: chunks.iter().cloned().zip(reps.iter().cloned()).collect(),
            },
        );
        Ok(())
    }

    async fn remove(&self, document_id: &str) -> Result<bool> {
        Ok(self.write()?.documents.remove(document_id).is_some())
    }

    async fn document_ids(&self) -> Result<Vec<String>> {
        Ok(self.read()?.documents.keys().cloned().collect())
    }

    async fn clear(&self) -> Result<()> {
        let mut inner = self.write()?;
        inner.documents.clear();
        inner.scheme = None;
        Ok(())
    }

    async fn is_indexed(&self) -> Result<bool> {
        Ok(!self.read()?.documents.is_empty())
    }

    async fn query(
        &self,
        query: &Representation,
        scheme: &str,
        alpha: f64,
        k: usize,
    ) -> Result<Vec<ScoredChunk>> {
        if k == 0 {
            return Err(CoreError::invalid("k must be at least 1"));
        }
        let inner = self.read()?;
        if inner.documents.is_empty() {
            return Ok(Vec::new());
        }
        check_scheme(inner.scheme.as_deref(), scheme)?;

        let candidates = inner
            .documents
            .values()
            .flat_map(|doc| {
                doc.chunks.iter().map(move |(chunk, rep)| ScoredChunk {
                    chunk: chunk.clone(),
                    score: similarity(query, rep, alpha),
                    source: doc.record.label.clone(),
                })
            })
            .collect();
        Ok(rank(candidates, k))
    }

    async fn counts(&self) -> Result<StoreCounts> {
        let inner = self.read()?;
        Ok(StoreCounts {
            documents: inner.documents.len(),
            chunks: inner.documents.values().map(|d| d.chunks.len()).sum(),
        })
    }
}

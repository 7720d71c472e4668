//! Course-material discovery on the local filesystem.
//!
//! Walks `[materials] root`, applies include/exclude globs to paths
//! relative to the root, and turns every file with a known extension into
//! a [`Document`] whose id is that relative path.
//!
//! An entry that cannot be walked or read (a dangling symlink, a file
//! without read permission) does not stop the scan; it comes back in
//! [`MaterialsScan::failures`] under its relative path.

use std::path::Path;

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use walkdir::WalkDir;

use jedai_core::error::CoreError;
use jedai_core::models::{Document, DocumentKind, IndexFailure};

use crate::config::MaterialsConfig;

/// Everything found under the materials root.
#[derive(Debug, Default)]
pub struct MaterialsScan {
    pub documents: Vec<Document>,
    pub failures: Vec<IndexFailure>,
}

fn relative_id(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    let id = relative.to_string_lossy().replace('\\', "/");
    if id.is_empty() {
        root.display().to_string()
    } else {
        id
    }
}

fn unreadable(id: String, error: impl std::fmt::Display) -> IndexFailure {
    tracing::warn!(path = %id, error = %error, "skipping unreadable entry");
    IndexFailure {
        error: CoreError::ExtractionFailure {
            document_id: id.clone(),
            reason: format!("could not read: {}", error),
        },
        document_id: id,
    }
}

pub fn scan_materials(materials: &MaterialsConfig) -> Result<MaterialsScan> {
    let root = &materials.root;
    if !root.exists() {
        bail!("Materials root does not exist: {}", root.display());
    }

    let include_set = build_globset(&materials.include_globs)?;

    let mut default_excludes = vec!["**/.git/**".to_string(), "**/.*".to_string()];
    default_excludes.extend(materials.exclude_globs.iter().cloned());
    let exclude_set = build_globset(&default_excludes)?;

    let mut scan = MaterialsScan::default();

    let walker = WalkDir::new(root).follow_links(materials.follow_symlinks);
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                let id = relative_id(root, err.path().unwrap_or(root));
                if !exclude_set.is_match(&id) {
                    scan.failures.push(unreadable(id, err));
                }
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let rel_str = relative_id(root, path);

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }

        let Some(kind) = path
            .extension()
            .and_then(|e| e.to_str())
            .and_then(DocumentKind::from_extension)
        else {
            tracing::debug!(path = %rel_str, "skipping file with unsupported extension");
            continue;
        };

        match std::fs::read(path) {
            Ok(bytes) => scan.documents.push(Document::new(rel_str, kind, bytes)),
            Err(err) => scan.failures.push(unreadable(rel_str, err)),
        }
    }

    // Sort for deterministic ordering
    scan.documents.sort_by(|a, b| a.id.cmp(&b.id));
    scan.failures.sort_by(|a, b| a.document_id.cmp(&b.document_id));

    tracing::info!(
        root = %root.display(),
        found = scan.documents.len(),
        unreadable = scan.failures.len(),
        "scanned materials"
    );
    Ok(scan)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}

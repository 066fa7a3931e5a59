//! File-backed archive store.
//!
//! [`JsonArchiveStore`] keeps every entry and the fact sheet in memory and
//! persists them to one JSON file on [`save`](ArchiveStore::save), using an
//! atomic temp-file-then-rename write so a crash never leaves a half-written
//! archive behind. An ephemeral store (no path) keeps everything in memory
//! only, which is what subagents and tests use.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    ArchiveEntry, ArchiveFacts, ArchiveFuture, ArchiveStore, PendingEntry, fit_to_budget,
    rank_entries,
};
use crate::error::ArchiveError;

/// On-disk format version.
const FORMAT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize, Debug, Clone)]
struct ArchiveFile {
    version: u32,
    next_id: u64,
    entries: Vec<ArchiveEntry>,
    #[serde(default)]
    facts: ArchiveFacts,
}

impl Default for ArchiveFile {
    fn default() -> Self {
        Self {
            version: FORMAT_VERSION,
            next_id: 1,
            entries: Vec::new(),
            facts: ArchiveFacts::default(),
        }
    }
}

/// Archive store persisted as a single JSON document.
#[derive(Debug, Default)]
pub struct JsonArchiveStore {
    path: Option<PathBuf>,
    data: ArchiveFile,
}

impl JsonArchiveStore {
    /// Open (or start) an archive at `path`. A missing file is an empty archive.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, ArchiveError> {
        let mut store = Self {
            path: Some(path.into()),
            data: ArchiveFile::default(),
        };
        store.reload().await?;
        Ok(store)
    }

    /// An in-memory store that never touches disk.
    pub fn ephemeral() -> Self {
        Self::default()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn entries(&self) -> &[ArchiveEntry] {
        &self.data.entries
    }

    pub fn facts(&self) -> &ArchiveFacts {
        &self.data.facts
    }

    fn tmp_path(path: &Path) -> PathBuf {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "archive.json".to_string());
        path.with_file_name(format!(".{name}.tmp"))
    }

    async fn reload(&mut self) -> Result<(), ArchiveError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let json = match tokio::fs::read_to_string(path).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No archive at {}; starting empty", path.display());
                self.data = ArchiveFile::default();
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        let data: ArchiveFile = serde_json::from_str(&json)
            .map_err(|e| ArchiveError::Corrupt(format!("{}: {e}", path.display())))?;
        if data.version > FORMAT_VERSION {
            return Err(ArchiveError::Corrupt(format!(
                "{}: unsupported format version {}",
                path.display(),
                data.version
            )));
        }
        debug!(
            "Loaded archive {} ({} entries)",
            path.display(),
            data.entries.len()
        );
        self.data = data;
        Ok(())
    }

    /// Atomic write: serialize to a temp file, then rename into place.
    async fn persist(&self) -> Result<(), ArchiveError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(dir) = path.parent()
            && !dir.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(dir).await?;
        }
        let json = serde_json::to_string_pretty(&self.data)?;
        let tmp_path = Self::tmp_path(path);
        tokio::fs::write(&tmp_path, json).await?;
        tokio::fs::rename(&tmp_path, path).await?;
        debug!(
            "Saved archive {} ({} entries)",
            path.display(),
            self.data.entries.len()
        );
        Ok(())
    }

    fn context_summary(&self, token_budget: usize) -> String {
        let mut body = self.data.facts.render();
        let count = self.data.entries.len();
        if count > 0 {
            if !body.is_empty() {
                body.push('\n');
            }
            body.push_str(&format!(
                "Archived chunks: {count} (search them with recall_archive)"
            ));
        }
        fit_to_budget(&body, token_budget)
    }
}

impl ArchiveStore for JsonArchiveStore {
    fn archive(&mut self, entry: PendingEntry) -> ArchiveFuture<'_, ArchiveEntry> {
        Box::pin(async move {
            let id = format!("ar-{:06}", self.data.next_id);
            self.data.next_id += 1;
            let entry = entry.into_entry(id);
            self.data.entries.push(entry.clone());
            Ok(entry)
        })
    }

    fn search<'a>(&'a self, query: &'a str, k: usize) -> ArchiveFuture<'a, Vec<ArchiveEntry>> {
        Box::pin(async move { Ok(rank_entries(&self.data.entries, query, k)) })
    }

    fn build_context_summary(&self, token_budget: usize) -> ArchiveFuture<'_, String> {
        Box::pin(async move { Ok(self.context_summary(token_budget)) })
    }

    fn record_facts(&mut self, facts: ArchiveFacts) -> ArchiveFuture<'_, ()> {
        Box::pin(async move {
            self.data.facts.merge(facts);
            Ok(())
        })
    }

    fn save(&mut self) -> ArchiveFuture<'_, ()> {
        Box::pin(async move { self.persist().await })
    }

    fn load(&mut self) -> ArchiveFuture<'_, ()> {
        Box::pin(async move { self.reload().await })
    }

    fn entry_count(&self) -> usize {
        self.data.entries.len()
    }
}

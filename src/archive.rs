//! Dedup archive of already-retrieved items.
//!
//! The archive is a set of `(provider, external_id)` pairs persisted as a plain
//! text file with one `provider external_id` pair per line, the same layout
//! media download tools use for their own `--download-archive` files. Files are
//! append-only during normal operation and can be merged by set union.
//!
//! Membership tests and inserts are O(1) amortized (a `HashSet` behind an
//! `RwLock`), so workers and the enqueue path may consult the archive
//! concurrently.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};

use crate::error::{ArchiveError, Result};

/// One archived identity
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArchiveEntry {
    /// Provider name (e.g. `youtube`, or a host name for generic URLs)
    pub provider: String,
    /// Provider-specific identifier
    pub external_id: String,
}

impl ArchiveEntry {
    /// Build an entry, rejecting empty components, embedded whitespace and a
    /// provider starting with `#` (it would read back as a comment line)
    pub fn new(
        provider: impl Into<String>,
        external_id: impl Into<String>,
    ) -> std::result::Result<Self, ArchiveError> {
        let provider = provider.into();
        let external_id = external_id.into();
        let valid = |s: &str| !s.is_empty() && !s.chars().any(char::is_whitespace);
        if !valid(&provider) || provider.starts_with('#') || !valid(&external_id) {
            return Err(ArchiveError::InvalidEntry {
                provider,
                external_id,
            });
        }
        Ok(Self {
            provider,
            external_id,
        })
    }

    /// Derive the dedup identity of a source reference
    ///
    /// - YouTube watch, shorts, live and `youtu.be` URLs map to `youtube <video id>`
    /// - other URLs map to `<host> <path?query>` with a trailing `/` removed
    /// - `provider:id` composites map to `provider id`
    /// - anything else maps to `generic <reference>`
    ///
    /// Whitespace inside components and a leading `#` in the provider are
    /// percent-encoded so the line format stays unambiguous.
    pub fn from_source_ref(source_ref: &str) -> Self {
        let trimmed = source_ref.trim();

        if let Ok(url) = url::Url::parse(trimmed)
            && let Some(host) = url.host_str()
        {
            let host = host.trim_start_matches("www.").trim_start_matches("m.");
            if let Some(video_id) = youtube_video_id(host, &url) {
                return Self::sanitized("youtube", &video_id);
            }

            let mut key = url.path().trim_end_matches('/').to_string();
            if let Some(query) = url.query() {
                key.push('?');
                key.push_str(query);
            }
            if key.is_empty() {
                key.push('/');
            }
            return Self::sanitized(host, &key);
        }

        if let Some((provider, id)) = trimmed.split_once(':')
            && !provider.is_empty()
            && !id.is_empty()
            && !id.starts_with("//")
        {
            return Self::sanitized(provider, id);
        }

        Self::sanitized("generic", trimmed)
    }

    fn sanitized(provider: &str, external_id: &str) -> Self {
        let clean = |s: &str| {
            let s = s.replace(char::is_whitespace, "%20");
            if s.is_empty() { "_".to_string() } else { s }
        };
        let mut provider = clean(&provider.to_lowercase());
        if let Some(rest) = provider.strip_prefix('#') {
            provider = format!("%23{rest}");
        }
        Self {
            provider,
            external_id: clean(external_id),
        }
    }

    /// Parse one archive line; `None` for blank lines and comments
    fn parse_line(line: &str) -> Option<std::result::Result<Self, ()>> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }
        let mut parts = line.split_whitespace();
        match (parts.next(), parts.next(), parts.next()) {
            (Some(provider), Some(id), None) => Some(Ok(Self {
                provider: provider.to_string(),
                external_id: id.to_string(),
            })),
            _ => Some(Err(())),
        }
    }

    fn to_line(&self) -> String {
        format!("{} {}\n", self.provider, self.external_id)
    }
}

impl std::fmt::Display for ArchiveEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.provider, self.external_id)
    }
}

fn youtube_video_id(host: &str, url: &url::Url) -> Option<String> {
    let mut segments = url.path_segments()?.filter(|s| !s.is_empty());
    match host {
        "youtu.be" => segments.next().map(str::to_string),
        "youtube.com" | "music.youtube.com" => {
            let first = segments.next();
            match first {
                Some("watch") | None => url
                    .query_pairs()
                    .find(|(k, _)| k == "v")
                    .map(|(_, v)| v.into_owned()),
                Some("shorts") | Some("live") | Some("embed") => {
                    segments.next().map(str::to_string)
                }
                _ => None,
            }
        }
        _ => None,
    }
}

/// Persistent set of archived identities
#[derive(Debug)]
pub struct ArchiveStore {
    path: Option<PathBuf>,
    entries: RwLock<HashSet<ArchiveEntry>>,
    /// Serializes file writes so appended lines never interleave
    write_lock: Mutex<()>,
}

impl ArchiveStore {
    /// Open (or create on first write) the archive file at `path`
    ///
    /// Malformed lines are skipped with a warning so one bad line written by an
    /// external tool does not disable dedup entirely.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut entries = HashSet::new();

        match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                for (idx, line) in content.lines().enumerate() {
                    match ArchiveEntry::parse_line(line) {
                        Some(Ok(entry)) => {
                            entries.insert(entry);
                        }
                        Some(Err(())) => {
                            tracing::warn!(
                                path = %path.display(),
                                line = idx + 1,
                                content = line,
                                "Skipping malformed archive line"
                            );
                        }
                        None => {}
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        tracing::info!(path = %path.display(), entries = entries.len(), "Archive loaded");

        Ok(Self {
            path: Some(path),
            entries: RwLock::new(entries),
            write_lock: Mutex::new(()),
        })
    }

    /// Archive that lives only in memory
    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: RwLock::new(HashSet::new()),
            write_lock: Mutex::new(()),
        }
    }

    /// Backing file, if any
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Whether `entry` has been archived
    pub async fn contains(&self, entry: &ArchiveEntry) -> bool {
        self.entries.read().await.contains(entry)
    }

    /// Record `entry`; returns `false` if it was already present
    pub async fn add(&self, entry: ArchiveEntry) -> Result<bool> {
        let _write = self.write_lock.lock().await;

        if self.entries.read().await.contains(&entry) {
            return Ok(false);
        }

        if let Some(path) = &self.path {
            append_lines(path, std::slice::from_ref(&entry)).await?;
        }
        self.entries.write().await.insert(entry);
        Ok(true)
    }

    /// Merge archive lines into this store (set union)
    ///
    /// Returns the number of entries that were not already present. The whole
    /// input is validated before anything is written.
    pub async fn import_lines(&self, content: &str, origin: &Path) -> Result<usize> {
        let mut parsed = Vec::new();
        for (idx, line) in content.lines().enumerate() {
            match ArchiveEntry::parse_line(line) {
                Some(Ok(entry)) => parsed.push(entry),
                Some(Err(())) => {
                    return Err(ArchiveError::MalformedLine {
                        path: origin.to_path_buf(),
                        line: idx + 1,
                        content: line.to_string(),
                    }
                    .into());
                }
                None => {}
            }
        }

        let _write = self.write_lock.lock().await;
        let fresh: Vec<ArchiveEntry> = {
            let existing = self.entries.read().await;
            let mut seen = HashSet::new();
            parsed
                .into_iter()
                .filter(|e| !existing.contains(e) && seen.insert(e.clone()))
                .collect()
        };

        if fresh.is_empty() {
            return Ok(0);
        }

        if let Some(path) = &self.path {
            append_lines(path, &fresh).await?;
        }

        let added = fresh.len();
        self.entries.write().await.extend(fresh);

        tracing::info!(origin = %origin.display(), added, "Archive entries imported");
        Ok(added)
    }

    /// Merge another archive file into this store
    pub async fn import_file(&self, path: impl AsRef<Path>) -> Result<usize> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await?;
        self.import_lines(&content, path).await
    }

    /// Write every entry to `path`, sorted, one per line
    pub async fn export_file(&self, path: impl AsRef<Path>) -> Result<usize> {
        let entries = self.entries().await;
        let body: String = entries.iter().map(ArchiveEntry::to_line).collect();
        tokio::fs::write(path.as_ref(), body).await?;
        Ok(entries.len())
    }

    /// Snapshot of all entries, sorted
    pub async fn entries(&self) -> Vec<ArchiveEntry> {
        let mut entries: Vec<_> = self.entries.read().await.iter().cloned().collect();
        entries.sort();
        entries
    }

    /// Number of archived entries
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the archive is empty
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Remove every entry and truncate the backing file
    pub async fn clear(&self) -> Result<()> {
        let _write = self.write_lock.lock().await;
        if let Some(path) = &self.path {
            match tokio::fs::metadata(path).await {
                Ok(_) => tokio::fs::write(path, b"").await?,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        self.entries.write().await.clear();
        tracing::info!("Archive cleared");
        Ok(())
    }
}

async fn append_lines(path: &Path, entries: &[ArchiveEntry]) -> std::io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    let body: String = entries.iter().map(ArchiveEntry::to_line).collect();
    file.write_all(body.as_bytes()).await?;
    file.flush().await
}

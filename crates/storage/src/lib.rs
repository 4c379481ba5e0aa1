use std::collections::HashMap;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use shared::domain::SessionId;
use shared::protocol::ConvertedFile;
use tokio::sync::Mutex;
use tracing::warn;
use zip::{write::SimpleFileOptions, CompressionMethod, ZipWriter};

/// Strip path components and replace anything outside `[A-Za-z0-9._-]`.
/// Never returns an empty name.
pub fn sanitize_filename(raw: &str) -> String {
    let base = raw
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(raw)
        .trim()
        .trim_matches('.');
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned
    }
}

/// On-disk name of a session-owned artifact.
pub fn artifact_name(session: SessionId, filename: &str) -> String {
    format!("{session}_{}", sanitize_filename(filename))
}

/// The client-facing filename, i.e. the artifact name without its session
/// prefix.
pub fn original_name(artifact: &str) -> &str {
    artifact
        .split_once('_')
        .map(|(_, rest)| rest)
        .unwrap_or(artifact)
}

/// Session that owns an artifact, from its name prefix.
pub fn owning_session(artifact: &str) -> Option<SessionId> {
    artifact
        .split_once('_')
        .and_then(|(prefix, _)| prefix.parse().ok())
}

fn is_safe_artifact_name(name: &str) -> bool {
    !name.is_empty()
        && !name.contains(['/', '\\'])
        && name != "."
        && name != ".."
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub deleted: usize,
    pub bytes: u64,
}

/// Transient files for in-flight conversions. Uploads are deleted as soon as
/// conversion finishes; download artifacts live until session reset or the
/// stale-file sweep.
#[derive(Clone)]
pub struct FileStore {
    upload_dir: PathBuf,
    download_dir: PathBuf,
}

impl FileStore {
    pub fn new(upload_dir: impl Into<PathBuf>, download_dir: impl Into<PathBuf>) -> Result<Self> {
        let upload_dir = upload_dir.into();
        let download_dir = download_dir.into();
        std::fs::create_dir_all(&upload_dir)
            .with_context(|| format!("failed to create upload dir {}", upload_dir.display()))?;
        std::fs::create_dir_all(&download_dir)
            .with_context(|| format!("failed to create download dir {}", download_dir.display()))?;
        Ok(Self {
            upload_dir,
            download_dir,
        })
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    pub async fn stash_upload(
        &self,
        session: SessionId,
        filename: &str,
        bytes: &[u8],
    ) -> Result<PathBuf> {
        let path = self.upload_dir.join(artifact_name(session, filename));
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("failed to stash upload {}", path.display()))?;
        Ok(path)
    }

    pub async fn discard_upload(&self, path: &Path) -> Result<()> {
        tokio::fs::remove_file(path)
            .await
            .with_context(|| format!("failed to remove upload {}", path.display()))
    }

    /// Persist one conversion output; returns its artifact name.
    pub async fn write_artifact(
        &self,
        session: SessionId,
        filename: &str,
        bytes: &[u8],
    ) -> Result<String> {
        let name = artifact_name(session, filename);
        let path = self.download_dir.join(&name);
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("failed to write artifact {}", path.display()))?;
        Ok(name)
    }

    /// Load an artifact by name. Rejects names with path components; absent
    /// artifacts read as `None`.
    pub async fn read_artifact(&self, artifact: &str) -> Result<Option<Vec<u8>>> {
        if !is_safe_artifact_name(artifact) {
            return Ok(None);
        }
        let path = self.download_dir.join(artifact);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => {
                Err(err).with_context(|| format!("failed to read artifact {}", path.display()))
            }
        }
    }

    /// Download-area artifact names owned by `session`, sorted.
    pub async fn session_artifacts(&self, session: SessionId) -> Result<Vec<String>> {
        let prefix = format!("{session}_");
        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.download_dir)
            .await
            .with_context(|| format!("failed to list {}", self.download_dir.display()))?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(&prefix) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// Delete every file owned by `session` from both areas.
    pub async fn remove_session_files(&self, session: SessionId) -> Result<usize> {
        let prefix = format!("{session}_");
        let mut removed = 0;
        for dir in [&self.upload_dir, &self.download_dir] {
            let mut entries = tokio::fs::read_dir(dir)
                .await
                .with_context(|| format!("failed to list {}", dir.display()))?;
            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name().to_string_lossy().into_owned();
                if !name.starts_with(&prefix) {
                    continue;
                }
                match tokio::fs::remove_file(entry.path()).await {
                    Ok(()) => removed += 1,
                    Err(err) => warn!(path = %entry.path().display(), %err, "failed to delete session file"),
                }
            }
        }
        Ok(removed)
    }

    /// Zip every artifact of `session`, entry names without the session
    /// prefix. `None` when the session has no artifacts.
    pub async fn zip_session_artifacts(&self, session: SessionId) -> Result<Option<Vec<u8>>> {
        let names = self.session_artifacts(session).await?;
        if names.is_empty() {
            return Ok(None);
        }

        let mut entries = Vec::with_capacity(names.len());
        for name in &names {
            let path = self.download_dir.join(name);
            let bytes = tokio::fs::read(&path)
                .await
                .with_context(|| format!("failed to read artifact {}", path.display()))?;
            entries.push((original_name(name).to_string(), bytes));
        }
        Ok(Some(build_zip(&entries)?))
    }

    /// Delete files older than `max_age` from both areas.
    pub async fn sweep_stale(&self, max_age: Duration) -> Result<SweepReport> {
        let mut report = SweepReport::default();
        for dir in [&self.upload_dir, &self.download_dir] {
            let mut entries = tokio::fs::read_dir(dir)
                .await
                .with_context(|| format!("failed to list {}", dir.display()))?;
            while let Some(entry) = entries.next_entry().await? {
                let metadata = match entry.metadata().await {
                    Ok(metadata) if metadata.is_file() => metadata,
                    Ok(_) => continue,
                    Err(err) => {
                        warn!(path = %entry.path().display(), %err, "failed to stat file during sweep");
                        continue;
                    }
                };
                let age = metadata
                    .modified()
                    .ok()
                    .and_then(|modified| modified.elapsed().ok());
                let Some(age) = age else { continue };
                if age <= max_age {
                    continue;
                }
                match tokio::fs::remove_file(entry.path()).await {
                    Ok(()) => {
                        report.deleted += 1;
                        report.bytes += metadata.len();
                    }
                    Err(err) => {
                        warn!(path = %entry.path().display(), %err, "failed to delete stale file")
                    }
                }
            }
        }
        Ok(report)
    }
}

fn build_zip(entries: &[(String, Vec<u8>)]) -> Result<Vec<u8>> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for (name, bytes) in entries {
        writer
            .start_file(name.as_str(), options)
            .with_context(|| format!("failed to add zip entry {name}"))?;
        writer
            .write_all(bytes)
            .with_context(|| format!("failed to write zip entry {name}"))?;
    }
    Ok(writer.finish().context("failed to finalize zip")?.into_inner())
}

#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub files: Vec<ConvertedFile>,
    pub payment_completed: bool,
    pub created_at: DateTime<Utc>,
}

/// In-memory conversion/payment state per session. Deliberately not durable:
/// a restart orphans the artifacts, and the stale-file sweep reclaims them.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<Mutex<HashMap<SessionId, SessionRecord>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record_conversion(&self, session: SessionId, files: Vec<ConvertedFile>) {
        let mut inner = self.inner.lock().await;
        inner.insert(
            session,
            SessionRecord {
                files,
                payment_completed: false,
                created_at: Utc::now(),
            },
        );
    }

    /// Returns false for sessions with no recorded conversion.
    pub async fn mark_payment_complete(&self, session: SessionId) -> bool {
        let mut inner = self.inner.lock().await;
        match inner.get_mut(&session) {
            Some(record) => {
                record.payment_completed = true;
                true
            }
            None => false,
        }
    }

    pub async fn payment_completed(&self, session: SessionId) -> bool {
        let inner = self.inner.lock().await;
        inner
            .get(&session)
            .map(|record| record.payment_completed)
            .unwrap_or(false)
    }

    pub async fn files(&self, session: SessionId) -> Vec<ConvertedFile> {
        let inner = self.inner.lock().await;
        inner
            .get(&session)
            .map(|record| record.files.clone())
            .unwrap_or_default()
    }

    pub async fn snapshot(&self, session: SessionId) -> Option<SessionRecord> {
        let inner = self.inner.lock().await;
        inner.get(&session).cloned()
    }

    pub async fn clear(&self, session: SessionId) {
        let mut inner = self.inner.lock().await;
        inner.remove(&session);
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;

//! Row-oriented file persistence.
//!
//! Every store keeps one line per record, fields separated by a single
//! space. Single records are appended; full rewrites go through a temporary
//! sibling file that is renamed over the original, so a crash mid-write
//! leaves either the old or the new contents on disk.

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;

use crate::{AppError, AppResult};

/// A space-delimited row file on the local filesystem.
#[derive(Debug, Clone)]
pub struct RowFile {
    path: PathBuf,
}

impl RowFile {
    /// Create a handle for the file at `path`. Nothing is touched on disk.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the backing file exists.
    pub async fn exists(&self) -> bool {
        tokio::fs::try_exists(&self.path).await.unwrap_or(false)
    }

    /// Read all non-blank lines. A missing file reads as empty.
    pub async fn read_lines(&self) -> AppResult<Vec<String>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => Ok(contents
                .lines()
                .map(|line| line.trim_end_matches('\r'))
                .filter(|line| !line.trim().is_empty())
                .map(str::to_string)
                .collect()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(AppError::Io(format!(
                "Failed to read {}: {e}",
                self.path.display()
            ))),
        }
    }

    /// Append one line, creating the file and its directory if needed.
    pub async fn append_line(&self, line: &str) -> AppResult<()> {
        self.ensure_parent().await?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| AppError::Io(format!("Failed to open {}: {e}", self.path.display())))?;

        let mut buf = String::with_capacity(line.len() + 1);
        buf.push_str(line);
        buf.push('\n');
        file.write_all(buf.as_bytes())
            .await
            .map_err(|e| AppError::Io(format!("Failed to append to {}: {e}", self.path.display())))?;
        file.flush()
            .await
            .map_err(|e| AppError::Io(format!("Failed to flush {}: {e}", self.path.display())))?;
        Ok(())
    }

    /// Replace the whole file with `lines`.
    ///
    /// The new contents are written and synced to `<file>.tmp` first and then
    /// renamed over the original.
    pub async fn replace_lines<I, S>(&self, lines: I) -> AppResult<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.ensure_parent().await?;

        let mut contents = String::new();
        for line in lines {
            contents.push_str(line.as_ref());
            contents.push('\n');
        }

        let tmp_path = self.tmp_path();
        let mut file = tokio::fs::File::create(&tmp_path)
            .await
            .map_err(|e| AppError::Io(format!("Failed to create {}: {e}", tmp_path.display())))?;
        file.write_all(contents.as_bytes())
            .await
            .map_err(|e| AppError::Io(format!("Failed to write {}: {e}", tmp_path.display())))?;
        file.sync_all()
            .await
            .map_err(|e| AppError::Io(format!("Failed to sync {}: {e}", tmp_path.display())))?;
        drop(file);

        tokio::fs::rename(&tmp_path, &self.path).await.map_err(|e| {
            AppError::Io(format!(
                "Failed to replace {} with {}: {e}",
                self.path.display(),
                tmp_path.display()
            ))
        })
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(std::ffi::OsStr::to_os_string)
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    async fn ensure_parent(&self) -> AppResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    AppError::Io(format!("Failed to create directory {}: {e}", parent.display()))
                })?;
            }
        }
        Ok(())
    }
}

/// Percent-encode a keyword for storage, encoding spaces as `+`.
#[must_use]
pub fn quote_plus(value: &str) -> String {
    urlencoding::encode(value).replace("%20", "+")
}

/// Reverse of [`quote_plus`]. Invalid escapes are kept verbatim.
#[must_use]
pub fn unquote_plus(value: &str) -> String {
    let spaced = value.replace('+', " ");
    match urlencoding::decode(&spaced) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => spaced,
    }
}

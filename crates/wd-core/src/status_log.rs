//! Append-only, line-oriented status logs.
//!
//! Every line is prefixed with `[ISO-8601-timestamp]`. Files are opened in
//! append mode for each write and never truncated.

use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use tokio::io::AsyncWriteExt;

#[derive(Debug, thiserror::Error)]
pub enum StatusLogError {
    #[error("status log {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, StatusLogError>;

/// Format a single log line, without the trailing newline.
pub fn format_line(at: DateTime<Utc>, message: &str) -> String {
    format!(
        "[{}] {}",
        at.to_rfc3339_opts(SecondsFormat::Millis, true),
        message.trim_end_matches('\n')
    )
}

#[derive(Debug, Clone)]
pub struct StatusLog {
    path: PathBuf,
}

impl StatusLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one line stamped with the current time.
    pub async fn append(&self, message: &str) -> Result<()> {
        self.append_at(Utc::now(), message).await
    }

    pub async fn append_at(&self, at: DateTime<Utc>, message: &str) -> Result<()> {
        self.append_lines(&[format_line(at, message)]).await
    }

    /// Append pre-formatted lines with a single open/write.
    pub async fn append_lines(&self, lines: &[String]) -> Result<()> {
        if lines.is_empty() {
            return Ok(());
        }
        let io_err = |source: std::io::Error| StatusLogError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
            }
        }

        let mut buf = String::new();
        for line in lines {
            buf.push_str(line);
            buf.push('\n');
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(io_err)?;
        file.write_all(buf.as_bytes()).await.map_err(io_err)?;
        file.flush().await.map_err(io_err)?;
        Ok(())
    }
}

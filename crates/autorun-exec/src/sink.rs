//! Destinations for child output: raw log, clean log and the live console.

use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::{AsyncWriteExt, Stdout};
use tracing::warn;

use crate::{LogSanitizer, SupervisorError};

struct LogFile {
    path: PathBuf,
    file: File,
}

impl LogFile {
    async fn create(path: &Path) -> Result<Self, SupervisorError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| SupervisorError::LogFile {
                    path: path.to_path_buf(),
                    source,
                })?;
        }
        let file = File::create(path)
            .await
            .map_err(|source| SupervisorError::LogFile {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    async fn write(&mut self, data: &[u8]) -> Result<(), SupervisorError> {
        self.file
            .write_all(data)
            .await
            .map_err(|source| SupervisorError::LogFile {
                path: self.path.clone(),
                source,
            })
    }
}

/// Fans every output chunk out to its destinations.
///
/// A failing write is logged once and that destination is dropped; the task
/// keeps running.
pub struct LogSink {
    raw: Option<LogFile>,
    clean: Option<LogFile>,
    console: Option<Stdout>,
    sanitizer: LogSanitizer,
}

impl LogSink {
    /// Create both log files, truncating earlier contents.
    pub async fn create(raw: &Path, clean: &Path, echo: bool) -> Result<Self, SupervisorError> {
        Ok(Self {
            raw: Some(LogFile::create(raw).await?),
            clean: Some(LogFile::create(clean).await?),
            console: echo.then(tokio::io::stdout),
            sanitizer: LogSanitizer::new(),
        })
    }

    /// Write one chunk of output.
    pub async fn write(&mut self, chunk: &[u8]) {
        write_or_drop(&mut self.raw, chunk).await;

        let clean = self.sanitizer.feed(chunk);
        if !clean.is_empty() {
            write_or_drop(&mut self.clean, clean.as_bytes()).await;
        }

        if let Some(console) = self.console.as_mut() {
            if console.write_all(chunk).await.is_err() || console.flush().await.is_err() {
                self.console = None;
            }
        }
    }

    /// Flush everything and return the output tail.
    pub async fn finish(mut self) -> Vec<String> {
        let rest = self.sanitizer.finish();
        if !rest.is_empty() {
            write_or_drop(&mut self.clean, rest.as_bytes()).await;
        }
        for log in [self.raw.as_mut(), self.clean.as_mut()].into_iter().flatten() {
            if let Err(e) = log.file.flush().await {
                warn!(path = %log.path.display(), error = %e, "Failed to flush log");
            }
        }
        self.sanitizer.tail()
    }
}

async fn write_or_drop(log: &mut Option<LogFile>, data: &[u8]) {
    if let Some(file) = log.as_mut() {
        if let Err(e) = file.write(data).await {
            warn!(error = %e, "Log write failed, disabling this log for the task");
            *log = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_writes_raw_and_clean() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("logs/T-1.log");
        let clean = dir.path().join("logs/T-1.clean.log");

        let mut sink = LogSink::create(&raw, &clean, false).await.unwrap();
        sink.write(b"\x1b[32mgreen\x1b[0m\r\n").await;
        sink.write(b"tail without newline").await;
        let tail = sink.finish().await;

        assert_eq!(
            std::fs::read(&raw).unwrap(),
            b"\x1b[32mgreen\x1b[0m\r\ntail without newline"
        );
        assert_eq!(
            std::fs::read_to_string(&clean).unwrap(),
            "green\ntail without newline"
        );
        assert_eq!(tail, ["green", "tail without newline"]);
    }
}

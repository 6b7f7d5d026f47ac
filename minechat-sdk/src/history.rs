//! Chat history on disk: one line per message, append-only.

use std::io;
use std::path::{Path, PathBuf};

use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

use crate::error::Error;

/// What to do when the history file cannot be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HistoryPolicy {
    /// Log it and keep chatting without a history.
    #[default]
    BestEffort,
    /// Stop the client.
    Required,
}

#[derive(Debug, Clone)]
pub struct HistoryConfig {
    pub path: PathBuf,
    pub policy: HistoryPolicy,
}

impl HistoryConfig {
    fn fail(&self, source: io::Error) -> Result<(), Error> {
        match self.policy {
            HistoryPolicy::BestEffort => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %source,
                    "history unavailable, continuing without it"
                );
                Ok(())
            }
            HistoryPolicy::Required => Err(Error::History {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

/// Read previously stored lines. A missing file is an empty history.
pub async fn load(path: &Path) -> io::Result<Vec<String>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(String::from_utf8_lossy(&bytes)
            .lines()
            .map(|line| line.trim_end().to_string())
            .filter(|line| !line.is_empty())
            .collect()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e),
    }
}

/// [`load`] with the configured failure policy applied.
pub async fn replay(config: &HistoryConfig) -> Result<Vec<String>, Error> {
    match load(&config.path).await {
        Ok(lines) => {
            tracing::debug!(path = %config.path.display(), lines = lines.len(), "history loaded");
            Ok(lines)
        }
        Err(e) => config.fail(e).map(|()| Vec::new()),
    }
}

/// Append every line received on `lines` until all senders are gone.
pub async fn record(
    config: HistoryConfig,
    mut lines: mpsc::UnboundedReceiver<String>,
) -> Result<(), Error> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&config.path)
        .await;
    let mut file = match file {
        Ok(file) => file,
        Err(e) => return config.fail(e),
    };

    while let Some(line) = lines.recv().await {
        let written = async {
            file.write_all(format!("{line}\n").as_bytes()).await?;
            file.flush().await
        };
        if let Err(e) = written.await {
            return config.fail(e);
        }
    }
    Ok(())
}

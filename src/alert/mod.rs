//! Operator alerting.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use log::{error, warn};
use tokio::io::AsyncWriteExt;

use crate::config::AlertSettings;

#[async_trait]
pub trait Alerter: Send + Sync {
    async fn alert(&self, subject: &str, body: &str);
}

/// Logs alerts at error level and, when configured, appends them to a file.
#[derive(Debug, Clone, Default)]
pub struct LogAlerter {
    fallback_log: Option<PathBuf>,
}

impl LogAlerter {
    pub fn new(settings: &AlertSettings) -> Self {
        Self {
            fallback_log: settings.fallback_log.as_ref().map(PathBuf::from),
        }
    }

    async fn append(&self, path: &Path, line: &str) -> std::io::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await
    }
}

#[async_trait]
impl Alerter for LogAlerter {
    async fn alert(&self, subject: &str, body: &str) {
        error!("[ALERT] {}: {}", subject, body);

        if let Some(path) = &self.fallback_log {
            let line = format!("{} | {} | {}\n", Utc::now().to_rfc3339(), subject, body);
            if let Err(e) = self.append(path, &line).await {
                warn!("Failed to write alert to {}: {}", path.display(), e);
            }
        }
    }
}

use anyhow::{Context, Result};
use chrono::Local;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

/// Append-only record of every file written, one line per write.
#[derive(Debug, Clone)]
pub struct UpdateLog {
    path: PathBuf,
}

impl UpdateLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&self, filename: &str, feature_count: usize) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open log {}", self.path.display()))?;

        writeln!(file, "{}", log_line(filename, feature_count))
            .with_context(|| format!("Failed to write log {}", self.path.display()))?;

        info!("Log: {} updated ({} features)", filename, feature_count);
        Ok(())
    }
}

fn log_line(filename: &str, feature_count: usize) -> String {
    format!(
        "{} – Opdaterede {} med {} features",
        Local::now().format("%Y-%m-%d %H:%M:%S"),
        filename,
        feature_count
    )
}

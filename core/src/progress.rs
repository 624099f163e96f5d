//! Progress reporting.
//!
//! The engine writes human-readable lines and a structured JSON progress
//! report to an append-only sink. It never reads anything back.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::io::Write;

/// Per-image transfer status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

/// Progress of one image within a batch
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageProgress {
    pub display_name: String,
    pub status: ImageStatus,
    pub current: u64,
    pub total: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Structured progress report
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressReport {
    #[serde(rename = "type")]
    pub kind: String,
    pub compatibility: String,
    pub images: Vec<ImageProgress>,
    pub updated_at: DateTime<Utc>,
}

impl ProgressReport {
    /// Start a report with every image queued.
    pub fn new<I, S>(images: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            kind: "progressReport".to_string(),
            compatibility: "1".to_string(),
            images: images
                .into_iter()
                .map(|name| ImageProgress {
                    display_name: name.into(),
                    status: ImageStatus::Queued,
                    current: 0,
                    total: 0,
                    error: None,
                })
                .collect(),
            updated_at: Utc::now(),
        }
    }

    /// Update the status of an image by display name.
    pub fn set_status(&mut self, display_name: &str, status: ImageStatus, error: Option<String>) {
        if let Some(image) = self
            .images
            .iter_mut()
            .find(|i| i.display_name == display_name)
        {
            image.status = status;
            image.error = error;
            if status == ImageStatus::Completed {
                image.current = image.total.max(1);
                image.total = image.current;
            }
        }
        self.updated_at = Utc::now();
    }

    /// Record how many layers an image has.
    pub fn set_total(&mut self, display_name: &str, total: u64) {
        if let Some(image) = self
            .images
            .iter_mut()
            .find(|i| i.display_name == display_name)
        {
            image.total = total;
        }
        self.updated_at = Utc::now();
    }

    /// Number of images in the given status.
    pub fn count(&self, status: ImageStatus) -> usize {
        self.images.iter().filter(|i| i.status == status).count()
    }
}

/// Append-only sink for progress output
pub trait ProgressSink: Send + Sync {
    /// Write a human-readable line.
    fn line(&self, message: &str);

    /// Write a structured report.
    fn report(&self, report: &ProgressReport);
}

/// Sink writing to any `Write` (stdout, a log file, a pipe).
pub struct WriterSink<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

impl<W: Write + Send> ProgressSink for WriterSink<W> {
    fn line(&self, message: &str) {
        let mut writer = self.writer.lock();
        if let Err(e) = writeln!(writer, "{}", message) {
            tracing::warn!(error = %e, "Failed to write progress line");
        }
    }

    fn report(&self, report: &ProgressReport) {
        let json = match serde_json::to_string(report) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to serialize progress report");
                return;
            }
        };
        let mut writer = self.writer.lock();
        if let Err(e) = writeln!(writer, "{}", json) {
            tracing::warn!(error = %e, "Failed to write progress report");
        }
    }
}

/// Sink that discards everything
pub struct NullSink;

impl ProgressSink for NullSink {
    fn line(&self, _message: &str) {}
    fn report(&self, _report: &ProgressReport) {}
}

/// Sink that keeps everything in memory
#[derive(Default)]
pub struct MemorySink {
    lines: Mutex<Vec<String>>,
    reports: Mutex<Vec<ProgressReport>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    pub fn reports(&self) -> Vec<ProgressReport> {
        self.reports.lock().clone()
    }
}

impl ProgressSink for MemorySink {
    fn line(&self, message: &str) {
        self.lines.lock().push(message.to_string());
    }

    fn report(&self, report: &ProgressReport) {
        self.reports.lock().push(report.clone());
    }
}

//! Session summary written after a generation session ends.
//!
//! One record per render attempt, so a failed session can be inspected
//! without re-running it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::types::{Quality, ScratchId};

/// How a render attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Rendered,
    Timeout,
    ProcessFailure,
    ArtifactMissing,
}

impl AttemptOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rendered => "rendered",
            Self::Timeout => "timeout",
            Self::ProcessFailure => "process_failure",
            Self::ArtifactMissing => "artifact_missing",
        }
    }
}

/// A single render attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// 1-based attempt number.
    pub attempt: u32,
    pub scratch_id: ScratchId,
    pub scene_file: PathBuf,
    pub outcome: AttemptOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
    pub duration_ms: u64,
}

/// Summary of one generation session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionReport {
    pub request: String,
    pub model: String,
    pub quality: Quality,
    pub max_attempts: u32,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    pub attempts: Vec<AttemptRecord>,
}

impl SessionReport {
    pub fn new(
        request: impl Into<String>,
        model: impl Into<String>,
        quality: Quality,
        max_attempts: u32,
    ) -> Self {
        Self {
            request: request.into(),
            model: model.into(),
            quality,
            max_attempts,
            started_at: Utc::now(),
            ended_at: None,
            attempts: Vec::new(),
        }
    }

    pub fn record(&mut self, attempt: AttemptRecord) {
        self.attempts.push(attempt);
    }

    /// Mark the session as ended.
    pub fn finish(&mut self) {
        self.ended_at = Some(Utc::now());
    }

    /// Number of render attempts made.
    pub fn render_count(&self) -> usize {
        self.attempts.len()
    }

    /// Default file name: `session-<started_ms>.json`.
    pub fn file_name(&self) -> String {
        format!("session-{}.json", self.started_at.timestamp_millis())
    }

    /// Write the report as pretty JSON into `dir`, returning the file path.
    pub fn write_json(&self, dir: &Path) -> std::io::Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(self.file_name());
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        let mut file = std::fs::File::create(&path)?;
        file.write_all(json.as_bytes())?;
        file.write_all(b"\n")?;
        Ok(path)
    }
}

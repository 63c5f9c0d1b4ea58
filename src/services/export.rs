use crate::core::report::{DetectionReport, GroupedReport, Outcome};
use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

pub const HISTORY_FILE: &str = ".history.jsonl";

/// One line of the run history kept next to exported reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub timestamp: String,
    pub input: String,
    pub output: String,
    pub grouped: bool,
    pub videos: usize,
    pub clusters: usize,
    pub reuploads: usize,
    pub threshold: f64,
    /// Absent for grouped runs, where every group carries its own.
    pub outcome: Option<Outcome>,
}

/// Either report shape, as read back from disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReportFile {
    Single(DetectionReport),
    Grouped(GroupedReport),
}

/// Writes reports as pretty JSON and records each run in the history log.
pub struct ReportWriter {
    output: PathBuf,
}

impl ReportWriter {
    pub fn new(output: impl Into<PathBuf>) -> Self {
        Self {
            output: output.into(),
        }
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    pub fn history_path(&self) -> PathBuf {
        history_path_for(&self.output)
    }

    pub fn write_report(&self, report: &DetectionReport, input: &Path) -> Result<RunSummary> {
        self.write_json(report)?;
        let summary = RunSummary {
            timestamp: Utc::now().to_rfc3339(),
            input: input.to_string_lossy().into_owned(),
            output: self.output.to_string_lossy().into_owned(),
            grouped: false,
            videos: report.statistics.total_videos,
            clusters: report.clusters.len(),
            reuploads: report.statistics.reuploads,
            threshold: report.threshold,
            outcome: Some(report.outcome),
        };
        self.append_history(&summary)?;
        Ok(summary)
    }

    pub fn write_grouped(
        &self,
        report: &GroupedReport,
        input: &Path,
        threshold: f64,
    ) -> Result<RunSummary> {
        self.write_json(report)?;
        let summary = RunSummary {
            timestamp: Utc::now().to_rfc3339(),
            input: input.to_string_lossy().into_owned(),
            output: self.output.to_string_lossy().into_owned(),
            grouped: true,
            videos: report.statistics.total_videos,
            clusters: report.statistics.originals,
            reuploads: report.statistics.reuploads,
            threshold,
            outcome: None,
        };
        self.append_history(&summary)?;
        Ok(summary)
    }

    fn write_json<T: Serialize>(&self, value: &T) -> Result<()> {
        if let Some(parent) = self.output.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {:?}", parent))?;
        }
        let json = serde_json::to_string_pretty(value)?;
        fs::write(&self.output, json)
            .with_context(|| format!("Failed to write report {:?}", self.output))?;
        Ok(())
    }

    fn append_history(&self, summary: &RunSummary) -> Result<()> {
        let history_file = self.history_path();
        let mut out = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&history_file)
            .with_context(|| format!("Failed to open history file {:?}", history_file))?;
        writeln!(out, "{}", serde_json::to_string(summary)?)?;
        Ok(())
    }
}

pub fn history_path_for(output: &Path) -> PathBuf {
    output
        .parent()
        .map(|p| p.join(HISTORY_FILE))
        .unwrap_or_else(|| PathBuf::from(HISTORY_FILE))
}

pub fn read_report(path: &Path) -> Result<ReportFile> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Could not open report {:?}", path))?;
    serde_json::from_str(&raw).with_context(|| format!("Malformed report {:?}", path))
}

/// Reads the history log, skipping malformed lines.
pub fn read_history(path: &Path) -> Result<Vec<RunSummary>> {
    let f = File::open(path).with_context(|| format!("Could not open history file {:?}", path))?;
    let reader = BufReader::new(f);

    let mut records = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        match serde_json::from_str::<RunSummary>(&line) {
            Ok(record) => records.push(record),
            Err(err) => log::warn!("Skipping malformed history entry {}: {}", i, err),
        }
    }
    Ok(records)
}

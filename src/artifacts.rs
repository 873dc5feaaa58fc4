//! Per-job artifacts: the transcript log, the findings JSONL file, and the
//! optional structured report. All writes are append-only and serialized so
//! concurrent target workers cannot corrupt line boundaries.

use crate::error::Result;
use crate::models::Finding;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

const LOG_FILE: &str = "job.log";
const FINDINGS_FILE: &str = "nuclei.jsonl";
const REPORT_FILE: &str = "wpscan.json";

/// Append-only transcript of everything the job's tools produced.
///
/// A single lock serializes appends across all workers of a job, so the log
/// order matches the order chunks were handed to consumers.
pub struct JobLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JobLog {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one chunk, creating the file on first write
    pub async fn append(&self, chunk: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(chunk.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Working directory for one job's artifacts
pub struct JobDir {
    root: PathBuf,
    findings_lock: Mutex<()>,
}

impl JobDir {
    pub fn new(jobs_root: &Path, job_id: i64) -> Self {
        Self {
            root: jobs_root.join(job_id.to_string()),
            findings_lock: Mutex::new(()),
        }
    }

    /// Creates the directory tree on disk
    pub async fn create(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn log_path(&self) -> PathBuf {
        self.root.join(LOG_FILE)
    }

    pub fn findings_path(&self) -> PathBuf {
        self.root.join(FINDINGS_FILE)
    }

    pub fn report_path(&self) -> PathBuf {
        self.root.join(REPORT_FILE)
    }

    /// Appends one finding to the findings artifact, one JSON object per line
    pub async fn append_finding(&self, finding: &Finding) -> Result<()> {
        let line = serde_json::to_string(finding)?;
        let _guard = self.findings_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.findings_path())
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;
        Ok(())
    }

    /// Writes the single structured report artifact, pretty-printed
    pub async fn write_report(&self, report: &serde_json::Value) -> Result<()> {
        let text = serde_json::to_string_pretty(report)?;
        tokio::fs::write(self.report_path(), text).await?;
        Ok(())
    }

    /// Reads back every finding recorded for this job
    pub async fn load_findings(&self) -> Result<Vec<Finding>> {
        load_jsonl(&self.findings_path()).await
    }
}

/// Loads a JSONL file, skipping lines that fail to parse.
/// A missing file yields an empty list.
pub async fn load_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let text = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    Ok(text
        .lines()
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect())
}

/// Loads a single JSON document; missing or malformed files yield `None`
pub async fn load_json(path: &Path) -> Option<serde_json::Value> {
    let text = tokio::fs::read_to_string(path).await.ok()?;
    serde_json::from_str(&text).ok()
}

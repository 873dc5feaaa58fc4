//! Core data models for the vigil orchestrator

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity level for scan findings
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Critical => write!(f, "critical"),
            Severity::High => write!(f, "high"),
            Severity::Medium => write!(f, "medium"),
            Severity::Low => write!(f, "low"),
            Severity::Info => write!(f, "info"),
        }
    }
}

impl Severity {
    /// Parses a severity string as emitted by scanning tools.
    ///
    /// Matching is case-insensitive; anything unrecognized maps to `Info`,
    /// since tools occasionally emit levels like "unknown".
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "critical" => Severity::Critical,
            "high" => Severity::High,
            "medium" => Severity::Medium,
            "low" => Severity::Low,
            _ => Severity::Info,
        }
    }

    /// Fixed risk weight used by the job summary
    pub const fn weight(&self) -> u64 {
        match self {
            Severity::Critical => 9,
            Severity::High => 6,
            Severity::Medium => 3,
            Severity::Low => 1,
            Severity::Info => 0,
        }
    }
}

/// One structured result emitted by a scanning tool.
///
/// Append-only: written to the per-job findings artifact as it streams in,
/// never mutated afterwards. Field names follow the nuclei JSONL event shape
/// so exporters can map them straight into CSV columns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    /// Host the finding was observed on
    pub host: String,
    /// Template / rule identifier
    pub template_id: String,
    /// Human-readable finding name
    pub name: String,
    /// Severity level
    pub severity: Severity,
    /// Matched location (usually a URL)
    pub matched_at: String,
    /// Free-text description
    pub description: String,
}

/// Per-severity finding counts for one job
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityCounts {
    pub critical: u64,
    pub high: u64,
    pub medium: u64,
    pub low: u64,
    pub info: u64,
}

impl SeverityCounts {
    fn bump(&mut self, severity: Severity) {
        match severity {
            Severity::Critical => self.critical += 1,
            Severity::High => self.high += 1,
            Severity::Medium => self.medium += 1,
            Severity::Low => self.low += 1,
            Severity::Info => self.info += 1,
        }
    }
}

/// Aggregated severity/risk summary, computed once per job at completion.
///
/// Invariant: `risk_score` equals the weighted sum of the severity counts
/// (critical=9, high=6, medium=3, low=1, info=0).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeveritySummary {
    /// Total findings parsed from the findings artifact
    pub nuclei_findings: u64,
    /// Counts per severity level
    pub severity: SeverityCounts,
    /// Weighted risk score
    pub risk_score: u64,
}

impl SeveritySummary {
    /// Computes the summary from a set of findings.
    ///
    /// Pure function of its input; safe to recompute at any time.
    pub fn from_findings(findings: &[Finding]) -> Self {
        let mut counts = SeverityCounts::default();
        for f in findings {
            counts.bump(f.severity);
        }
        let risk_score = counts.critical * Severity::Critical.weight()
            + counts.high * Severity::High.weight()
            + counts.medium * Severity::Medium.weight()
            + counts.low * Severity::Low.weight()
            + counts.info * Severity::Info.weight();
        Self {
            nuclei_findings: findings.len() as u64,
            severity: counts,
            risk_score,
        }
    }

    /// Folds another summary into this one, for cross-job aggregation
    pub fn merge(&mut self, other: &SeveritySummary) {
        self.nuclei_findings += other.nuclei_findings;
        self.severity.critical += other.severity.critical;
        self.severity.high += other.severity.high;
        self.severity.medium += other.severity.medium;
        self.severity.low += other.severity.low;
        self.severity.info += other.severity.info;
        self.risk_score += other.risk_score;
    }
}

/// Job execution status.
///
/// Two states, one forward transition. A hard-failed tool is reported as a
/// log line, not a job failure, so there is no failed state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Running,
    Finished,
}

/// One timed execution of a scan definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub scan_id: i64,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub summary: Option<SeveritySummary>,
}

/// Nmap argument profile
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NmapProfile {
    Quick,
    Full,
    #[default]
    Vuln,
}

impl NmapProfile {
    /// Parses a profile name; unrecognized names fall back to `Vuln`
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "quick" => NmapProfile::Quick,
            "full" => NmapProfile::Full,
            _ => NmapProfile::Vuln,
        }
    }
}

/// Tool selection and tuning for a scan. Immutable for the duration of a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanPolicy {
    pub name: String,
    pub use_nmap: bool,
    pub nmap_profile: NmapProfile,
    pub use_nuclei: bool,
    /// Comma-separated severity filter passed to nuclei
    pub nuclei_severity: String,
    pub use_nikto: bool,
    pub use_wpscan: bool,
    pub http_basic_user: String,
    pub http_basic_pass: String,
    /// How many targets may be scanned concurrently
    pub concurrency: usize,
    /// Optional nuclei requests-per-second limit
    pub nuclei_rate: Option<u32>,
    /// Comma-separated paths excluded from scanning. Recorded on the policy
    /// for operators but not passed to any tool.
    pub exclude_paths: String,
}

impl Default for ScanPolicy {
    fn default() -> Self {
        Self {
            name: "Quick Web Audit".to_string(),
            use_nmap: true,
            nmap_profile: NmapProfile::Vuln,
            use_nuclei: true,
            nuclei_severity: "critical,high,medium".to_string(),
            use_nikto: false,
            use_wpscan: false,
            http_basic_user: String::new(),
            http_basic_pass: String::new(),
            concurrency: 2,
            nuclei_rate: None,
            exclude_paths: String::new(),
        }
    }
}

/// A saved scan definition: a policy applied to a set of assets,
/// optionally on a cron cadence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanRecord {
    pub id: i64,
    pub name: String,
    pub policy_id: i64,
    pub asset_ids: Vec<i64>,
    pub schedule_cron: Option<String>,
    pub created_at: DateTime<Utc>,
}

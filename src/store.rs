//! Store seam: scan/policy/job records live in an external store that the
//! orchestrator queries by id. `MemoryStore` backs the CLI and tests.

use crate::error::{Result, VigilError};
use crate::models::{Job, JobStatus, ScanPolicy, ScanRecord, SeveritySummary};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Operations the orchestrator needs from the record store
#[async_trait]
pub trait Store: Send + Sync {
    /// Looks up a scan definition
    async fn scan(&self, id: i64) -> Result<Option<ScanRecord>>;

    /// Looks up a policy
    async fn policy(&self, id: i64) -> Result<Option<ScanPolicy>>;

    /// Resolves asset ids to target strings, preserving input order and
    /// skipping unknown ids
    async fn resolve_targets(&self, asset_ids: &[i64]) -> Result<Vec<String>>;

    /// Creates a job in `Running` state and returns it
    async fn create_job(&self, scan_id: i64, started_at: DateTime<Utc>) -> Result<Job>;

    /// Transitions a job to `Finished` with its computed summary
    async fn finish_job(
        &self,
        job_id: i64,
        finished_at: DateTime<Utc>,
        summary: SeveritySummary,
    ) -> Result<()>;

    /// Looks up a job
    async fn job(&self, id: i64) -> Result<Option<Job>>;

    /// Returns true if any job for the scan is currently running
    async fn has_running_job(&self, scan_id: i64) -> Result<bool>;

    /// Lists scan definitions carrying a cron expression
    async fn scheduled_scans(&self) -> Result<Vec<ScanRecord>>;
}

#[derive(Default)]
struct MemoryInner {
    assets: HashMap<i64, String>,
    policies: HashMap<i64, ScanPolicy>,
    scans: HashMap<i64, ScanRecord>,
    jobs: HashMap<i64, Job>,
    next_id: i64,
}

impl MemoryInner {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// In-memory store used by the CLI for ad-hoc runs and by tests
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a target string, returning its asset id
    pub async fn add_asset(&self, target: &str) -> i64 {
        let mut inner = self.inner.write().await;
        let id = inner.next_id();
        inner.assets.insert(id, target.to_string());
        id
    }

    /// Registers a policy, returning its id
    pub async fn add_policy(&self, policy: ScanPolicy) -> i64 {
        let mut inner = self.inner.write().await;
        let id = inner.next_id();
        inner.policies.insert(id, policy);
        id
    }

    /// Registers a scan definition, returning its id
    pub async fn add_scan(
        &self,
        name: &str,
        policy_id: i64,
        asset_ids: Vec<i64>,
        schedule_cron: Option<String>,
    ) -> i64 {
        let mut inner = self.inner.write().await;
        let id = inner.next_id();
        inner.scans.insert(
            id,
            ScanRecord {
                id,
                name: name.to_string(),
                policy_id,
                asset_ids,
                schedule_cron,
                created_at: Utc::now(),
            },
        );
        id
    }

    /// Most recently created job, if any
    pub async fn latest_job(&self) -> Option<Job> {
        let inner = self.inner.read().await;
        inner.jobs.values().max_by_key(|j| j.id).cloned()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn scan(&self, id: i64) -> Result<Option<ScanRecord>> {
        Ok(self.inner.read().await.scans.get(&id).cloned())
    }

    async fn policy(&self, id: i64) -> Result<Option<ScanPolicy>> {
        Ok(self.inner.read().await.policies.get(&id).cloned())
    }

    async fn resolve_targets(&self, asset_ids: &[i64]) -> Result<Vec<String>> {
        let inner = self.inner.read().await;
        Ok(asset_ids
            .iter()
            .filter_map(|id| inner.assets.get(id).cloned())
            .collect())
    }

    async fn create_job(&self, scan_id: i64, started_at: DateTime<Utc>) -> Result<Job> {
        let mut inner = self.inner.write().await;
        let id = inner.next_id();
        let job = Job {
            id,
            scan_id,
            status: JobStatus::Running,
            started_at,
            finished_at: None,
            summary: None,
        };
        inner.jobs.insert(id, job.clone());
        Ok(job)
    }

    async fn finish_job(
        &self,
        job_id: i64,
        finished_at: DateTime<Utc>,
        summary: SeveritySummary,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        let job = inner
            .jobs
            .get_mut(&job_id)
            .ok_or(VigilError::JobNotFound(job_id))?;
        job.status = JobStatus::Finished;
        job.finished_at = Some(finished_at);
        job.summary = Some(summary);
        Ok(())
    }

    async fn job(&self, id: i64) -> Result<Option<Job>> {
        Ok(self.inner.read().await.jobs.get(&id).cloned())
    }

    async fn has_running_job(&self, scan_id: i64) -> Result<bool> {
        Ok(self
            .inner
            .read()
            .await
            .jobs
            .values()
            .any(|j| j.scan_id == scan_id && j.status == JobStatus::Running))
    }

    async fn scheduled_scans(&self) -> Result<Vec<ScanRecord>> {
        let inner = self.inner.read().await;
        let mut scans: Vec<ScanRecord> = inner
            .scans
            .values()
            .filter(|s| s.schedule_cron.is_some())
            .cloned()
            .collect();
        scans.sort_by_key(|s| s.id);
        Ok(scans)
    }
}

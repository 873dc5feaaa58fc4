//! Job lifecycle: resolves a scan into targets, fans target workers out
//! under the policy's concurrency bound, merges their streamed chunks into
//! one feed, and drives the job from `Running` to `Finished` with an
//! aggregated summary.
//!
//! Ordering guarantees: within one target the chunk order is program order;
//! across targets it is best-effort arrival order. Completion is detected by
//! counting one sentinel per worker, so the merged feed is never read past
//! the last worker.

use crate::artifacts::{JobDir, JobLog};
use crate::config::AppConfig;
use crate::models::{ScanPolicy, SeveritySummary};
use crate::pipeline::{build_invocations, parse_finding, Capture};
use crate::runner::stream_command;
use crate::store::Store;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tracing::{error, info, warn};

const CHANNEL_CAPACITY: usize = 256;

enum WorkerMsg {
    Chunk(String),
    Done,
}

/// Runs scans against the external record store and the configured data
/// directory
pub struct JobRunner {
    store: Arc<dyn Store>,
    config: Arc<AppConfig>,
}

impl JobRunner {
    pub fn new(store: Arc<dyn Store>, config: Arc<AppConfig>) -> Self {
        Self { store, config }
    }

    /// Starts one job for the scan and returns its live chunk stream.
    ///
    /// The stream ends when the job finishes. An unknown scan yields a
    /// single explanatory chunk and no job record. The job runs to
    /// completion even if the returned receiver is dropped early.
    pub fn run_scan(&self, scan_id: i64) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let store = Arc::clone(&self.store);
        let config = Arc::clone(&self.config);
        tokio::spawn(run_job(store, config, scan_id, tx));
        rx
    }
}

async fn run_job(
    store: Arc<dyn Store>,
    config: Arc<AppConfig>,
    scan_id: i64,
    tx: mpsc::Sender<String>,
) {
    let scan = match store.scan(scan_id).await {
        Ok(Some(scan)) => scan,
        Ok(None) => {
            let _ = tx.send("Scan not found.\n".to_string()).await;
            return;
        }
        Err(e) => {
            error!(scan_id, error = %e, "scan lookup failed");
            let _ = tx.send("Scan not found.\n".to_string()).await;
            return;
        }
    };
    let policy = match store.policy(scan.policy_id).await {
        Ok(Some(policy)) => policy,
        Ok(None) | Err(_) => {
            let _ = tx.send("Policy not found.\n".to_string()).await;
            return;
        }
    };
    let targets = match store.resolve_targets(&scan.asset_ids).await {
        Ok(targets) => targets,
        Err(e) => {
            error!(scan_id, error = %e, "target resolution failed");
            let _ = tx.send(format!("[!] Failed to resolve targets: {e}\n")).await;
            return;
        }
    };

    let job = match store.create_job(scan_id, Utc::now()).await {
        Ok(job) => job,
        Err(e) => {
            error!(scan_id, error = %e, "job creation failed");
            let _ = tx.send(format!("[!] Failed to create job: {e}\n")).await;
            return;
        }
    };

    let job_dir = Arc::new(JobDir::new(&config.jobs_dir(), job.id));
    if let Err(e) = job_dir.create().await {
        error!(job_id = job.id, error = %e, "could not allocate job directory");
        let _ = tx
            .send(format!("[!] Failed to create job directory: {e}\n"))
            .await;
        return;
    }
    let log = Arc::new(JobLog::new(job_dir.log_path()));

    info!(job_id = job.id, scan_id, targets = targets.len(), "job started");
    let header = format!(
        "[+] Job #{} started for scan #{} on targets: {}\n",
        job.id,
        scan_id,
        targets.join(", ")
    );
    if let Err(e) = log.append(&header).await {
        warn!(job_id = job.id, error = %e, "log append failed");
    }
    let _ = tx.send(header).await;

    let timeout = Duration::from_secs(config.tool_timeout_secs);
    let semaphore = Arc::new(Semaphore::new(policy.concurrency.max(1)));
    let (worker_tx, mut worker_rx) = mpsc::channel(CHANNEL_CAPACITY);

    for target in targets.iter().cloned() {
        tokio::spawn(worker(
            target,
            policy.clone(),
            Arc::clone(&job_dir),
            Arc::clone(&log),
            timeout,
            config.wpscan_api_token.clone(),
            Arc::clone(&semaphore),
            worker_tx.clone(),
        ));
    }
    drop(worker_tx);

    // Fan-in: forward chunks in arrival order, count one sentinel per
    // worker so the loop stops exactly when the last worker is done.
    let mut finished = 0;
    while finished < targets.len() {
        match worker_rx.recv().await {
            Some(WorkerMsg::Done) => finished += 1,
            // A dropped receiver means no one is watching; the job still
            // runs to completion.
            Some(WorkerMsg::Chunk(chunk)) => {
                let _ = tx.send(chunk).await;
            }
            None => break,
        }
    }

    let findings = match job_dir.load_findings().await {
        Ok(findings) => findings,
        Err(e) => {
            warn!(job_id = job.id, error = %e, "findings read-back failed");
            Vec::new()
        }
    };
    let summary = SeveritySummary::from_findings(&findings);
    if let Err(e) = store.finish_job(job.id, Utc::now(), summary.clone()).await {
        error!(job_id = job.id, error = %e, "failed to mark job finished");
    }
    info!(
        job_id = job.id,
        findings = summary.nuclei_findings,
        risk_score = summary.risk_score,
        "job finished"
    );
    let footer = "\n[+] Job complete.\n".to_string();
    if let Err(e) = log.append(&footer).await {
        warn!(job_id = job.id, error = %e, "log append failed");
    }
    let _ = tx.send(footer).await;
}

/// Gates one target behind the concurrency semaphore and always emits the
/// completion sentinel, success or not.
#[allow(clippy::too_many_arguments)]
async fn worker(
    target: String,
    policy: ScanPolicy,
    job_dir: Arc<JobDir>,
    log: Arc<JobLog>,
    timeout: Duration,
    wpscan_token: Option<String>,
    semaphore: Arc<Semaphore>,
    tx: mpsc::Sender<WorkerMsg>,
) {
    if let Ok(permit) = semaphore.acquire_owned().await {
        run_target(&target, &policy, &job_dir, &log, timeout, wpscan_token, &tx).await;
        drop(permit);
    }
    let _ = tx.send(WorkerMsg::Done).await;
}

/// Runs every enabled tool for one target strictly in order, forwarding all
/// output. A failed or missing tool reports itself inline and the pipeline
/// proceeds to the next one.
async fn run_target(
    target: &str,
    policy: &ScanPolicy,
    job_dir: &JobDir,
    log: &Arc<JobLog>,
    timeout: Duration,
    wpscan_token: Option<String>,
    tx: &mpsc::Sender<WorkerMsg>,
) {
    let marker = format!("\n========== Target: {target} ===========\n");
    if let Err(e) = log.append(&marker).await {
        warn!(error = %e, "log append failed");
    }
    if tx.send(WorkerMsg::Chunk(marker)).await.is_err() {
        return;
    }

    for invocation in build_invocations(policy, target, wpscan_token.as_deref()) {
        let capture = invocation.capture;
        let mut chunks = stream_command(
            invocation.title,
            invocation.program,
            invocation.args,
            Arc::clone(log),
            timeout,
        );
        let mut report_buf = String::new();

        while let Some(chunk) = chunks.recv().await {
            match capture {
                Capture::FindingsJsonl => {
                    if let Some(finding) = parse_finding(&chunk) {
                        if let Err(e) = job_dir.append_finding(&finding).await {
                            warn!(error = %e, "failed to record finding");
                        }
                    }
                }
                Capture::JsonReport => report_buf.push_str(&chunk),
                Capture::Plain => {}
            }
            if tx.send(WorkerMsg::Chunk(chunk)).await.is_err() {
                return;
            }
        }

        if capture == Capture::JsonReport {
            // The buffer starts with our own header lines; the report is
            // whatever parses from the first brace on. Parse failures are
            // tolerated silently.
            if let Some(idx) = report_buf.find('{') {
                if let Ok(report) = serde_json::from_str::<serde_json::Value>(&report_buf[idx..]) {
                    if let Err(e) = job_dir.write_report(&report).await {
                        warn!(error = %e, "failed to write report artifact");
                    }
                }
            }
        }
    }
}

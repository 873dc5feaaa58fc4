//! Cron scheduler: a repeating tick loop that fires scans when their cron
//! expression comes due, skipping (but still advancing) any scan that
//! already has a running job. Fires are delivered as commands on a work
//! queue rather than executed inline, so scheduling cadence stays decoupled
//! from job lifetime.

use crate::error::{Result, VigilError};
use crate::store::Store;
use chrono::{DateTime, Utc};
use cron::Schedule;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Time source, injected so tests can drive ticks deterministically
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Command emitted onto the work queue when a scan comes due
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanCommand {
    Run(i64),
}

/// Computes the next fire time for a cron expression, strictly after
/// `after`.
///
/// Standard 5-field crontab expressions are accepted; a seconds field is
/// prefixed internally.
pub fn next_fire(expr: &str, after: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let schedule = Schedule::from_str(&normalize_cron(expr))?;
    schedule
        .after(&after)
        .next()
        .ok_or_else(|| VigilError::Config(format!("cron expression never fires: {expr}")))
}

fn normalize_cron(expr: &str) -> String {
    if expr.split_whitespace().count() == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    }
}

/// Owns the per-scan next-fire cache and the tick loop
pub struct Scheduler {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    commands: mpsc::Sender<ScanCommand>,
    next_fire: HashMap<i64, DateTime<Utc>>,
    // Operational kill switch, snapshotted at construction. Flipping the
    // environment variable takes effect on the next process start.
    disabled: bool,
    tick_interval: Duration,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        commands: mpsc::Sender<ScanCommand>,
        tick_interval: Duration,
        disabled: bool,
    ) -> Self {
        Self {
            store,
            clock,
            commands,
            next_fire: HashMap::new(),
            disabled,
            tick_interval,
        }
    }

    /// Caches the next fire time for a scan from "now", called when a
    /// schedule is created or edited
    pub fn register(&mut self, scan_id: i64, expr: &str) {
        match next_fire(expr, self.clock.now()) {
            Ok(at) => {
                info!(scan_id, %expr, next = %at, "schedule registered");
                self.next_fire.insert(scan_id, at);
            }
            Err(e) => warn!(scan_id, %expr, error = %e, "failed to register schedule"),
        }
    }

    /// Cached next fire time for a scan, if any
    pub fn next_fire_time(&self, scan_id: i64) -> Option<DateTime<Utc>> {
        self.next_fire.get(&scan_id).copied()
    }

    /// One scheduler pass: seed missing cache entries, fire due scans, and
    /// advance their next fire times.
    ///
    /// A scan whose previous job is still running is skipped, but its next
    /// fire time is advanced anyway so the tick loop does not re-check it
    /// every interval. That intentionally drops fires that come due during
    /// a long-running job.
    pub async fn tick(&mut self) -> Result<()> {
        if self.disabled {
            return Ok(());
        }
        let now = self.clock.now();
        let scans = self.store.scheduled_scans().await?;
        for scan in scans {
            let Some(expr) = scan.schedule_cron else {
                continue;
            };
            if !self.next_fire.contains_key(&scan.id) {
                match next_fire(&expr, now) {
                    Ok(at) => {
                        self.next_fire.insert(scan.id, at);
                    }
                    Err(e) => {
                        warn!(scan_id = scan.id, %expr, error = %e, "bad cron expression");
                        continue;
                    }
                }
            }
            let Some(due) = self.next_fire.get(&scan.id).copied() else {
                continue;
            };
            if due > now {
                continue;
            }

            if self.store.has_running_job(scan.id).await? {
                info!(scan_id = scan.id, "previous job still running, skipping fire");
                self.advance(scan.id, &expr, now);
                continue;
            }

            info!(scan_id = scan.id, "schedule due, firing scan");
            if self.commands.send(ScanCommand::Run(scan.id)).await.is_err() {
                warn!(scan_id = scan.id, "work queue closed, dropping fire");
            }
            self.advance(scan.id, &expr, now);
        }
        Ok(())
    }

    fn advance(&mut self, scan_id: i64, expr: &str, now: DateTime<Utc>) {
        if let Ok(at) = next_fire(expr, now) {
            self.next_fire.insert(scan_id, at);
        }
    }

    /// Runs the tick loop forever. Tick failures are logged and swallowed;
    /// the loop never terminates on error.
    pub async fn run(mut self) {
        loop {
            tokio::time::sleep(self.tick_interval).await;
            if let Err(e) = self.tick().await {
                error!(error = %e, "scheduler tick failed");
            }
        }
    }
}

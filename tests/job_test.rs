//! End-to-end tests for the job lifecycle: fan-out, fan-in, artifacts,
//! and summary computation. External tools are faked with shell scripts
//! placed on PATH.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::{fs, sync::Arc};
use tempfile::TempDir;
use vigil::config::AppConfig;
use vigil::job::JobRunner;
use vigil::models::{JobStatus, ScanPolicy};
use vigil::store::{MemoryStore, Store};

// Tests that install fake tools mutate PATH, so they take turns.
static ENV_LOCK: Mutex<()> = Mutex::new(());

struct PathGuard {
    original: String,
    _lock: MutexGuard<'static, ()>,
}

impl Drop for PathGuard {
    fn drop(&mut self) {
        std::env::set_var("PATH", &self.original);
    }
}

/// Installs shell-script stand-ins for external tools and points PATH at
/// them. With `replace` the fake directory becomes the entire PATH, so
/// every other tool is "not found".
fn fake_tools(dir: &TempDir, tools: &[(&str, &str)], replace: bool) -> PathGuard {
    let lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    for (name, body) in tools {
        let path = dir.path().join(name);
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write fake tool");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod");
        }
    }
    let original = std::env::var("PATH").unwrap_or_default();
    let new_path = if replace {
        dir.path().display().to_string()
    } else {
        format!("{}:{original}", dir.path().display())
    };
    std::env::set_var("PATH", new_path);
    PathGuard {
        original,
        _lock: lock,
    }
}

async fn setup(
    policy: ScanPolicy,
    targets: &[&str],
) -> (Arc<MemoryStore>, JobRunner, i64, TempDir) {
    let data = TempDir::new().expect("tempdir");
    let store = Arc::new(MemoryStore::new());
    let policy_id = store.add_policy(policy).await;
    let mut asset_ids = Vec::new();
    for target in targets {
        asset_ids.push(store.add_asset(target).await);
    }
    let scan_id = store.add_scan("Test Scan", policy_id, asset_ids, None).await;

    let config = AppConfig {
        data_dir: data.path().to_path_buf(),
        tool_timeout_secs: 30,
        ..AppConfig::default()
    };
    let dyn_store: Arc<dyn Store> = store.clone();
    let runner = JobRunner::new(dyn_store, Arc::new(config));
    (store, runner, scan_id, data)
}

async fn collect(runner: &JobRunner, scan_id: i64) -> Vec<String> {
    let mut rx = runner.run_scan(scan_id);
    let mut chunks = Vec::new();
    while let Some(chunk) = rx.recv().await {
        chunks.push(chunk);
    }
    chunks
}

fn no_tools(concurrency: usize) -> ScanPolicy {
    ScanPolicy {
        use_nmap: false,
        use_nuclei: false,
        use_nikto: false,
        use_wpscan: false,
        concurrency,
        ..ScanPolicy::default()
    }
}

fn nmap_only(concurrency: usize) -> ScanPolicy {
    ScanPolicy {
        use_nmap: true,
        use_nuclei: false,
        concurrency,
        ..ScanPolicy::default()
    }
}

fn wpscan_only() -> ScanPolicy {
    ScanPolicy {
        use_nmap: false,
        use_nuclei: false,
        use_wpscan: true,
        concurrency: 1,
        ..ScanPolicy::default()
    }
}

fn index_of(chunks: &[String], needle: &str) -> usize {
    chunks
        .iter()
        .position(|c| c.contains(needle))
        .unwrap_or_else(|| panic!("chunk containing {needle:?} not found"))
}

// Fake nmap that reports its target (the last argument) on entry and exit.
const TARGET_ECHO: &str = r#"for a in "$@"; do t="$a"; done
echo "begin $t"
echo "end $t""#;

#[tokio::test]
async fn unknown_scan_yields_one_chunk_and_no_job() {
    let (store, runner, _scan_id, _data) = setup(no_tools(1), &["t1.example"]).await;
    let chunks = collect(&runner, 9999).await;
    assert_eq!(chunks, vec!["Scan not found.\n".to_string()]);
    // a bad trigger must not leave a job row behind
    assert!(store.latest_job().await.is_none());
}

#[tokio::test]
async fn job_without_tools_finishes_with_empty_summary() {
    let (store, runner, scan_id, data) = setup(no_tools(2), &["t1.example", "t2.example"]).await;
    let chunks = collect(&runner, scan_id).await;

    assert!(chunks[0].starts_with("[+] Job #"));
    assert!(chunks[0].contains("t1.example, t2.example"));
    let markers = chunks
        .iter()
        .filter(|c| c.contains("========== Target: "))
        .count();
    assert_eq!(markers, 2);
    assert_eq!(chunks.last().map(String::as_str), Some("\n[+] Job complete.\n"));

    let job = store.latest_job().await.expect("job record");
    assert_eq!(job.status, JobStatus::Finished);
    assert!(job.finished_at.is_some());
    let summary = job.summary.expect("summary");
    assert_eq!(summary.nuclei_findings, 0);
    assert_eq!(summary.risk_score, 0);

    // the transcript artifact holds the header
    let log = fs::read_to_string(data.path().join("jobs").join(job.id.to_string()).join("job.log"))
        .expect("job.log");
    assert!(log.starts_with("[+] Job #"));
}

#[tokio::test]
async fn concurrency_one_serializes_targets() {
    let tools = TempDir::new().expect("tempdir");
    let _path = fake_tools(&tools, &[("nmap", TARGET_ECHO)], false);

    let (_store, runner, scan_id, _data) =
        setup(nmap_only(1), &["t1.example", "t2.example"]).await;
    let chunks = collect(&runner, scan_id).await;

    // with one worker slot, the second target's entire pipeline follows
    // the first target's
    let order = [
        index_of(&chunks, "Target: t1.example"),
        index_of(&chunks, "begin t1.example"),
        index_of(&chunks, "end t1.example"),
        index_of(&chunks, "Target: t2.example"),
        index_of(&chunks, "begin t2.example"),
        index_of(&chunks, "end t2.example"),
    ];
    assert!(order.windows(2).all(|w| w[0] < w[1]), "order was {order:?}");
}

#[tokio::test]
async fn concurrency_bound_is_never_exceeded() {
    let tools = TempDir::new().expect("tempdir");
    let script = r#"for a in "$@"; do t="$a"; done
echo "begin $t"
sleep 1
echo "end $t""#;
    let _path = fake_tools(&tools, &[("nmap", script)], false);

    let targets = ["t1.example", "t2.example", "t3.example", "t4.example"];
    let (store, runner, scan_id, _data) = setup(nmap_only(2), &targets).await;
    let chunks = collect(&runner, scan_id).await;

    let mut active: i32 = 0;
    let mut max_active: i32 = 0;
    let mut completed = 0;
    for chunk in &chunks {
        if chunk.starts_with("begin ") {
            active += 1;
            max_active = max_active.max(active);
        } else if chunk.starts_with("end ") {
            active -= 1;
            completed += 1;
        }
    }
    assert!(max_active <= 2, "saw {max_active} workers running at once");
    assert_eq!(completed, targets.len());

    let job = store.latest_job().await.expect("job record");
    assert_eq!(job.status, JobStatus::Finished);
}

#[tokio::test]
async fn nuclei_findings_are_recorded_and_summarized() {
    let tools = TempDir::new().expect("tempdir");
    let script = r#"echo "projectdiscovery banner"
echo '{"template-id":"a","host":"http://t1.example","matched-at":"http://t1.example/a","info":{"name":"A","severity":"critical","description":"da"}}'
echo '{"template-id":"b","host":"http://t1.example","matched-at":"http://t1.example/b","info":{"name":"B","severity":"high","description":"db"}}'"#;
    let _path = fake_tools(&tools, &[("nuclei", script)], false);

    let policy = ScanPolicy {
        use_nmap: false,
        use_nuclei: true,
        concurrency: 1,
        ..ScanPolicy::default()
    };
    let (store, runner, scan_id, data) = setup(policy, &["t1.example"]).await;
    let chunks = collect(&runner, scan_id).await;
    assert!(chunks.iter().any(|c| c.contains("template-id")));

    let job = store.latest_job().await.expect("job record");
    let summary = job.summary.expect("summary");
    assert_eq!(summary.nuclei_findings, 2);
    assert_eq!(summary.severity.critical, 1);
    assert_eq!(summary.severity.high, 1);
    assert_eq!(summary.risk_score, 9 + 6);

    // findings artifact holds exactly the parsed events, one per line
    let findings_path: std::path::PathBuf = Path::new(data.path())
        .join("jobs")
        .join(job.id.to_string())
        .join("nuclei.jsonl");
    let jsonl = fs::read_to_string(findings_path).expect("nuclei.jsonl");
    assert_eq!(jsonl.lines().count(), 2);
}

#[tokio::test]
async fn wpscan_report_is_written_as_parsed_json() {
    let tools = TempDir::new().expect("tempdir");
    // report spans multiple lines, like the real tool's --format json output
    let script = r#"echo "scanning..."
echo '{'
echo '  "banner": { "version": "3.8.22" },'
echo '  "vulnerabilities": []'
echo '}'"#;
    let _path = fake_tools(&tools, &[("wpscan", script)], false);

    let (store, runner, scan_id, data) = setup(wpscan_only(), &["blog.example"]).await;
    let chunks = collect(&runner, scan_id).await;
    assert_eq!(chunks.last().map(String::as_str), Some("\n[+] Job complete.\n"));

    let job = store.latest_job().await.expect("job record");
    assert_eq!(job.status, JobStatus::Finished);

    let report_path = data
        .path()
        .join("jobs")
        .join(job.id.to_string())
        .join("wpscan.json");
    let report = vigil::artifacts::load_json(&report_path)
        .await
        .expect("report document");
    assert_eq!(report["banner"]["version"], "3.8.22");
    assert!(report["vulnerabilities"].as_array().expect("array").is_empty());
}

#[tokio::test]
async fn wpscan_non_json_output_leaves_no_report() {
    let tools = TempDir::new().expect("tempdir");
    let script = r#"echo "Scan Aborted: The remote website is up, but does not seem to be running WordPress.""#;
    let _path = fake_tools(&tools, &[("wpscan", script)], false);

    let (store, runner, scan_id, data) = setup(wpscan_only(), &["blog.example"]).await;
    let chunks = collect(&runner, scan_id).await;

    // the garbage still streams through and the job completes normally
    assert!(chunks.iter().any(|c| c.contains("Scan Aborted")));
    assert_eq!(chunks.last().map(String::as_str), Some("\n[+] Job complete.\n"));
    let job = store.latest_job().await.expect("job record");
    assert_eq!(job.status, JobStatus::Finished);

    let report_path = data
        .path()
        .join("jobs")
        .join(job.id.to_string())
        .join("wpscan.json");
    assert!(!report_path.exists());
}

#[tokio::test]
async fn missing_tool_does_not_stop_the_pipeline() {
    let tools = TempDir::new().expect("tempdir");
    let script = r#"echo '{"template-id":"x","host":"http://t1.example","matched-at":"http://t1.example/x","info":{"name":"X","severity":"low","description":"d"}}'"#;
    // PATH contains only the fake nuclei, so nmap is genuinely absent
    let _path = fake_tools(&tools, &[("nuclei", script)], true);

    let policy = ScanPolicy {
        use_nmap: true,
        use_nuclei: true,
        concurrency: 1,
        ..ScanPolicy::default()
    };
    let (store, runner, scan_id, _data) = setup(policy, &["t1.example"]).await;
    let chunks = collect(&runner, scan_id).await;

    let skip = index_of(&chunks, "[!] Tool not found: nmap (skipping)");
    let nuclei_header = index_of(&chunks, "===== Nuclei on ");
    assert!(skip < nuclei_header);
    assert_eq!(
        chunks
            .iter()
            .filter(|c| c.contains("Tool not found: nmap"))
            .count(),
        1
    );

    let job = store.latest_job().await.expect("job record");
    let summary = job.summary.expect("summary");
    assert_eq!(summary.nuclei_findings, 1);
    assert_eq!(summary.severity.low, 1);
}

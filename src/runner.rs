//! Process runner: invokes one external tool and streams its output
//! line-by-line, appending every chunk to the job log before handing it to
//! the caller. Failures never propagate as errors; they surface as terminal
//! chunks in the stream so the rest of the pipeline keeps going.

use crate::artifacts::JobLog;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, warn};

const CHANNEL_CAPACITY: usize = 64;

/// Default per-line read timeout: one hour
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(3600);

/// Spawns `program args...` and returns a live stream of output chunks,
/// one per line read from the merged stdout/stderr of the process.
///
/// Every chunk is appended to `log` before being yielded, so a crash
/// mid-stream leaves a readable partial transcript. If no line arrives
/// within `timeout` the process is killed and the stream ends with a
/// timeout notice. A missing executable or spawn failure likewise ends the
/// stream with a single explanatory chunk.
pub fn stream_command(
    title: String,
    program: String,
    args: Vec<String>,
    log: Arc<JobLog>,
    timeout: Duration,
) -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    tokio::spawn(run_streamed(title, program, args, log, timeout, tx));
    rx
}

async fn run_streamed(
    title: String,
    program: String,
    args: Vec<String>,
    log: Arc<JobLog>,
    timeout: Duration,
    tx: mpsc::Sender<String>,
) {
    let cmdline = render_cmdline(&program, &args);
    let header = format!("\n===== {title} =====\n$ {cmdline}\n\n");
    if !emit(&log, &tx, header).await {
        return;
    }

    if which::which(&program).is_err() {
        emit(&log, &tx, format!("[!] Tool not found: {program} (skipping)\n")).await;
        return;
    }

    debug!(%program, ?args, "launching external tool");
    let mut child = match Command::new(&program)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            emit(
                &log,
                &tx,
                format!("[!] Failed to run: {cmdline}\nReason: {e}\n"),
            )
            .await;
            return;
        }
    };

    // stdout and stderr are read by separate tasks feeding one channel, so
    // the merged feed is arrival-order across both pipes.
    let (line_tx, mut line_rx) = mpsc::channel::<String>(CHANNEL_CAPACITY);
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(read_lines(stdout, line_tx.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(read_lines(stderr, line_tx.clone()));
    }
    drop(line_tx);

    loop {
        match tokio::time::timeout(timeout, line_rx.recv()).await {
            Ok(Some(line)) => {
                if !emit(&log, &tx, line).await {
                    // Caller went away; stop the tool rather than run headless.
                    let _ = child.start_kill();
                    break;
                }
            }
            Ok(None) => break,
            Err(_) => {
                emit(&log, &tx, "\n[!] Timeout reached.\n".to_string()).await;
                // The process may already be gone; that counts as killed.
                let _ = child.start_kill();
                break;
            }
        }
    }

    if let Err(e) = child.wait().await {
        warn!(%program, error = %e, "failed to reap tool process");
    }
}

/// Appends the chunk to the log, then hands it to the caller.
/// Returns false once the caller has dropped the receiving end.
async fn emit(log: &JobLog, tx: &mpsc::Sender<String>, chunk: String) -> bool {
    if let Err(e) = log.append(&chunk).await {
        warn!(path = %log.path().display(), error = %e, "log append failed");
    }
    tx.send(chunk).await.is_ok()
}

async fn read_lines<R: AsyncRead + Unpin>(pipe: R, tx: mpsc::Sender<String>) {
    let mut lines = BufReader::new(pipe).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if tx.send(format!("{line}\n")).await.is_err() {
            break;
        }
    }
}

/// Renders the command line for the log header, quoting arguments that
/// contain whitespace
fn render_cmdline(program: &str, args: &[String]) -> String {
    let mut parts = Vec::with_capacity(args.len() + 1);
    parts.push(quote_arg(program));
    for arg in args {
        parts.push(quote_arg(arg));
    }
    parts.join(" ")
}

fn quote_arg(arg: &str) -> String {
    if arg.is_empty() || arg.chars().any(|c| c.is_whitespace() || c == '\'' || c == '"') {
        format!("'{}'", arg.replace('\'', r"'\''"))
    } else {
        arg.to_string()
    }
}

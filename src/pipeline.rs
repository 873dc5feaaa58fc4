//! Tool pipeline builder: turns a policy and one target into the ordered
//! list of external tool invocations, and parses nuclei's streamed JSONL
//! events into typed findings. Pure construction; nothing here executes.

use crate::models::{Finding, NmapProfile, ScanPolicy, Severity};
use crate::targets::ensure_url;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Deserialize;

/// How a tool's streamed output is captured beyond the transcript log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capture {
    /// Log only
    Plain,
    /// Each line is opportunistically parsed as one finding (nuclei)
    FindingsJsonl,
    /// The full output is one JSON document, written once at the end (wpscan)
    JsonReport,
}

/// One external tool invocation to run for a target
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub title: String,
    pub program: String,
    pub args: Vec<String>,
    pub capture: Capture,
}

/// Builds the ordered invocation list for one target.
///
/// Order is fixed: network recon (nmap) before web-layer probes (nuclei,
/// nikto), CMS checks (wpscan) last. Each tool appears only when the policy
/// enables it.
pub fn build_invocations(
    policy: &ScanPolicy,
    target: &str,
    wpscan_token: Option<&str>,
) -> Vec<ToolInvocation> {
    let mut out = Vec::new();

    if policy.use_nmap {
        let mut args = nmap_args(policy.nmap_profile);
        args.push(target.to_string());
        out.push(ToolInvocation {
            title: format!("Nmap on {target}"),
            program: "nmap".to_string(),
            args,
            capture: Capture::Plain,
        });
    }

    if policy.use_nuclei {
        let url = ensure_url(target);
        let mut args = vec![
            "-u".to_string(),
            url.clone(),
            "-severity".to_string(),
            policy.nuclei_severity.clone(),
            "-jsonl".to_string(),
        ];
        if let Some(rate) = policy.nuclei_rate {
            args.push("-rl".to_string());
            args.push(rate.to_string());
        }
        if let Some(header) = basic_auth_header(policy) {
            args.push("-H".to_string());
            args.push(header);
        }
        out.push(ToolInvocation {
            title: format!("Nuclei on {url}"),
            program: "nuclei".to_string(),
            args,
            capture: Capture::FindingsJsonl,
        });
    }

    if policy.use_nikto {
        let url = ensure_url(target);
        let mut args = vec![
            "-host".to_string(),
            url.clone(),
            "-ask".to_string(),
            "no".to_string(),
        ];
        if has_basic_auth(policy) {
            args.push("-id".to_string());
            args.push(format!(
                "{}:{}",
                policy.http_basic_user, policy.http_basic_pass
            ));
        }
        out.push(ToolInvocation {
            title: format!("Nikto on {url}"),
            program: "nikto".to_string(),
            args,
            capture: Capture::Plain,
        });
    }

    if policy.use_wpscan {
        let url = ensure_url(target);
        let mut args = vec![
            "--url".to_string(),
            url.clone(),
            "--no-update".to_string(),
            "--format".to_string(),
            "json".to_string(),
        ];
        if let Some(token) = wpscan_token {
            args.push("--api-token".to_string());
            args.push(token.to_string());
        }
        out.push(ToolInvocation {
            title: format!("WPScan on {url}"),
            program: "wpscan".to_string(),
            args,
            capture: Capture::JsonReport,
        });
    }

    out
}

fn nmap_args(profile: NmapProfile) -> Vec<String> {
    let args: &[&str] = match profile {
        NmapProfile::Quick => &["-T4", "-F", "-sV", "-Pn"],
        NmapProfile::Full => &["-T4", "-p-", "-sV", "-Pn"],
        NmapProfile::Vuln => &["-T3", "-sV", "-sC", "--script", "vuln", "-Pn"],
    };
    args.iter().map(|s| s.to_string()).collect()
}

fn has_basic_auth(policy: &ScanPolicy) -> bool {
    !policy.http_basic_user.is_empty() || !policy.http_basic_pass.is_empty()
}

fn basic_auth_header(policy: &ScanPolicy) -> Option<String> {
    if !has_basic_auth(policy) {
        return None;
    }
    let token = BASE64.encode(format!(
        "{}:{}",
        policy.http_basic_user, policy.http_basic_pass
    ));
    Some(format!("Authorization: Basic {token}"))
}

/// Shape of one nuclei JSONL event, reduced to the fields we keep
#[derive(Debug, Deserialize)]
struct NucleiEvent {
    #[serde(rename = "template-id", alias = "templateID")]
    template_id: Option<String>,
    host: Option<String>,
    #[serde(rename = "matched-at")]
    matched_at: Option<String>,
    severity: Option<String>,
    info: Option<NucleiInfo>,
}

#[derive(Debug, Deserialize)]
struct NucleiInfo {
    id: Option<String>,
    name: Option<String>,
    severity: Option<String>,
    description: Option<String>,
}

/// Parses one streamed nuclei output line into a finding.
///
/// Parsing is best-effort: banner lines and anything else that is not a
/// JSON event return `None` and are dropped silently.
pub fn parse_finding(line: &str) -> Option<Finding> {
    let event: NucleiEvent = serde_json::from_str(line.trim()).ok()?;
    let info = event.info;
    let severity = info
        .as_ref()
        .and_then(|i| i.severity.clone())
        .or(event.severity)
        .map(|s| Severity::parse(&s))
        .unwrap_or(Severity::Info);
    Some(Finding {
        host: event
            .host
            .clone()
            .or_else(|| event.matched_at.clone())
            .unwrap_or_default(),
        template_id: event
            .template_id
            .or_else(|| info.as_ref().and_then(|i| i.id.clone()))
            .unwrap_or_default(),
        name: info
            .as_ref()
            .and_then(|i| i.name.clone())
            .unwrap_or_default(),
        severity,
        matched_at: event.matched_at.unwrap_or_default(),
        description: info
            .and_then(|i| i.description)
            .map(|d| d.replace('\n', " ").trim().to_string())
            .unwrap_or_default(),
    })
}

//! Plain-text exports and the run results summary

use crate::scan::models::Task;
use crate::scan::progress::ScanEvent;
use crate::store::ResultStore;
use crate::Result;
use chrono::Utc;
use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs;
use std::path::Path;

/// Proxies listed in the results summary.
const SUMMARY_TOP_LIMIT: i64 = 100;

/// Regex pattern to match IP:PORT patterns in text
static IP_PORT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}):(\d{1,5})\b")
        .expect("Invalid IP:PORT regex")
});

/// Write one `ip:port` per line.
pub fn write_task_list<P: AsRef<Path>>(tasks: &[Task], path: P) -> Result<()> {
    let content: String = tasks.iter().map(|task| format!("{task}\n")).collect();
    fs::write(path, content)?;
    Ok(())
}

/// Read a candidate list as written by [`write_task_list`] or by external
/// tooling: blank lines and `#` comments ignored, the first `ip:port` on
/// each remaining line extracted, malformed lines skipped.
pub fn read_task_list<P: AsRef<Path>>(path: P) -> Result<Vec<Task>> {
    let content = fs::read_to_string(path)?;
    Ok(content
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                return None;
            }
            let candidate = IP_PORT_REGEX
                .find(line)
                .map(|found| found.as_str())
                .unwrap_or(line);
            match candidate.parse::<Task>() {
                Ok(task) => Some(task),
                Err(err) => {
                    debug!("skipping candidate line: {err}");
                    None
                }
            }
        })
        .collect())
}

/// Write one CIDR per line.
pub fn write_range_list<P: AsRef<Path>>(ranges: &[String], path: P) -> Result<()> {
    let content: String = ranges.iter().map(|cidr| format!("{cidr}\n")).collect();
    fs::write(path, content)?;
    Ok(())
}

/// Results summary: the run's event journal plus database totals and the
/// fastest proxies on record.
pub async fn write_summary<P: AsRef<Path>>(
    store: &ResultStore,
    events: &[ScanEvent],
    path: P,
) -> Result<()> {
    let mut out = String::new();
    out.push_str("=== Proxy Scanner Results ===\n");
    out.push_str(&format!(
        "Generated at: {}\n\n",
        Utc::now().format("%Y-%m-%d %H:%M:%S")
    ));

    if !events.is_empty() {
        out.push_str("=== Scan History ===\n");
        for event in events {
            out.push_str(&format!(
                "[{}] {}\n",
                event.timestamp.format("%Y-%m-%d %H:%M:%S"),
                event.category
            ));
            out.push_str(&format!("Details: {}\n", event.detail));
            out.push_str(&format!("Status: {}\n\n", event.status));
        }
    }

    out.push_str("=== Current Working Proxies ===\n");
    out.push_str(&format!(
        "Total working proxies in database: {}\n\n",
        store.active_count().await?
    ));

    let top = store.top_active(SUMMARY_TOP_LIMIT).await?;
    if top.is_empty() {
        out.push_str("No working proxies found in database\n");
    } else {
        out.push_str(&format!("Top {} fastest proxies:\n", top.len()));
        out.push_str(&format!(
            "{:<21} {:>7} {:<12} {:<8} ISP\n",
            "IP:Port", "Speed", "Anonymity", "Country"
        ));
        for record in &top {
            out.push_str(&format!(
                "{:<21} {:>5}ms {:<12} {:<8} {}\n",
                record.endpoint(),
                record.speed,
                record.anonymity.to_string(),
                record.country,
                record.isp
            ));
        }
    }

    fs::write(path, out)?;
    Ok(())
}

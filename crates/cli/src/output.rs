use crate::error::CliError;
use engine_runtime::inspect::AdapterStatus;
use model::execution::{log::LogEntry, mapping::IdMapping};
use serde::Serialize;
use std::fmt::Write as _;

/// One line of `listmig adapters`.
#[derive(Debug, Serialize)]
pub struct AdapterRow {
    pub adapter_id: String,
    pub stage: String,
    pub percent: u8,
    pub in_progress: bool,
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), CliError> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{json}");
    Ok(())
}

pub fn status_table(adapter: &str, status: &AdapterStatus) -> String {
    let totals = &status.progress.totals;
    let total = totals
        .total_expected
        .map(|n| n.to_string())
        .unwrap_or_else(|| "n/a".to_string());
    let offset = status
        .task
        .as_ref()
        .map(|t| t.offset.to_string())
        .unwrap_or_else(|| "-".to_string());

    let mut out = String::new();
    let _ = writeln!(out, "Migration state for adapter '{adapter}':");
    let _ = writeln!(out, "-----------------------------");
    let _ = writeln!(out, "{:<16} {}", "Stage", status.stage_label());
    let _ = writeln!(out, "{:<16} {}", "Offset", offset);
    let _ = writeln!(out, "{:<16} {}%", "Progress", status.progress.percent);
    let _ = writeln!(out, "{:<16} {}", "Succeeded", totals.succeeded);
    let _ = writeln!(out, "{:<16} {}", "Failed", totals.failed);
    let _ = writeln!(out, "{:<16} {}", "Skipped", totals.skipped);
    let _ = writeln!(out, "{:<16} {}", "Expected", total);
    let _ = writeln!(out, "{:<16} {}", "Queued jobs", status.pending_jobs);
    let _ = writeln!(out, "{:<16} {}", "Job running", status.job_running);
    let _ = writeln!(out, "{:<16} {}", "Abort pending", status.abort_requested);
    let _ = writeln!(out, "{:<16} {}", "Last log seq", status.progress.last_log_seq);
    out
}

pub fn print_logs(entries: &[LogEntry], as_json: bool) -> Result<(), CliError> {
    for entry in entries {
        if as_json {
            println!("{}", serde_json::to_string(entry)?);
        } else {
            println!("{:>6} {}", entry.seq, entry.render());
        }
    }
    Ok(())
}

pub fn mappings_table(mappings: &[IdMapping]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{:<24} {}", "Source id", "Destination id");
    for mapping in mappings {
        let _ = writeln!(out, "{:<24} {}", mapping.source_id, mapping.destination_id);
    }
    let _ = writeln!(out, "{} mapping(s)", mappings.len());
    out
}

pub fn adapters_table(rows: &[AdapterRow]) -> String {
    if rows.is_empty() {
        return "No stored adapters\n".to_string();
    }

    let mut out = String::new();
    let _ = writeln!(out, "{:<28} {:<20} {:>8}  {}", "Adapter", "Stage", "Progress", "Active");
    for row in rows {
        let _ = writeln!(
            out,
            "{:<28} {:<20} {:>7}%  {}",
            row.adapter_id,
            row.stage,
            row.percent,
            if row.in_progress { "yes" } else { "no" }
        );
    }
    out
}

//! Terminal rendering of job state.

use indicatif::{ProgressBar, ProgressStyle};

use jobwatch_types::{ChannelState, ConnectionStatus, HistoryEntry, JobPhase, JobStatus};

pub fn bar_style() -> anyhow::Result<ProgressStyle> {
    Ok(
        ProgressStyle::with_template("{prefix:.bold} [{bar:32.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("=> "),
    )
}

/// One-line status text for a job's merged state.
pub fn status_line(state: &ChannelState) -> String {
    let mut line = state.phase.to_string();
    if !state.is_terminal() {
        match state.connection_status {
            ConnectionStatus::Connected => {}
            ConnectionStatus::Connecting => line.push_str(" (connecting)"),
            ConnectionStatus::Disconnected => line.push_str(" (disconnected)"),
        }
    }
    let errors = state.errors.len() as u64 + state.errors_dropped;
    if errors > 0 {
        line.push_str(&format!(", {errors} error{}", if errors == 1 { "" } else { "s" }));
    }
    line
}

pub fn update_bar(bar: &ProgressBar, state: &ChannelState) {
    bar.set_length(state.progress.total);
    bar.set_position(state.progress.current);
    bar.set_message(status_line(state));
}

pub fn finish_bar(bar: &ProgressBar, state: &ChannelState) {
    update_bar(bar, state);
    match state.phase {
        JobPhase::Complete | JobPhase::Error | JobPhase::Cancelled => bar.finish(),
        // Gave up reconnecting; leave the last known state on screen.
        JobPhase::Pending | JobPhase::Running => bar.abandon(),
    }
}

pub fn snapshot_text(status: &JobStatus) -> String {
    let mut out = format!("{}  {}", status.job_id, status.status);
    if let Some(kind) = &status.job_type {
        out.push_str(&format!("  [{kind}]"));
    }
    if let Some(counters) = status.counters(Default::default()) {
        out.push_str(&format!(
            "  {}/{} ({:.0}%)",
            counters.current, counters.total, counters.percentage
        ));
    }
    for error in status.errors() {
        out.push_str(&format!("\n  ! {}: {}", error.item_label, error.message));
    }
    out
}

pub fn history_table(entries: &[HistoryEntry]) -> String {
    if entries.is_empty() {
        return "No finished jobs.".to_owned();
    }
    let id_width = entries
        .iter()
        .map(|e| e.job_id.as_str().len())
        .max()
        .unwrap_or(0)
        .max("JOB".len());
    let kind_width = entries
        .iter()
        .map(|e| e.kind.as_str().len())
        .max()
        .unwrap_or(0)
        .max("KIND".len());
    let mut out = format!("{:id_width$}  {:kind_width$}  {:9}  CREATED", "JOB", "KIND", "PHASE");
    for entry in entries {
        let created = entry
            .created_at
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_owned());
        out.push_str(&format!(
            "\n{:id_width$}  {:kind_width$}  {:9}  {created}",
            entry.job_id.as_str(),
            entry.kind.as_str(),
            entry.phase.as_str(),
        ));
    }
    out
}

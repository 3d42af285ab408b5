//! Colored CLI output for supervisor events.

use std::io::{self, Write};
use std::path::Path;

use chrono::Utc;
use owo_colors::OwoColorize;

use crate::event::{NodeEvent, ServiceStatus};

/// Longest event detail printed before truncation.
const DETAIL_MAX_LEN: usize = 160;

/// Current timestamp in the same format as tracing.
fn timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

/// Truncate a string to `max_len` bytes, adding an ellipsis if truncated.
#[must_use]
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    if max_len <= 3 {
        return "...".to_string();
    }
    let mut end = max_len - 3;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

/// Severity bucket used to pick an event's color.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventTone {
    Progress,
    Good,
    Warning,
    Bad,
}

#[must_use]
pub fn event_tone(event: &NodeEvent) -> EventTone {
    match event {
        NodeEvent::Starting
        | NodeEvent::Stopping
        | NodeEvent::Stopped
        | NodeEvent::DownloadingBinary => EventTone::Progress,
        NodeEvent::Started | NodeEvent::IpcConnected | NodeEvent::EthNodeOk => EventTone::Good,
        NodeEvent::Error { .. } | NodeEvent::TimeNotSynced { .. } | NodeEvent::IpcDisconnected => {
            EventTone::Warning
        }
        NodeEvent::Failed { .. } | NodeEvent::BinaryCorrupted { .. } | NodeEvent::Fatal { .. } => {
            EventTone::Bad
        }
    }
}

/// Uncolored one-line rendering of an event.
#[must_use]
pub fn format_event(event: &NodeEvent) -> String {
    match event {
        NodeEvent::Failed { component } => format!("[{}] {component:?}", event.name()),
        other => match other.detail() {
            Some(detail) => format!(
                "[{}] {}",
                other.name(),
                truncate(detail.trim_end(), DETAIL_MAX_LEN)
            ),
            None => format!("[{}]", other.name()),
        },
    }
}

/// Print an event with a timestamp.
pub fn print_event(event: &NodeEvent) {
    let line = format_event(event);
    let line = match event_tone(event) {
        EventTone::Progress => line.blue().to_string(),
        EventTone::Good => line.green().bold().to_string(),
        EventTone::Warning => line.yellow().to_string(),
        EventTone::Bad => line.red().bold().to_string(),
    };
    println!("{} {line}", timestamp().dimmed());
    let _ = io::stdout().flush();
}

fn flag(up: bool) -> String {
    if up {
        "up".green().to_string()
    } else {
        "down".red().to_string()
    }
}

/// Print the `{process, api}` status.
pub fn print_status(status: ServiceStatus) {
    println!(
        "{} {} process={} api={}",
        timestamp().dimmed(),
        "[STATUS]".cyan().bold(),
        flag(status.process),
        flag(status.api)
    );
    let _ = io::stdout().flush();
}

/// Print the default data directory and IPC endpoint.
pub fn print_paths(datadir: &Path, ipc_path: &Path) {
    println!("{} {}", "datadir:".bold(), datadir.display());
    println!("{} {}", "ipcpath:".bold(), ipc_path.display());
    let _ = io::stdout().flush();
}

/// Print an error message.
pub fn print_error(message: &str) {
    println!("{} {}", "[ERROR]".red().bold(), message);
    let _ = io::stdout().flush();
}

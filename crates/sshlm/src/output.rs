//! Report rendering for events and sessions.

use chrono::NaiveDateTime;
use clap::ValueEnum;
use colored::{Color, Colorize};
use serde::Deserialize;
use sshlm_core::{Session, SessionEvent};
use sshlm_db::FingerprintRecord;

use crate::config::Theme;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Shown in place of an unresolved key owner.
const UNKNOWN: &str = "-";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Session table
    #[default]
    Sum,
    /// Event table
    Log,
    /// Events as CSV
    Csv,
    /// Events and sessions as JSON
    Json,
}

/// Render a batch result in the chosen format.
pub fn print_report(
    format: OutputFormat,
    events: &[SessionEvent],
    sessions: &[Session],
    theme: Option<&Theme>,
) -> anyhow::Result<()> {
    match format {
        OutputFormat::Sum => print_summary(sessions, theme),
        OutputFormat::Log => print_log(events, theme),
        OutputFormat::Csv => print_csv(events),
        OutputFormat::Json => print_json(events, sessions)?,
    }
    Ok(())
}

pub fn print_summary(sessions: &[Session], theme: Option<&Theme>) {
    if sessions.is_empty() {
        println!("{}", "No sessions found.".dimmed());
        return;
    }

    println!("{}", session_header());
    for session in sessions {
        println!("{}", format_session(session, theme));
    }
}

/// The header is always printed; in follow mode new rows are appended below it.
pub fn print_log(events: &[SessionEvent], theme: Option<&Theme>) {
    println!("{}", event_header());
    for event in events {
        println!("{}", format_event(event, theme));
    }
}

pub fn print_csv(events: &[SessionEvent]) {
    println!("event_type,event_time,subject_username,key_user,source_ip,port");
    for event in events {
        println!("{}", csv_row(event));
    }
}

pub fn print_json(events: &[SessionEvent], sessions: &[Session]) -> anyhow::Result<()> {
    let report = serde_json::json!({
        "events": events,
        "sessions": sessions,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

pub fn print_fingerprints(records: &[FingerprintRecord]) {
    if records.is_empty() {
        println!("{}", "No fingerprints stored.".dimmed());
        return;
    }

    println!(
        "{:<20} {:<19} {}",
        "KEY USER".dimmed(),
        "UPDATED".dimmed(),
        "FINGERPRINT".dimmed(),
    );
    for record in records {
        println!("{}", format_fingerprint(record));
    }
}

pub fn format_fingerprint(record: &FingerprintRecord) -> String {
    format!(
        "{:<20} {:<19} SHA256:{}",
        record.key_user,
        record.updated_at.format(TIME_FORMAT),
        record.fingerprint
    )
}

/// Print one event as it arrives in follow mode.
pub fn print_event(event: &SessionEvent, theme: Option<&Theme>) {
    println!("{}", format_event(event, theme));
}

pub fn event_header() -> String {
    format!(
        "{:<20} {:<12} {:<7} {:<15} {:<6} {}",
        "KEY USER".dimmed(),
        "USERNAME".dimmed(),
        "EVENT".dimmed(),
        "SOURCE IP".dimmed(),
        "PORT".dimmed(),
        "TIME".dimmed(),
    )
}

pub fn session_header() -> String {
    format!(
        "{:<20} {:<12} {:<15} {:<6} {:<19} {:<19} {}",
        "KEY USER".dimmed(),
        "USERNAME".dimmed(),
        "SOURCE IP".dimmed(),
        "PORT".dimmed(),
        "START".dimmed(),
        "END".dimmed(),
        "DURATION".dimmed(),
    )
}

pub fn format_event(event: &SessionEvent, theme: Option<&Theme>) -> String {
    let color = |pick: fn(&Theme) -> Color| theme.map(pick);

    [
        paint(key_user(&event.key_user), 20, color(|t| t.key_user)),
        paint(&event.subject_username, 12, color(|t| t.username)),
        paint(&event.event_type.to_string(), 7, color(|t| t.event_type)),
        paint(&event.source_ip, 15, color(|t| t.source_ip)),
        paint(&event.port, 6, color(|t| t.port)),
        paint(&format_time(&event.event_time), 0, color(|t| t.event_time)),
    ]
    .join(" ")
}

pub fn format_session(session: &Session, theme: Option<&Theme>) -> String {
    let color = |pick: fn(&Theme) -> Color| theme.map(pick);

    let end = session
        .end_time
        .as_ref()
        .map(format_time)
        .unwrap_or_else(|| UNKNOWN.to_string());
    let duration = session
        .duration()
        .map(format_duration)
        .unwrap_or_else(|| "active".to_string());

    [
        paint(key_user(&session.key_user), 20, color(|t| t.key_user)),
        paint(&session.subject_username, 12, color(|t| t.username)),
        paint(&session.source_ip, 15, color(|t| t.source_ip)),
        paint(&session.port, 6, color(|t| t.port)),
        paint(&format_time(&session.start_time), 19, color(|t| t.start_time)),
        paint(&end, 19, color(|t| t.end_time)),
        duration,
    ]
    .join(" ")
}

pub fn csv_row(event: &SessionEvent) -> String {
    [
        event.event_type.to_string(),
        format_time(&event.event_time),
        csv_field(&event.subject_username),
        csv_field(&event.key_user),
        csv_field(&event.source_ip),
        csv_field(&event.port),
    ]
    .join(",")
}

/// Key comments are free text and may need quoting.
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn key_user(value: &str) -> &str {
    if value.is_empty() {
        UNKNOWN
    } else {
        value
    }
}

// Pad before coloring so escape codes don't count toward the width.
fn paint(text: &str, width: usize, color: Option<Color>) -> String {
    let padded = format!("{:<width$}", text, width = width);
    match color {
        Some(color) => padded.color(color).to_string(),
        None => padded,
    }
}

fn format_time(time: &NaiveDateTime) -> String {
    time.format(TIME_FORMAT).to_string()
}

fn format_duration(duration: chrono::Duration) -> String {
    let secs = duration.num_seconds().max(0);
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

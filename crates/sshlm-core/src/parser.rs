//! sshd log line parsing.
//!
//! Syslog timestamps carry no year, so the current calendar year is assumed.
//! A December line processed in January is therefore dated a year late; this
//! is not corrected. A `Feb 29` line read in a non-leap year has no valid date
//! and is reported as an invalid event.

use chrono::{Datelike, Local, NaiveDateTime};
use lazy_static::lazy_static;
use regex::{Captures, Regex};

use crate::error::{MonitorError, Result};
use crate::registry::FingerprintLookup;
use crate::types::{EventType, SessionEvent};

const LOGIN_MARKER: &str = "Accepted publickey for ";
const LOGOUT_MARKER: &str = "Disconnected from user ";

lazy_static! {
    static ref LOGIN_PATTERN: Regex = Regex::new(concat!(
        r"(?P<month>[A-Z][a-z]{2}) +(?P<day>[0-9]{1,2}) (?P<time>[0-9]{2}:[0-9]{2}:[0-9]{2}) ",
        r".*Accepted publickey for (?P<user>[A-Za-z0-9._-]+) ",
        r"from (?P<ip>[0-9]{1,3}\.[0-9]{1,3}\.[0-9]{1,3}\.[0-9]{1,3}) ",
        r"port (?P<port>[0-9]{1,5}) ",
        r".*SHA256:(?P<fingerprint>[A-Za-z0-9+/]+=*)$",
    ))
    .unwrap();
    static ref LOGOUT_PATTERN: Regex = Regex::new(concat!(
        r"(?P<month>[A-Z][a-z]{2}) +(?P<day>[0-9]{1,2}) (?P<time>[0-9]{2}:[0-9]{2}:[0-9]{2}) ",
        r".*Disconnected from user (?P<user>[A-Za-z0-9._-]+) ",
        r"(?P<ip>[0-9]{1,3}\.[0-9]{1,3}\.[0-9]{1,3}\.[0-9]{1,3}) ",
        r"port (?P<port>[0-9]{1,5})\b",
    ))
    .unwrap();
}

/// Parse one log line, dating it in the current year.
///
/// Returns `Ok(None)` for lines that are neither a publickey login nor a user
/// disconnect.
pub fn parse_line<L>(line: &str, lookup: &L) -> Result<Option<SessionEvent>>
where
    L: FingerprintLookup + ?Sized,
{
    parse_line_in_year(line, lookup, Local::now().year())
}

/// Parse one log line using an explicit year for its timestamp.
pub fn parse_line_in_year<L>(line: &str, lookup: &L, year: i32) -> Result<Option<SessionEvent>>
where
    L: FingerprintLookup + ?Sized,
{
    let line = line.trim_end();

    if line.contains(LOGIN_MARKER) {
        let caps = LOGIN_PATTERN
            .captures(line)
            .ok_or_else(|| MonitorError::invalid_event(line))?;
        let event_time = event_time(&caps, year, line)?;

        let fingerprint = &caps["fingerprint"];
        let key_user = match lookup.lookup(fingerprint)? {
            Some(user) => user,
            None => {
                tracing::warn!(fingerprint, "key user not found in line {}", line);
                String::new()
            }
        };

        return Ok(Some(SessionEvent {
            event_type: EventType::Login,
            event_time,
            subject_username: caps["user"].to_string(),
            key_user,
            source_ip: caps["ip"].to_string(),
            port: caps["port"].to_string(),
        }));
    }

    if line.contains(LOGOUT_MARKER) {
        let caps = LOGOUT_PATTERN
            .captures(line)
            .ok_or_else(|| MonitorError::invalid_event(line))?;
        let event_time = event_time(&caps, year, line)?;

        return Ok(Some(SessionEvent {
            event_type: EventType::Logout,
            event_time,
            subject_username: caps["user"].to_string(),
            key_user: String::new(),
            source_ip: caps["ip"].to_string(),
            port: caps["port"].to_string(),
        }));
    }

    Ok(None)
}

fn event_time(caps: &Captures<'_>, year: i32, line: &str) -> Result<NaiveDateTime> {
    // "Apr  7" (syslog) and "Apr 07" (journalctl) both normalize to "Apr 07".
    let stamp = format!(
        "{} {} {:0>2} {}",
        year, &caps["month"], &caps["day"], &caps["time"]
    );
    NaiveDateTime::parse_from_str(&stamp, "%Y %b %d %H:%M:%S")
        .map_err(|_| MonitorError::invalid_event(line))
}

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Login,
    Logout,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventType::Login => write!(f, "login"),
            EventType::Logout => write!(f, "logout"),
        }
    }
}

/// One login or logout detected in the sshd log.
///
/// `event_time` is local wall-clock time as written by syslog; the log format
/// carries no year or zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionEvent {
    pub event_type: EventType,
    pub event_time: NaiveDateTime,
    /// Account the daemon authenticated into.
    pub subject_username: String,
    /// Owner of the key used to log in. Empty when unknown, and empty on a
    /// logout until it has been paired with its login.
    pub key_user: String,
    pub source_ip: String,
    pub port: String,
}

impl SessionEvent {
    pub fn is_login(&self) -> bool {
        self.event_type == EventType::Login
    }
}

/// A login-to-logout span reconstructed from a pair of events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub key_user: String,
    pub subject_username: String,
    pub source_ip: String,
    pub port: String,
    pub start_time: NaiveDateTime,
    pub end_time: Option<NaiveDateTime>,
}

impl Session {
    pub(crate) fn open(login: &SessionEvent) -> Self {
        Self {
            key_user: login.key_user.clone(),
            subject_username: login.subject_username.clone(),
            source_ip: login.source_ip.clone(),
            port: login.port.clone(),
            start_time: login.event_time,
            end_time: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.end_time.is_none()
    }

    /// Session length, or `None` while it is still open.
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.end_time.map(|end| end - self.start_time)
    }
}

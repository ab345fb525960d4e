//! # sshlm-core
//!
//! Turns sshd log lines into login/logout events and pairs them into sessions.
//!
//! ## Key Types
//!
//! - [`SessionEvent`] - One publickey login or user disconnect
//! - [`Session`] - A login paired with its logout (or still open)
//! - [`CorrelationState`] - Logins waiting for their logout, keyed by port
//! - [`Tailer`] - Follows a growing log file
//! - [`FingerprintLookup`] - Resolves key fingerprints to their owners
//!
//! ## Drivers
//!
//! [`read_events`] and [`read_journal`] parse a finite source; pair the
//! result with [`events_to_sessions`]. [`Tailer`] and [`follow_journal`]
//! parse and correlate as lines arrive.

pub mod correlator;
pub mod error;
pub mod journal;
pub mod keys;
pub mod parser;
pub mod reader;
pub mod registry;
pub mod tail;
pub mod types;

pub use correlator::{apply, correlate, events_to_sessions, CorrelationState};
pub use error::{MonitorError, RegistryError, Result};
pub use journal::{follow_journal, read_journal};
pub use keys::{collect_keys, parse_authorized_keys, KeyEntry, KeyFollower};
pub use parser::{parse_line, parse_line_in_year};
pub use reader::{read_events, read_log_file};
pub use registry::{
    normalize_fingerprint, FingerprintLookup, FingerprintRegistry, MemoryRegistry, PositionStore,
};
pub use tail::Tailer;
pub use types::{EventType, Session, SessionEvent};

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::Result;
use crate::parser::parse_line;
use crate::registry::FingerprintLookup;
use crate::types::SessionEvent;

/// Parse every login and logout in a finite log.
///
/// The first malformed login or logout line aborts the read. Events are
/// returned uncorrelated; run [`crate::events_to_sessions`] over them to
/// pair logins with logouts.
pub fn read_events<R, L>(mut reader: R, lookup: &L) -> Result<Vec<SessionEvent>>
where
    R: BufRead,
    L: FingerprintLookup + ?Sized,
{
    let mut events = Vec::new();
    let mut buf = Vec::new();

    // Unrelated programs log arbitrary bytes, so lines are decoded lossily.
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }

        let line = String::from_utf8_lossy(&buf);
        if line.trim().is_empty() {
            continue;
        }

        if let Some(event) = parse_line(&line, lookup)? {
            events.push(event);
        }
    }

    Ok(events)
}

/// Open a log file and parse it with [`read_events`].
pub fn read_log_file<L>(path: &Path, lookup: &L) -> Result<Vec<SessionEvent>>
where
    L: FingerprintLookup + ?Sized,
{
    let file = File::open(path)?;
    tracing::debug!("reading log file {}", path.display());
    read_events(BufReader::new(file), lookup)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use crate::correlator::events_to_sessions;

    const LOGIN: &str = "Apr 27 10:21:19 deep-rh sshd[1]: Accepted publickey for root from 192.168.1.24 port 49090 ssh2: ED25519 SHA256:abc123";
    const LOGOUT: &str =
        "Apr 27 10:21:22 deep-rh sshd[2]: Disconnected from user root 192.168.1.24 port 49090";

    fn registry() -> HashMap<String, String> {
        HashMap::from([("abc123".to_string(), "alice".to_string())])
    }

    #[test]
    fn test_non_utf8_noise_is_skipped() {
        let mut input = Vec::new();
        input.extend_from_slice(LOGIN.as_bytes());
        input.extend_from_slice(b"\nApr 27 10:21:20 deep-rh sudo[9]: pam: user \xff\xfe opened\n");
        input.extend_from_slice(LOGOUT.as_bytes());
        input.push(b'\n');

        let mut events = read_events(input.as_slice(), &registry()).unwrap();
        assert_eq!(events.len(), 2);

        let sessions = events_to_sessions(&mut events);
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].key_user, "alice");
        assert!(!sessions[0].is_open());
    }

    #[test]
    fn test_crlf_and_missing_final_newline() {
        let input = format!("{}\r\n\r\n{}", LOGIN, LOGOUT);

        let events = read_events(input.as_bytes(), &registry()).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].port, "49090");
    }
}

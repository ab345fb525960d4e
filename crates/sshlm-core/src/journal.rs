//! systemd journal as a line source.
//!
//! `journalctl -o short` prints sshd entries in the same layout as
//! `/var/log/secure`, so the journal goes through the regular parser.

use std::future::Future;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use crate::correlator::{apply, CorrelationState};
use crate::error::{MonitorError, Result};
use crate::parser::parse_line;
use crate::reader::read_events;
use crate::registry::FingerprintLookup;
use crate::types::{Session, SessionEvent};

const JOURNALCTL: &str = "journalctl";

/// Arguments selecting sshd entries in syslog layout.
pub fn journal_args(follow: bool) -> Vec<&'static str> {
    let mut args = vec!["-t", "sshd", "-o", "short", "--no-pager", "-q"];
    if follow {
        // New entries only, like a tail attached at end of file.
        args.extend(["-f", "-n", "0"]);
    }
    args
}

/// Read the whole sshd journal and parse it as a batch.
pub async fn read_journal<L>(lookup: &L) -> Result<Vec<SessionEvent>>
where
    L: FingerprintLookup + ?Sized,
{
    let output = Command::new(JOURNALCTL)
        .args(journal_args(false))
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| MonitorError::Journal(format!("failed to run {}: {}", JOURNALCTL, e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(MonitorError::Journal(format!(
            "{} exited with {}: {}",
            JOURNALCTL,
            output.status,
            stderr.trim()
        )));
    }

    read_events(output.stdout.as_slice(), lookup)
}

/// Follow new sshd journal entries until `cancel` resolves.
///
/// `state` carries logins still pending from an earlier batch read so their
/// logouts are attributed.
pub async fn follow_journal<L, C, F>(
    lookup: &L,
    state: &mut CorrelationState,
    sessions: &mut Vec<Session>,
    cancel: C,
    mut on_event: F,
) -> Result<()>
where
    L: FingerprintLookup + ?Sized,
    C: Future<Output = ()>,
    F: FnMut(&SessionEvent),
{
    let mut child = Command::new(JOURNALCTL)
        .args(journal_args(true))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| MonitorError::Journal(format!("failed to run {}: {}", JOURNALCTL, e)))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| MonitorError::Journal("journalctl stdout not captured".to_string()))?;
    let mut reader = BufReader::new(stdout);
    let mut buf = Vec::new();
    tokio::pin!(cancel);

    tracing::info!("following sshd journal");

    loop {
        buf.clear();
        tokio::select! {
            _ = &mut cancel => {
                if let Err(e) = child.kill().await {
                    tracing::debug!("failed to stop {}: {}", JOURNALCTL, e);
                }
                return Ok(());
            }
            read = reader.read_until(b'\n', &mut buf) => {
                if read? == 0 {
                    let status = child.wait().await?;
                    return Err(MonitorError::Journal(format!(
                        "{} exited unexpectedly with {}",
                        JOURNALCTL, status
                    )));
                }

                let line = String::from_utf8_lossy(&buf);
                match parse_line(&line, lookup) {
                    Ok(Some(event)) => {
                        let event = apply(event, state, sessions);
                        on_event(&event);
                    }
                    Ok(None) => {}
                    Err(MonitorError::InvalidEvent { line }) => {
                        tracing::warn!("skipping malformed journal entry: {}", line);
                    }
                    Err(e) => return Err(e),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_journal_args() {
        assert_eq!(
            journal_args(false),
            vec!["-t", "sshd", "-o", "short", "--no-pager", "-q"]
        );
        let follow = journal_args(true);
        assert!(follow.ends_with(&["-f", "-n", "0"]));
    }
}

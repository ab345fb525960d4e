use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use chrono::{Datelike, Local, NaiveDate, NaiveDateTime};
use sshlm_core::{
    events_to_sessions, read_events, read_log_file, EventType, MemoryRegistry, MonitorError,
    SessionEvent, Tailer,
};
use tempfile::TempDir;

const SECURE_LOG: &str = r#"Apr 27 10:21:19 deep-rh sshd[1337250]: Accepted publickey for root from 192.168.1.24 port 49090 ssh2: ED25519 SHA256:5xuxPx8QnPv19/6IZ5frmQj1N0hRCP9J364ddE6avL8
Apr 27 10:21:19 deep-rh systemd[1337257]: pam_unix(systemd-user:session): session opened for user root by (uid=0)
Apr 27 10:21:19 deep-rh sshd[1337250]: pam_unix(sshd:session): session opened for user root by (uid=0)
Apr 27 10:21:22 deep-rh sshd[1337282]: Received disconnect from 192.168.1.24 port 49090:11: disconnected by user
Apr 27 10:21:22 deep-rh sshd[1337282]: Disconnected from user root 192.168.1.24 port 49090
Apr 27 10:21:22 deep-rh sshd[1337250]: pam_unix(sshd:session): session closed for user root

Apr 27 10:21:34 deep-rh sshd[1337458]: Accepted publickey for root from 192.168.1.24 port 41254 ssh2: ED25519 SHA256:is6l6bRqCCBVKunT+zVGHoUF0A06p8lt/04EoRbyCUY
Apr 27 10:21:34 deep-rh sshd[1337458]: pam_unix(sshd:session): session opened for user root by (uid=0)
Apr 27 10:21:37 deep-rh sshd[1337493]: Disconnected from user root 192.168.1.24 port 41254
Apr 27 10:22:01 deep-rh sshd[1337501]: Accepted publickey for git from 10.0.0.7 port 50122 ssh2: RSA SHA256:unregisteredkeyAAAA
"#;

fn registry() -> HashMap<String, String> {
    HashMap::from([
        (
            "5xuxPx8QnPv19/6IZ5frmQj1N0hRCP9J364ddE6avL8".to_string(),
            "alice@fedora".to_string(),
        ),
        (
            "is6l6bRqCCBVKunT+zVGHoUF0A06p8lt/04EoRbyCUY".to_string(),
            "bob@fedora".to_string(),
        ),
        ("abc123".to_string(), "alice".to_string()),
    ])
}

fn this_year(month: u32, day: u32, h: u32, m: u32, s: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(Local::now().year(), month, day)
        .unwrap()
        .and_hms_opt(h, m, s)
        .unwrap()
}

fn append(path: &Path, line: &str) {
    let mut file = OpenOptions::new().append(true).open(path).unwrap();
    writeln!(file, "{}", line).unwrap();
}

// ============================================================
// Batch reader tests
// ============================================================

#[test]
fn test_read_events_from_secure_log() {
    let events = read_events(SECURE_LOG.as_bytes(), &registry()).unwrap();

    assert_eq!(events.len(), 5);

    assert_eq!(events[0].event_type, EventType::Login);
    assert_eq!(events[0].event_time, this_year(4, 27, 10, 21, 19));
    assert_eq!(events[0].key_user, "alice@fedora");
    assert_eq!(events[0].subject_username, "root");
    assert_eq!(events[0].port, "49090");

    assert_eq!(events[1].event_type, EventType::Logout);
    assert_eq!(events[1].key_user, "");

    assert_eq!(events[2].key_user, "bob@fedora");
    assert_eq!(events[4].subject_username, "git");
    assert_eq!(events[4].key_user, "");
}

#[test]
fn test_read_events_aborts_on_malformed_line() {
    let input = format!(
        "{}Apr 27 10:21:19 deep-rh sshd[1]: Accepted publickey for root from 192.168.1.24 port 49090 ssh2: ED25519 SH\n",
        SECURE_LOG
    );

    let err = read_events(input.as_bytes(), &registry()).unwrap_err();
    assert!(matches!(err, MonitorError::InvalidEvent { .. }));
}

#[test]
fn test_read_log_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("secure");
    fs::write(&path, SECURE_LOG).unwrap();

    let events = read_log_file(&path, &registry()).unwrap();
    assert_eq!(events.len(), 5);
}

#[test]
fn test_read_log_file_missing() {
    let err = read_log_file(Path::new("/nonexistent/secure"), &registry()).unwrap_err();
    assert!(matches!(err, MonitorError::Io(_)));
}

// ============================================================
// Correlation tests
// ============================================================

#[test]
fn test_secure_log_to_sessions() {
    let mut events = read_events(SECURE_LOG.as_bytes(), &registry()).unwrap();
    let sessions = events_to_sessions(&mut events);

    assert_eq!(sessions.len(), 3);

    assert_eq!(sessions[0].key_user, "alice@fedora");
    assert_eq!(sessions[0].start_time, this_year(4, 27, 10, 21, 19));
    assert_eq!(sessions[0].end_time, Some(this_year(4, 27, 10, 21, 22)));

    assert_eq!(sessions[1].key_user, "bob@fedora");
    assert_eq!(sessions[1].end_time, Some(this_year(4, 27, 10, 21, 37)));

    // No logout seen for the git login.
    assert!(sessions[2].is_open());
    assert_eq!(sessions[2].source_ip, "10.0.0.7");

    // Logouts carry the key user once paired.
    assert_eq!(events[1].key_user, "alice@fedora");
    assert_eq!(events[3].key_user, "bob@fedora");
}

#[test]
fn test_single_session_round_trip() {
    let log = "Apr 27 10:21:19 host sshd[10]: Accepted publickey for root from 192.168.1.24 port 49090 ssh2: ED25519 SHA256:abc123\n\
               Apr 27 10:21:22 host sshd[11]: Disconnected from user root 192.168.1.24 port 49090\n";

    let mut events = read_events(log.as_bytes(), &registry()).unwrap();
    let sessions = events_to_sessions(&mut events);

    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].key_user, "alice");
    assert_eq!(sessions[0].start_time, this_year(4, 27, 10, 21, 19));
    assert_eq!(sessions[0].end_time, Some(this_year(4, 27, 10, 21, 22)));
    assert_eq!(events[1].key_user, "alice");
}

#[test]
fn test_orphan_logout_is_not_an_error() {
    let log = "Apr 27 10:21:22 host sshd[11]: Disconnected from user root 192.168.1.24 port 49090\n";

    let mut events = read_events(log.as_bytes(), &registry()).unwrap();
    let sessions = events_to_sessions(&mut events);

    assert!(sessions.is_empty());
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].key_user, "");
}

#[test]
fn test_csv_registry_drives_parser() {
    let registry =
        MemoryRegistry::from_csv("alice,SHA256:abc123\nbob,def456\n".as_bytes()).unwrap();
    let log = "Apr 27 10:21:19 host sshd[10]: Accepted publickey for root from 192.168.1.24 port 49090 ssh2: ED25519 SHA256:abc123\n";

    let events = read_events(log.as_bytes(), &registry).unwrap();
    assert_eq!(events[0].key_user, "alice");
}

// ============================================================
// Tailer tests
// ============================================================

#[tokio::test]
async fn test_tailer_follows_appends() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("secure");
    fs::write(&path, SECURE_LOG).unwrap();

    let mut tailer = Tailer::attach(&path, registry()).unwrap();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<SessionEvent>();
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();

    let handle = tokio::spawn(async move {
        let mut sessions = Vec::new();
        tailer
            .run(
                &mut sessions,
                async {
                    let _ = stop_rx.await;
                },
                |event| {
                    let _ = tx.send(event.clone());
                },
            )
            .await
            .unwrap();
        sessions
    });

    tokio::time::sleep(Duration::from_millis(200)).await;
    append(
        &path,
        "Apr 28 08:00:00 host sshd[20]: Accepted publickey for root from 172.16.0.9 port 60001 ssh2: ED25519 SHA256:abc123",
    );

    let login = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("no login event")
        .unwrap();
    assert_eq!(login.event_type, EventType::Login);
    assert_eq!(login.key_user, "alice");

    append(
        &path,
        "Apr 28 08:05:00 host sshd[21]: Disconnected from user root 172.16.0.9 port 60001",
    );

    let logout = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("no logout event")
        .unwrap();
    assert_eq!(logout.event_type, EventType::Logout);
    assert_eq!(logout.key_user, "alice");

    stop_tx.send(()).unwrap();
    let sessions = handle.await.unwrap();

    // Content present before attach is not replayed.
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].end_time, Some(this_year(4, 28, 8, 5, 0)));
}

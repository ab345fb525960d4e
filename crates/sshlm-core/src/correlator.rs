//! Pairs logins with their logouts.
//!
//! Pairing is keyed on the client's source port. When the same port shows up
//! in more than one open session (a logout line was lost and the port was
//! later reused), the oldest open match is closed. That is a guess, not a
//! guarantee.

use std::collections::HashMap;

use crate::types::{EventType, Session, SessionEvent};

/// Logins still waiting for their logout, keyed by source port.
#[derive(Debug, Default, Clone)]
pub struct CorrelationState {
    pending: HashMap<String, String>,
}

impl CorrelationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Key user of the pending login on `port`, if any.
    pub fn pending_user(&self, port: &str) -> Option<&str> {
        self.pending.get(port).map(String::as_str)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

/// Apply one event to the correlation state and session list.
///
/// Returns the event with `key_user` filled in when a logout is matched to a
/// pending login.
pub fn apply(
    mut event: SessionEvent,
    state: &mut CorrelationState,
    sessions: &mut Vec<Session>,
) -> SessionEvent {
    match event.event_type {
        EventType::Login => {
            // Ports get reused; the newest login always owns the slot.
            state
                .pending
                .insert(event.port.clone(), event.key_user.clone());
            sessions.push(Session::open(&event));
        }
        EventType::Logout => match state.pending.remove(&event.port) {
            Some(key_user) => {
                event.key_user = key_user;
                let open = sessions.iter_mut().find(|s| {
                    s.is_open()
                        && s.key_user == event.key_user
                        && s.source_ip == event.source_ip
                        && s.port == event.port
                });
                match open {
                    Some(session) => session.end_time = Some(event.event_time),
                    None => tracing::warn!(
                        port = %event.port,
                        source_ip = %event.source_ip,
                        "no open session matches logout"
                    ),
                }
            }
            None => {
                tracing::warn!("login event for port {} not found", event.port);
            }
        },
    }

    event
}

/// Correlate a batch of events, rewriting each one with its enriched form.
pub fn events_to_sessions(events: &mut [SessionEvent]) -> Vec<Session> {
    correlate(events, &mut CorrelationState::new())
}

/// Like [`events_to_sessions`], but logins left pending stay in `state` so a
/// live source can pick up where the batch ended.
pub fn correlate(events: &mut [SessionEvent], state: &mut CorrelationState) -> Vec<Session> {
    let mut sessions = Vec::new();

    for event in events.iter_mut() {
        *event = apply(event.clone(), state, &mut sessions);
    }

    sessions
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveDateTime};

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2023, 1, 1)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    fn event(kind: EventType, time: NaiveDateTime, key_user: &str, port: &str) -> SessionEvent {
        SessionEvent {
            event_type: kind,
            event_time: time,
            subject_username: "root".to_string(),
            key_user: key_user.to_string(),
            source_ip: "192.168.1.24".to_string(),
            port: port.to_string(),
        }
    }

    #[test]
    fn test_login_then_logout() {
        let mut events = vec![
            event(EventType::Login, at(10, 21, 19), "alice", "49090"),
            event(EventType::Logout, at(10, 21, 22), "", "49090"),
        ];

        let sessions = events_to_sessions(&mut events);

        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].key_user, "alice");
        assert_eq!(sessions[0].start_time, at(10, 21, 19));
        assert_eq!(sessions[0].end_time, Some(at(10, 21, 22)));
        assert!(sessions[0].end_time.unwrap() > sessions[0].start_time);
        assert_eq!(events[1].key_user, "alice");
    }

    #[test]
    fn test_logout_without_login() {
        let mut state = CorrelationState::new();
        let mut sessions = vec![];

        let out = apply(
            event(EventType::Logout, at(1, 0, 0), "", "5000"),
            &mut state,
            &mut sessions,
        );

        assert!(sessions.is_empty());
        assert_eq!(out.key_user, "");
        assert_eq!(state.pending_count(), 0);
    }

    #[test]
    fn test_logout_does_not_close_other_port() {
        let mut state = CorrelationState::new();
        let mut sessions = vec![];

        apply(
            event(EventType::Login, at(1, 0, 0), "alice", "5000"),
            &mut state,
            &mut sessions,
        );
        apply(
            event(EventType::Logout, at(1, 0, 5), "", "6000"),
            &mut state,
            &mut sessions,
        );

        assert!(sessions[0].is_open());
        assert_eq!(state.pending_user("5000"), Some("alice"));
    }

    #[test]
    fn test_port_reuse_overwrites_pending() {
        let mut state = CorrelationState::new();
        let mut sessions = vec![];

        apply(
            event(EventType::Login, at(1, 0, 0), "alice", "5000"),
            &mut state,
            &mut sessions,
        );
        apply(
            event(EventType::Login, at(2, 0, 0), "bob", "5000"),
            &mut state,
            &mut sessions,
        );
        assert_eq!(state.pending_user("5000"), Some("bob"));

        let out = apply(
            event(EventType::Logout, at(3, 0, 0), "", "5000"),
            &mut state,
            &mut sessions,
        );

        assert_eq!(out.key_user, "bob");
        assert_eq!(sessions.len(), 2);
        assert!(sessions[0].is_open());
        assert_eq!(sessions[1].end_time, Some(at(3, 0, 0)));
        assert_eq!(state.pending_count(), 0);
    }

    #[test]
    fn test_first_open_match_is_closed() {
        let mut state = CorrelationState::new();
        let mut sessions = vec![];

        // Same user and port twice; the first logout was lost.
        for hour in [1, 2] {
            apply(
                event(EventType::Login, at(hour, 0, 0), "alice", "5000"),
                &mut state,
                &mut sessions,
            );
        }
        apply(
            event(EventType::Logout, at(3, 0, 0), "", "5000"),
            &mut state,
            &mut sessions,
        );

        assert_eq!(sessions[0].end_time, Some(at(3, 0, 0)));
        assert!(sessions[1].is_open());
    }

    #[test]
    fn test_correlate_keeps_pending_logins() {
        let mut history = vec![event(EventType::Login, at(1, 0, 0), "alice", "5000")];
        let mut state = CorrelationState::new();

        let mut sessions = correlate(&mut history, &mut state);
        assert_eq!(state.pending_user("5000"), Some("alice"));

        let out = apply(
            event(EventType::Logout, at(1, 30, 0), "", "5000"),
            &mut state,
            &mut sessions,
        );

        assert_eq!(out.key_user, "alice");
        assert_eq!(sessions[0].end_time, Some(at(1, 30, 0)));
    }

    #[test]
    fn test_unmatched_login_stays_open() {
        let mut events = vec![
            event(EventType::Login, at(1, 0, 0), "alice", "5000"),
            event(EventType::Login, at(1, 5, 0), "bob", "5001"),
            event(EventType::Logout, at(1, 10, 0), "", "5001"),
        ];

        let sessions = events_to_sessions(&mut events);

        assert_eq!(sessions.len(), 2);
        assert!(sessions[0].is_open());
        assert_eq!(sessions[0].duration(), None);
        assert_eq!(sessions[1].duration(), Some(chrono::Duration::minutes(5)));
    }
}

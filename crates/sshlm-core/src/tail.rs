//! Follow a growing log file.
//!
//! Only complete lines are consumed. A trailing fragment without its newline
//! stays on disk until a later write finishes it, and the offset advances one
//! line at a time so a restart resumes after the last handled line.

use std::fs::File;
use std::future::Future;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::correlator::{apply, CorrelationState};
use crate::error::{MonitorError, Result};
use crate::parser::parse_line;
use crate::reader::read_events;
use crate::registry::{FingerprintLookup, PositionStore};
use crate::types::{Session, SessionEvent};

/// Byte offset into an append-only file.
pub(crate) struct AppendReader {
    path: PathBuf,
    file: File,
    offset: u64,
}

impl AppendReader {
    pub(crate) fn open_at_end(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let offset = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            file,
            offset,
        })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn offset(&self) -> u64 {
        self.offset
    }

    pub(crate) fn set_offset(&mut self, offset: u64) {
        self.offset = offset;
    }

    /// Hand each complete line appended since the last call to `handle`,
    /// along with the offset just past that line.
    pub(crate) fn read_complete_lines<F>(&mut self, mut handle: F) -> Result<()>
    where
        F: FnMut(&str, u64) -> Result<()>,
    {
        let len = self.file.metadata()?.len();
        if len < self.offset {
            tracing::warn!(
                path = %self.path.display(),
                offset = self.offset,
                len,
                "file shrank, reading from the start"
            );
            self.offset = 0;
        }
        if len == self.offset {
            return Ok(());
        }

        self.file.seek(SeekFrom::Start(self.offset))?;
        let mut buf = Vec::new();
        self.file.read_to_end(&mut buf)?;

        let mut start = 0;
        while let Some(pos) = buf[start..].iter().position(|&b| b == b'\n') {
            let end = start + pos;
            let raw = &buf[start..end];
            let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
            let line = String::from_utf8_lossy(raw);

            let next = self.offset + (end - start + 1) as u64;
            handle(&line, next)?;
            self.offset = next;
            start = end + 1;
        }

        Ok(())
    }
}

/// Watch `paths` and forward raw notifications into a channel.
pub(crate) fn watch_files(
    paths: &[&Path],
) -> Result<(RecommendedWatcher, mpsc::UnboundedReceiver<notify::Result<Event>>)> {
    let (tx, rx) = mpsc::unbounded_channel();

    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
        let _ = tx.send(res);
    })?;

    for path in paths {
        watcher.watch(path, RecursiveMode::NonRecursive)?;
    }

    Ok((watcher, rx))
}

pub(crate) fn is_write(event: &Event) -> bool {
    matches!(event.kind, EventKind::Modify(_) | EventKind::Any)
}

pub(crate) fn channel_closed() -> MonitorError {
    MonitorError::Watch(notify::Error::generic("watch channel closed"))
}

/// Parses and correlates lines appended to a log file.
pub struct Tailer<L> {
    lines: AppendReader,
    lookup: L,
    state: CorrelationState,
    positions: Option<Box<dyn PositionStore + Send + Sync>>,
}

impl<L: FingerprintLookup> Tailer<L> {
    /// Attach to `path`. Only lines written after this point are processed.
    pub fn attach(path: impl AsRef<Path>, lookup: L) -> Result<Self> {
        Ok(Self {
            lines: AppendReader::open_at_end(path.as_ref())?,
            lookup,
            state: CorrelationState::new(),
            positions: None,
        })
    }

    /// Persist the offset after every line and resume from a stored offset.
    ///
    /// A stored offset past the current end of file (the log was rotated) is
    /// ignored and tailing starts at the end.
    pub fn with_positions<P>(mut self, store: P) -> Result<Self>
    where
        P: PositionStore + Send + Sync + 'static,
    {
        let len = self.lines.offset();
        if let Some(saved) = store.load_position(self.lines.path())? {
            if saved <= len {
                tracing::info!(
                    path = %self.lines.path().display(),
                    offset = saved,
                    "resuming from saved position"
                );
                self.lines.set_offset(saved);
            } else {
                tracing::warn!(
                    path = %self.lines.path().display(),
                    saved,
                    len,
                    "saved position is past end of file, starting at end"
                );
            }
        }
        self.positions = Some(Box::new(store));
        Ok(self)
    }

    pub fn offset(&self) -> u64 {
        self.lines.offset()
    }

    pub fn state(&self) -> &CorrelationState {
        &self.state
    }

    /// Process whatever complete lines have been appended since the last scan.
    pub fn scan_appended(&mut self, sessions: &mut Vec<Session>) -> Result<Vec<SessionEvent>> {
        let mut events = Vec::new();
        self.scan_with(sessions, &mut |event: &SessionEvent| events.push(event.clone()))?;
        Ok(events)
    }

    /// Batch-read the file up to the current offset, correlating into the
    /// tailer's own state so later logouts pair with these logins.
    ///
    /// Like a batch read, a malformed login or logout line is an error.
    pub fn replay_history(&mut self, sessions: &mut Vec<Session>) -> Result<Vec<SessionEvent>> {
        let file = File::open(self.lines.path())?;
        let history = BufReader::new(file).take(self.lines.offset());

        let events = read_events(history, &self.lookup)?;
        Ok(events
            .into_iter()
            .map(|event| apply(event, &mut self.state, sessions))
            .collect())
    }

    fn scan_with(
        &mut self,
        sessions: &mut Vec<Session>,
        on_event: &mut dyn FnMut(&SessionEvent),
    ) -> Result<()> {
        let path = self.lines.path().to_path_buf();
        let lookup = &self.lookup;
        let state = &mut self.state;
        let positions = &self.positions;

        self.lines.read_complete_lines(|line, next_offset| {
            match parse_line(line, lookup) {
                Ok(Some(event)) => {
                    let event = apply(event, state, sessions);
                    on_event(&event);
                }
                Ok(None) => {}
                Err(MonitorError::InvalidEvent { line }) => {
                    tracing::warn!("skipping malformed line: {}", line);
                }
                Err(e) => return Err(e),
            }

            if let Some(store) = positions {
                store.save_position(&path, next_offset)?;
            }
            Ok(())
        })
    }

    /// Follow the file until `cancel` resolves.
    ///
    /// Every event is correlated into `sessions` and then passed to
    /// `on_event`. Watcher failures end the loop with an error.
    pub async fn run<C, F>(&mut self, sessions: &mut Vec<Session>, cancel: C, mut on_event: F) -> Result<()>
    where
        C: Future<Output = ()>,
        F: FnMut(&SessionEvent),
    {
        let path = self.lines.path().to_path_buf();
        let (_watcher, mut rx) = watch_files(&[path.as_path()])?;
        tokio::pin!(cancel);

        tracing::info!(path = %path.display(), offset = self.offset(), "tailing log file");

        // Pick up anything written between attach and the watch being armed.
        self.scan_with(sessions, &mut on_event)?;

        loop {
            tokio::select! {
                _ = &mut cancel => {
                    tracing::info!(path = %path.display(), "stopped tailing");
                    return Ok(());
                }
                received = rx.recv() => match received {
                    Some(Ok(event)) => {
                        if is_write(&event) {
                            self.scan_with(sessions, &mut on_event)?;
                        }
                    }
                    Some(Err(e)) => return Err(e.into()),
                    None => return Err(channel_closed()),
                },
            }
        }
    }
}

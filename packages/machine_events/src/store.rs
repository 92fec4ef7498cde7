//! Shared append-only event and log store.
//!
//! One [`EventStore`] is created per process and handed to every listener and
//! view. It holds two streams:
//!
//! - structured events keyed by correlation id, in insertion order;
//! - log lines keyed by machine id, kept as one timestamp-ordered sequence per
//!   machine so the per-machine view never needs a full scan or a re-sort.
//!
//! Every append is announced on a broadcast channel so views can redraw.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::broadcast;

use crate::frame::InboundFrame;

const CHANGE_CHANNEL_CAPACITY: usize = 1024;

/// A structured event, identified by `(id, timestamp)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Correlation id (`data.prompt_id`).
    pub id: String,
    /// Machine whose listener received the frame.
    pub machine_id: String,
    pub timestamp: DateTime<Utc>,
    pub json: InboundFrame,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    pub machine_id: String,
    pub logs: String,
    pub timestamp: DateTime<Utc>,
}

/// Notification sent after every append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreChange {
    /// A log line was appended; `len` is the machine's log length afterwards.
    Log { machine_id: String, len: usize },
    Event { correlation_id: String },
}

/// Per-stream size caps. Zero means unbounded; a cap drops the oldest records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Retention {
    pub max_events: usize,
    pub max_log_lines_per_machine: usize,
}

impl Retention {
    pub fn unbounded() -> Self {
        Self::default()
    }
}

struct LogEntry {
    seq: u64,
    line: LogLine,
}

#[derive(Default)]
struct Inner {
    events: VecDeque<EventRecord>,
    logs: HashMap<String, VecDeque<LogEntry>>,
    next_log_seq: u64,
}

/// Cheaply clonable handle to the shared store.
#[derive(Clone)]
pub struct EventStore {
    inner: Arc<RwLock<Inner>>,
    changes: broadcast::Sender<StoreChange>,
    retention: Retention,
}

impl Default for EventStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EventStore {
    pub fn new() -> Self {
        Self::with_retention(Retention::unbounded())
    }

    pub fn with_retention(retention: Retention) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(RwLock::new(Inner::default())),
            changes,
            retention,
        }
    }

    pub fn retention(&self) -> Retention {
        self.retention
    }

    /// Subscribe to append notifications. A subscriber that falls behind
    /// receives `Lagged` and should re-read the store.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }

    // A panic while holding the lock cannot leave a half-applied append
    // visible, so poisoning is ignored.
    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, change: StoreChange) {
        // No subscribers is fine
        let _ = self.changes.send(change);
    }

    // =========================================================================
    // Appends
    // =========================================================================

    /// Append a structured event stamped with the current time.
    pub fn append_event(
        &self,
        machine_id: &str,
        correlation_id: &str,
        json: InboundFrame,
    ) -> DateTime<Utc> {
        self.insert_event(machine_id, correlation_id, json, None)
    }

    /// Append a structured event with an explicit timestamp.
    pub fn append_event_at(
        &self,
        machine_id: &str,
        correlation_id: &str,
        json: InboundFrame,
        timestamp: DateTime<Utc>,
    ) {
        self.insert_event(machine_id, correlation_id, json, Some(timestamp));
    }

    fn insert_event(
        &self,
        machine_id: &str,
        correlation_id: &str,
        json: InboundFrame,
        timestamp: Option<DateTime<Utc>>,
    ) -> DateTime<Utc> {
        let timestamp = {
            let mut inner = self.write();
            let timestamp = timestamp.unwrap_or_else(Utc::now);
            inner.events.push_back(EventRecord {
                id: correlation_id.to_string(),
                machine_id: machine_id.to_string(),
                timestamp,
                json,
            });
            let cap = self.retention.max_events;
            while cap > 0 && inner.events.len() > cap {
                inner.events.pop_front();
            }
            timestamp
        };
        self.notify(StoreChange::Event {
            correlation_id: correlation_id.to_string(),
        });
        timestamp
    }

    /// Append a log line for a machine stamped with the current time.
    pub fn append_log(&self, machine_id: &str, line: impl Into<String>) -> DateTime<Utc> {
        self.insert_log(machine_id, line.into(), None)
    }

    /// Append a log line with an explicit timestamp. Lines with equal
    /// timestamps keep their insertion order.
    pub fn append_log_at(&self, machine_id: &str, line: impl Into<String>, timestamp: DateTime<Utc>) {
        self.insert_log(machine_id, line.into(), Some(timestamp));
    }

    fn insert_log(
        &self,
        machine_id: &str,
        logs: String,
        timestamp: Option<DateTime<Utc>>,
    ) -> DateTime<Utc> {
        let (timestamp, len) = {
            let mut inner = self.write();
            let timestamp = timestamp.unwrap_or_else(Utc::now);
            let seq = inner.next_log_seq;
            inner.next_log_seq += 1;

            let lines = inner.logs.entry(machine_id.to_string()).or_default();
            // Insert after every entry with an equal or earlier timestamp.
            // In-order arrivals land at the back.
            let pos = lines.partition_point(|e| e.line.timestamp <= timestamp);
            lines.insert(
                pos,
                LogEntry {
                    seq,
                    line: LogLine {
                        machine_id: machine_id.to_string(),
                        logs,
                        timestamp,
                    },
                },
            );
            let cap = self.retention.max_log_lines_per_machine;
            while cap > 0 && lines.len() > cap {
                lines.pop_front();
            }
            (timestamp, lines.len())
        };
        self.notify(StoreChange::Log {
            machine_id: machine_id.to_string(),
            len,
        });
        timestamp
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// All structured events in insertion order.
    pub fn events(&self) -> Vec<EventRecord> {
        self.read().events.iter().cloned().collect()
    }

    pub fn events_for(&self, correlation_id: &str) -> Vec<EventRecord> {
        self.read()
            .events
            .iter()
            .filter(|e| e.id == correlation_id)
            .cloned()
            .collect()
    }

    pub fn event_count(&self) -> usize {
        self.read().events.len()
    }

    /// All log lines across machines, in insertion order.
    pub fn logs(&self) -> Vec<LogLine> {
        let inner = self.read();
        let mut entries: Vec<&LogEntry> = inner.logs.values().flatten().collect();
        entries.sort_by_key(|e| e.seq);
        entries.into_iter().map(|e| e.line.clone()).collect()
    }

    /// A machine's log lines, ascending by timestamp.
    pub fn logs_for(&self, machine_id: &str) -> Vec<LogLine> {
        self.read()
            .logs
            .get(machine_id)
            .map(|lines| lines.iter().map(|e| e.line.clone()).collect())
            .unwrap_or_default()
    }

    /// A slice of a machine's ordered log view, for viewports that only
    /// render what fits on screen.
    pub fn log_window(&self, machine_id: &str, offset: usize, limit: usize) -> Vec<LogLine> {
        self.read()
            .logs
            .get(machine_id)
            .map(|lines| {
                lines
                    .iter()
                    .skip(offset)
                    .take(limit)
                    .map(|e| e.line.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Lines appended to a machine's log since `cursor`, in view order, plus
    /// the cursor to pass next time. Start from 0 to read everything.
    pub fn logs_since(&self, machine_id: &str, cursor: u64) -> (Vec<LogLine>, u64) {
        let inner = self.read();
        let lines = inner
            .logs
            .get(machine_id)
            .map(|lines| {
                lines
                    .iter()
                    .filter(|e| e.seq >= cursor)
                    .map(|e| e.line.clone())
                    .collect()
            })
            .unwrap_or_default();
        (lines, inner.next_log_seq)
    }

    pub fn log_len(&self, machine_id: &str) -> usize {
        self.read().logs.get(machine_id).map_or(0, VecDeque::len)
    }

    /// Machines that have produced at least one log line, sorted.
    pub fn machine_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.read().logs.keys().cloned().collect();
        ids.sort();
        ids
    }
}

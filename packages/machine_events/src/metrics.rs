//! Ingestion metrics
//!
//! Counters shared by every listener and transport of a monitor.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

#[derive(Debug, Default)]
pub struct IngestMetrics {
    // Frame metrics
    /// Text frames handed to listeners
    pub frames_received: AtomicU64,
    /// Frames dropped because they failed to decode
    pub frames_malformed: AtomicU64,
    /// Well-formed frames with no recognised effect
    pub frames_ignored: AtomicU64,

    // Store metrics
    /// Log lines appended to the store
    pub logs_appended: AtomicU64,
    /// Structured events appended to the store
    pub events_appended: AtomicU64,

    // Connection metrics
    /// Connection attempts, including the first one per listener
    pub connection_attempts: AtomicU64,
    /// Connections that reached the open state
    pub connections_opened: AtomicU64,
    /// Listeners whose retry budget ran out
    pub connections_failed: AtomicU64,

    start_time: Option<Instant>,
}

impl IngestMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    pub fn frame_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_malformed(&self) {
        self.frames_malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_ignored(&self) {
        self.frames_ignored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn log_appended(&self) {
        self.logs_appended.fetch_add(1, Ordering::Relaxed);
    }

    pub fn event_appended(&self) {
        self.events_appended.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_attempt(&self) {
        self.connection_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_opened(&self) {
        self.connections_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_failed(&self) {
        self.connections_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.map(|t| t.elapsed().as_secs()).unwrap_or(0)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.uptime_secs(),
            frames: FrameMetrics {
                received: self.frames_received.load(Ordering::Relaxed),
                malformed: self.frames_malformed.load(Ordering::Relaxed),
                ignored: self.frames_ignored.load(Ordering::Relaxed),
            },
            store: StoreMetrics {
                logs_appended: self.logs_appended.load(Ordering::Relaxed),
                events_appended: self.events_appended.load(Ordering::Relaxed),
            },
            connections: ConnectionMetrics {
                attempts: self.connection_attempts.load(Ordering::Relaxed),
                opened: self.connections_opened.load(Ordering::Relaxed),
                failed: self.connections_failed.load(Ordering::Relaxed),
            },
        }
    }
}

/// Serializable snapshot of metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub frames: FrameMetrics,
    pub store: StoreMetrics,
    pub connections: ConnectionMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameMetrics {
    pub received: u64,
    pub malformed: u64,
    pub ignored: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreMetrics {
    pub logs_appended: u64,
    pub events_appended: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionMetrics {
    pub attempts: u64,
    pub opened: u64,
    pub failed: u64,
}

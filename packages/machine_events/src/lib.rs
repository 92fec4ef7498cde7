//! # Machine Events
//!
//! Client-side ingestion of machine event streams.
//!
//! ## Overview
//!
//! Every watched machine exposes a websocket endpoint that pushes JSON frames
//! of the shape `{ "event": "...", "data": { ... } }`. This library provides:
//! - Endpoint derivation from a machine's HTTP endpoint to its event socket
//! - Frame decoding that never lets a malformed frame kill a listener
//! - A shared, append-only [`EventStore`] with per-machine ordered log views
//! - A [`Transport`] abstraction and a websocket implementation with a
//!   fixed-interval, bounded reconnect policy
//! - Per-machine [`Listener`] tasks with explicit disposal
//! - A [`MachineMonitor`] that owns a fleet of listeners
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use machine_events::{MachineDescriptor, MachineMonitor, MonitorOptions, WebSocketTransport};
//!
//! # async fn run() -> Result<(), machine_events::MonitorError> {
//! let transport = Arc::new(WebSocketTransport::default());
//! let monitor = MachineMonitor::new(transport, MonitorOptions::default());
//!
//! monitor.start(vec![MachineDescriptor::new(
//!     "m1",
//!     "Render box",
//!     "https://render.example.com",
//! )])?;
//!
//! let mut changes = monitor.store().subscribe();
//! while let Ok(change) = changes.recv().await {
//!     println!("{:?}", change);
//! }
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod frame;
pub mod listener;
pub mod machine;
pub mod metrics;
pub mod monitor;
pub mod store;
pub mod transport;

pub use error::{EndpointError, MalformedFrame, MonitorError};
pub use frame::{DecodeResult, FrameEffects, InboundFrame, LOG_EVENT, decode};
pub use listener::{Listener, ListenerHandle};
pub use machine::{DEFAULT_EVENTS_PATH, MachineDescriptor, events_url};
pub use metrics::{IngestMetrics, MetricsSnapshot};
pub use monitor::{MachineMonitor, MachineStatus, MonitorOptions};
pub use store::{EventRecord, EventStore, LogLine, Retention, StoreChange};
pub use transport::{
    ChannelTransport, ConnectionState, ReconnectPolicy, Transport, TransportEvent,
    TransportEvents, WebSocketTransport,
};

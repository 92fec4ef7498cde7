//! Per-machine listener.
//!
//! A listener consumes one machine's [`TransportEvents`], decodes each frame
//! and appends the results to the shared [`EventStore`]. It runs as a single
//! task, so frames from one machine are applied strictly in arrival order.

use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::error::EndpointError;
use crate::frame::{InboundFrame, decode};
use crate::machine::MachineDescriptor;
use crate::metrics::IngestMetrics;
use crate::store::EventStore;
use crate::transport::{ConnectionState, Transport, TransportEvent, TransportEvents};

pub struct Listener {
    machine: MachineDescriptor,
    store: EventStore,
    metrics: Arc<IngestMetrics>,
    state: watch::Sender<ConnectionState>,
    session_id: watch::Sender<Option<String>>,
}

impl Listener {
    /// Open the machine's event connection through `transport` and start
    /// listening on it.
    pub fn connect(
        machine: MachineDescriptor,
        transport: &dyn Transport,
        events_path: &str,
        store: EventStore,
        metrics: Arc<IngestMetrics>,
    ) -> Result<ListenerHandle, EndpointError> {
        let url = machine.events_url(events_path)?;
        let cancel = CancellationToken::new();
        debug!(machine = %machine.id, url = %url, "connecting listener");
        let events = transport.connect(&url, cancel.clone());
        Ok(Self::spawn(machine, events, store, metrics, cancel))
    }

    /// Start listening on an already-open event stream. Cancelling `cancel`
    /// (or disposing the handle) stops the listener; the same token should
    /// have been given to the transport so the connection closes with it.
    pub fn spawn(
        machine: MachineDescriptor,
        events: TransportEvents,
        store: EventStore,
        metrics: Arc<IngestMetrics>,
        cancel: CancellationToken,
    ) -> ListenerHandle {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Uninstantiated);
        let (session_tx, session_rx) = watch::channel(None);

        let listener = Listener {
            machine: machine.clone(),
            store,
            metrics,
            state: state_tx,
            session_id: session_tx,
        };
        let task = tokio::spawn(listener.run(events, cancel.clone()));

        ListenerHandle {
            machine,
            cancel,
            task: Some(task),
            state: state_rx,
            session_id: session_rx,
        }
    }

    async fn run(self, mut events: TransportEvents, cancel: CancellationToken) {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => self.handle(event),
                    None => break,
                },
            }
        }
        debug!(machine = %self.machine.id, "listener stopped");
    }

    fn handle(&self, event: TransportEvent) {
        match event {
            TransportEvent::State(state) => self.on_state(state),
            TransportEvent::Frame(raw) => self.on_frame(&raw),
        }
    }

    fn on_state(&self, state: ConnectionState) {
        match state {
            ConnectionState::Connecting => {
                self.metrics.connection_attempt();
                // A new connection gets a new session id from the remote side.
                self.session_id.send_replace(None);
            }
            ConnectionState::Open => {
                self.metrics.connection_opened();
                info!(machine = %self.machine.id, "machine connected");
            }
            ConnectionState::Failed => {
                self.metrics.connection_failed();
                warn!(machine = %self.machine.id, "machine disconnected permanently");
            }
            _ => {}
        }
        self.state.send_replace(state);
    }

    fn on_frame(&self, raw: &str) {
        self.metrics.frame_received();
        match decode(raw) {
            Ok(frame) => self.apply(frame),
            Err(e) => {
                self.metrics.frame_malformed();
                warn!(
                    machine = %self.machine.id,
                    error = %e,
                    len = raw.len(),
                    "dropping malformed frame"
                );
            }
        }
    }

    fn apply(&self, frame: InboundFrame) {
        let effects = frame.effects();
        if effects.is_empty() {
            self.metrics.frame_ignored();
            trace!(machine = %self.machine.id, event = %frame.event, "ignoring frame");
            return;
        }

        if let Some(sid) = effects.session_id {
            debug!(machine = %self.machine.id, sid, "session id issued");
            self.session_id.send_replace(Some(sid.to_string()));
        }

        if let Some(correlation_id) = effects.correlation_id {
            self.store
                .append_event(&self.machine.id, correlation_id, frame.clone());
            self.metrics.event_appended();
        }

        if let Some(line) = effects.log_line {
            self.store.append_log(&self.machine.id, line);
            self.metrics.log_appended();
        }
    }
}

/// Owner's handle to a running listener.
///
/// Dropping the handle cancels the listener; [`ListenerHandle::dispose`] also
/// waits until it has stopped.
pub struct ListenerHandle {
    machine: MachineDescriptor,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    state: watch::Receiver<ConnectionState>,
    session_id: watch::Receiver<Option<String>>,
}

impl ListenerHandle {
    pub fn machine(&self) -> &MachineDescriptor {
        &self.machine
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch the connection state, e.g. to redraw a status badge.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Session id from the current connection, if the remote side sent one.
    pub fn session_id(&self) -> Option<String> {
        self.session_id.borrow().clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Close the connection and wait for the listener to stop. Once this
    /// returns the listener will not touch the store again.
    pub async fn dispose(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(machine = %self.machine.id, error = %e, "listener task ended abnormally");
            }
        }
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ChannelTransport;
    use std::sync::atomic::Ordering;
    use tokio::sync::mpsc;

    fn machine(id: &str) -> MachineDescriptor {
        MachineDescriptor::new(id, format!("{} box", id), format!("http://{}.local", id))
    }

    /// Wait until the listener has drained everything sent so far.
    async fn settle(tx: &mpsc::Sender<TransportEvent>) {
        for _ in 0..100 {
            if tx.capacity() == tx.max_capacity() {
                tokio::task::yield_now().await;
                return;
            }
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn state_changes_are_published() {
        let (tx, rx) = mpsc::channel(16);
        let handle = Listener::spawn(
            machine("m1"),
            rx,
            EventStore::new(),
            Arc::new(IngestMetrics::new()),
            CancellationToken::new(),
        );
        assert_eq!(handle.state(), ConnectionState::Uninstantiated);

        let mut state = handle.subscribe_state();
        tx.send(TransportEvent::State(ConnectionState::Open))
            .await
            .unwrap();
        state.changed().await.unwrap();
        assert_eq!(*state.borrow(), ConnectionState::Open);

        handle.dispose().await;
    }

    #[tokio::test]
    async fn session_id_is_captured_and_reset_on_reconnect() {
        let (tx, rx) = mpsc::channel(16);
        let store = EventStore::new();
        let handle = Listener::spawn(
            machine("m1"),
            rx,
            store.clone(),
            Arc::new(IngestMetrics::new()),
            CancellationToken::new(),
        );

        tx.send(TransportEvent::Frame(
            r#"{"event":"status","data":{"sid":"abc123"}}"#.into(),
        ))
        .await
        .unwrap();
        settle(&tx).await;
        assert_eq!(handle.session_id().as_deref(), Some("abc123"));
        // A status frame is not stored
        assert_eq!(store.event_count(), 0);
        assert_eq!(store.log_len("m1"), 0);

        tx.send(TransportEvent::State(ConnectionState::Connecting))
            .await
            .unwrap();
        settle(&tx).await;
        assert_eq!(handle.session_id(), None);

        handle.dispose().await;
    }

    #[tokio::test]
    async fn failed_connection_is_counted() {
        let (tx, rx) = mpsc::channel(16);
        let metrics = Arc::new(IngestMetrics::new());
        let handle = Listener::spawn(
            machine("m1"),
            rx,
            EventStore::new(),
            metrics.clone(),
            CancellationToken::new(),
        );

        for state in [
            ConnectionState::Connecting,
            ConnectionState::Closed,
            ConnectionState::Failed,
        ] {
            tx.send(TransportEvent::State(state)).await.unwrap();
        }
        drop(tx);
        // Transport gone: the listener stops on its own
        for _ in 0..100 {
            if handle.is_finished() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(handle.is_finished());
        assert_eq!(handle.state(), ConnectionState::Failed);
        assert_eq!(metrics.connection_attempts.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.connections_failed.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn connect_derives_the_event_url() {
        let transport = ChannelTransport::new();
        let handle = Listener::connect(
            machine("m1"),
            &transport,
            "comfyui-deploy/ws",
            EventStore::new(),
            Arc::new(IngestMetrics::new()),
        )
        .unwrap();
        assert_eq!(
            transport.connected_urls(),
            ["ws://m1.local/comfyui-deploy/ws"]
        );
        handle.dispose().await;
    }

    #[tokio::test]
    async fn connect_rejects_bad_endpoint() {
        let transport = ChannelTransport::new();
        let result = Listener::connect(
            MachineDescriptor::new("m1", "m1", "m1.local"),
            &transport,
            "ws",
            EventStore::new(),
            Arc::new(IngestMetrics::new()),
        );
        assert!(matches!(result, Err(EndpointError::UnsupportedScheme(_))));
        assert!(transport.connected_urls().is_empty());
    }
}

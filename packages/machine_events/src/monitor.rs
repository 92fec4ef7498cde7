//! MachineMonitor: one listener per watched machine, one shared store.

use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::info;

use crate::error::MonitorError;
use crate::listener::{Listener, ListenerHandle};
use crate::machine::{DEFAULT_EVENTS_PATH, MachineDescriptor};
use crate::metrics::IngestMetrics;
use crate::store::{EventStore, Retention};
use crate::transport::{ConnectionState, Transport};

#[derive(Debug, Clone)]
pub struct MonitorOptions {
    /// Path appended to each machine endpoint.
    pub events_path: String,
    pub retention: Retention,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            events_path: DEFAULT_EVENTS_PATH.to_string(),
            retention: Retention::unbounded(),
        }
    }
}

/// Point-in-time view of one watched machine.
#[derive(Debug, Clone, Serialize)]
pub struct MachineStatus {
    pub machine: MachineDescriptor,
    pub state: ConnectionState,
    pub session_id: Option<String>,
}

pub struct MachineMonitor {
    transport: Arc<dyn Transport>,
    store: EventStore,
    metrics: Arc<IngestMetrics>,
    events_path: String,
    /// Kept in the order machines were added.
    listeners: Mutex<Vec<ListenerHandle>>,
}

impl MachineMonitor {
    pub fn new(transport: Arc<dyn Transport>, options: MonitorOptions) -> Self {
        Self {
            transport,
            store: EventStore::with_retention(options.retention),
            metrics: Arc::new(IngestMetrics::new()),
            events_path: options.events_path,
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn store(&self) -> &EventStore {
        &self.store
    }

    pub fn metrics(&self) -> &Arc<IngestMetrics> {
        &self.metrics
    }

    fn listeners(&self) -> MutexGuard<'_, Vec<ListenerHandle>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Watch a whole inventory. Every descriptor is validated before any
    /// connection is opened, so a bad entry leaves the monitor unchanged.
    /// Must be called from within a tokio runtime.
    pub fn start(&self, machines: Vec<MachineDescriptor>) -> Result<(), MonitorError> {
        let mut seen: HashSet<String> = self
            .listeners()
            .iter()
            .map(|l| l.machine().id.clone())
            .collect();
        for machine in &machines {
            if !seen.insert(machine.id.clone()) {
                return Err(MonitorError::DuplicateMachine(machine.id.clone()));
            }
            machine
                .events_url(&self.events_path)
                .map_err(|source| MonitorError::Endpoint {
                    machine: machine.id.clone(),
                    source,
                })?;
        }

        info!(count = machines.len(), "watching machines");
        for machine in machines {
            self.watch(machine)?;
        }
        Ok(())
    }

    /// Start a listener for one machine. Must be called from within a tokio
    /// runtime.
    pub fn watch(&self, machine: MachineDescriptor) -> Result<(), MonitorError> {
        let mut listeners = self.listeners();
        if listeners.iter().any(|l| l.machine().id == machine.id) {
            return Err(MonitorError::DuplicateMachine(machine.id));
        }

        let id = machine.id.clone();
        let handle = Listener::connect(
            machine,
            self.transport.as_ref(),
            &self.events_path,
            self.store.clone(),
            self.metrics.clone(),
        )
        .map_err(|source| MonitorError::Endpoint {
            machine: id,
            source,
        })?;
        listeners.push(handle);
        Ok(())
    }

    /// Stop watching a machine. Its records stay in the store.
    pub async fn unwatch(&self, machine_id: &str) -> Result<(), MonitorError> {
        let handle = {
            let mut listeners = self.listeners();
            let pos = listeners
                .iter()
                .position(|l| l.machine().id == machine_id)
                .ok_or_else(|| MonitorError::UnknownMachine(machine_id.to_string()))?;
            listeners.remove(pos)
        };
        handle.dispose().await;
        info!(machine = %machine_id, "stopped watching machine");
        Ok(())
    }

    pub fn machines(&self) -> Vec<MachineDescriptor> {
        self.listeners()
            .iter()
            .map(|l| l.machine().clone())
            .collect()
    }

    pub fn statuses(&self) -> Vec<MachineStatus> {
        self.listeners()
            .iter()
            .map(|l| MachineStatus {
                machine: l.machine().clone(),
                state: l.state(),
                session_id: l.session_id(),
            })
            .collect()
    }

    pub fn state_of(&self, machine_id: &str) -> Option<ConnectionState> {
        self.listeners()
            .iter()
            .find(|l| l.machine().id == machine_id)
            .map(ListenerHandle::state)
    }

    pub fn subscribe_state(&self, machine_id: &str) -> Option<watch::Receiver<ConnectionState>> {
        self.listeners()
            .iter()
            .find(|l| l.machine().id == machine_id)
            .map(ListenerHandle::subscribe_state)
    }

    /// Dispose every listener and wait for them to stop.
    pub async fn shutdown(&self) {
        let handles = std::mem::take(&mut *self.listeners());
        let count = handles.len();
        futures::future::join_all(handles.into_iter().map(ListenerHandle::dispose)).await;
        info!(count, "all listeners stopped");
    }
}

pub mod badge;
pub mod dashboard;
pub mod log_view;

use anyhow::{Context, Result, bail};
use machine_events::{
    EventStore, MachineDescriptor, MachineMonitor, StoreChange, WebSocketTransport,
};
use std::io::{IsTerminal, Write};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::config::MonitorConfig;

fn build_monitor(config: &MonitorConfig) -> MachineMonitor {
    let transport = Arc::new(WebSocketTransport::new(config.reconnect));
    MachineMonitor::new(transport, config.options.clone())
}

/// Find a configured machine by id or display name.
fn find_machine<'a>(config: &'a MonitorConfig, target: &str) -> Result<&'a MachineDescriptor> {
    config
        .machines
        .iter()
        .find(|m| m.id == target)
        .or_else(|| config.machines.iter().find(|m| m.name == target))
        .with_context(|| format!("No configured machine matches {:?}", target))
}

/// Default command: watch every configured machine in the dashboard.
pub async fn watch_command(config: MonitorConfig) -> Result<()> {
    if config.machines.is_empty() {
        bail!("No machines configured; add [[machines]] entries to the config file");
    }
    if !std::io::stdout().is_terminal() {
        bail!("The dashboard needs a terminal; use `tail <machine>` instead");
    }

    let monitor = Arc::new(build_monitor(&config));
    monitor.start(config.machines.clone())?;

    let ui_monitor = monitor.clone();
    let result = tokio::task::spawn_blocking(move || {
        let mut terminal = ratatui::init();
        let result = dashboard::run_dashboard(&mut terminal, &ui_monitor);
        ratatui::restore();
        result
    })
    .await
    .context("Dashboard thread panicked")?;

    monitor.shutdown().await;
    result
}

/// Stream one machine's log lines to stdout until Ctrl-C or until its
/// connection is given up.
pub async fn tail_command(config: MonitorConfig, target: &str) -> Result<()> {
    let machine = find_machine(&config, target)?.clone();
    let monitor = build_monitor(&config);
    let mut stdout = std::io::stdout();
    let stop = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    let result = tail_machine(&monitor, machine, &mut stdout, stop).await;
    monitor.shutdown().await;
    result
}

/// Watch `machine` and write its log lines to `out` as they are stored.
/// Returns once `stop` resolves, the connection fails for good, or the
/// listener goes away. Lines stored before that point are always written.
async fn tail_machine<W: Write>(
    monitor: &MachineMonitor,
    machine: MachineDescriptor,
    out: &mut W,
    stop: impl Future<Output = ()>,
) -> Result<()> {
    let store = monitor.store().clone();
    let mut changes = store.subscribe();
    monitor.watch(machine.clone())?;
    let mut state_rx = monitor
        .subscribe_state(&machine.id)
        .context("Listener vanished right after starting")?;

    tokio::pin!(stop);
    let mut cursor = 0u64;
    loop {
        tokio::select! {
            biased;
            _ = &mut stop => break,
            change = changes.recv() => match change {
                Ok(StoreChange::Log { machine_id, .. }) if machine_id == machine.id => {
                    cursor = write_new_lines(&store, &machine.id, cursor, out)?;
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "tail fell behind store notifications");
                    cursor = write_new_lines(&store, &machine.id, cursor, out)?;
                }
                Err(RecvError::Closed) => break,
            },
            changed = state_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *state_rx.borrow_and_update();
                eprintln!("[{}: {}]", machine.name, state.label());
                if state.is_terminal() {
                    break;
                }
            }
        }
    }

    write_new_lines(&store, &machine.id, cursor, out)?;
    Ok(())
}

fn write_new_lines<W: Write>(
    store: &EventStore,
    machine_id: &str,
    cursor: u64,
    out: &mut W,
) -> Result<u64> {
    let (lines, next) = store.logs_since(machine_id, cursor);
    for line in lines {
        let text = line.logs.strip_suffix('\n').unwrap_or(&line.logs);
        writeln!(out, "{}", text)?;
    }
    out.flush()?;
    Ok(next)
}

/// Print the configured machines and the event URL each one resolves to.
pub fn list_command(config: &MonitorConfig, json: bool) -> Result<()> {
    if json {
        let entries: Vec<serde_json::Value> = config
            .machines
            .iter()
            .map(|m| {
                serde_json::json!({
                    "id": m.id,
                    "name": m.name,
                    "endpoint": m.endpoint,
                    "events_url": m.events_url(&config.options.events_path).ok(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if config.machines.is_empty() {
        eprintln!("No machines configured.");
        return Ok(());
    }
    for m in &config.machines {
        match m.events_url(&config.options.events_path) {
            Ok(url) => println!("{:<16} {:<24} {}", m.id, m.name, url),
            Err(e) => {
                warn!(machine = %m.id, error = %e, "machine has an invalid endpoint");
                println!("{:<16} {:<24} (invalid endpoint: {})", m.id, m.name, e);
            }
        }
    }
    Ok(())
}

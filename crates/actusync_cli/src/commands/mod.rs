//! CLI command implementations.

pub mod simulate;
pub mod status;
pub mod sync;

use actusync_engine::{
    RetryConfig, SimulatedConnection, SimulatedSensor, SyncConfig, SyncManager, SyncState,
};
use actusync_protocol::ActuationEvent;
use actusync_storage::{EventStore, OffsetStore};
use chrono::{Duration, Utc};
use clap::Args;
use serde::Serialize;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::info;

/// Simulated device and sync options shared by `simulate` and `sync`.
#[derive(Debug, Clone, Args)]
pub struct DeviceArgs {
    /// Number of events stored on the simulated device
    #[arg(short, long, default_value = "25")]
    pub events: usize,

    /// Identifier of the simulated device
    #[arg(long, default_value = "sim-0001")]
    pub device_id: String,

    /// Events requested per page
    #[arg(long, default_value = "10")]
    pub page_size: u32,

    /// Attempts before giving up
    #[arg(long, default_value = "5")]
    pub max_attempts: u32,

    /// Fail the page read with this number (1-based), once
    #[arg(long)]
    pub fail_read: Option<u64>,

    /// Fail every page read
    #[arg(long)]
    pub fail_every_read: bool,

    /// Make page reads from this number (1-based) on hang until they time out
    #[arg(long)]
    pub stall_read: Option<u64>,

    /// Fail the first acknowledgment
    #[arg(long)]
    pub fail_ack: bool,

    /// Output format (text, json)
    #[arg(short, long, default_value = "text")]
    pub format: String,
}

impl DeviceArgs {
    /// Builds an unbonded simulated sensor holding the requested events and faults.
    pub fn sensor(&self) -> Arc<SimulatedSensor> {
        let device = Arc::new(SimulatedConnection::new());
        device.set_events(generate_events(&self.device_id, self.events));

        if let Some(number) = self.fail_read {
            device.fail_on_read(number);
        }
        if self.fail_every_read {
            device.fail_every_read();
        }
        if let Some(number) = self.stall_read {
            device.stall_from_read(number);
        }
        if self.fail_ack {
            device.fail_next_ack();
        }

        Arc::new(SimulatedSensor::new(device))
    }

    /// Builds the sync configuration.
    pub fn config(&self) -> SyncConfig {
        SyncConfig::new(self.device_id.clone())
            .with_page_size(self.page_size)
            .with_retry(RetryConfig::new(self.max_attempts))
    }
}

/// One event per minute, ending now. Ids are stable across invocations.
fn generate_events(device_id: &str, count: usize) -> Vec<ActuationEvent> {
    let now = Utc::now();
    (0..count)
        .map(|i| {
            let age = Duration::minutes((count - i) as i64);
            ActuationEvent::single(format!("{device_id}-{i:06}"), now - age, device_id)
        })
        .collect()
}

/// Outcome of one sync run.
#[derive(Debug, Serialize)]
pub struct SyncReport {
    /// Device identifier.
    pub device_id: String,
    /// Final state name.
    pub state: &'static str,
    /// Whether a failed run is worth retrying.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
    /// Error of a failed run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Observed state names, in order.
    pub transitions: Vec<&'static str>,
    /// Attempts made.
    pub attempts: u64,
    /// Retries made.
    pub retries: u64,
    /// Pages acknowledged.
    pub pages: u64,
    /// Events newly stored.
    pub events_persisted: u64,
    /// Stored cursor after the run.
    pub offset: u64,
    /// Events in local storage after the run.
    pub stored_events: usize,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u128,
}

impl SyncReport {
    /// Returns true if the run completed.
    pub fn is_completed(&self) -> bool {
        self.state == SyncState::Completed.name()
    }
}

/// Runs one sync to its terminal state, recording transitions.
pub async fn drive<E, O>(
    args: &DeviceArgs,
    events: Arc<E>,
    offsets: Arc<O>,
) -> Result<SyncReport, Box<dyn std::error::Error>>
where
    E: EventStore + 'static,
    O: OffsetStore + 'static,
{
    let manager = SyncManager::new(
        Handle::current(),
        args.config(),
        args.sensor(),
        Arc::clone(&events),
        Arc::clone(&offsets),
    )?;

    let mut rx = manager.subscribe();
    manager.start_sync();

    let mut transitions: Vec<&'static str> = Vec::new();
    let final_state = loop {
        let state = rx.borrow_and_update().clone();
        if transitions.last() != Some(&state.name()) {
            info!(state = state.name(), "sync state");
            transitions.push(state.name());
        }
        if state.is_terminal() {
            break state;
        }
        if rx.changed().await.is_err() {
            break manager.state();
        }
    };

    let stats = manager.stats();
    let (retryable, error) = match &final_state {
        SyncState::Failed { error, retryable } => (Some(*retryable), Some(error.to_string())),
        _ => (None, None),
    };

    Ok(SyncReport {
        device_id: args.device_id.clone(),
        state: final_state.name(),
        retryable,
        error,
        transitions,
        attempts: stats.attempts,
        retries: stats.retries,
        pages: stats.pages,
        events_persisted: stats.events_persisted,
        offset: offsets.read()?,
        stored_events: events.len()?,
        duration_ms: stats.last_run_duration.map_or(0, |d| d.as_millis()),
    })
}

/// Prints a report and turns a failed run into an error.
pub fn finish(report: &SyncReport, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(report)?);
        }
        _ => {
            print_text_output(report);
        }
    }

    if report.is_completed() {
        Ok(())
    } else {
        Err(format!(
            "sync failed: {}",
            report.error.as_deref().unwrap_or("unknown error")
        )
        .into())
    }
}

fn print_text_output(report: &SyncReport) {
    println!("ActuSync Run");
    println!("============");
    println!();
    println!("Device: {}", report.device_id);
    println!("State:  {}", report.state);
    if let Some(error) = &report.error {
        println!("Error:  {error}");
    }
    if let Some(retryable) = report.retryable {
        println!("Retryable: {retryable}");
    }
    println!();
    println!("Transitions: {}", report.transitions.join(" -> "));
    println!();
    println!("Transfer:");
    println!("  Attempts:         {}", report.attempts);
    println!("  Retries:          {}", report.retries);
    println!("  Pages:            {}", report.pages);
    println!("  Events persisted: {}", report.events_persisted);
    println!();
    println!("Storage:");
    println!("  Offset:        {}", report.offset);
    println!("  Stored events: {}", report.stored_events);
    println!();
    println!("Duration: {} ms", report.duration_ms);
}

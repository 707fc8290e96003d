//! Sync orchestration.
//!
//! A [`SyncManager`] launches at most one background run at a time. A run
//! is a sequence of attempts; each attempt connects, reads the device's
//! event count and then moves pages until the device has nothing left:
//!
//! ```text
//! Connecting → ReadingCount → ReadingEvents (read → persist → acknowledge)* → Completed
//! ```
//!
//! Any step may fail instead. The session is released after every attempt,
//! whatever its outcome. A retryable failure re-runs the whole attempt
//! after an exponential backoff; progress survives through the durable
//! cursor, so a retry resumes at the first unacknowledged page.

use crate::config::{ConfigError, SyncConfig};
use crate::device::Sensor;
use crate::error::{SyncError, SyncResult};
use crate::session::{DeviceSession, LinkState};
use crate::state::{AttemptOutcome, SyncState, SyncStats};
use crate::transfer::EventTransfer;
use actusync_storage::{EventStore, OffsetStore};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Instant;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument};

/// Drives syncs between one device and local storage.
///
/// Cloning is cheap; clones share the same run, state and statistics.
pub struct SyncManager<S, E, O>
where
    S: Sensor,
    E: EventStore + ?Sized + 'static,
    O: OffsetStore + ?Sized + 'static,
{
    inner: Arc<Inner<S, E, O>>,
    runtime: Handle,
}

impl<S, E, O> Clone for SyncManager<S, E, O>
where
    S: Sensor,
    E: EventStore + ?Sized + 'static,
    O: OffsetStore + ?Sized + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            runtime: self.runtime.clone(),
        }
    }
}

struct Inner<S, E, O>
where
    S: Sensor,
    E: EventStore + ?Sized,
    O: OffsetStore + ?Sized,
{
    config: SyncConfig,
    session: DeviceSession<S>,
    events: Arc<E>,
    offsets: Arc<O>,
    state: watch::Sender<SyncState>,
    stats: RwLock<SyncStats>,
    run: Mutex<RunSlot>,
}

#[derive(Default)]
struct RunSlot {
    next_id: u64,
    current: Option<RunHandle>,
}

struct RunHandle {
    id: u64,
    task: JoinHandle<()>,
    cancel: watch::Sender<bool>,
}

impl<S, E, O> SyncManager<S, E, O>
where
    S: Sensor,
    E: EventStore + ?Sized + 'static,
    O: OffsetStore + ?Sized + 'static,
{
    /// Creates a new sync manager.
    ///
    /// Background runs are spawned on `runtime`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot drive a sync.
    pub fn new(
        runtime: Handle,
        config: SyncConfig,
        sensor: Arc<S>,
        events: Arc<E>,
        offsets: Arc<O>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let (state, _) = watch::channel(SyncState::Idle);
        let session = DeviceSession::new(sensor, config.timeouts.clone());

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                session,
                events,
                offsets,
                state,
                stats: RwLock::new(SyncStats::default()),
                run: Mutex::new(RunSlot::default()),
            }),
            runtime,
        })
    }

    /// Returns a receiver that observes every state change.
    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.inner.state.subscribe()
    }

    /// Gets the current state.
    pub fn state(&self) -> SyncState {
        self.inner.state.borrow().clone()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.inner.stats.read().clone()
    }

    /// Gets the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// Returns the sensor's current link state.
    pub fn link_state(&self) -> LinkState {
        self.inner.session.link_state()
    }

    /// Returns true while a run is in flight.
    pub fn is_running(&self) -> bool {
        self.inner
            .run
            .lock()
            .current
            .as_ref()
            .is_some_and(|run| !run.task.is_finished())
    }

    /// Starts a background run unless one is already in flight.
    ///
    /// Returns `true` if a new run was launched. The caller never waits for
    /// the run; observe [`Self::subscribe`] for progress.
    pub fn start_sync(&self) -> bool {
        let mut slot = self.inner.run.lock();
        if let Some(run) = slot.current.as_ref() {
            if !run.task.is_finished() {
                debug!(run = run.id, "sync already running");
                return false;
            }
        }

        let id = slot.next_id;
        slot.next_id += 1;

        let (cancel, cancel_rx) = watch::channel(false);
        self.inner.state.send_replace(SyncState::Connecting);

        let inner = Arc::clone(&self.inner);
        let span = info_span!("sync", device = %self.inner.config.device_id, run = id);
        let task = self
            .runtime
            .spawn(inner.supervise(id, cancel_rx).instrument(span));

        slot.current = Some(RunHandle { id, task, cancel });
        true
    }

    /// Requests cancellation of the in-flight run.
    ///
    /// The run stops at its next suspension point, releases the session and
    /// ends in a failed state. Returns `false` if nothing was running.
    pub fn cancel(&self) -> bool {
        let slot = self.inner.run.lock();
        match slot.current.as_ref() {
            Some(run) if !run.task.is_finished() => {
                run.cancel.send_replace(true);
                true
            }
            _ => false,
        }
    }

    /// Starts a run, or joins the one in flight, and waits for it to end.
    pub async fn sync_and_wait(&self) -> SyncState {
        let mut rx = self.subscribe();
        self.start_sync();
        let result = rx.wait_for(|state| state.is_terminal()).await.map(|s| s.clone());
        match result {
            Ok(state) => state,
            Err(_) => self.state(),
        }
    }
}

impl<S, E, O> Inner<S, E, O>
where
    S: Sensor,
    E: EventStore + ?Sized + 'static,
    O: OffsetStore + ?Sized + 'static,
{
    fn publish(&self, state: SyncState) {
        self.state.send_replace(state);
    }

    /// Runs the attempts on a worker task and always ends in a terminal state.
    ///
    /// A worker that dies, by panic or by runtime shutdown, still gets its
    /// session released and its run published as [`SyncError::Aborted`].
    async fn supervise(self: Arc<Self>, id: u64, mut cancel: watch::Receiver<bool>) {
        let started = Instant::now();
        self.stats.write().runs += 1;

        let worker = Arc::clone(&self);
        let attempts = tokio::spawn(
            async move { worker.run_attempts(&mut cancel).await }.in_current_span(),
        );
        let final_state = match attempts.await {
            Ok(state) => state,
            Err(err) => {
                warn!(panicked = err.is_panic(), "sync run aborted");
                let releaser = Arc::clone(&self);
                let release = tokio::spawn(async move { releaser.session.release().await });
                if release.await.is_err() {
                    warn!("session release aborted");
                }
                SyncState::failed(SyncError::Aborted)
            }
        };

        {
            let mut stats = self.stats.write();
            stats.last_run_duration = Some(started.elapsed());
            match &final_state {
                SyncState::Completed => {
                    stats.runs_completed += 1;
                    stats.last_sync_time = Some(Instant::now());
                    stats.last_error = None;
                }
                SyncState::Failed { error, .. } => stats.last_error = Some(error.to_string()),
                _ => {}
            }
        }

        // Clear the slot before publishing so an observer of the terminal
        // state can start the next run right away.
        let mut slot = self.run.lock();
        if slot.current.as_ref().is_some_and(|run| run.id == id) {
            slot.current = None;
        }
        self.publish(final_state);
    }

    async fn run_attempts(&self, cancel: &mut watch::Receiver<bool>) -> SyncState {
        let policy = &self.config.retry;
        let mut attempt: u32 = 0;

        loop {
            {
                let mut stats = self.stats.write();
                stats.attempts += 1;
                if attempt > 0 {
                    stats.retries += 1;
                }
            }

            let result = tokio::select! {
                biased;
                _ = cancelled(cancel) => Err(SyncError::Cancelled),
                result = self.attempt() => result,
            };
            self.session.release().await;

            let err = match result {
                Ok(outcome) => {
                    info!(
                        attempt = attempt + 1,
                        device_count = outcome.device_count,
                        pages = outcome.pages,
                        persisted = outcome.events_persisted,
                        offset = outcome.final_offset,
                        "sync completed"
                    );
                    return SyncState::Completed;
                }
                Err(err) => err,
            };

            if !err.is_retryable() {
                warn!(attempt = attempt + 1, error = %err, "sync failed");
                return SyncState::failed(err);
            }
            if attempt + 1 >= policy.max_attempts {
                warn!(
                    attempts = attempt + 1,
                    error = %err,
                    "sync failed, retry budget exhausted"
                );
                return SyncState::failed(err);
            }

            let delay = policy.delay_for_attempt(attempt);
            warn!(
                attempt = attempt + 1,
                ?delay,
                error = %err,
                "sync attempt failed, retrying"
            );
            let stop = tokio::select! {
                biased;
                _ = cancelled(cancel) => true,
                _ = tokio::time::sleep(delay) => false,
            };
            if stop {
                return SyncState::failed(SyncError::Cancelled);
            }
            attempt += 1;
        }
    }

    /// One attempt, from connecting to the empty page.
    async fn attempt(&self) -> SyncResult<AttemptOutcome> {
        self.publish(SyncState::Connecting);
        let connection = self.session.ensure_ready().await?;
        let client = EventTransfer::new(
            connection,
            &*self.events,
            &*self.offsets,
            &self.config.timeouts,
        );

        self.publish(SyncState::ReadingCount);
        let device_count = client.total_event_count().await?;
        let mut cursor = client.cursor()?;
        let mut outcome = AttemptOutcome {
            device_count,
            final_offset: cursor,
            ..AttemptOutcome::default()
        };

        if device_count <= cursor {
            if device_count < cursor {
                warn!(
                    device_count,
                    cursor, "device holds fewer events than already acknowledged, nothing to read"
                );
            }
            return Ok(outcome);
        }

        self.publish(SyncState::ReadingEvents);
        loop {
            let page = client.read_page(cursor, self.config.page_size).await?;
            if page.is_empty() {
                break;
            }

            let inserted = client.persist(&page)?;
            self.stats.write().events_persisted += inserted as u64;

            let next = cursor + page.len() as u64;
            client.acknowledge(next).await?;
            cursor = next;
            self.stats.write().pages += 1;

            outcome.pages += 1;
            outcome.events_read += page.len() as u64;
            outcome.events_persisted += inserted as u64;
            outcome.final_offset = cursor;
        }

        Ok(outcome)
    }
}

/// Resolves once cancellation is requested.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    if cancel.wait_for(|requested| *requested).await.is_err() {
        std::future::pending::<()>().await;
    }
}

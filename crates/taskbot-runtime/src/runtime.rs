//! The polling runtime.
//!
//! [`BotRuntime`] owns the loaded configuration and drives a [`Dispatcher`]
//! from an [`UpdateSource`]:
//!
//! ```text
//!            poll(batch)              submit              ack(delivery)
//! UpdateSource ─────────▶ BotRuntime ─────────▶ Dispatcher ─────────▶ UpdateSource
//!                              │
//!                              └── sweeper: FsmStore::purge_expired every interval
//! ```
//!
//! Every update is acknowledged only after its cycle reached a terminal
//! state. On shutdown the runtime stops polling, then waits for every cycle
//! and acknowledgement already in flight.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! let runtime = BotRuntime::builder()
//!     .config_file("taskbot.toml")
//!     .build()?;
//!
//! let dispatcher = build_dispatcher(runtime.fsm_store(storage))?;
//! runtime.run(dispatcher, Arc::new(source)).await?;
//! ```

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use taskbot_core::{BoxedStorage, Delivery, FsmStore, TransportError, UpdateSource};
use taskbot_framework::{CycleReport, CycleState, Dispatcher};
use tokio::signal;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, trace, warn};

use crate::config::{ConfigLoader, ConfigResult, TaskbotConfig};
use crate::error::{RuntimeError, RuntimeResult};
use crate::logging;

/// Counters collected over one [`BotRuntime::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    /// Updates handed to the dispatcher, redeliveries included.
    pub received: u64,
    pub committed: u64,
    pub dropped: u64,
    pub failed: u64,
    /// Updates acknowledged with [`Delivery::Retry`].
    pub retried: u64,
    pub poll_errors: u64,
    pub ack_errors: u64,
    /// FSM records removed by the sweeper.
    pub purged: u64,
}

#[derive(Default)]
struct Counters {
    received: AtomicU64,
    committed: AtomicU64,
    dropped: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    poll_errors: AtomicU64,
    ack_errors: AtomicU64,
    purged: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn record(&self, report: &CycleReport) {
        match report.state {
            CycleState::Committed => Self::bump(&self.committed),
            CycleState::Dropped => Self::bump(&self.dropped),
            _ => Self::bump(&self.failed),
        }
    }

    fn snapshot(&self) -> RunStats {
        RunStats {
            received: self.received.load(Ordering::Relaxed),
            committed: self.committed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            poll_errors: self.poll_errors.load(Ordering::Relaxed),
            ack_errors: self.ack_errors.load(Ordering::Relaxed),
            purged: self.purged.load(Ordering::Relaxed),
        }
    }
}

/// Runs a dispatcher against an update source until shutdown.
///
/// The shutdown token is shared: cancelling it from anywhere (or receiving
/// Ctrl+C/SIGTERM in [`run`](Self::run)) stops polling. A runtime is meant
/// to run once; after shutdown its token stays cancelled.
pub struct BotRuntime {
    config: TaskbotConfig,
    shutdown: CancellationToken,
}

impl BotRuntime {
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Creates a runtime from already loaded configuration and initialises
    /// logging from it.
    pub fn from_config(config: TaskbotConfig) -> Self {
        logging::init_from_config(&config.logging);

        info!(
            log_level = %config.logging.level,
            log_format = ?config.logging.format,
            admins = config.bot.admin_ids.len(),
            "Runtime initialized from configuration"
        );

        Self {
            config,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &TaskbotConfig {
        &self.config
    }

    /// A handle that stops the runtime when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Wraps an FSM backend with the configured TTL.
    pub fn fsm_store(&self, storage: BoxedStorage) -> FsmStore {
        FsmStore::new(storage, self.config.fsm.ttl())
    }

    /// Runs until Ctrl+C, SIGTERM, token cancellation or the source closing.
    pub async fn run<S: UpdateSource>(
        &self,
        dispatcher: Dispatcher,
        source: Arc<S>,
    ) -> RuntimeResult<RunStats> {
        let token = self.shutdown.clone();
        let signals = tokio::spawn(async move {
            tokio::select! {
                result = wait_for_shutdown() => {
                    token.cancel();
                    result
                }
                _ = token.cancelled() => Ok(()),
            }
        });

        info!("Taskbot runtime is now running. Press Ctrl+C to stop.");
        let stats = self.drive(dispatcher, source).await;
        self.shutdown.cancel();

        match signals.await {
            Ok(Err(err)) => Err(RuntimeError::Signal(err)),
            _ => Ok(stats),
        }
    }

    /// Runs until `shutdown` resolves, the token is cancelled or the source
    /// closes.
    pub async fn run_until<S, F>(
        &self,
        dispatcher: Dispatcher,
        source: Arc<S>,
        shutdown: F,
    ) -> RunStats
    where
        S: UpdateSource,
        F: Future<Output = ()>,
    {
        let drive = self.drive(dispatcher, source);
        tokio::pin!(drive);

        tokio::select! {
            stats = &mut drive => return stats,
            _ = shutdown => {
                info!("Shutdown requested");
                self.shutdown.cancel();
            }
        }
        drive.await
    }

    async fn drive<S: UpdateSource>(&self, dispatcher: Dispatcher, source: Arc<S>) -> RunStats {
        let dispatch = &self.config.dispatch;
        let token = self.shutdown.clone();
        let tracker = TaskTracker::new();
        let counters = Arc::new(Counters::default());

        // The sweeper has its own token so it can be stopped after the
        // polling loop without cancelling the caller's.
        let sweeper_token = token.child_token();
        let sweeper = tokio::spawn(sweep(
            dispatcher.fsm().clone(),
            self.config.fsm.sweep_interval(),
            sweeper_token.clone(),
            Arc::clone(&counters),
        ));

        loop {
            let polled = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                polled = source.poll(dispatch.poll_batch_size) => polled,
            };

            match polled {
                Ok(batch) if batch.is_empty() => {
                    trace!("Empty poll");
                }
                Ok(batch) => {
                    debug!(count = batch.len(), "Dispatching batch");
                    for update in batch {
                        Counters::bump(&counters.received);
                        let cycle = dispatcher.submit(update.event);
                        tracker.spawn(acknowledge(
                            Arc::clone(&source),
                            update.update_id,
                            cycle,
                            Arc::clone(&counters),
                        ));
                    }
                    continue;
                }
                Err(TransportError::Closed) => {
                    info!("Update source closed");
                    break;
                }
                Err(err) => {
                    Counters::bump(&counters.poll_errors);
                    warn!(error = %err, "Polling for updates failed");
                }
            }

            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(dispatch.poll_interval()) => {}
            }
        }

        tracker.close();
        info!(in_flight = tracker.len(), "Stopped polling, waiting for in-flight cycles");
        tracker.wait().await;

        sweeper_token.cancel();
        if let Err(err) = sweeper.await {
            error!(error = %err, "FSM sweeper task failed");
        }

        let stats = counters.snapshot();
        info!(
            received = stats.received,
            committed = stats.committed,
            failed = stats.failed,
            retried = stats.retried,
            "Runtime stopped"
        );
        stats
    }
}

impl std::fmt::Debug for BotRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BotRuntime")
            .field("shutdown", &self.shutdown.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Waits for the cycle behind `update_id`, then acknowledges it.
async fn acknowledge<S: UpdateSource>(
    source: Arc<S>,
    update_id: u64,
    cycle: JoinHandle<CycleReport>,
    counters: Arc<Counters>,
) {
    let delivery = match cycle.await {
        Ok(report) => {
            counters.record(&report);
            report.delivery()
        }
        Err(err) => {
            error!(update_id, error = %err, "Dispatch task panicked");
            Counters::bump(&counters.failed);
            Delivery::Retry
        }
    };
    if delivery == Delivery::Retry {
        Counters::bump(&counters.retried);
    }

    if let Err(err) = source.ack(update_id, delivery).await {
        Counters::bump(&counters.ack_errors);
        warn!(update_id, error = %err, "Failed to acknowledge update");
    }
}

/// Purges expired FSM records every `every` until cancelled.
async fn sweep(fsm: FsmStore, every: Duration, token: CancellationToken, counters: Arc<Counters>) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => match fsm.purge_expired().await {
                Ok(0) => trace!("No expired FSM records"),
                Ok(purged) => {
                    counters.purged.fetch_add(purged as u64, Ordering::Relaxed);
                    debug!(purged, "Purged expired FSM records");
                }
                Err(err) => warn!(error = %err, "Failed to purge expired FSM records"),
            },
        }
    }
}

/// Waits for Ctrl+C or, on Unix, SIGTERM.
async fn wait_for_shutdown() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = signal::ctrl_c() => {
                result?;
                info!("Received Ctrl+C, shutting down");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await?;
        info!("Received Ctrl+C, shutting down");
    }

    Ok(())
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Loads configuration and creates a [`BotRuntime`].
///
/// ```rust,ignore
/// let runtime = BotRuntime::builder()
///     .config_file("deploy/taskbot.toml")
///     .profile("production")
///     .build()?;
/// ```
pub struct RuntimeBuilder {
    config_loader: ConfigLoader,
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new(),
        }
    }

    pub fn config_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    pub fn profile(mut self, profile: impl AsRef<str>) -> Self {
        self.config_loader = self.config_loader.profile(profile);
        self
    }

    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.search_path(path);
        self
    }

    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self
    }

    /// Layers programmatic configuration under files and environment.
    pub fn merge(mut self, config: TaskbotConfig) -> Self {
        self.config_loader = self.config_loader.merge(config);
        self
    }

    /// Loads, validates and initialises logging.
    pub fn build(self) -> ConfigResult<BotRuntime> {
        let config = self.config_loader.load()?;
        Ok(BotRuntime::from_config(config))
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

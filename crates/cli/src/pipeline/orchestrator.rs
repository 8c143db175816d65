//! Bridge orchestrator - owns the source connector, the dispatcher and the
//! health registry, and applies configuration reloads in place.

use std::future::Future;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use contracts::BridgeConfig;
use dispatcher::Dispatcher;
use ingestion::SourceConnector;
use observability::{HealthReader, HealthRegistry};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Interval, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use super::BridgeStats;
use crate::config::{load_config, resolve_source, SourceOverrides};
use crate::error::CliError;

/// How long to wait for the dispatcher loop after shutdown
const DISPATCH_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// How often the source task is checked for an unexpected exit
const SOURCE_WATCH_INTERVAL: Duration = Duration::from_secs(1);

/// Bridge run options
#[derive(Debug, Clone)]
pub struct BridgeOptions {
    /// File re-read on reload
    pub config_path: PathBuf,

    /// Source overrides re-applied on every reload
    pub overrides: SourceOverrides,

    /// Health report period (None = disabled)
    pub status_interval: Option<Duration>,

    /// Run time limit (None = until shutdown signal)
    pub timeout: Option<Duration>,
}

/// Main bridge orchestrator
pub struct Bridge {
    options: BridgeOptions,
    config: BridgeConfig,
    registry: HealthRegistry,
    source: SourceConnector,
    dispatcher: Dispatcher,
    dispatch_task: Option<JoinHandle<()>>,
}

impl Bridge {
    /// Create a stopped bridge for `config`
    pub fn new(config: BridgeConfig, options: BridgeOptions) -> Self {
        let registry = HealthRegistry::new();
        let source = SourceConnector::new(registry.clone());
        let dispatcher = Dispatcher::new(registry.clone(), config.station.clone(), config.backoff);
        Self {
            options,
            config,
            registry,
            source,
            dispatcher,
            dispatch_task: None,
        }
    }

    /// Read-only view of connection health
    pub fn health(&self) -> HealthReader {
        self.registry.reader()
    }

    /// Start sinks, the dispatcher loop and the source connector
    #[instrument(name = "bridge_start", skip(self), fields(source = %self.config.source.address()))]
    pub async fn start(&mut self) -> Result<()> {
        if self.config.sinks.is_empty() {
            warn!("No sinks configured - decoded events will be discarded");
        }

        let report = self.dispatcher.apply(self.config.sinks.clone()).await;
        info!(sinks = report.added.len(), "Sinks configured");

        let rx = self.source.channel(self.config.channel_capacity);
        self.dispatch_task = Some(self.dispatcher.run(rx));

        self.source
            .start(resolve_source(&self.config))
            .context("Failed to start source connector")?;
        Ok(())
    }

    /// Run until `shutdown` resolves or the timeout expires
    ///
    /// Every message on `reload` re-reads the configuration file.
    pub async fn run<F>(mut self, shutdown: F, mut reload: mpsc::Receiver<()>) -> Result<BridgeStats>
    where
        F: Future<Output = ()>,
    {
        let started = Instant::now();
        self.start().await?;

        tokio::pin!(shutdown);
        let deadline = optional_sleep(self.options.timeout);
        tokio::pin!(deadline);
        let mut status = self.options.status_interval.map(|period| {
            let mut interval = interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval
        });
        let mut watch = tokio::time::interval(SOURCE_WATCH_INTERVAL);
        watch.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("Bridge running");
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    warn!("Received shutdown signal, stopping bridge...");
                    break;
                }
                _ = &mut deadline => {
                    info!("Run timeout reached");
                    break;
                }
                Some(()) = reload.recv() => {
                    if let Err(e) = self.reload().await {
                        warn!(error = %e, "Reload failed, keeping current configuration");
                    }
                }
                _ = next_tick(&mut status) => self.log_health(),
                _ = watch.tick() => {
                    if let Some(error) = self.source.supervise().await {
                        warn!(error = %error, "Source connector restarted");
                    }
                }
            }
        }

        Ok(self.shutdown(started).await)
    }

    /// Re-read the file and apply only what changed
    ///
    /// Sinks are diffed by the dispatcher; the source restarts only if its
    /// resolved settings differ from the running ones.
    #[instrument(name = "bridge_reload", skip(self), fields(path = %self.options.config_path.display()))]
    pub async fn reload(&mut self) -> std::result::Result<(), CliError> {
        let next = load_config(&self.options.config_path, &self.options.overrides)?;
        self.apply(next).await
    }

    /// Apply a new configuration to the running bridge
    pub async fn apply(&mut self, next: BridgeConfig) -> std::result::Result<(), CliError> {
        for (id, error) in config_loader::sink_issues(&next) {
            warn!(sink = %id, error = %error, "Sink definition is invalid and will not start");
        }

        self.dispatcher
            .set_defaults(next.station.clone(), next.backoff);
        let report = self.dispatcher.apply(next.sinks.clone()).await;
        info!(
            added = ?report.added,
            removed = ?report.removed,
            restarted = ?report.restarted,
            unchanged = report.unchanged.len(),
            "Sinks reconfigured"
        );

        let source = resolve_source(&next);
        if self.source.config() != Some(&source) {
            info!(addr = %source.address(), "Source configuration changed, restarting");
            self.source.restart(source).await?;
        } else {
            debug!("Source configuration unchanged");
        }

        if next.channel_capacity != self.config.channel_capacity {
            warn!(
                current = self.config.channel_capacity,
                requested = next.channel_capacity,
                "channel_capacity changes take effect on the next start"
            );
        }

        self.config = next;
        Ok(())
    }

    fn log_health(&self) {
        let snapshot = self.registry.snapshot();
        for (id, entry) in snapshot.iter() {
            info!(
                id = %id,
                state = %entry.state,
                transitions = entry.transitions,
                last_error = entry.last_error.as_deref().unwrap_or(""),
                "Connection health"
            );
        }
        let source = self.source.metrics();
        let dispatch = self.dispatcher.stats();
        info!(
            connected = snapshot.connected_count(),
            connections = snapshot.len(),
            events = source.events,
            decode_errors = source.decode_errors,
            published = dispatch.published,
            "Bridge status"
        );
    }

    /// Stop the source, then the dispatcher and every sink
    #[instrument(name = "bridge_shutdown", skip_all)]
    async fn shutdown(mut self, started: Instant) -> BridgeStats {
        info!("Shutting down bridge...");
        self.source.stop().await;

        let sinks = self.dispatcher.metrics();
        self.dispatcher.shutdown().await;
        if let Some(task) = self.dispatch_task.take() {
            if tokio::time::timeout(DISPATCH_DRAIN_TIMEOUT, task).await.is_err() {
                warn!("Dispatcher loop did not stop in time");
            }
        }

        let stats = BridgeStats {
            duration: started.elapsed(),
            source: self.source.metrics(),
            dispatch: self.dispatcher.stats(),
            sinks,
            health: self.registry.snapshot(),
        };
        info!(
            duration_secs = stats.duration.as_secs_f64(),
            events = stats.source.events,
            "Bridge shutdown complete"
        );
        stats
    }
}

async fn optional_sleep(duration: Option<Duration>) {
    match duration {
        Some(duration) => tokio::time::sleep(duration).await,
        None => std::future::pending().await,
    }
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

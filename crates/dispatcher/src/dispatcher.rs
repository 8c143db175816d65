//! Dispatcher - fan-out of source events to the sink connectors

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_channel::Receiver;
use contracts::{BackoffConfig, ConnectionState, SharedEvent, SinkConfig, StationConfig};
use observability::HealthRegistry;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use validator::Validate;

use crate::connector::{SendOutcome, SinkConnector, SinkSettings};
use crate::encoders::encoder_for;
use crate::error::DispatcherError;
use crate::metrics::MetricsSnapshot;
use crate::sinks::{FileSink, NetworkSink};

/// Settings shared by every sink built by the dispatcher
#[derive(Debug, Clone, PartialEq)]
pub struct SinkDefaults {
    /// Operator identity for ADIF records
    pub station: StationConfig,
    /// Reconnect policy for sinks without an override
    pub backoff: BackoffConfig,
}

/// Outcome of one `publish`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Sinks the event was offered to (Connected and accepting its kind)
    pub offered: usize,
    /// Offers that were enqueued
    pub queued: usize,
    /// Offers lost to a full queue or an ended worker
    pub dropped: usize,
    /// Sinks that did not get the event (filtered, not connected, disabled)
    pub skipped: usize,
}

/// Outcome of one `apply`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub restarted: Vec<String>,
    pub unchanged: Vec<String>,
}

/// Dispatcher totals
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub published: u64,
    pub queued: u64,
    pub dropped: u64,
}

struct SinkEntry {
    config: SinkConfig,
    defaults: SinkDefaults,
    /// `None` for disabled or invalid definitions
    connector: Option<SinkConnector>,
}

struct Inner {
    registry: HealthRegistry,
    defaults: RwLock<SinkDefaults>,
    sinks: RwLock<BTreeMap<String, SinkEntry>>,
    cancel: CancellationToken,
    published: AtomicU64,
    queued: AtomicU64,
    dropped: AtomicU64,
}

/// Fan-out of events to independently connected sinks
///
/// Cloning is cheap; clones share the same sink set.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    pub fn new(registry: HealthRegistry, station: StationConfig, default_backoff: BackoffConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry,
                defaults: RwLock::new(SinkDefaults {
                    station,
                    backoff: default_backoff,
                }),
                sinks: RwLock::new(BTreeMap::new()),
                cancel: CancellationToken::new(),
                published: AtomicU64::new(0),
                queued: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    fn sinks(&self) -> RwLockReadGuard<'_, BTreeMap<String, SinkEntry>> {
        self.inner
            .sinks
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn sinks_mut(&self) -> RwLockWriteGuard<'_, BTreeMap<String, SinkEntry>> {
        self.inner
            .sinks
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn defaults(&self) -> SinkDefaults {
        self.inner
            .defaults
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Replace station identity and default backoff
    ///
    /// Running sinks keep their settings until the next `apply`, which
    /// restarts every sink built with the old values.
    pub fn set_defaults(&self, station: StationConfig, default_backoff: BackoffConfig) {
        *self
            .inner
            .defaults
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = SinkDefaults {
            station,
            backoff: default_backoff,
        };
    }

    /// Offer `event` to every sink (never blocks)
    pub fn publish(&self, event: &SharedEvent) -> PublishReport {
        let mut report = PublishReport::default();

        for entry in self.sinks().values() {
            let Some(connector) = &entry.connector else {
                report.skipped += 1;
                continue;
            };
            match connector.send(event) {
                SendOutcome::Queued => {
                    report.offered += 1;
                    report.queued += 1;
                }
                SendOutcome::Dropped | SendOutcome::Closed => {
                    report.offered += 1;
                    report.dropped += 1;
                }
                SendOutcome::Filtered | SendOutcome::NotConnected => report.skipped += 1,
            }
        }

        self.inner.published.fetch_add(1, Ordering::Relaxed);
        self.inner
            .queued
            .fetch_add(report.queued as u64, Ordering::Relaxed);
        self.inner
            .dropped
            .fetch_add(report.dropped as u64, Ordering::Relaxed);
        report
    }

    /// Spawn the loop that publishes every event received on `rx`
    ///
    /// The task ends when the channel closes or on `shutdown()`.
    pub fn run(&self, rx: Receiver<SharedEvent>) -> JoinHandle<()> {
        let dispatcher = self.clone();
        tokio::spawn(async move {
            dispatcher.run_loop(rx).await;
        })
    }

    #[instrument(name = "dispatcher_run", skip(self, rx))]
    async fn run_loop(&self, rx: Receiver<SharedEvent>) {
        info!(sinks = self.sinks().len(), "Dispatcher started");
        let mut event_count: u64 = 0;

        loop {
            let event = tokio::select! {
                _ = self.inner.cancel.cancelled() => break,
                event = rx.recv() => match event {
                    Ok(event) => event,
                    Err(_) => break,
                },
            };
            event_count += 1;
            let report = self.publish(&event);
            debug!(
                seq = event.seq,
                kind = %event.kind,
                offered = report.offered,
                queued = report.queued,
                "Event dispatched"
            );

            if event_count % 100 == 0 {
                debug!(events = event_count, "Dispatcher progress");
            }
        }

        info!(events = event_count, "Dispatcher loop ended");
    }

    /// Add one sink definition
    ///
    /// Invalid definitions are kept (so that `apply` can diff them) but never
    /// started; health shows Errored with the reason.
    #[instrument(name = "dispatcher_add_sink", skip(self, config), fields(sink = %config.id))]
    pub fn add_sink(&self, config: SinkConfig) -> Result<(), DispatcherError> {
        if self.sinks().contains_key(&config.id) {
            return Err(DispatcherError::DuplicateSink { id: config.id });
        }
        let (entry, result) = self.build_entry(config);
        self.insert_entry(entry);
        result
    }

    /// Register a connector built by the caller (custom `EventSink`)
    pub fn attach(&self, config: SinkConfig, connector: SinkConnector) -> Result<(), DispatcherError> {
        if self.sinks().contains_key(&config.id) {
            return Err(DispatcherError::DuplicateSink { id: config.id });
        }
        let entry = SinkEntry {
            config,
            defaults: self.defaults(),
            connector: Some(connector),
        };
        self.insert_entry(entry);
        Ok(())
    }

    fn insert_entry(&self, entry: SinkEntry) {
        let id = entry.config.id.clone();
        let displaced = self.sinks_mut().insert(id.clone(), entry);
        if let Some(SinkEntry {
            connector: Some(connector),
            ..
        }) = displaced
        {
            // Lost a race with a concurrent add of the same id
            warn!(sink = %id, "Replacing sink registered concurrently");
            tokio::spawn(connector.shutdown());
        }
    }

    /// Tear down one sink and forget its health entry
    #[instrument(name = "dispatcher_remove_sink", skip(self))]
    pub async fn remove_sink(&self, id: &str) -> Result<(), DispatcherError> {
        let entry = self
            .sinks_mut()
            .remove(id)
            .ok_or_else(|| DispatcherError::UnknownSink { id: id.to_string() })?;
        if let Some(connector) = entry.connector {
            connector.shutdown().await;
        }
        self.inner.registry.forget(id);
        info!(sink = %id, "Sink removed");
        Ok(())
    }

    /// Reconcile the running sinks with `sinks`
    ///
    /// Removed ids are torn down, changed definitions are torn down and
    /// recreated, unchanged sinks are left alone.
    #[instrument(name = "dispatcher_apply", skip(self, sinks), fields(sink_count = sinks.len()))]
    pub async fn apply(&self, sinks: Vec<SinkConfig>) -> ApplyReport {
        let defaults = self.defaults();
        let mut report = ApplyReport::default();
        let mut wanted = Vec::with_capacity(sinks.len());
        let mut seen = HashSet::new();
        for config in sinks {
            if seen.insert(config.id.clone()) {
                wanted.push(config);
            } else {
                warn!(sink = %config.id, "Duplicate sink id ignored");
            }
        }

        // Take stale entries out under the lock, tear them down outside it.
        // (entry, still configured)
        let mut stale = Vec::new();
        let mut to_start = Vec::new();
        {
            let mut map = self.sinks_mut();
            let removed: Vec<String> = map.keys().filter(|id| !seen.contains(*id)).cloned().collect();
            for id in removed {
                if let Some(entry) = map.remove(&id) {
                    stale.push((entry, false));
                    report.removed.push(id);
                }
            }

            for config in wanted {
                let unchanged = map
                    .get(&config.id)
                    .map(|entry| entry.config == config && entry.defaults == defaults);
                match unchanged {
                    Some(true) => {
                        report.unchanged.push(config.id.clone());
                    }
                    Some(false) => {
                        if let Some(entry) = map.remove(&config.id) {
                            stale.push((entry, true));
                        }
                        report.restarted.push(config.id.clone());
                        to_start.push(config);
                    }
                    None => {
                        report.added.push(config.id.clone());
                        to_start.push(config);
                    }
                }
            }
        }

        // A restarted id stays listed as Disconnected until its new
        // instance reports; only removed ids leave the registry.
        for (entry, configured) in stale {
            let id = &entry.config.id;
            if configured {
                self.inner.registry.report(id, ConnectionState::Disconnected, None);
            }
            if let Some(connector) = entry.connector {
                connector.shutdown().await;
            }
            if !configured {
                self.inner.registry.forget(id);
            }
        }

        for config in to_start {
            let (entry, result) = self.build_entry(config);
            if let Err(e) = result {
                warn!(error = %e, "Sink not started");
            }
            self.insert_entry(entry);
        }

        info!(
            added = report.added.len(),
            removed = report.removed.len(),
            restarted = report.restarted.len(),
            unchanged = report.unchanged.len(),
            "Sink configuration applied"
        );
        report
    }

    /// Validate, build encoder and transport, spawn the connector
    fn build_entry(&self, config: SinkConfig) -> (SinkEntry, Result<(), DispatcherError>) {
        let defaults = self.defaults();
        let registry = &self.inner.registry;
        let mut entry = SinkEntry {
            config,
            defaults,
            connector: None,
        };
        let config = &entry.config;

        if let Err(e) = config.validate() {
            let error = DispatcherError::invalid_sink(&config.id, e.to_string());
            registry.report(&config.id, ConnectionState::Errored, Some(error.to_string()));
            return (entry, Err(error));
        }

        let encoder = match encoder_for(config, &entry.defaults.station) {
            Ok(encoder) => encoder,
            Err(error) => {
                registry.report(&config.id, ConnectionState::Errored, Some(error.to_string()));
                return (entry, Err(error));
            }
        };

        if !config.enabled {
            registry.register(&config.id);
            registry.report(&config.id, ConnectionState::Disconnected, None);
            debug!(sink = %config.id, "Sink disabled, not started");
            return (entry, Ok(()));
        }

        let settings = SinkSettings::from_config(config, entry.defaults.backoff);
        info!(
            sink = %config.id,
            target = %config.target(),
            transport = %config.transport,
            encoding = %config.encoding,
            "Starting sink"
        );
        let connector = if config.is_file() {
            SinkConnector::spawn(FileSink::from_config(config), encoder, settings, registry.clone())
        } else {
            SinkConnector::spawn(NetworkSink::from_config(config), encoder, settings, registry.clone())
        };
        entry.connector = Some(connector);
        (entry, Ok(()))
    }

    /// Ids of every configured sink (including disabled and invalid ones)
    pub fn sink_ids(&self) -> Vec<String> {
        self.sinks().keys().cloned().collect()
    }

    /// Metrics of every running sink
    pub fn metrics(&self) -> Vec<(String, MetricsSnapshot)> {
        self.sinks()
            .iter()
            .filter_map(|(id, entry)| {
                entry
                    .connector
                    .as_ref()
                    .map(|connector| (id.clone(), connector.metrics().snapshot()))
            })
            .collect()
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            published: self.inner.published.load(Ordering::Relaxed),
            queued: self.inner.queued.load(Ordering::Relaxed),
            dropped: self.inner.dropped.load(Ordering::Relaxed),
        }
    }

    /// Stop the run loop and every sink
    #[instrument(name = "dispatcher_shutdown", skip(self))]
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        let entries: Vec<SinkEntry> = std::mem::take(&mut *self.sinks_mut()).into_values().collect();
        for entry in entries {
            if let Some(connector) = entry.connector {
                connector.shutdown().await;
            }
        }
        info!("Dispatcher shutdown complete");
    }
}

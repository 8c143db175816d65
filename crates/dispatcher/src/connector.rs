//! SinkConnector - one downstream link with its own queue and worker task

use std::sync::Arc;
use std::time::Duration;

use contracts::{
    Backoff, BackoffConfig, ConnectionState, EventEncoder, EventKind, EventSink, SharedEvent,
    SinkConfig,
};
use observability::{
    record_event_dispatched, record_event_skipped, record_sink_dropped, record_sink_missed,
    HealthRegistry,
};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::metrics::SinkMetrics;

/// Worker settings derived from a `SinkConfig`
#[derive(Debug, Clone)]
pub struct SinkSettings {
    pub id: String,
    pub queue_capacity: usize,
    pub connect_timeout: Duration,
    pub write_timeout: Duration,
    pub backoff: BackoffConfig,
    /// Accepted event kinds (empty = all)
    pub kinds: Vec<EventKind>,
}

impl SinkSettings {
    pub fn from_config(config: &SinkConfig, default_backoff: BackoffConfig) -> Self {
        Self {
            id: config.id.clone(),
            queue_capacity: config.queue_capacity.max(1),
            connect_timeout: Duration::from_millis(config.connect_timeout_ms),
            write_timeout: Duration::from_millis(config.write_timeout_ms),
            backoff: config.backoff.unwrap_or(default_backoff),
            kinds: config.kinds.clone(),
        }
    }

    fn accepts(&self, kind: EventKind) -> bool {
        self.kinds.is_empty() || self.kinds.contains(&kind)
    }
}

/// Result of offering one event to a sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Enqueued for the worker
    Queued,
    /// Kind not accepted by this sink
    Filtered,
    /// Sink not Connected; event missed
    NotConnected,
    /// Queue full; event dropped
    Dropped,
    /// Worker has ended
    Closed,
}

/// Handle to a running sink worker
pub struct SinkConnector {
    settings: Arc<SinkSettings>,
    tx: mpsc::Sender<SharedEvent>,
    state: watch::Receiver<ConnectionState>,
    metrics: Arc<SinkMetrics>,
    cancel: CancellationToken,
    worker_handle: JoinHandle<()>,
}

impl SinkConnector {
    /// Spawn the worker task
    ///
    /// The worker starts in Connecting and keeps reconnecting until
    /// `shutdown()`.
    pub fn spawn<S: EventSink + 'static>(
        sink: S,
        encoder: Arc<dyn EventEncoder>,
        settings: SinkSettings,
        registry: HealthRegistry,
    ) -> Self {
        let settings = Arc::new(settings);
        let (tx, rx) = mpsc::channel(settings.queue_capacity);
        let (state_tx, state) = watch::channel(ConnectionState::Disconnected);
        let metrics = Arc::new(SinkMetrics::new());
        let cancel = CancellationToken::new();

        registry.register(&settings.id);

        let worker = SinkWorker {
            sink,
            encoder,
            settings: Arc::clone(&settings),
            rx,
            state_tx,
            registry,
            metrics: Arc::clone(&metrics),
            cancel: cancel.clone(),
        };
        let worker_handle = tokio::spawn(worker.run());

        Self {
            settings,
            tx,
            state,
            metrics,
            cancel,
            worker_handle,
        }
    }

    /// Sink id
    pub fn id(&self) -> &str {
        &self.settings.id
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn metrics(&self) -> &Arc<SinkMetrics> {
        &self.metrics
    }

    /// Offer an event (non-blocking)
    pub fn send(&self, event: &SharedEvent) -> SendOutcome {
        if !self.settings.accepts(event.kind) {
            return SendOutcome::Filtered;
        }
        if self.state() != ConnectionState::Connected {
            self.metrics.add_missed_count(1);
            record_sink_missed(self.id(), 1);
            return SendOutcome::NotConnected;
        }

        match self.tx.try_send(Arc::clone(event)) {
            Ok(()) => {
                self.metrics
                    .set_queue_len(self.settings.queue_capacity - self.tx.capacity());
                SendOutcome::Queued
            }
            Err(mpsc::error::TrySendError::Full(event)) => {
                self.metrics.inc_dropped_count();
                record_sink_dropped(self.id());
                warn!(sink = %self.id(), seq = event.seq, "Queue full, event dropped");
                SendOutcome::Dropped
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                error!(sink = %self.id(), "Sink worker closed unexpectedly");
                SendOutcome::Closed
            }
        }
    }

    /// Stop the worker and wait for it
    ///
    /// Interrupts a blocked connect, write or backoff wait; the link is
    /// closed and Disconnected reported before this returns.
    #[instrument(name = "sink_connector_shutdown", skip(self), fields(sink = %self.settings.id))]
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.worker_handle.await {
            error!(sink = %self.settings.id, error = ?e, "Worker task panicked");
        }
        debug!(sink = %self.settings.id, "SinkConnector shutdown complete");
    }
}

/// How a connected session ended
enum SessionEnd {
    Cancelled,
    Failed(String),
}

struct SinkWorker<S> {
    sink: S,
    encoder: Arc<dyn EventEncoder>,
    settings: Arc<SinkSettings>,
    rx: mpsc::Receiver<SharedEvent>,
    state_tx: watch::Sender<ConnectionState>,
    registry: HealthRegistry,
    metrics: Arc<SinkMetrics>,
    cancel: CancellationToken,
}

impl<S: EventSink> SinkWorker<S> {
    fn report(&self, state: ConnectionState, error: Option<String>) {
        self.state_tx.send_replace(state);
        self.registry.report(&self.settings.id, state, error);
    }

    #[instrument(name = "sink_worker_loop", skip(self), fields(sink = %self.settings.id, encoding = self.encoder.name()))]
    async fn run(mut self) {
        debug!("Sink worker started");
        let mut backoff = Backoff::new(self.settings.backoff);

        loop {
            self.report(ConnectionState::Connecting, None);

            let connected = tokio::select! {
                _ = self.cancel.cancelled() => break,
                result = timeout(self.settings.connect_timeout, self.sink.connect()) => result,
            };
            let connect_error = match connected {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e.to_string()),
                Err(_) => Some(format!(
                    "connect timed out after {}ms",
                    self.settings.connect_timeout.as_millis()
                )),
            };
            if let Some(message) = connect_error {
                warn!(error = %message, "Sink connect failed");
                self.report(ConnectionState::Errored, Some(message));
                if wait_backoff(&self.cancel, &mut backoff).await {
                    break;
                }
                continue;
            }

            // Nothing queued before this session may be delivered.
            self.discard_pending();
            self.metrics.inc_connect_count();
            self.report(ConnectionState::Connected, None);
            info!("Sink connected");

            let started = Instant::now();
            match self.deliver().await {
                SessionEnd::Cancelled => break,
                SessionEnd::Failed(message) => {
                    self.metrics.inc_failure_count();
                    record_event_dispatched(&self.settings.id, false);
                    warn!(error = %message, "Sink write failed");
                    self.report(ConnectionState::Errored, Some(message));
                    self.close_link().await;
                    self.discard_pending();
                    backoff.session_ended(started.elapsed());
                    if wait_backoff(&self.cancel, &mut backoff).await {
                        break;
                    }
                }
            }
        }

        self.close_link().await;
        self.discard_pending();
        self.report(ConnectionState::Disconnected, None);
        debug!("Sink worker stopped");
    }

    /// Write queued events until cancelled or a write fails
    async fn deliver(&mut self) -> SessionEnd {
        loop {
            let event = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return SessionEnd::Cancelled,
                event = self.rx.recv() => match event {
                    Some(event) => event,
                    // All senders gone: the connector handle was dropped
                    None => return SessionEnd::Cancelled,
                },
            };
            self.metrics.set_queue_len(self.rx.len());

            let Some(payload) = self.encoder.encode(&event) else {
                self.metrics.inc_skipped_count();
                record_event_skipped(&self.settings.id);
                trace!(seq = event.seq, kind = %event.kind, "No representation, skipped");
                continue;
            };

            let written = tokio::select! {
                _ = self.cancel.cancelled() => return SessionEnd::Cancelled,
                result = timeout(self.settings.write_timeout, self.sink.write(&payload)) => result,
            };
            match written {
                Ok(Ok(())) => {
                    self.metrics.inc_write_count();
                    record_event_dispatched(&self.settings.id, true);
                    self.registry.touch(&self.settings.id);
                    trace!(seq = event.seq, bytes = payload.len(), "Event written");
                }
                Ok(Err(e)) => return SessionEnd::Failed(e.to_string()),
                Err(_) => {
                    return SessionEnd::Failed(format!(
                        "write timed out after {}ms",
                        self.settings.write_timeout.as_millis()
                    ))
                }
            }
        }
    }

    /// Drop queued events; they belong to a session that is gone
    fn discard_pending(&mut self) {
        let mut missed = 0u64;
        while self.rx.try_recv().is_ok() {
            missed += 1;
        }
        self.metrics.set_queue_len(0);
        if missed > 0 {
            self.metrics.add_missed_count(missed);
            record_sink_missed(&self.settings.id, missed);
            debug!(missed, "Discarded queued events");
        }
    }

    async fn close_link(&mut self) {
        if let Err(e) = self.sink.close().await {
            warn!(error = %e, "Close failed");
        }
    }
}

/// Sleep for the next backoff delay; true if cancelled meanwhile
async fn wait_backoff(cancel: &CancellationToken, backoff: &mut Backoff) -> bool {
    let delay = backoff.next_delay();
    debug!(delay_ms = delay.as_millis() as u64, "Reconnect backoff");
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = sleep(delay) => false,
    }
}

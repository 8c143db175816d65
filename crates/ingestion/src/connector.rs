//! SourceConnector - resilient connection to the JS8Call API
//!
//! One background task owns the socket. It walks the connection state
//! machine, decodes frames, translates them and hands every event to the
//! subscribers in arrival order.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_channel::{bounded, Receiver, TrySendError};
use bytes::Bytes;
use chrono::Utc;
use contracts::{
    Backoff, ConnectionState, ContractError, SharedEvent, SourceConfig, Transport, SOURCE_ID,
};
use observability::{
    record_decode_error, record_event_received, record_frame_ignored, record_source_bytes,
    HealthRegistry,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, timeout, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::error::{FrameError, IngestionError, Result};
use crate::framing::{encode_frame, FrameDecoder};
use crate::translator::EventTranslator;

/// Callback invoked once per translated event, from the read loop
pub type EventCallback = Arc<dyn Fn(SharedEvent) + Send + Sync>;

const READ_BUFFER_SIZE: usize = 8 * 1024;
const DATAGRAM_BUFFER_SIZE: usize = 64 * 1024;

/// Request that makes JS8Call answer with a RIG.FREQ frame
const POLL_REQUEST: &[u8] = br#"{"type":"RIG.GET_FREQ","value":"","params":{}}"#;

/// Source counters
#[derive(Debug, Default)]
pub struct SourceMetrics {
    pub bytes_received: AtomicU64,
    pub frames: AtomicU64,
    pub events: AtomicU64,
    pub decode_errors: AtomicU64,
    pub frames_ignored: AtomicU64,
    pub events_dropped: AtomicU64,
    pub sessions: AtomicU64,
}

impl SourceMetrics {
    pub fn snapshot(&self) -> SourceMetricsSnapshot {
        SourceMetricsSnapshot {
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            frames: self.frames.load(Ordering::Relaxed),
            events: self.events.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            frames_ignored: self.frames_ignored.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            sessions: self.sessions.load(Ordering::Relaxed),
        }
    }
}

/// Source counters snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceMetricsSnapshot {
    /// Bytes read from the socket
    pub bytes_received: u64,
    /// Complete frames decoded
    pub frames: u64,
    /// Events delivered to subscribers
    pub events: u64,
    /// Oversized or malformed frames
    pub decode_errors: u64,
    /// Well-formed frames of an unhandled type
    pub frames_ignored: u64,
    /// Events dropped by a full `channel()` subscription
    pub events_dropped: u64,
    /// Successful connects/binds
    pub sessions: u64,
}

/// State shared between the handle and its session task
struct Shared {
    registry: HealthRegistry,
    subscribers: RwLock<Vec<EventCallback>>,
    metrics: SourceMetrics,
    next_seq: AtomicU64,
}

impl Shared {
    fn report(&self, state: ConnectionState, error: Option<String>) {
        self.registry.report(SOURCE_ID, state, error);
    }

    /// Feed one read into the decoder and deliver the resulting events
    fn ingest(&self, data: &[u8], decoder: &mut FrameDecoder, translator: &EventTranslator) {
        self.metrics
            .bytes_received
            .fetch_add(data.len() as u64, Ordering::Relaxed);
        record_source_bytes(data.len());
        self.registry.touch(SOURCE_ID);

        decoder.push(data);
        while let Some(frame) = decoder.next_frame() {
            self.handle_frame(frame, translator);
        }
    }

    /// Datagram boundary: also flush an unterminated last line
    fn ingest_datagram(
        &self,
        data: &[u8],
        decoder: &mut FrameDecoder,
        translator: &EventTranslator,
    ) {
        self.ingest(data, decoder, translator);
        if let Some(frame) = decoder.finish() {
            self.handle_frame(frame, translator);
        }
    }

    fn handle_frame(
        &self,
        frame: std::result::Result<Bytes, FrameError>,
        translator: &EventTranslator,
    ) {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "dropping source frame");
                self.metrics.decode_errors.fetch_add(1, Ordering::Relaxed);
                record_decode_error();
                return;
            }
        };
        self.metrics.frames.fetch_add(1, Ordering::Relaxed);

        // Only the session task assigns sequence numbers.
        let seq = self.next_seq.load(Ordering::Relaxed);
        match translator.translate(&frame, seq, Utc::now()) {
            Ok(Some(event)) => {
                self.next_seq.store(seq + 1, Ordering::Relaxed);
                self.metrics.events.fetch_add(1, Ordering::Relaxed);
                record_event_received(event.kind);
                trace!(seq, kind = %event.kind, call = %event.callsign, "source event");

                let event: SharedEvent = Arc::new(event);
                let subscribers = self
                    .subscribers
                    .read()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                for callback in subscribers.iter() {
                    callback(event.clone());
                }
            }
            Ok(None) => {
                self.metrics.frames_ignored.fetch_add(1, Ordering::Relaxed);
                record_frame_ignored();
                trace!(bytes = frame.len(), "ignoring frame without domain meaning");
            }
            Err(e) => {
                warn!(
                    error = %e,
                    frame = %String::from_utf8_lossy(&frame),
                    "dropping undecodable source frame"
                );
                self.metrics.decode_errors.fetch_add(1, Ordering::Relaxed);
                record_decode_error();
            }
        }
    }
}

/// How one connection attempt ended
enum SessionEnd {
    /// `stop()` was requested
    Cancelled,
    /// Never reached Connected
    ConnectFailed(ContractError),
    /// Was Connected, then closed or failed
    Ended {
        uptime: Duration,
        error: Option<ContractError>,
    },
}

struct Running {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Connection to the single telemetry source
///
/// # Example
///
/// ```ignore
/// let registry = HealthRegistry::new();
/// let mut source = SourceConnector::new(registry.clone());
/// let rx = source.channel(256);
/// source.start(config.source.clone())?;
/// while let Ok(event) = rx.recv().await {
///     // ...
/// }
/// ```
pub struct SourceConnector {
    shared: Arc<Shared>,
    running: Option<Running>,
    config: Option<SourceConfig>,
}

impl SourceConnector {
    /// Create a stopped connector; registers `"source"` as Disconnected
    pub fn new(registry: HealthRegistry) -> Self {
        registry.register(SOURCE_ID);
        Self {
            shared: Arc::new(Shared {
                registry,
                subscribers: RwLock::new(Vec::new()),
                metrics: SourceMetrics::default(),
                next_seq: AtomicU64::new(1),
            }),
            running: None,
            config: None,
        }
    }

    /// Register a callback for every translated event
    ///
    /// Called from the read loop; must not block.
    pub fn subscribe(&self, callback: EventCallback) {
        self.shared
            .subscribers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(callback);
    }

    /// Subscribe through a bounded channel
    ///
    /// When the channel is full the newest event is dropped and counted.
    pub fn channel(&self, capacity: usize) -> Receiver<SharedEvent> {
        let (tx, rx) = bounded(capacity.max(1));
        let shared = Arc::downgrade(&self.shared);
        self.subscribe(Arc::new(move |event: SharedEvent| {
            match tx.try_send(event) {
                Ok(()) => {}
                Err(TrySendError::Full(event)) => {
                    if let Some(shared) = shared.upgrade() {
                        shared.metrics.events_dropped.fetch_add(1, Ordering::Relaxed);
                    }
                    warn!(seq = event.seq, "source channel full, dropping event");
                }
                Err(TrySendError::Closed(_)) => {
                    trace!("source channel closed");
                }
            }
        }));
        rx
    }

    /// Spawn the connection loop
    #[instrument(name = "source_start", skip(self, config), fields(addr = %config.address(), transport = %config.transport))]
    pub fn start(&mut self, config: SourceConfig) -> Result<()> {
        if self
            .running
            .as_ref()
            .is_some_and(|running| !running.task.is_finished())
        {
            return Err(IngestionError::AlreadyRunning);
        }

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_source(
            config.clone(),
            self.shared.clone(),
            cancel.clone(),
        ));
        info!("source connector started");

        self.running = Some(Running { cancel, task });
        self.config = Some(config);
        Ok(())
    }

    /// Cancel the connection loop and wait for it to end
    ///
    /// The socket is released and Disconnected reported before returning.
    #[instrument(name = "source_stop", skip(self))]
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        running.cancel.cancel();
        if let Err(e) = running.task.await {
            error!(error = %e, "source task ended abnormally");
        }
        self.shared.report(ConnectionState::Disconnected, None);
        info!("source connector stopped");
    }

    /// Stop, then start with `config`
    pub async fn restart(&mut self, config: SourceConfig) -> Result<()> {
        self.stop().await;
        self.start(config)
    }

    /// Restart the connection loop if its task died
    ///
    /// The loop only ends on `stop()`, so a finished task has panicked. The
    /// panic is reported as Errored and the loop started again with the same
    /// configuration. Returns the reported error.
    #[instrument(name = "source_supervise", skip(self))]
    pub async fn supervise(&mut self) -> Option<String> {
        if !self
            .running
            .as_ref()
            .is_some_and(|running| running.task.is_finished())
        {
            return None;
        }
        let running = self.running.take()?;
        let message = match running.task.await {
            Ok(()) => "source task ended unexpectedly".to_string(),
            Err(e) if e.is_panic() => {
                format!("source task panicked: {}", panic_message(e.into_panic()))
            }
            Err(e) => format!("source task ended abnormally: {e}"),
        };
        error!(error = %message, "source task died, restarting");
        self.shared.report(ConnectionState::Errored, Some(message.clone()));

        if let Some(config) = self.config.clone() {
            if let Err(e) = self.start(config) {
                error!(error = %e, "failed to restart source connector");
            }
        }
        Some(message)
    }

    pub fn is_running(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|running| !running.task.is_finished())
    }

    /// Configuration of the current (or last) run
    pub fn config(&self) -> Option<&SourceConfig> {
        self.config.as_ref()
    }

    /// Current connection state as recorded in the health registry
    pub fn state(&self) -> ConnectionState {
        self.shared.registry.state(SOURCE_ID).unwrap_or_default()
    }

    pub fn metrics(&self) -> SourceMetricsSnapshot {
        self.shared.metrics.snapshot()
    }
}

impl Drop for SourceConnector {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            running.cancel.cancel();
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(message) => *message,
        Err(payload) => payload
            .downcast_ref::<&str>()
            .map(|message| message.to_string())
            .unwrap_or_else(|| "unknown panic".to_string()),
    }
}

async fn run_source(config: SourceConfig, shared: Arc<Shared>, cancel: CancellationToken) {
    let mut backoff = Backoff::new(config.backoff.unwrap_or_default());
    let translator = EventTranslator::from_config(&config);
    let target = config.address();

    loop {
        shared.report(ConnectionState::Connecting, None);
        debug!(target = %target, "connecting to source");

        let outcome = match config.transport {
            Transport::Tcp => tcp_session(&config, &shared, &translator, &cancel).await,
            Transport::Udp => udp_session(&config, &shared, &translator, &cancel).await,
        };

        match outcome {
            SessionEnd::Cancelled => break,
            SessionEnd::ConnectFailed(e) => {
                warn!(target = %target, error = %e, "source connect failed");
                shared.report(ConnectionState::Errored, Some(e.to_string()));
            }
            SessionEnd::Ended { uptime, error } => {
                match &error {
                    Some(e) => warn!(target = %target, error = %e, "source connection lost"),
                    None => info!(target = %target, "source closed the connection"),
                }
                shared.report(
                    ConnectionState::Disconnected,
                    error.map(|e| e.to_string()),
                );
                if backoff.session_ended(uptime) {
                    debug!(uptime_ms = uptime.as_millis() as u64, "backoff reset after stable session");
                }
            }
        }

        let delay = backoff.next_delay();
        debug!(delay_ms = delay.as_millis() as u64, "source reconnect backoff");
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = sleep(delay) => {}
        }
    }

    shared.report(ConnectionState::Disconnected, None);
}

async fn tcp_session(
    config: &SourceConfig,
    shared: &Shared,
    translator: &EventTranslator,
    cancel: &CancellationToken,
) -> SessionEnd {
    let target = config.address();
    let connect_timeout = Duration::from_millis(config.connect_timeout_ms);

    let stream = tokio::select! {
        _ = cancel.cancelled() => return SessionEnd::Cancelled,
        result = timeout(connect_timeout, TcpStream::connect(&target)) => match result {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return SessionEnd::ConnectFailed(ContractError::connection(&target, e.to_string()))
            }
            Err(_) => {
                return SessionEnd::ConnectFailed(ContractError::connection(
                    &target,
                    format!("connect timed out after {}ms", config.connect_timeout_ms),
                ))
            }
        },
    };

    if let Err(e) = stream.set_nodelay(true) {
        debug!(error = %e, "failed to set TCP_NODELAY");
    }
    shared.metrics.sessions.fetch_add(1, Ordering::Relaxed);
    shared.report(ConnectionState::Connected, None);
    info!(target = %target, "source connected");

    let started = Instant::now();
    let (mut reader, mut writer) = stream.into_split();
    let mut decoder = FrameDecoder::new(config.framing, config.max_frame_len);
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    let poll_request = encode_frame(config.framing, POLL_REQUEST);
    let mut poll = poll_timer(config.poll_interval_ms);

    let idle = Duration::from_millis(config.idle_timeout_ms);
    let idle_deadline = sleep(idle);
    tokio::pin!(idle_deadline);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return SessionEnd::Cancelled,
            result = reader.read(&mut buf) => match result {
                Ok(0) => {
                    return SessionEnd::Ended { uptime: started.elapsed(), error: None };
                }
                Ok(n) => {
                    idle_deadline.as_mut().reset(Instant::now() + idle);
                    shared.ingest(&buf[..n], &mut decoder, translator);
                }
                Err(e) => {
                    return SessionEnd::Ended {
                        uptime: started.elapsed(),
                        error: Some(ContractError::connection(&target, e.to_string())),
                    };
                }
            },
            _ = &mut idle_deadline => {
                return SessionEnd::Ended {
                    uptime: started.elapsed(),
                    error: Some(ContractError::IdleTimeout {
                        target: target.clone(),
                        idle_ms: config.idle_timeout_ms,
                    }),
                };
            }
            _ = next_tick(&mut poll) => {
                trace!("polling source frequency");
                let written = tokio::select! {
                    _ = cancel.cancelled() => return SessionEnd::Cancelled,
                    result = timeout(connect_timeout, writer.write_all(&poll_request)) => result,
                };
                match written {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        return SessionEnd::Ended {
                            uptime: started.elapsed(),
                            error: Some(ContractError::connection(&target, e.to_string())),
                        };
                    }
                    Err(_) => {
                        return SessionEnd::Ended {
                            uptime: started.elapsed(),
                            error: Some(ContractError::connection(&target, "poll request timed out")),
                        };
                    }
                }
            }
        }
    }
}

async fn udp_session(
    config: &SourceConfig,
    shared: &Shared,
    translator: &EventTranslator,
    cancel: &CancellationToken,
) -> SessionEnd {
    let target = config.address();

    let socket = tokio::select! {
        _ = cancel.cancelled() => return SessionEnd::Cancelled,
        result = UdpSocket::bind(&target) => match result {
            Ok(socket) => socket,
            Err(e) => {
                return SessionEnd::ConnectFailed(ContractError::connection(&target, e.to_string()))
            }
        },
    };

    shared.metrics.sessions.fetch_add(1, Ordering::Relaxed);
    shared.report(ConnectionState::Connected, None);
    info!(target = %target, "source socket bound");

    let started = Instant::now();
    let mut decoder = FrameDecoder::new(config.framing, config.max_frame_len);
    let mut buf = vec![0u8; DATAGRAM_BUFFER_SIZE];

    let idle = Duration::from_millis(config.idle_timeout_ms);
    let idle_deadline = sleep(idle);
    tokio::pin!(idle_deadline);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return SessionEnd::Cancelled,
            result = socket.recv_from(&mut buf) => match result {
                Ok((n, peer)) => {
                    trace!(bytes = n, peer = %peer, "datagram received");
                    idle_deadline.as_mut().reset(Instant::now() + idle);
                    shared.ingest_datagram(&buf[..n], &mut decoder, translator);
                }
                Err(e) => {
                    return SessionEnd::Ended {
                        uptime: started.elapsed(),
                        error: Some(ContractError::connection(&target, e.to_string())),
                    };
                }
            },
            _ = &mut idle_deadline => {
                return SessionEnd::Ended {
                    uptime: started.elapsed(),
                    error: Some(ContractError::IdleTimeout {
                        target: target.clone(),
                        idle_ms: config.idle_timeout_ms,
                    }),
                };
            }
        }
    }
}

fn poll_timer(poll_interval_ms: u64) -> Option<Interval> {
    if poll_interval_ms == 0 {
        return None;
    }
    let mut timer = interval(Duration::from_millis(poll_interval_ms));
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    Some(timer)
}

async fn next_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

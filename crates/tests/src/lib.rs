//! # Integration Tests
//!
//! 集成测试与端到端测试。
//!
//! 负责：
//! - 合约快照测试
//! - 回环套接字上的端到端场景（模拟 JS8Call + 下游工具）

#[cfg(test)]
mod contract_tests {
    use contracts::{DomainEvent, EventKind};

    #[test]
    fn test_domain_event_json_shape() {
        let event = DomainEvent::new(7, EventKind::GridUpdate, Default::default());
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["seq"], 7);
        assert_eq!(json["kind"], "grid_update");
        assert_eq!(json["mode"], "JS8");
        // raw bytes never leave the process as JSON
        assert!(json.get("raw").is_none());
    }
}

#[cfg(test)]
mod support {
    use std::time::Duration;

    use contracts::{BackoffConfig, ConnectionState, Encoding, SinkConfig, SourceConfig, StationConfig, Transport};
    use dispatcher::Dispatcher;
    use ingestion::SourceConnector;
    use observability::{HealthReader, HealthRegistry, Transition};
    use tokio::io::{AsyncBufReadExt, BufReader, Lines};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::broadcast::{self, error::RecvError};
    use tokio::task::JoinHandle;
    use tokio::time::{sleep, timeout, Instant};

    pub const WAIT: Duration = Duration::from_secs(5);
    const STEP: Duration = Duration::from_millis(10);

    pub type LineReader = Lines<BufReader<TcpStream>>;

    pub fn fast_backoff() -> BackoffConfig {
        BackoffConfig {
            initial_ms: 20,
            max_ms: 100,
            multiplier: 2.0,
            stable_after_ms: 1_000,
        }
    }

    pub fn source_config(port: u16, idle_timeout_ms: u64) -> SourceConfig {
        SourceConfig {
            host: "127.0.0.1".into(),
            port,
            idle_timeout_ms,
            poll_interval_ms: 0,
            backoff: Some(fast_backoff()),
            ..SourceConfig::default()
        }
    }

    pub fn tcp_sink(id: &str, port: u16, encoding: Encoding) -> SinkConfig {
        let mut sink = SinkConfig::new(id, Transport::Tcp, "127.0.0.1", port, encoding);
        sink.connect_timeout_ms = 500;
        sink.write_timeout_ms = 500;
        sink.backoff = Some(fast_backoff());
        sink
    }

    /// One JS8Call `RX.SPOT` frame, newline terminated
    pub fn spot(call: &str, grid: &str, freq: u64, snr: i32) -> String {
        format!(
            "{{\"type\":\"RX.SPOT\",\"value\":\"\",\"params\":{{\"CALL\":\"{call}\",\"GRID\":\"{grid}\",\"FREQ\":{freq},\"SNR\":{snr},\"SPEED\":0}}}}\n"
        )
    }

    pub async fn listener() -> (TcpListener, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    /// A port nothing listens on
    pub async fn closed_port() -> u16 {
        listener().await.1
    }

    pub async fn accept(listener: &TcpListener) -> TcpStream {
        let (stream, _) = timeout(WAIT, listener.accept())
            .await
            .expect("timed out waiting for a connection")
            .unwrap();
        stream
    }

    pub async fn accept_lines(listener: &TcpListener) -> LineReader {
        BufReader::new(accept(listener).await).lines()
    }

    pub async fn next_line(lines: &mut LineReader) -> String {
        timeout(WAIT, lines.next_line())
            .await
            .expect("timed out waiting for a line")
            .unwrap()
            .expect("stream closed")
    }

    pub async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + WAIT;
        while !condition() {
            assert!(Instant::now() < deadline, "timed out waiting for {what}");
            sleep(STEP).await;
        }
    }

    pub async fn wait_state(health: &HealthReader, id: &str, state: ConnectionState) {
        wait_until(&format!("{id} to become {state}"), || {
            health.get(id).map(|entry| entry.state) == Some(state)
        })
        .await;
    }

    /// Next transition of `id`, skipping other connections
    pub async fn next_transition(rx: &mut broadcast::Receiver<Transition>, id: &str) -> Transition {
        let deadline = Instant::now() + WAIT;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match timeout(remaining, rx.recv()).await {
                Ok(Ok(transition)) if transition.id == id => return transition,
                Ok(Ok(_)) | Ok(Err(RecvError::Lagged(_))) => continue,
                Ok(Err(RecvError::Closed)) => panic!("health registry dropped"),
                Err(_) => panic!("timed out waiting for a transition of {id}"),
            }
        }
    }

    /// Source connector + dispatcher wired the way the binary wires them
    pub struct Bridge {
        pub registry: HealthRegistry,
        pub source: SourceConnector,
        pub dispatcher: Dispatcher,
        task: JoinHandle<()>,
    }

    impl Bridge {
        pub async fn new(sinks: Vec<SinkConfig>) -> Self {
            Self::with_station(sinks, StationConfig::default()).await
        }

        pub async fn with_station(sinks: Vec<SinkConfig>, station: StationConfig) -> Self {
            let registry = HealthRegistry::new();
            let dispatcher = Dispatcher::new(registry.clone(), station, fast_backoff());
            dispatcher.apply(sinks).await;
            let source = SourceConnector::new(registry.clone());
            let rx = source.channel(256);
            let task = dispatcher.run(rx);
            Self {
                registry,
                source,
                dispatcher,
                task,
            }
        }

        pub fn health(&self) -> HealthReader {
            self.registry.reader()
        }

        /// Start the source against `js8call` and return the server side
        pub async fn connect_source(&mut self, js8call: &TcpListener, config: SourceConfig) -> TcpStream {
            self.source.start(config).unwrap();
            let stream = accept(js8call).await;
            wait_state(&self.health(), "source", ConnectionState::Connected).await;
            stream
        }

        pub async fn stop(mut self) {
            self.source.stop().await;
            self.dispatcher.shutdown().await;
            let _ = timeout(WAIT, self.task).await;
        }
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::time::Instant;

    use config_loader::{ConfigFormat, ConfigLoader};
    use contracts::{ConnectionState, DomainEvent, Encoding, SinkConfig, Transport};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::UdpSocket;
    use tokio::time::{sleep, timeout, Duration};

    use crate::support::*;

    /// JS8Call spot -> ADIF logger, configured from a TOML document
    ///
    /// 验证完整的数据流：
    /// 1. 模拟 JS8Call 发送 RX.SPOT
    /// 2. SourceConnector 解码为 StationHeard
    /// 3. Dispatcher 以 ADIF 记录写入 TCP sink
    #[tokio::test]
    async fn test_e2e_spot_to_adif() {
        let (js8call, js8_port) = listener().await;
        let (logger, logger_port) = listener().await;

        let toml = format!(
            r#"
[source]
host = "127.0.0.1"
port = {js8_port}
poll_interval_ms = 0

[station]
callsign = "W1AW"

[backoff]
initial_ms = 20
max_ms = 100

[[sinks]]
id = "adif"
host = "127.0.0.1"
port = {logger_port}
encoding = "adif"
"#
        );
        let config = ConfigLoader::load_from_str(&toml, ConfigFormat::Toml).unwrap();

        let mut bridge = Bridge::with_station(config.sinks.clone(), config.station.clone()).await;
        let mut records = accept_lines(&logger).await;
        wait_state(&bridge.health(), "adif", ConnectionState::Connected).await;

        let mut source = config.source.clone();
        source.backoff = Some(config.backoff);
        let mut server = bridge.connect_source(&js8call, source).await;
        server
            .write_all(spot("KK7JND", "DN17", 7_078_000, -12).as_bytes())
            .await
            .unwrap();

        let record = next_line(&mut records).await;
        assert!(record.contains("<CALL:6>KK7JND"), "{record}");
        assert!(record.contains("<GRIDSQUARE:4>DN17"), "{record}");
        assert!(record.contains("<FREQ:8>7.078000"), "{record}");
        assert!(record.contains("<MODE:3>JS8"), "{record}");
        assert!(record.contains("<RST_RCVD:3>-12"), "{record}");
        assert!(record.contains("<STATION_CALLSIGN:4>W1AW"), "{record}");
        assert!(record.ends_with("<EOR>"), "{record}");

        bridge.stop().await;
    }

    /// Every event arrives once, in source order
    #[tokio::test]
    async fn test_e2e_fifo_without_duplicates() {
        let (js8call, js8_port) = listener().await;
        let (tool, tool_port) = listener().await;

        let mut bridge = Bridge::new(vec![tcp_sink("json", tool_port, Encoding::Json)]).await;
        let mut lines = accept_lines(&tool).await;
        wait_state(&bridge.health(), "json", ConnectionState::Connected).await;

        let mut server = bridge
            .connect_source(&js8call, source_config(js8_port, 5_000))
            .await;

        const COUNT: usize = 50;
        let burst: String = (0..COUNT)
            .map(|i| spot(&format!("K{i:02}ABC"), "FN31", 14_078_000, 0))
            .collect();
        // split mid-frame so framing has to stitch chunks
        let (head, tail) = burst.split_at(burst.len() / 2 + 7);
        server.write_all(head.as_bytes()).await.unwrap();
        server.flush().await.unwrap();
        sleep(Duration::from_millis(20)).await;
        server.write_all(tail.as_bytes()).await.unwrap();

        let mut last_seq = 0;
        for i in 0..COUNT {
            let event: DomainEvent = serde_json::from_str(&next_line(&mut lines).await).unwrap();
            assert_eq!(event.callsign, format!("K{i:02}ABC"));
            assert!(event.seq > last_seq, "seq went backwards");
            last_seq = event.seq;
        }
        assert_eq!(bridge.source.metrics().events, COUNT as u64);

        bridge.stop().await;
    }

    /// Malformed and unknown frames are dropped, the stream continues
    #[tokio::test]
    async fn test_e2e_malformed_frame_does_not_halt_stream() {
        let (js8call, js8_port) = listener().await;
        let (tool, tool_port) = listener().await;

        let mut bridge = Bridge::new(vec![tcp_sink("json", tool_port, Encoding::Json)]).await;
        let mut lines = accept_lines(&tool).await;
        wait_state(&bridge.health(), "json", ConnectionState::Connected).await;

        let mut server = bridge
            .connect_source(&js8call, source_config(js8_port, 5_000))
            .await;

        let frames = [
            spot("W1AW", "FN31", 7_078_000, 5),
            "{not json at all\n".to_string(),
            "{\"type\":\"RX.ACTIVITY\",\"value\":\"hello\",\"params\":{}}\n".to_string(),
            "\n".to_string(),
            spot("KK7JND", "DN17", 7_078_000, -12),
        ];
        for frame in &frames {
            server.write_all(frame.as_bytes()).await.unwrap();
        }

        let first: DomainEvent = serde_json::from_str(&next_line(&mut lines).await).unwrap();
        let second: DomainEvent = serde_json::from_str(&next_line(&mut lines).await).unwrap();
        assert_eq!(first.callsign, "W1AW");
        assert_eq!(second.callsign, "KK7JND");

        let metrics = bridge.source.metrics();
        assert_eq!(metrics.decode_errors, 1);
        assert_eq!(metrics.frames_ignored, 1);
        assert_eq!(metrics.events, 2);
        assert_eq!(bridge.source.state(), ConnectionState::Connected);

        bridge.stop().await;
    }

    /// Silent source: Disconnected within one idle window, then Connecting;
    /// sinks are not touched
    #[tokio::test]
    async fn test_e2e_source_idle_and_drop_leave_sinks_alone() {
        const IDLE_MS: u64 = 300;
        let (js8call, js8_port) = listener().await;
        let (tool, tool_port) = listener().await;

        let mut bridge = Bridge::new(vec![tcp_sink("logger", tool_port, Encoding::Adif)]).await;
        let _lines = accept_lines(&tool).await;
        let health = bridge.health();
        wait_state(&health, "logger", ConnectionState::Connected).await;
        let sink_before = health.get("logger").unwrap();

        let mut transitions = bridge.registry.subscribe();
        let server = bridge
            .connect_source(&js8call, source_config(js8_port, IDLE_MS))
            .await;
        let connected_at = Instant::now();

        loop {
            let t = next_transition(&mut transitions, "source").await;
            if t.to == ConnectionState::Disconnected {
                let error = t.error.unwrap_or_default();
                assert!(error.contains("idle timeout"), "{error}");
                break;
            }
        }
        let elapsed = connected_at.elapsed();
        assert!(
            elapsed < Duration::from_millis(IDLE_MS + 1_000),
            "idle detection took {elapsed:?}"
        );
        assert_eq!(
            next_transition(&mut transitions, "source").await.to,
            ConnectionState::Connecting
        );

        // reconnect, then the peer closes
        drop(server);
        let server = accept(&js8call).await;
        assert_eq!(
            next_transition(&mut transitions, "source").await.to,
            ConnectionState::Connected
        );
        drop(server);
        assert_eq!(
            next_transition(&mut transitions, "source").await.to,
            ConnectionState::Disconnected
        );

        let sink_after = health.get("logger").unwrap();
        assert_eq!(sink_after.state, ConnectionState::Connected);
        assert_eq!(sink_after.transitions, sink_before.transitions);
        assert!(bridge.source.metrics().sessions >= 2);

        bridge.stop().await;
    }

    /// One sink unreachable: the other still gets every event
    #[tokio::test]
    async fn test_e2e_two_sinks_one_unreachable() {
        let (js8call, js8_port) = listener().await;
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let map_port = receiver.local_addr().unwrap().port();

        let mut map = SinkConfig::new("map", Transport::Udp, "127.0.0.1", map_port, Encoding::Json);
        map.backoff = Some(fast_backoff());
        let n1mm = tcp_sink("n1mm", closed_port().await, Encoding::Adif);

        let mut bridge = Bridge::new(vec![map, n1mm]).await;
        let health = bridge.health();
        wait_state(&health, "map", ConnectionState::Connected).await;
        wait_until("n1mm to report an error", || {
            health
                .get("n1mm")
                .is_some_and(|e| e.last_error.is_some() && e.state != ConnectionState::Connected)
        })
        .await;

        let mut server = bridge
            .connect_source(&js8call, source_config(js8_port, 5_000))
            .await;
        server
            .write_all(spot("KK7JND", "DN17", 7_078_000, -12).as_bytes())
            .await
            .unwrap();

        let mut buf = vec![0u8; 4096];
        let n = timeout(WAIT, receiver.recv(&mut buf)).await.unwrap().unwrap();
        let event: DomainEvent = serde_json::from_slice(&buf[..n]).unwrap();
        assert_eq!(event.callsign, "KK7JND");
        assert_eq!(event.grid.as_deref(), Some("DN17"));

        let dispatcher = bridge.dispatcher.clone();
        wait_until("the offline sink to count a missed event", || {
            dispatcher
                .metrics()
                .iter()
                .any(|(id, m)| id == "n1mm" && m.missed_count >= 1)
        })
        .await;
        assert_ne!(health.get("n1mm").unwrap().state, ConnectionState::Connected);

        bridge.stop().await;
    }

    /// Re-pointing one sink leaves the other's connection alone
    #[tokio::test]
    async fn test_e2e_reconfigure_one_sink() {
        let (js8call, js8_port) = listener().await;
        let (tool_a, port_a) = listener().await;
        let (tool_b, port_b) = listener().await;
        let (tool_c, port_c) = listener().await;

        let a = tcp_sink("a", port_a, Encoding::Json);
        let b = tcp_sink("b", port_b, Encoding::Json);
        let mut bridge = Bridge::new(vec![a.clone(), b.clone()]).await;
        let health = bridge.health();
        let mut lines_a = accept_lines(&tool_a).await;
        let mut lines_b = accept_lines(&tool_b).await;
        wait_state(&health, "a", ConnectionState::Connected).await;
        wait_state(&health, "b", ConnectionState::Connected).await;

        let mut server = bridge
            .connect_source(&js8call, source_config(js8_port, 5_000))
            .await;
        server
            .write_all(spot("W1AW", "FN31", 7_078_000, 1).as_bytes())
            .await
            .unwrap();
        assert!(next_line(&mut lines_a).await.contains("W1AW"));
        assert!(next_line(&mut lines_b).await.contains("W1AW"));
        let a_transitions = health.get("a").unwrap().transitions;

        let mut moved = b.clone();
        moved.port = port_c;
        let report = bridge.dispatcher.apply(vec![a.clone(), moved]).await;
        assert_eq!(report.unchanged, vec!["a".to_string()]);
        assert_eq!(report.restarted, vec!["b".to_string()]);

        // old b connection is closed
        assert!(timeout(WAIT, lines_b.next_line()).await.unwrap().unwrap().is_none());
        let mut lines_c = accept_lines(&tool_c).await;
        wait_state(&health, "b", ConnectionState::Connected).await;

        server
            .write_all(spot("KK7JND", "DN17", 7_078_000, -12).as_bytes())
            .await
            .unwrap();
        assert!(next_line(&mut lines_a).await.contains("KK7JND"));
        assert!(next_line(&mut lines_c).await.contains("KK7JND"));

        assert_eq!(health.get("a").unwrap().transitions, a_transitions);
        assert!(
            timeout(Duration::from_millis(100), tool_a.accept()).await.is_err(),
            "sink a must not reconnect"
        );

        bridge.stop().await;
    }

    /// Events broadcast while a sink is down are never replayed
    #[tokio::test]
    async fn test_e2e_no_replay_after_reconnect() {
        let (js8call, js8_port) = listener().await;
        let (tool, tool_port) = listener().await;

        let mut bridge = Bridge::new(vec![tcp_sink("gt", tool_port, Encoding::Json)]).await;
        let health = bridge.health();
        let mut lines = accept_lines(&tool).await;
        wait_state(&health, "gt", ConnectionState::Connected).await;

        let mut server = bridge
            .connect_source(&js8call, source_config(js8_port, 5_000))
            .await;
        server
            .write_all(spot("W1AW", "FN31", 7_078_000, 1).as_bytes())
            .await
            .unwrap();
        assert!(next_line(&mut lines).await.contains("W1AW"));

        // the tool goes away; keep talking until the sink notices
        drop(lines);
        drop(tool);
        let deadline = Instant::now() + WAIT;
        let mut lost = 0;
        while health.get("gt").map(|e| e.state) == Some(ConnectionState::Connected) {
            assert!(Instant::now() < deadline, "sink never noticed the closed peer");
            server
                .write_all(spot(&format!("LOST{lost}"), "AA00", 7_078_000, 0).as_bytes())
                .await
                .unwrap();
            lost += 1;
            sleep(Duration::from_millis(50)).await;
        }
        for i in 0..3 {
            server
                .write_all(spot(&format!("DOWN{i}"), "AA00", 7_078_000, 0).as_bytes())
                .await
                .unwrap();
        }

        let tool = tokio::net::TcpListener::bind(("127.0.0.1", tool_port))
            .await
            .unwrap();
        let mut lines = accept_lines(&tool).await;
        wait_state(&health, "gt", ConnectionState::Connected).await;

        server
            .write_all(spot("KK7JND", "DN17", 7_078_000, -12).as_bytes())
            .await
            .unwrap();
        let first: DomainEvent = serde_json::from_str(&next_line(&mut lines).await).unwrap();
        assert_eq!(first.callsign, "KK7JND");

        bridge.stop().await;
    }

    /// Shutdown releases every socket
    #[tokio::test]
    async fn test_e2e_shutdown_closes_connections() {
        let (js8call, js8_port) = listener().await;
        let (tool, tool_port) = listener().await;

        let mut bridge = Bridge::new(vec![tcp_sink("adif", tool_port, Encoding::Adif)]).await;
        let mut sink_peer = accept(&tool).await;
        wait_state(&bridge.health(), "adif", ConnectionState::Connected).await;
        let mut source_peer = bridge
            .connect_source(&js8call, source_config(js8_port, 5_000))
            .await;

        let health = bridge.health();
        bridge.stop().await;

        let mut buf = [0u8; 16];
        assert_eq!(timeout(WAIT, sink_peer.read(&mut buf)).await.unwrap().unwrap(), 0);
        assert_eq!(timeout(WAIT, source_peer.read(&mut buf)).await.unwrap().unwrap(), 0);
        assert_eq!(health.get("source").unwrap().state, ConnectionState::Disconnected);
        assert_eq!(health.get("adif").unwrap().state, ConnectionState::Disconnected);
    }
}

//! NetworkSink - TCP stream or UDP datagram link to one downstream tool

use std::time::Duration;

use contracts::{ContractError, EventSink, SinkConfig, Transport};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;
use tracing::{debug, instrument, trace};

enum Link {
    Tcp(TcpStream),
    Udp(UdpSocket),
}

/// Sink that writes encoded records to a TCP or UDP endpoint
///
/// UDP is connected to its target so that ICMP "port unreachable" surfaces
/// as a write error on the next send.
pub struct NetworkSink {
    name: String,
    transport: Transport,
    addr: String,
    connect_timeout: Duration,
    link: Option<Link>,
}

impl NetworkSink {
    pub fn new(
        name: impl Into<String>,
        transport: Transport,
        addr: impl Into<String>,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            transport,
            addr: addr.into(),
            connect_timeout,
            link: None,
        }
    }

    pub fn from_config(config: &SinkConfig) -> Self {
        Self::new(
            &config.id,
            config.transport,
            config.address(),
            Duration::from_millis(config.connect_timeout_ms),
        )
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    async fn open(&self) -> Result<Link, ContractError> {
        let link_error = |message: String| ContractError::sink_connection(&self.name, message);

        match self.transport {
            Transport::Tcp => {
                let stream = timeout(self.connect_timeout, TcpStream::connect(&self.addr))
                    .await
                    .map_err(|_| {
                        link_error(format!(
                            "connect to {} timed out after {}ms",
                            self.addr,
                            self.connect_timeout.as_millis()
                        ))
                    })?
                    .map_err(|e| link_error(format!("connect to {}: {e}", self.addr)))?;
                if let Err(e) = stream.set_nodelay(true) {
                    debug!(sink = %self.name, error = %e, "failed to set TCP_NODELAY");
                }
                Ok(Link::Tcp(stream))
            }
            Transport::Udp => {
                let socket = UdpSocket::bind("0.0.0.0:0")
                    .await
                    .map_err(|e| link_error(format!("bind: {e}")))?;
                socket
                    .connect(&self.addr)
                    .await
                    .map_err(|e| link_error(format!("connect to {}: {e}", self.addr)))?;
                Ok(Link::Udp(socket))
            }
        }
    }
}

impl EventSink for NetworkSink {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        name = "network_sink_connect",
        skip(self),
        fields(sink = %self.name, addr = %self.addr, transport = %self.transport)
    )]
    async fn connect(&mut self) -> Result<(), ContractError> {
        let link = self.open().await?;
        self.link = Some(link);
        debug!(sink = %self.name, "NetworkSink connected");
        Ok(())
    }

    async fn write(&mut self, payload: &[u8]) -> Result<(), ContractError> {
        let name = &self.name;
        match self.link.as_mut() {
            Some(Link::Tcp(stream)) => stream
                .write_all(payload)
                .await
                .map_err(|e| ContractError::sink_write(name, e.to_string())),
            Some(Link::Udp(socket)) => {
                let sent = socket
                    .send(payload)
                    .await
                    .map_err(|e| ContractError::sink_write(name, e.to_string()))?;
                trace!(sink = %name, bytes = sent, "datagram sent");
                Ok(())
            }
            None => Err(ContractError::sink_write(name, "not connected")),
        }
    }

    #[instrument(name = "network_sink_close", skip(self), fields(sink = %self.name))]
    async fn close(&mut self) -> Result<(), ContractError> {
        if let Some(Link::Tcp(mut stream)) = self.link.take() {
            // Peer may already be gone
            let _ = stream.shutdown().await;
        }
        debug!(sink = %self.name, "NetworkSink closed");
        Ok(())
    }
}

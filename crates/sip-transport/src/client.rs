use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::message::{ControlRequest, allow_body, parse_status_code};

/// Status reported when the peer could not be reached or answered garbage
pub const SERVICE_UNAVAILABLE: u16 = 503;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

const MAX_DATAGRAM: usize = 2048;

/// Sends one control request per call over a fresh UDP socket
#[derive(Debug, Clone)]
pub struct ControlClient {
    timeout: Duration,
}

impl Default for ControlClient {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl ControlClient {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Ask the peer at `host` (`ip:port` or `name:port`) to allow traffic from `ip`.
    ///
    /// Never fails: errors are logged and reported as [`SERVICE_UNAVAILABLE`].
    pub async fn allow_ip(&self, host: &str, ip: &str) -> u16 {
        match self.send_message(host, allow_body(ip)).await {
            Ok(code) => {
                info!("allow {} via {} answered {}", ip, host, code);
                code
            }
            Err(e) => {
                warn!("allow {} via {} failed: {}", ip, host, e);
                SERVICE_UNAVAILABLE
            }
        }
    }

    /// Send a MESSAGE with a JSON body and return the status code of the first answer
    pub async fn send_message(&self, host: &str, body: String) -> Result<u16> {
        let peer = resolve(host).await?;
        let bind_addr: SocketAddr = if peer.is_ipv4() {
            "0.0.0.0:0".parse().map_err(|_| Error::InvalidAddress(host.to_string()))?
        } else {
            "[::]:0".parse().map_err(|_| Error::InvalidAddress(host.to_string()))?
        };

        let socket = UdpSocket::bind(bind_addr).await?;
        socket.connect(peer).await?;
        let request = ControlRequest::new(host, socket.local_addr()?, body);
        let wire = request.to_wire();
        debug!("Sending MESSAGE to {} (call-id {}):\n{}", peer, request.call_id, wire);
        socket.send(wire.as_bytes()).await?;

        let mut buf = vec![0u8; MAX_DATAGRAM];
        let len = tokio::time::timeout(self.timeout, socket.recv(&mut buf))
            .await
            .map_err(|_| Error::Timeout(self.timeout))??;
        parse_status_code(&buf[..len])
    }
}

async fn resolve(host: &str) -> Result<SocketAddr> {
    tokio::net::lookup_host(host)
        .await
        .map_err(|_| Error::InvalidAddress(host.to_string()))?
        .next()
        .ok_or_else(|| Error::InvalidAddress(host.to_string()))
}

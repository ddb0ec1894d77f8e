/*!
 * Request Client
 * Request/reply socket semantics with bounded timeouts
 */

use super::types::{Message, TransportError, TransportResult};
use super::wire;
use crate::core::limits::REQUEST_TIMEOUT;
use log::debug;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time;

/// Shared messaging handle.
///
/// Created once by the owning control-plane server and threaded into the
/// registry and every supervised process. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Transport {
    request_timeout: Duration,
}

impl Transport {
    pub fn new() -> Self {
        Self {
            request_timeout: REQUEST_TIMEOUT,
        }
    }

    /// Override the default request/reply bound.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Connect to `addr`, send one request, and await one reply.
    ///
    /// The whole round trip is bounded by `timeout`: the call always returns
    /// within it, either with the decoded reply or an explicit failure.
    pub async fn request(
        &self,
        addr: &str,
        msg: &Message,
        timeout: Duration,
    ) -> TransportResult<Message> {
        let exchange = async {
            let mut stream =
                TcpStream::connect(addr)
                    .await
                    .map_err(|e| TransportError::Connect {
                        addr: addr.to_string(),
                        details: e.to_string(),
                    })?;
            wire::write_message(&mut stream, addr, msg).await?;
            wire::read_message(&mut stream, addr).await
        };

        match time::timeout(timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout {
                addr: addr.to_string(),
                timeout,
            }),
        }
    }

    /// `request` with this handle's default bound.
    pub async fn request_default(&self, addr: &str, msg: &Message) -> TransportResult<Message> {
        self.request(addr, msg, self.request_timeout).await
    }
}

impl Default for Transport {
    fn default() -> Self {
        Self::new()
    }
}

/// Outbound health-check channel to a registered peer.
///
/// Holds the reply addresses the peer reported at registration; a ping is
/// answered by whichever address replies first.
#[derive(Debug, Clone)]
pub struct PingChannel {
    transport: Transport,
    addrs: Vec<String>,
}

impl PingChannel {
    pub fn new(transport: Transport, addrs: Vec<String>) -> Self {
        Self { transport, addrs }
    }

    pub fn addrs(&self) -> &[String] {
        &self.addrs
    }

    /// Send one ping. Any decoded reply counts as liveness.
    pub async fn ping(&self, timeout: Duration) -> TransportResult<Message> {
        let mut last_err = TransportError::Timeout {
            addr: "<no addresses>".to_string(),
            timeout,
        };
        for addr in &self.addrs {
            match self.transport.request(addr, &Message::Ping, timeout).await {
                Ok(reply) => return Ok(reply),
                Err(e) => {
                    debug!("Ping to {} failed: {}", addr, e);
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }
}

/*!
 * Reply Listener
 * Reply side of the request/reply socket pair
 */

use super::types::{Message, TransportError};
use super::wire;
use log::{debug, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Computes the reply for one incoming request.
pub type ReplyHandler = Arc<dyn Fn(Message) -> Message + Send + Sync>;

/// Accepts connections on a local address and answers every request frame
/// through a handler. Used by peers that must respond to launch/kill/ping
/// requests, and by tests standing in for such peers.
pub struct ReplyListener {
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl ReplyListener {
    /// Bind `addr` (e.g. `127.0.0.1:0`) and start serving.
    pub async fn bind(addr: &str, handler: ReplyHandler) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(accept_loop(listener, handler, shutdown_rx));
        info!("Reply listener bound on {}", local_addr);

        Ok(Self {
            local_addr,
            shutdown_tx,
            handle: Some(handle),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Address string peers can connect to.
    pub fn contact_addr(&self) -> String {
        self.local_addr.to_string()
    }

    /// Stop accepting and wait for the accept loop to exit.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!("Reply listener shutdown error: {}", e);
            }
        }
    }
}

impl Drop for ReplyListener {
    fn drop(&mut self) {
        // Best-effort stop if shutdown() was never awaited
        if self.handle.is_some() {
            let _ = self.shutdown_tx.send(true);
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    handler: ReplyHandler,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        tokio::spawn(serve_connection(stream, peer, handler.clone()));
                    }
                    Err(e) => warn!("Accept failed: {}", e),
                }
            }
        }
    }
    debug!("Reply listener stopped");
}

/// One connection may carry any number of request frames; corruption drops
/// the connection, never the listener.
async fn serve_connection(mut stream: TcpStream, peer: SocketAddr, handler: ReplyHandler) {
    let addr = peer.to_string();
    loop {
        let request = match wire::read_message(&mut stream, &addr).await {
            Ok(msg) => msg,
            Err(TransportError::Io { .. }) => break,
            Err(e) => {
                debug!("Dropping connection from {}: {}", addr, e);
                break;
            }
        };
        debug!("Request from {}: {}", addr, request.kind());

        let reply = handler(request);
        if let Err(e) = wire::write_message(&mut stream, &addr, &reply).await {
            debug!("Reply to {} failed: {}", addr, e);
            break;
        }
    }
}

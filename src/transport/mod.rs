/*!
 * Transport Module
 * Request/reply messaging between control-plane peers
 */

pub mod client;
pub mod server;
pub mod types;
pub mod wire;

// Re-export for convenience
pub use client::{PingChannel, Transport};
pub use server::{ReplyHandler, ReplyListener};
pub use types::{Message, TransportError, TransportResult};

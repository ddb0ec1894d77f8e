/*!
 * Warden Library
 * Process supervision and health monitoring for a distributed control plane
 */

pub mod core;
pub mod process;
pub mod transport;

// Re-exports
pub use process::{
    CaptureIo, LaunchConfig, LocalProcess, Monitoring, ProcessDescription, ProcessError,
    ProcessHandle, ProcessKey, ProcessRegistry, ProcessResult, ProcessState, RegistrationData,
    RemoteProcess, StatusDetail, TimeoutAction,
};
pub use transport::{
    Message, PingChannel, ReplyHandler, ReplyListener, Transport, TransportError, TransportResult,
};

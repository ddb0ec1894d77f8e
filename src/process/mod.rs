/*!
 * Process Module
 * Supervised process variants, monitoring, and the registry
 */

pub mod io;
pub mod local;
pub(crate) mod monitor;
pub mod registry;
pub mod remote;
pub mod types;

// Re-export for convenience
pub use io::IoCapture;
pub use local::LocalProcess;
pub use registry::{ProcessHandle, ProcessKey, ProcessRegistry};
pub use remote::RemoteProcess;
pub use types::{
    CaptureIo, LaunchConfig, Monitoring, ProcessDescription, ProcessError, ProcessResult,
    ProcessState, RegistrationData, StatusDetail, TimeoutAction, TimeoutCallback,
};

/*!
 * Process Types
 * Common types for process supervision
 */

use crate::core::limits::REGISTER_TIMEOUT;
use crate::core::types::{Machine, Pid};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Process operation result
pub type ProcessResult<T> = Result<T, ProcessError>;

/// Process errors
#[derive(Error, Debug, Clone)]
pub enum ProcessError {
    #[error("Spawn failed: {0}")]
    SpawnFailed(String),

    #[error("Peer {addr} unreachable: {details}")]
    PeerUnreachable { addr: String, details: String },

    #[error("Remote launch refused: {err_code}: {details}")]
    LaunchRefused { err_code: String, details: String },

    #[error("Unexpected reply to {request}: {details}")]
    UnexpectedReply { request: String, details: String },

    #[error("Kill request failed: {0}")]
    KillFailed(String),
}

/// Supervised process status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    /// Spawned but not yet registered back
    Unknown,
    /// Alive as far as the supervisor can tell
    Running,
    /// Exited with a non-zero code, or missed its registration deadline
    Failed,
    /// Exited cleanly
    Finished,
    /// Ended by a signal or by the supervisor
    Terminated,
    /// Ping retry budget exhausted without a reply
    NonResponsive,
}

impl ProcessState {
    /// Terminal states admit no further transitions for this instance.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProcessState::Failed | ProcessState::Finished | ProcessState::Terminated
        )
    }
}

/// Diagnostic payload attached to a status transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusDetail {
    /// Magnitude of the signal that ended the process
    Signal(i32),
    /// Tail of captured stdout at failure time
    OutputTail(String),
    /// Human-readable diagnostic
    Message(String),
}

/// Per-stream I/O capture selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureIo {
    pub stdout: bool,
    pub stderr: bool,
    pub stdin: bool,
}

impl CaptureIo {
    pub fn none() -> Self {
        Self {
            stdout: false,
            stderr: false,
            stdin: false,
        }
    }

    pub fn stdout_stdin() -> Self {
        Self {
            stdout: true,
            stderr: false,
            stdin: true,
        }
    }

    pub fn all() -> Self {
        Self {
            stdout: true,
            stderr: true,
            stdin: true,
        }
    }

    pub fn captures_any(&self) -> bool {
        self.stdout || self.stderr || self.stdin
    }
}

impl Default for CaptureIo {
    fn default() -> Self {
        Self::stdout_stdin()
    }
}

/// Monitor loop selection for a supervised process.
///
/// Remote processes never returncode-poll regardless of this value; the
/// peer that owns the native handle does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Monitoring {
    pub ping: bool,
    pub returncode: bool,
}

impl Monitoring {
    pub fn none() -> Self {
        Self {
            ping: false,
            returncode: false,
        }
    }

    pub fn ping_only() -> Self {
        Self {
            ping: true,
            returncode: false,
        }
    }

    pub fn returncode_only() -> Self {
        Self {
            ping: false,
            returncode: true,
        }
    }
}

impl Default for Monitoring {
    fn default() -> Self {
        Self {
            ping: true,
            returncode: true,
        }
    }
}

/// Immutable identity record for a supervised unit.
///
/// Only `pid` is ever updated, exactly once, when it first becomes known:
/// at spawn time for local processes, at the remote launch acknowledgment
/// for remote ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessDescription {
    pub proc_type: String,
    pub name: String,
    pub path: String,
    pub args: Vec<String>,
    pub machine: Machine,
    pub pid: Option<Pid>,
}

impl ProcessDescription {
    pub fn new(
        proc_type: impl Into<String>,
        name: impl Into<String>,
        path: impl Into<String>,
        args: Vec<String>,
        machine: Machine,
        pid: Option<Pid>,
    ) -> Self {
        Self {
            proc_type: proc_type.into(),
            name: name.into(),
            path: path.into(),
            args,
            machine,
            pid,
        }
    }
}

/// Callback run when a timer fires
pub type TimeoutCallback = Arc<dyn Fn() + Send + Sync>;

/// A timeout paired with the action to run on expiry.
///
/// Used for the registration deadline and for generic timer-driven actions;
/// the action defaults to a no-op.
#[derive(Clone)]
pub struct TimeoutAction {
    pub after: Duration,
    callback: Option<TimeoutCallback>,
}

impl TimeoutAction {
    pub fn after(after: Duration) -> Self {
        Self {
            after,
            callback: None,
        }
    }

    /// Default registration deadline.
    pub fn register_default() -> Self {
        Self::after(REGISTER_TIMEOUT)
    }

    #[must_use]
    pub fn with_callback(mut self, callback: TimeoutCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    pub(crate) fn run_callback(&self) {
        if let Some(callback) = &self.callback {
            callback();
        }
    }
}

impl fmt::Debug for TimeoutAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimeoutAction")
            .field("after", &self.after)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

/// Payload a newly spawned unit reports back during registration
#[derive(Debug, Clone, Default)]
pub struct RegistrationData {
    pub machine: Option<Machine>,
    pub pid: Option<Pid>,
    /// Reply addresses the ping monitor should target
    pub rep_addrs: Vec<String>,
}

/// Launch parameters for a supervised process
#[derive(Debug, Clone)]
pub struct LaunchConfig {
    pub path: String,
    pub args: Vec<String>,
    pub proc_type: String,
    pub name: String,
    pub capture_io: CaptureIo,
    pub stdout_log: Option<PathBuf>,
    pub stderr_log: Option<PathBuf>,
    pub register_timeout: Option<TimeoutAction>,
    pub monitoring: Monitoring,
    pub machine: Option<Machine>,
    pub env: Vec<(String, String)>,
}

impl LaunchConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            args: vec![],
            proc_type: String::new(),
            name: String::new(),
            capture_io: CaptureIo::default(),
            stdout_log: None,
            stderr_log: None,
            register_timeout: None,
            monitoring: Monitoring::default(),
            machine: None,
            env: vec![],
        }
    }

    #[must_use]
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    #[must_use]
    pub fn with_proc_type(mut self, proc_type: impl Into<String>) -> Self {
        self.proc_type = proc_type.into();
        self
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub fn with_capture_io(mut self, capture_io: CaptureIo) -> Self {
        self.capture_io = capture_io;
        self
    }

    #[must_use]
    pub fn with_logs(mut self, stdout_log: Option<PathBuf>, stderr_log: Option<PathBuf>) -> Self {
        self.stdout_log = stdout_log;
        self.stderr_log = stderr_log;
        self
    }

    #[must_use]
    pub fn with_register_timeout(mut self, action: TimeoutAction) -> Self {
        self.register_timeout = Some(action);
        self
    }

    #[must_use]
    pub fn with_monitoring(mut self, monitoring: Monitoring) -> Self {
        self.monitoring = monitoring;
        self
    }

    #[must_use]
    pub fn on_machine(mut self, machine: impl Into<Machine>) -> Self {
        self.machine = Some(machine.into());
        self
    }

    #[must_use]
    pub fn with_env(mut self, env: Vec<(String, String)>) -> Self {
        self.env = env;
        self
    }

    /// Explicit name, or the path's file stem when none was given.
    pub(crate) fn resolved_name(&self) -> String {
        if !self.name.is_empty() {
            return self.name.clone();
        }
        Path::new(&self.path)
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(ProcessState::Failed.is_terminal());
        assert!(ProcessState::Finished.is_terminal());
        assert!(ProcessState::Terminated.is_terminal());
        assert!(!ProcessState::Unknown.is_terminal());
        assert!(!ProcessState::Running.is_terminal());
        assert!(!ProcessState::NonResponsive.is_terminal());
    }

    #[test]
    fn test_capture_defaults() {
        let capture = CaptureIo::default();
        assert!(capture.stdout);
        assert!(!capture.stderr);
        assert!(capture.stdin);
        assert!(capture.captures_any());
        assert!(!CaptureIo::none().captures_any());
    }

    #[test]
    fn test_launch_config_builder() {
        let config = LaunchConfig::new("/opt/analysis/run.py")
            .with_args(vec!["--fast".to_string()])
            .with_proc_type("analysis")
            .with_monitoring(Monitoring::ping_only());

        assert_eq!(config.args, vec!["--fast"]);
        assert_eq!(config.resolved_name(), "run");
        assert!(config.monitoring.ping);
        assert!(!config.monitoring.returncode);
    }

    #[test]
    fn test_resolved_name_prefers_explicit() {
        let config = LaunchConfig::new("/bin/sleep").with_name("napper");
        assert_eq!(config.resolved_name(), "napper");
    }

    #[test]
    fn test_timeout_action_default_callback_is_noop() {
        let action = TimeoutAction::after(Duration::from_millis(10));
        action.run_callback();
    }

    #[test]
    fn test_register_default_uses_engine_deadline() {
        assert_eq!(TimeoutAction::register_default().after, REGISTER_TIMEOUT);
    }
}

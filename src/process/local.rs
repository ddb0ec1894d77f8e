/*!
 * Local Process
 * A supervised unit backed by a native child process on this machine
 */

use super::io::IoCapture;
use super::monitor::MonitorCore;
use super::types::{
    LaunchConfig, ProcessDescription, ProcessError, ProcessResult, ProcessState, RegistrationData,
    StatusDetail,
};
use crate::core::limits::{DEFAULT_TAIL_LINES, FAILURE_TAIL_LINES, RETURNCODE_POLL_INTERVAL};
use crate::core::types::{local_machine, Machine, Pid};
use crate::transport::Transport;
use log::{debug, info, warn};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::time::sleep;

/// Script extensions dispatched through their canonical interpreter
const INTERPRETERS: &[(&str, &str)] = &[(".py", "python3"), (".sh", "sh")];

/// A native process spawned and exclusively owned by this supervisor.
///
/// The child handle and its captured pipes never leave this struct; all
/// interaction goes through the supervision contract.
pub struct LocalProcess {
    core: Arc<MonitorCore>,
    pid: Pid,
    child: tokio::sync::Mutex<Child>,
    io: Option<IoCapture>,
}

impl std::fmt::Debug for LocalProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalProcess")
            .field("pid", &self.pid)
            .field("has_io", &self.io.is_some())
            .finish()
    }
}

impl LocalProcess {
    /// Spawn a native process and wrap it in a supervised unit.
    ///
    /// Spawn refusals come back as values, never as panics. Must be called
    /// from within a Tokio runtime (the child is driven by the reactor).
    pub fn spawn(config: LaunchConfig, transport: Transport) -> ProcessResult<Arc<Self>> {
        let machine = config.machine.clone().unwrap_or_else(local_machine);
        let name = config.resolved_name();
        info!("{} local path: {}", config.proc_type, config.path);

        let capture = config.capture_io;
        // A lone stdout request still pipes stderr so the child's
        // diagnostics land in the same captured stream.
        let pipe_stderr = capture.stderr || capture.stdout;
        let stderr_merged = capture.stdout && !capture.stderr;

        let mut command = build_command(&config);
        command.stdout(if capture.stdout {
            Stdio::piped()
        } else {
            Stdio::inherit()
        });
        command.stderr(if pipe_stderr {
            Stdio::piped()
        } else {
            Stdio::inherit()
        });
        command.stdin(if capture.stdin {
            Stdio::piped()
        } else {
            Stdio::inherit()
        });

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                let details = format!(
                    "{}: unable to spawn process {} [{}]",
                    machine, config.path, e
                );
                warn!("{}", details);
                return Err(ProcessError::SpawnFailed(details));
            }
        };

        let pid = match child.id() {
            Some(pid) => pid,
            None => {
                let details = format!(
                    "{}: process {} exited before supervision began",
                    machine, config.path
                );
                warn!("{}", details);
                return Err(ProcessError::SpawnFailed(details));
            }
        };

        let io = if capture.captures_any() {
            Some(IoCapture::start(
                format!("{}:{}:{}", machine, config.path, name),
                child.stdout.take(),
                child.stderr.take(),
                stderr_merged,
                child.stdin.take(),
                config.stdout_log.clone(),
                config.stderr_log.clone(),
            ))
        } else {
            None
        };

        let desc = ProcessDescription::new(
            config.proc_type.clone(),
            name,
            config.path.clone(),
            config.args.clone(),
            machine,
            Some(pid),
        );
        let must_register = config.register_timeout.is_some();
        let core = Arc::new(MonitorCore::new(
            desc,
            transport,
            config.monitoring,
            must_register,
        ));

        let process = Arc::new(Self {
            core,
            pid,
            child: tokio::sync::Mutex::new(child),
            io,
        });

        if let Some(action) = config.register_timeout.clone() {
            let expired = Arc::clone(&process);
            process
                .core
                .arm_registration_timer(action, move || async move {
                    expired.kill().await;
                });
        }

        Ok(process)
    }

    // ------------------------------------------------------------------
    // Supervision contract
    // ------------------------------------------------------------------

    pub fn status(&self) -> (ProcessState, Option<StatusDetail>) {
        self.core.status()
    }

    pub fn registered(&self, data: RegistrationData) {
        self.core.registered(data);
    }

    /// Launch the ping and returncode monitors as applicable. Never blocks.
    pub fn start_monitoring(self: &Arc<Self>) {
        self.core.spawn_ping_monitor();
        if self.core.returncode_enabled() {
            let process = Arc::clone(self);
            let handle = tokio::spawn(async move { process.returncode_monitor().await });
            self.core.set_returncode_handle(handle);
        }
    }

    pub async fn stop_monitoring(&self) {
        self.core.stop_monitoring().await;
    }

    pub fn mark_delete(&self) {
        self.core.mark_delete();
    }

    pub fn marked_delete(&self) -> bool {
        self.core.marked_delete()
    }

    /// Stop monitoring, shut down I/O capture, politely terminate, and
    /// wait for the child to exit.
    pub async fn kill(&self) {
        self.core.stop_monitoring().await;
        self.shutdown_io().await;

        let mut child = self.child.lock().await;
        if matches!(child.try_wait(), Ok(None)) {
            request_terminate(self.pid);
        }
        match child.wait().await {
            Ok(exit) => self.core.record_killed(exit_signal_magnitude(&exit)),
            Err(e) => {
                warn!("{}: wait after terminate failed: {}", self.name(), e);
                self.core.record_killed(0);
            }
        }
    }

    /// Escalating kill: polite termination, a bounded grace period, then an
    /// unconditional kill signal if the child is still alive.
    pub async fn kill_with_force(&self, timeout: Duration) {
        self.core.stop_monitoring().await;
        self.shutdown_io().await;

        let mut child = self.child.lock().await;
        if matches!(child.try_wait(), Ok(None)) {
            request_terminate(self.pid);
        }

        let exit = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(result) => result,
            Err(_) => {
                info!("{} pid {} ignored SIGTERM, killing", self.name(), self.pid);
                if let Err(e) = child.start_kill() {
                    warn!("{}: kill signal failed: {}", self.name(), e);
                }
                child.wait().await
            }
        };
        match exit {
            Ok(exit) => self.core.record_killed(exit_signal_magnitude(&exit)),
            Err(e) => {
                warn!("{}: wait after kill failed: {}", self.name(), e);
                self.core.record_killed(0);
            }
        }
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn description(&self) -> ProcessDescription {
        self.core.description()
    }

    pub fn name(&self) -> String {
        self.core.name()
    }

    pub fn proc_type(&self) -> String {
        self.core.proc_type()
    }

    pub fn machine(&self) -> Machine {
        self.core.description().machine
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn must_register(&self) -> bool {
        self.core.must_register()
    }

    /// Data the process reported back at registration, if any.
    pub fn registration_data(&self) -> Option<RegistrationData> {
        self.core.registration_data()
    }

    /// Last captured stdout lines (empty without stdout capture).
    pub fn tail_stdout(&self, lines: usize) -> Vec<String> {
        self.io
            .as_ref()
            .map(|io| io.tail_stdout(lines))
            .unwrap_or_default()
    }

    /// `tail_stdout` with the default line count.
    pub fn tail_stdout_default(&self) -> Vec<String> {
        self.tail_stdout(DEFAULT_TAIL_LINES)
    }

    /// Write to the child's captured stdin.
    pub async fn write_stdin(&self, data: &[u8]) -> std::io::Result<()> {
        match self.io.as_ref() {
            Some(io) => io.write_stdin(data).await,
            None => Err(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "i/o capture disabled",
            )),
        }
    }

    /// Whether the native process is still alive.
    pub async fn is_running(&self) -> bool {
        matches!(self.child.lock().await.try_wait(), Ok(None))
    }

    // ------------------------------------------------------------------
    // Returncode monitor
    // ------------------------------------------------------------------

    async fn returncode_monitor(self: Arc<Self>) {
        debug!(
            "{} [{}]: returncode monitor started",
            self.name(),
            self.proc_type()
        );
        while !self.core.should_stop() {
            let polled = self.child.lock().await.try_wait();
            match polled {
                Ok(Some(exit)) => {
                    self.classify_exit(exit);
                    break;
                }
                Ok(None) => {
                    if self.core.status().0 == ProcessState::NonResponsive {
                        warn!(
                            "{} [{}] pid {} is non-responsive, terminating",
                            self.name(),
                            self.proc_type(),
                            self.pid
                        );
                        self.terminate_non_responsive().await;
                        break;
                    }
                    sleep(RETURNCODE_POLL_INTERVAL).await;
                }
                Err(e) => {
                    warn!("{}: returncode poll failed: {}", self.name(), e);
                    break;
                }
            }
        }

        // Final reap so an exited child never lingers as a zombie
        let _ = self.child.lock().await.try_wait();
        debug!(
            "{} [{}]: returncode monitor stopped",
            self.name(),
            self.proc_type()
        );
    }

    fn classify_exit(&self, exit: std::process::ExitStatus) {
        use std::os::unix::process::ExitStatusExt;

        info!(
            "{} [{}] pid {} ended with {:?}",
            self.name(),
            self.proc_type(),
            self.pid,
            exit
        );

        let (state, detail) = if let Some(signal) = exit.signal() {
            (ProcessState::Terminated, Some(StatusDetail::Signal(signal)))
        } else {
            match exit.code() {
                Some(0) | None => (ProcessState::Finished, None),
                Some(_) => {
                    let tail = self.tail_stdout(FAILURE_TAIL_LINES).join("\n");
                    (ProcessState::Failed, Some(StatusDetail::OutputTail(tail)))
                }
            }
        };
        self.core.transition(state, detail);
    }

    /// A non-responsive child that is still alive gets terminated by the
    /// monitor itself.
    async fn terminate_non_responsive(&self) {
        let mut child = self.child.lock().await;
        if matches!(child.try_wait(), Ok(None)) {
            request_terminate(self.pid);
        }
        match child.wait().await {
            Ok(exit) => self.core.record_killed(exit_signal_magnitude(&exit)),
            Err(e) => warn!("{}: wait after terminate failed: {}", self.name(), e),
        }
    }

    async fn shutdown_io(&self) {
        if let Some(ref io) = self.io {
            if io.is_running() {
                io.shutdown().await;
            }
        }
    }
}

/// Build the command line, dispatching recognized script extensions
/// through their interpreter.
fn build_command(config: &LaunchConfig) -> Command {
    let interpreter = INTERPRETERS
        .iter()
        .find(|(ext, _)| config.path.ends_with(ext))
        .map(|(_, interpreter)| *interpreter);

    let mut command = match interpreter {
        Some(interpreter) => {
            let mut command = Command::new(interpreter);
            command.arg(&config.path);
            command
        }
        None => Command::new(&config.path),
    };
    command.args(&config.args);
    for (key, value) in &config.env {
        command.env(key, value);
    }
    command
}

/// Polite termination request (SIGTERM). Failures are logged, not raised:
/// the follow-up wait observes whatever actually happened.
fn request_terminate(pid: Pid) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid as NixPid;

    if let Err(e) = kill(NixPid::from_raw(pid as i32), Signal::SIGTERM) {
        debug!("SIGTERM to {} failed: {}", pid, e);
    }
}

/// Magnitude of the signal that ended the process; 0 for a normal exit.
fn exit_signal_magnitude(exit: &std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    exit.signal().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::types::CaptureIo;

    #[test]
    fn test_script_paths_use_interpreter() {
        let command = build_command(&LaunchConfig::new("/opt/lab/run.py"));
        assert_eq!(command.as_std().get_program(), "python3");

        let command = build_command(&LaunchConfig::new("/opt/lab/run.sh"));
        assert_eq!(command.as_std().get_program(), "sh");
    }

    #[test]
    fn test_binary_paths_run_directly() {
        let command =
            build_command(&LaunchConfig::new("/bin/sleep").with_args(vec!["1".to_string()]));
        assert_eq!(command.as_std().get_program(), "/bin/sleep");
        let args: Vec<_> = command.as_std().get_args().collect();
        assert_eq!(args, vec!["1"]);
    }

    #[test]
    fn test_env_overrides_applied() {
        let command = build_command(
            &LaunchConfig::new("/bin/env")
                .with_env(vec![("SESSION".to_string(), "calib-1".to_string())]),
        );
        let envs: Vec<_> = command.as_std().get_envs().collect();
        assert!(envs
            .iter()
            .any(|(k, v)| *k == "SESSION" && v.map(|v| v == "calib-1").unwrap_or(false)));
    }

    #[tokio::test]
    async fn test_spawn_failure_is_a_value() {
        let err = LocalProcess::spawn(
            LaunchConfig::new("/no/such/binary").with_capture_io(CaptureIo::none()),
            Transport::new(),
        )
        .unwrap_err();
        assert!(matches!(err, ProcessError::SpawnFailed(_)));
    }
}

/*!
 * Remote Process
 * A supervised unit physically owned by a peer on another machine
 */

use super::monitor::MonitorCore;
use super::types::{
    LaunchConfig, Monitoring, ProcessDescription, ProcessError, ProcessResult, ProcessState,
    RegistrationData, StatusDetail,
};
use crate::core::limits::KILL_REQUEST_TIMEOUT;
use crate::core::types::{Machine, Pid};
use crate::transport::{Message, Transport};
use log::{debug, info, warn};
use std::sync::Arc;

/// A process launched and natively supervised by a remote peer.
///
/// Only liveness pings run here; exit-status polling is the owning peer's
/// responsibility, so returncode monitoring is unconditionally disabled.
pub struct RemoteProcess {
    core: Arc<MonitorCore>,
    pid: Pid,
    peer_addr: String,
}

impl std::fmt::Debug for RemoteProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteProcess")
            .field("pid", &self.pid)
            .field("peer_addr", &self.peer_addr)
            .finish()
    }
}

impl RemoteProcess {
    /// Ask the peer at `peer_addr` to launch a process, then supervise it
    /// from here. Bounded by the transport's request timeout; the three
    /// outcomes (no reply, peer error, launch acknowledgment) all come back
    /// as values.
    pub async fn launch(
        config: LaunchConfig,
        machine: Machine,
        peer_addr: String,
        transport: Transport,
    ) -> ProcessResult<Arc<Self>> {
        let request = Message::LaunchProcess {
            path: config.path.clone(),
            args: config.args.clone(),
            proc_type: config.proc_type.clone(),
            name: config.resolved_name(),
            machine: machine.clone(),
            capture_io: config.capture_io,
            stdout_log: config
                .stdout_log
                .as_ref()
                .map(|path| path.display().to_string()),
            stderr_log: config
                .stderr_log
                .as_ref()
                .map(|path| path.display().to_string()),
        };

        debug!("Sending launch request to {} for {}", peer_addr, config.path);
        let reply = transport
            .request_default(&peer_addr, &request)
            .await
            .map_err(|e| {
                warn!("Launch request to {} failed: {}", peer_addr, e);
                ProcessError::PeerUnreachable {
                    addr: peer_addr.clone(),
                    details: e.to_string(),
                }
            })?;

        match reply {
            Message::RqError { err_code, details } => {
                warn!(
                    "Launch request refused by {}: {}: {}",
                    peer_addr, err_code, details
                );
                Err(ProcessError::LaunchRefused { err_code, details })
            }
            Message::LaunchedProcessInfo {
                proc_type,
                name,
                path,
                machine,
                pid,
            } => {
                info!(
                    "Launch request to {} succeeded: {} pid {}",
                    peer_addr, name, pid
                );
                let desc = ProcessDescription::new(
                    proc_type,
                    name,
                    path,
                    config.args.clone(),
                    machine,
                    Some(pid),
                );
                let must_register = config.register_timeout.is_some();
                // The peer owns the native handle; only pings run here
                let monitoring = Monitoring {
                    ping: config.monitoring.ping,
                    returncode: false,
                };
                let core = Arc::new(MonitorCore::new(desc, transport, monitoring, must_register));

                let process = Arc::new(Self {
                    core,
                    pid,
                    peer_addr,
                });
                if let Some(action) = config.register_timeout.clone() {
                    // No local handle to kill on expiry
                    process.core.arm_registration_timer(action, || async {});
                }
                Ok(process)
            }
            other => Err(ProcessError::UnexpectedReply {
                request: "launch_process".to_string(),
                details: other.kind().to_string(),
            }),
        }
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

    /// Ping-only monitoring. Never blocks.
    pub fn start_monitoring(self: &Arc<Self>) {
        self.core.spawn_ping_monitor();
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

    /// Ask the owning peer to kill the process. A positive reply marks it
    /// TERMINATED locally; escalation is the peer's own responsibility.
    pub async fn kill(&self) -> ProcessResult<()> {
        self.core.stop_monitoring().await;

        let machine = self.core.description().machine;
        let request = Message::KillProcess {
            pid: self.pid,
            machine,
        };
        let reply = self
            .core
            .transport()
            .request(&self.peer_addr, &request, KILL_REQUEST_TIMEOUT)
            .await
            .map_err(|e| ProcessError::KillFailed(format!("{}: {}", self.peer_addr, e)))?;

        match reply {
            Message::RqOk => {
                debug!("Kill request acknowledged for pid {}", self.pid);
                self.core.record_terminated();
                Ok(())
            }
            Message::RqError { err_code, details } => Err(ProcessError::KillFailed(format!(
                "{}: {}",
                err_code, details
            ))),
            other => Err(ProcessError::UnexpectedReply {
                request: "kill_process".to_string(),
                details: other.kind().to_string(),
            }),
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

    pub fn peer_addr(&self) -> &str {
        &self.peer_addr
    }

    pub fn must_register(&self) -> bool {
        self.core.must_register()
    }

    /// Data the process reported back at registration, if any.
    pub fn registration_data(&self) -> Option<RegistrationData> {
        self.core.registration_data()
    }
}

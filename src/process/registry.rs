/*!
 * Process Registry
 * The supervisor: owns every tracked process and coordinates spawn, query,
 * and kill operations under one coarse lock
 */

use super::local::LocalProcess;
use super::remote::RemoteProcess;
use super::types::{
    LaunchConfig, ProcessDescription, ProcessResult, ProcessState, RegistrationData, StatusDetail,
};
use crate::core::limits::KILL_GRACE_TIMEOUT;
use crate::core::types::{Machine, Pid};
use crate::transport::Transport;
use log::{info, warn};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Registry key: a tracked process is unique per (machine, pid).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessKey {
    pub machine: Machine,
    pub pid: Pid,
}

impl ProcessKey {
    pub fn new(machine: impl Into<Machine>, pid: Pid) -> Self {
        Self {
            machine: machine.into(),
            pid,
        }
    }
}

/// Tagged handle over the two supervised-process variants.
///
/// Forced-kill escalation only exists for the local variant; reach it
/// through `as_local()` instead of a remote no-op.
#[derive(Clone, Debug)]
pub enum ProcessHandle {
    Local(Arc<LocalProcess>),
    Remote(Arc<RemoteProcess>),
}

impl ProcessHandle {
    pub fn status(&self) -> (ProcessState, Option<StatusDetail>) {
        match self {
            ProcessHandle::Local(process) => process.status(),
            ProcessHandle::Remote(process) => process.status(),
        }
    }

    pub fn description(&self) -> ProcessDescription {
        match self {
            ProcessHandle::Local(process) => process.description(),
            ProcessHandle::Remote(process) => process.description(),
        }
    }

    pub fn registered(&self, data: RegistrationData) {
        match self {
            ProcessHandle::Local(process) => process.registered(data),
            ProcessHandle::Remote(process) => process.registered(data),
        }
    }

    pub fn start_monitoring(&self) {
        match self {
            ProcessHandle::Local(process) => process.start_monitoring(),
            ProcessHandle::Remote(process) => process.start_monitoring(),
        }
    }

    pub async fn stop_monitoring(&self) {
        match self {
            ProcessHandle::Local(process) => process.stop_monitoring().await,
            ProcessHandle::Remote(process) => process.stop_monitoring().await,
        }
    }

    pub fn mark_delete(&self) {
        match self {
            ProcessHandle::Local(process) => process.mark_delete(),
            ProcessHandle::Remote(process) => process.mark_delete(),
        }
    }

    pub fn marked_delete(&self) -> bool {
        match self {
            ProcessHandle::Local(process) => process.marked_delete(),
            ProcessHandle::Remote(process) => process.marked_delete(),
        }
    }

    pub fn pid(&self) -> Pid {
        match self {
            ProcessHandle::Local(process) => process.pid(),
            ProcessHandle::Remote(process) => process.pid(),
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, ProcessHandle::Local(_))
    }

    /// Capability accessor for local-only operations (forced kill, stdout
    /// tail, stdin).
    pub fn as_local(&self) -> Option<&Arc<LocalProcess>> {
        match self {
            ProcessHandle::Local(process) => Some(process),
            ProcessHandle::Remote(_) => None,
        }
    }

    pub fn as_remote(&self) -> Option<&Arc<RemoteProcess>> {
        match self {
            ProcessHandle::Remote(process) => Some(process),
            ProcessHandle::Local(_) => None,
        }
    }

    /// Uniform kill contract over both variants.
    pub async fn kill(&self) -> ProcessResult<()> {
        match self {
            ProcessHandle::Local(process) => {
                process.kill().await;
                Ok(())
            }
            ProcessHandle::Remote(process) => process.kill().await,
        }
    }
}

/// The supervisor. All map access happens under one coarse lock; each
/// process's status lives behind its own lock beneath it, so the registry
/// never blocks on a monitor loop.
pub struct ProcessRegistry {
    uuid: Uuid,
    transport: Transport,
    processes: RwLock<HashMap<ProcessKey, ProcessHandle>>,
}

impl ProcessRegistry {
    pub fn new(transport: Transport) -> Self {
        let uuid = Uuid::new_v4();
        info!("Process registry {} initialized", uuid);
        Self {
            uuid,
            transport,
            processes: RwLock::new(HashMap::new()),
        }
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Spawn a native process on this machine, register it, and start its
    /// monitoring. Spawn refusals come back as values.
    pub fn spawn_local(&self, config: LaunchConfig) -> ProcessResult<ProcessHandle> {
        let process = LocalProcess::spawn(config, self.transport.clone())?;
        let desc = process.description();
        let key = ProcessKey::new(desc.machine.clone(), process.pid());

        let handle = ProcessHandle::Local(process);
        self.processes.write().insert(key.clone(), handle.clone());
        info!(
            "Tracking local process {} ({}:{})",
            desc.name, key.machine, key.pid
        );

        handle.start_monitoring();
        Ok(handle)
    }

    /// Ask a remote peer to launch a process, then track it here under the
    /// peer-reported (machine, pid). Always returns within the transport's
    /// request timeout.
    pub async fn spawn_remote(
        &self,
        config: LaunchConfig,
        machine: Machine,
        peer_addr: String,
    ) -> ProcessResult<ProcessHandle> {
        let process =
            RemoteProcess::launch(config, machine, peer_addr, self.transport.clone()).await?;
        let desc = process.description();
        let key = ProcessKey::new(desc.machine.clone(), process.pid());

        let handle = ProcessHandle::Remote(process);
        self.processes.write().insert(key.clone(), handle.clone());
        info!(
            "Tracking remote process {} ({}:{})",
            desc.name, key.machine, key.pid
        );

        handle.start_monitoring();
        Ok(handle)
    }

    pub fn lookup(&self, machine: &str, pid: Pid) -> Option<ProcessHandle> {
        self.processes
            .read()
            .get(&ProcessKey::new(machine, pid))
            .cloned()
    }

    /// Terminal-state processes whose entries are not yet soft-deleted.
    pub fn not_running_processes(
        &self,
    ) -> HashMap<ProcessKey, (ProcessState, Option<StatusDetail>)> {
        let processes = self.processes.read();
        let mut result = HashMap::new();
        for (key, process) in processes.iter() {
            let status = process.status();
            if status.0.is_terminal() && !process.marked_delete() {
                result.insert(key.clone(), status);
            }
        }
        result
    }

    /// Processes still waiting for their registration handshake.
    pub fn unknown_status_processes(&self) -> Vec<ProcessHandle> {
        self.processes
            .read()
            .values()
            .filter(|process| process.status().0 == ProcessState::Unknown)
            .cloned()
            .collect()
    }

    /// Kill every non-terminal process. `force` selects the escalating
    /// kill path where the variant supports one.
    pub async fn killall(&self, force: bool) {
        let targets: Vec<ProcessHandle> = self.processes.read().values().cloned().collect();
        for process in targets {
            if process.status().0.is_terminal() {
                continue;
            }
            let result = match (force, process.as_local()) {
                (true, Some(local)) => {
                    local.kill_with_force(KILL_GRACE_TIMEOUT).await;
                    Ok(())
                }
                _ => process.kill().await,
            };
            if let Err(e) = result {
                warn!("Kill failed for {}: {}", process.description().name, e);
            }
        }
    }

    /// Clear the registry without killing anything: shutdown bookkeeping
    /// once every process is confirmed terminal.
    pub fn delete_all(&self) {
        let mut processes = self.processes.write();
        let count = processes.len();
        processes.clear();
        info!("Registry cleared ({} entries)", count);
    }

    /// Stop monitoring on every tracked process.
    pub async fn stop_monitoring(&self) {
        let targets: Vec<ProcessHandle> = self.processes.read().values().cloned().collect();
        for process in targets {
            process.stop_monitoring().await;
        }
    }

    pub fn len(&self) -> usize {
        self.processes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.read().is_empty()
    }
}

/*!
 * Monitor Core
 * Shared status machine and monitoring plumbing for supervised processes
 *
 * Both process variants embed a MonitorCore: it owns the status word, the
 * registration timer and the ping monitor. The returncode monitor belongs
 * to the local variant, which reports through the same core.
 */

use super::types::{
    Monitoring, ProcessDescription, ProcessState, RegistrationData, StatusDetail, TimeoutAction,
};
use crate::core::limits::{PING_INTERVAL, PING_REPLY_TIMEOUT, PING_RETRIES};
use crate::core::types::Pid;
use crate::transport::{PingChannel, Transport};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::sleep;

/// Status word guarded by the per-process status lock.
#[derive(Debug)]
struct StatusInner {
    state: ProcessState,
    detail: Option<StatusDetail>,
    deleted: bool,
}

pub(crate) struct MonitorCore {
    desc: Mutex<ProcessDescription>,
    status: Mutex<StatusInner>,
    transport: Transport,
    must_register: bool,
    ping_enabled: bool,
    returncode_enabled: bool,
    stop: AtomicBool,
    registration: Mutex<Option<RegistrationData>>,
    ping_channel: Mutex<Option<PingChannel>>,
    reg_cancel: Mutex<Option<oneshot::Sender<()>>>,
    ping_handle: Mutex<Option<JoinHandle<()>>>,
    returncode_handle: Mutex<Option<JoinHandle<()>>>,
}

impl MonitorCore {
    pub(crate) fn new(
        desc: ProcessDescription,
        transport: Transport,
        monitoring: Monitoring,
        must_register: bool,
    ) -> Self {
        let initial = if must_register {
            ProcessState::Unknown
        } else {
            ProcessState::Running
        };
        // Exit-status polling needs a pid to reap
        let returncode_enabled = monitoring.returncode && desc.pid.is_some();

        Self {
            desc: Mutex::new(desc),
            status: Mutex::new(StatusInner {
                state: initial,
                detail: None,
                deleted: false,
            }),
            transport,
            must_register,
            ping_enabled: monitoring.ping,
            returncode_enabled,
            stop: AtomicBool::new(false),
            registration: Mutex::new(None),
            ping_channel: Mutex::new(None),
            reg_cancel: Mutex::new(None),
            ping_handle: Mutex::new(None),
            returncode_handle: Mutex::new(None),
        }
    }

    pub(crate) fn description(&self) -> ProcessDescription {
        self.desc.lock().clone()
    }

    pub(crate) fn name(&self) -> String {
        self.desc.lock().name.clone()
    }

    pub(crate) fn proc_type(&self) -> String {
        self.desc.lock().proc_type.clone()
    }

    pub(crate) fn pid(&self) -> Option<Pid> {
        self.desc.lock().pid
    }

    /// Set the pid once it becomes known; later calls are ignored.
    pub(crate) fn set_pid(&self, pid: Pid) {
        let mut desc = self.desc.lock();
        if desc.pid.is_none() {
            desc.pid = Some(pid);
        }
    }

    pub(crate) fn transport(&self) -> &Transport {
        &self.transport
    }

    pub(crate) fn must_register(&self) -> bool {
        self.must_register
    }

    pub(crate) fn returncode_enabled(&self) -> bool {
        self.returncode_enabled
    }

    pub(crate) fn registration_data(&self) -> Option<RegistrationData> {
        self.registration.lock().clone()
    }

    // ------------------------------------------------------------------
    // Status word
    // ------------------------------------------------------------------

    pub(crate) fn status(&self) -> (ProcessState, Option<StatusDetail>) {
        let inner = self.status.lock();
        (inner.state, inner.detail.clone())
    }

    pub(crate) fn mark_delete(&self) {
        self.status.lock().deleted = true;
    }

    pub(crate) fn marked_delete(&self) -> bool {
        self.status.lock().deleted
    }

    /// Apply a monitor-driven transition. Terminal states are final: once a
    /// process is FINISHED/FAILED/TERMINATED no loop may move it again.
    pub(crate) fn transition(&self, state: ProcessState, detail: Option<StatusDetail>) -> bool {
        let mut inner = self.status.lock();
        if inner.state.is_terminal() {
            return false;
        }
        inner.state = state;
        inner.detail = detail;
        true
    }

    /// Status recording for the kill paths. A NON_RESPONSIVE process keeps
    /// its diagnostic; everything else records the signal magnitude. A
    /// process already in a terminal state stays where it is.
    pub(crate) fn record_killed(&self, signal: i32) {
        let mut inner = self.status.lock();
        if inner.state.is_terminal() {
            return;
        }
        if inner.state != ProcessState::NonResponsive {
            inner.detail = Some(StatusDetail::Signal(signal));
        }
        inner.state = ProcessState::Terminated;
    }

    /// Plain TERMINATED mark used when a remote peer acknowledges a kill.
    pub(crate) fn record_terminated(&self) {
        let mut inner = self.status.lock();
        if !inner.state.is_terminal() {
            inner.state = ProcessState::Terminated;
        }
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    /// Registration handshake: cancel the deadline timer, move
    /// UNKNOWN to RUNNING, remember the peer's addresses, and open the
    /// outbound ping channel when ping monitoring is enabled.
    pub(crate) fn registered(&self, data: RegistrationData) {
        self.cancel_registration_timer();

        if let Some(pid) = data.pid {
            self.set_pid(pid);
        }

        {
            let mut inner = self.status.lock();
            if inner.state == ProcessState::Unknown {
                inner.state = ProcessState::Running;
                inner.detail = None;
            }
        }
        info!(
            "{} [{}] registered from {:?}",
            self.name(),
            self.proc_type(),
            data.machine
        );

        if self.ping_enabled && !data.rep_addrs.is_empty() {
            *self.ping_channel.lock() =
                Some(PingChannel::new(self.transport.clone(), data.rep_addrs.clone()));
        }
        *self.registration.lock() = Some(data);
    }

    /// Arm the one-shot registration deadline. Expiry and `registered()`
    /// are mutually exclusive: both serialize on the status lock, and the
    /// FAILED transition only applies while the status is still UNKNOWN.
    /// `on_expire` runs after the transition (local variants kill the
    /// native process there).
    pub(crate) fn arm_registration_timer<F, Fut>(
        self: &Arc<Self>,
        action: TimeoutAction,
        on_expire: F,
    ) where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let (cancel_tx, cancel_rx) = oneshot::channel();
        *self.reg_cancel.lock() = Some(cancel_tx);

        let core = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel_rx => {
                    debug!("{}: registration timer cancelled", core.name());
                    return;
                }
                _ = sleep(action.after) => {}
            }

            let timed_out = {
                let mut inner = core.status.lock();
                if inner.state == ProcessState::Unknown {
                    inner.state = ProcessState::Failed;
                    inner.detail = Some(StatusDetail::Message(
                        "failed to register before timeout".to_string(),
                    ));
                    true
                } else {
                    false
                }
            };

            if timed_out {
                warn!(
                    "{} [{}] failed to register before timeout",
                    core.name(),
                    core.proc_type()
                );
                action.run_callback();
                on_expire().await;
            }
        });
    }

    pub(crate) fn cancel_registration_timer(&self) {
        if let Some(cancel) = self.reg_cancel.lock().take() {
            let _ = cancel.send(());
        }
    }

    // ------------------------------------------------------------------
    // Monitor loops
    // ------------------------------------------------------------------

    pub(crate) fn should_stop(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    pub(crate) fn set_returncode_handle(&self, handle: JoinHandle<()>) {
        *self.returncode_handle.lock() = Some(handle);
    }

    /// Launch the ping monitor loop. No-op when ping monitoring is off.
    pub(crate) fn spawn_ping_monitor(self: &Arc<Self>) {
        if !self.ping_enabled {
            return;
        }
        let core = Arc::clone(self);
        let handle = tokio::spawn(async move { core.ping_monitor().await });
        *self.ping_handle.lock() = Some(handle);
    }

    /// Liveness loop: every cadence interval, send a ping and wait for a
    /// bounded reply, retrying up to the budget. A fully unanswered cycle
    /// marks the process NON_RESPONSIVE and ends the loop for good.
    async fn ping_monitor(self: Arc<Self>) {
        debug!("{} [{}]: ping monitor started", self.name(), self.proc_type());
        'cycle: while !self.should_stop() {
            sleep(PING_INTERVAL).await;
            if self.should_stop() {
                break;
            }

            // No channel until the peer has registered its reply addresses
            let channel = match self.ping_channel.lock().clone() {
                Some(channel) => channel,
                None => continue,
            };

            let mut replied = false;
            for attempt in 1..=PING_RETRIES {
                if self.should_stop() {
                    break 'cycle;
                }
                match channel.ping(PING_REPLY_TIMEOUT).await {
                    Ok(_) => {
                        replied = true;
                        break;
                    }
                    Err(e) => debug!(
                        "{}: ping attempt {}/{} unanswered: {}",
                        self.name(),
                        attempt,
                        PING_RETRIES,
                        e
                    ),
                }
            }

            if !replied {
                warn!("{} [{}]: no response to ping", self.name(), self.proc_type());
                self.transition(
                    ProcessState::NonResponsive,
                    Some(StatusDetail::Message("ping response timeout".to_string())),
                );
                break;
            }
        }
        debug!("{} [{}]: ping monitor stopped", self.name(), self.proc_type());
    }

    /// Cancel the registration timer, raise the stop flag, and wait for
    /// both monitor loops to exit. Idempotent. Must not be called from
    /// inside either monitor loop.
    pub(crate) async fn stop_monitoring(&self) {
        self.cancel_registration_timer();
        self.stop.store(true, Ordering::SeqCst);

        let ping = self.ping_handle.lock().take();
        if let Some(handle) = ping {
            debug!("{} [{}]: joining ping monitor", self.name(), self.proc_type());
            if let Err(e) = handle.await {
                warn!("{}: ping monitor join error: {}", self.name(), e);
            }
        }

        let returncode = self.returncode_handle.lock().take();
        if let Some(handle) = returncode {
            debug!(
                "{} [{}]: joining returncode monitor",
                self.name(),
                self.proc_type()
            );
            if let Err(e) = handle.await {
                warn!("{}: returncode monitor join error: {}", self.name(), e);
            }
        }

        debug!("{} [{}]: monitoring stopped", self.name(), self.proc_type());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_core(monitoring: Monitoring, must_register: bool) -> Arc<MonitorCore> {
        let desc = ProcessDescription::new(
            "worker",
            "unit",
            "/bin/true",
            vec![],
            "localhost".to_string(),
            Some(100),
        );
        Arc::new(MonitorCore::new(
            desc,
            Transport::new(),
            monitoring,
            must_register,
        ))
    }

    #[test]
    fn test_initial_state_follows_registration_requirement() {
        let core = test_core(Monitoring::default(), false);
        assert_eq!(core.status().0, ProcessState::Running);

        let core = test_core(Monitoring::default(), true);
        assert_eq!(core.status().0, ProcessState::Unknown);
    }

    #[test]
    fn test_terminal_states_are_final() {
        let core = test_core(Monitoring::none(), false);
        assert!(core.transition(ProcessState::Finished, None));
        assert!(!core.transition(ProcessState::Failed, None));
        assert_eq!(core.status().0, ProcessState::Finished);
    }

    #[test]
    fn test_record_killed_keeps_non_responsive_detail() {
        let core = test_core(Monitoring::none(), false);
        core.transition(
            ProcessState::NonResponsive,
            Some(StatusDetail::Message("ping response timeout".to_string())),
        );
        core.record_killed(15);

        let (state, detail) = core.status();
        assert_eq!(state, ProcessState::Terminated);
        assert_eq!(
            detail,
            Some(StatusDetail::Message("ping response timeout".to_string()))
        );
    }

    #[test]
    fn test_record_killed_stores_signal_magnitude() {
        let core = test_core(Monitoring::none(), false);
        core.record_killed(9);

        let (state, detail) = core.status();
        assert_eq!(state, ProcessState::Terminated);
        assert_eq!(detail, Some(StatusDetail::Signal(9)));
    }

    #[test]
    fn test_record_killed_respects_terminal_states() {
        let core = test_core(Monitoring::none(), false);
        core.transition(
            ProcessState::Failed,
            Some(StatusDetail::Message(
                "failed to register before timeout".to_string(),
            )),
        );
        core.record_killed(15);

        let (state, detail) = core.status();
        assert_eq!(state, ProcessState::Failed);
        assert!(matches!(detail, Some(StatusDetail::Message(_))));
    }

    #[test]
    fn test_set_pid_is_write_once() {
        let desc = ProcessDescription::new(
            "worker",
            "unit",
            "/bin/true",
            vec![],
            "localhost".to_string(),
            None,
        );
        let core = MonitorCore::new(desc, Transport::new(), Monitoring::none(), false);
        core.set_pid(7);
        core.set_pid(8);
        assert_eq!(core.pid(), Some(7));
    }

    #[tokio::test]
    async fn test_registered_beats_timer() {
        let core = test_core(Monitoring::none(), true);
        core.arm_registration_timer(TimeoutAction::after(Duration::from_millis(50)), || async {});

        core.registered(RegistrationData::default());
        assert_eq!(core.status().0, ProcessState::Running);

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(core.status().0, ProcessState::Running);
    }

    #[tokio::test]
    async fn test_timer_expiry_marks_failed() {
        let core = test_core(Monitoring::none(), true);
        let fired = Arc::new(AtomicBool::new(false));
        let observer = Arc::clone(&fired);
        core.arm_registration_timer(
            TimeoutAction::after(Duration::from_millis(20))
                .with_callback(Arc::new(move || observer.store(true, Ordering::SeqCst))),
            || async {},
        );

        tokio::time::sleep(Duration::from_millis(100)).await;
        let (state, detail) = core.status();
        assert_eq!(state, ProcessState::Failed);
        assert!(matches!(detail, Some(StatusDetail::Message(_))));
        assert!(fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_stop_monitoring_is_idempotent() {
        let core = test_core(Monitoring::none(), false);
        core.stop_monitoring().await;
        core.stop_monitoring().await;
        assert!(core.should_stop());
    }
}

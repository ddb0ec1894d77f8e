/*!
 * Core Types
 * Common types used across the supervision engine
 */

/// Process ID as reported by the native handle or a remote peer
pub type Pid = u32;

/// Identifier of the machine a process runs on (hostname or address)
pub type Machine = String;

/// Best-effort name of the local machine.
///
/// Falls back to `localhost` when the hostname cannot be resolved.
pub fn local_machine() -> Machine {
    nix::unistd::gethostname()
        .ok()
        .and_then(|name| name.into_string().ok())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

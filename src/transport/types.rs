/*!
 * Transport Types
 * Wire message taxonomy and transport errors
 */

use crate::core::types::Pid;
use crate::process::types::CaptureIo;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Transport operation result
pub type TransportResult<T> = Result<T, TransportError>;

/// Transport errors
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    #[error("Could not connect to {addr}: {details}")]
    Connect { addr: String, details: String },

    #[error("I/O failure talking to {addr}: {details}")]
    Io { addr: String, details: String },

    #[error("No reply from {addr} within {timeout:?}")]
    Timeout { addr: String, timeout: Duration },

    #[error("Malformed frame from {addr}: {details}")]
    MalformedFrame { addr: String, details: String },

    #[error("Frame of {size} bytes exceeds the {max} byte limit")]
    FrameTooLarge { size: usize, max: usize },
}

/// Messages exchanged between control-plane peers.
///
/// Every frame is self-describing: the serialized form carries a `type` tag
/// followed by the message's own fields. The engine only sends
/// `launch_process` / `ping` / `kill_process` and consumes their replies;
/// the registration and experiment messages belong to the outer server that
/// shares this vocabulary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    RegisterSupervisor {
        uuid: String,
        rep_addrs: Vec<String>,
        pub_addrs: Vec<String>,
        name: String,
        main: bool,
    },
    RegisterExperiment {
        uuid: String,
        name: String,
    },
    RegisterPeer {
        uuid: String,
        peer_type: String,
    },
    CreateExperiment {
        launch_file: String,
        sandbox_dir: Option<String>,
    },
    LaunchProcess {
        path: String,
        args: Vec<String>,
        proc_type: String,
        name: String,
        machine: String,
        capture_io: CaptureIo,
        stdout_log: Option<String>,
        stderr_log: Option<String>,
    },
    LaunchedProcessInfo {
        proc_type: String,
        name: String,
        path: String,
        machine: String,
        pid: Pid,
    },
    Ping,
    KillProcess {
        pid: Pid,
        machine: String,
    },
    RqOk,
    RqError {
        err_code: String,
        details: String,
    },
}

impl Message {
    /// Wire name of the message variant, as it appears in the `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::RegisterSupervisor { .. } => "register_supervisor",
            Message::RegisterExperiment { .. } => "register_experiment",
            Message::RegisterPeer { .. } => "register_peer",
            Message::CreateExperiment { .. } => "create_experiment",
            Message::LaunchProcess { .. } => "launch_process",
            Message::LaunchedProcessInfo { .. } => "launched_process_info",
            Message::Ping => "ping",
            Message::KillProcess { .. } => "kill_process",
            Message::RqOk => "rq_ok",
            Message::RqError { .. } => "rq_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_tag_round_trip() {
        let msg = Message::KillProcess {
            pid: 42,
            machine: "lab-1".to_string(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "kill_process");
        assert_eq!(json["pid"], 42);

        let back: Message = serde_json::from_value(json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_ping_wire_form() {
        let json = serde_json::to_string(&Message::Ping).unwrap();
        assert_eq!(json, r#"{"type":"ping"}"#);
    }

    #[test]
    fn test_kind_matches_tag() {
        let msg = Message::RqError {
            err_code: "launch_error".to_string(),
            details: "no such path".to_string(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], msg.kind());
    }
}

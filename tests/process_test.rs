/*!
 * Local Process Tests
 * Lifecycle classification, kill contract, and I/O capture
 */

use pretty_assertions::assert_eq;
use serial_test::serial;
use std::time::Duration;
use tokio::time::sleep;
use warden::{
    CaptureIo, LaunchConfig, LocalProcess, Monitoring, ProcessState, RegistrationData,
    StatusDetail, TimeoutAction, Transport,
};

fn sh(script: &str) -> LaunchConfig {
    let _ = env_logger::builder().is_test(true).try_init();
    LaunchConfig::new("sh").with_args(vec!["-c".to_string(), script.to_string()])
}

#[tokio::test]
async fn test_clean_exit_marks_finished() {
    let process = LocalProcess::spawn(sh("exit 0"), Transport::new()).unwrap();
    process.start_monitoring();

    sleep(Duration::from_millis(800)).await;
    let (state, detail) = process.status();
    assert_eq!(state, ProcessState::Finished);
    assert_eq!(detail, None);

    process.stop_monitoring().await;
}

#[tokio::test]
async fn test_nonzero_exit_marks_failed_with_output_tail() {
    let process =
        LocalProcess::spawn(sh("echo boom; sleep 0.7; exit 17"), Transport::new()).unwrap();
    process.start_monitoring();

    sleep(Duration::from_millis(1800)).await;
    let (state, detail) = process.status();
    assert_eq!(state, ProcessState::Failed);
    match detail {
        Some(StatusDetail::OutputTail(tail)) => assert!(tail.contains("boom")),
        other => panic!("expected output tail, got {:?}", other),
    }

    process.stop_monitoring().await;
}

#[tokio::test]
#[serial]
async fn test_signal_exit_records_magnitude() {
    let process = LocalProcess::spawn(
        LaunchConfig::new("sleep").with_args(vec!["10".to_string()]),
        Transport::new(),
    )
    .unwrap();
    process.start_monitoring();

    let killed = std::process::Command::new("sh")
        .args(["-c", &format!("kill -9 {}", process.pid())])
        .status()
        .unwrap();
    assert!(killed.success());

    sleep(Duration::from_millis(1200)).await;
    let (state, detail) = process.status();
    assert_eq!(state, ProcessState::Terminated);
    assert_eq!(detail, Some(StatusDetail::Signal(9)));

    process.stop_monitoring().await;
}

#[tokio::test]
async fn test_kill_terminates_and_records_signal() {
    let process = LocalProcess::spawn(
        LaunchConfig::new("sleep").with_args(vec!["30".to_string()]),
        Transport::new(),
    )
    .unwrap();
    process.start_monitoring();

    process.kill().await;

    let (state, detail) = process.status();
    assert_eq!(state, ProcessState::Terminated);
    assert_eq!(detail, Some(StatusDetail::Signal(15)));
    assert!(!process.is_running().await);
}

#[tokio::test]
#[serial]
async fn test_kill_with_force_defeats_sigterm_trap() {
    let process = LocalProcess::spawn(
        sh("trap '' TERM; while :; do sleep 0.05; done"),
        Transport::new(),
    )
    .unwrap();
    process.start_monitoring();

    // Let the shell install its trap before escalating
    sleep(Duration::from_millis(300)).await;
    process.kill_with_force(Duration::from_millis(100)).await;

    let (state, detail) = process.status();
    assert_eq!(state, ProcessState::Terminated);
    assert_eq!(detail, Some(StatusDetail::Signal(9)));
    assert!(!process.is_running().await);
}

#[tokio::test]
async fn test_stop_monitoring_halts_observation() {
    let process = LocalProcess::spawn(sh("sleep 1"), Transport::new()).unwrap();
    process.start_monitoring();

    process.stop_monitoring().await;

    // The child exits, but with no monitor left the status never moves
    sleep(Duration::from_millis(2000)).await;
    assert!(!process.is_running().await);
    assert_eq!(process.status().0, ProcessState::Running);
}

#[tokio::test]
async fn test_registration_gates_running_state() {
    let process = LocalProcess::spawn(
        LaunchConfig::new("sleep")
            .with_args(vec!["10".to_string()])
            .with_register_timeout(TimeoutAction::after(Duration::from_secs(5))),
        Transport::new(),
    )
    .unwrap();
    process.start_monitoring();

    assert_eq!(process.status().0, ProcessState::Unknown);

    process.registered(RegistrationData::default());
    assert_eq!(process.status().0, ProcessState::Running);
    assert!(process.registration_data().is_some());

    process.kill().await;
}

#[tokio::test]
async fn test_registration_timeout_fails_and_kills() {
    let process = LocalProcess::spawn(
        LaunchConfig::new("sleep")
            .with_args(vec!["30".to_string()])
            .with_monitoring(Monitoring::returncode_only())
            .with_register_timeout(TimeoutAction::after(Duration::from_millis(200))),
        Transport::new(),
    )
    .unwrap();
    process.start_monitoring();

    assert_eq!(process.status().0, ProcessState::Unknown);

    sleep(Duration::from_millis(1500)).await;
    let (state, detail) = process.status();
    assert_eq!(state, ProcessState::Failed);
    assert!(matches!(detail, Some(StatusDetail::Message(_))));
    assert!(!process.is_running().await);
}

#[tokio::test]
async fn test_stdout_tail_is_bounded_and_ordered() {
    let process = LocalProcess::spawn(
        sh("for i in 1 2 3; do echo line$i; done; sleep 0.5"),
        Transport::new(),
    )
    .unwrap();
    process.start_monitoring();

    sleep(Duration::from_millis(1200)).await;
    assert_eq!(process.status().0, ProcessState::Finished);
    assert_eq!(process.tail_stdout(2), vec!["line2", "line3"]);
    assert_eq!(process.tail_stdout(10), vec!["line1", "line2", "line3"]);

    process.stop_monitoring().await;
}

#[tokio::test]
async fn test_stdout_tail_capacity_is_enforced() {
    let process = LocalProcess::spawn(
        sh("i=0; while [ $i -lt 300 ]; do echo l$i; i=$((i+1)); done; sleep 0.5"),
        Transport::new(),
    )
    .unwrap();
    process.start_monitoring();

    sleep(Duration::from_millis(1500)).await;
    let tail = process.tail_stdout(400);
    assert_eq!(tail.len(), 256);
    assert_eq!(tail.last().map(String::as_str), Some("l299"));

    process.stop_monitoring().await;
}

#[tokio::test]
async fn test_stderr_merges_into_stdout_tail() {
    // stderr was not distinctly requested, so it lands in the stdout stream
    let process =
        LocalProcess::spawn(sh("echo to-stderr 1>&2; sleep 0.5"), Transport::new()).unwrap();
    process.start_monitoring();

    sleep(Duration::from_millis(1200)).await;
    assert_eq!(process.tail_stdout(5), vec!["to-stderr"]);

    process.stop_monitoring().await;
}

#[tokio::test]
async fn test_stdout_log_sink() {
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("worker.out");

    let process = LocalProcess::spawn(
        sh("echo logged; sleep 0.3").with_logs(Some(log_path.clone()), None),
        Transport::new(),
    )
    .unwrap();
    process.start_monitoring();

    sleep(Duration::from_millis(1500)).await;
    process.stop_monitoring().await;

    let contents = std::fs::read_to_string(&log_path).unwrap();
    assert!(contents.contains("logged"));
}

#[tokio::test]
async fn test_write_stdin_reaches_child() {
    let process = LocalProcess::spawn(LaunchConfig::new("cat"), Transport::new()).unwrap();
    process.start_monitoring();

    process.write_stdin(b"hello\n").await.unwrap();
    sleep(Duration::from_millis(500)).await;
    assert_eq!(process.tail_stdout(1), vec!["hello"]);

    process.kill().await;
}

#[tokio::test]
async fn test_uncaptured_process_has_empty_tail() {
    let process = LocalProcess::spawn(
        sh("sleep 0.3").with_capture_io(CaptureIo::none()),
        Transport::new(),
    )
    .unwrap();
    process.start_monitoring();

    sleep(Duration::from_millis(900)).await;
    assert!(process.tail_stdout(5).is_empty());

    process.stop_monitoring().await;
}

#[tokio::test]
async fn test_monitoring_disabled_means_no_transitions() {
    let process = LocalProcess::spawn(
        sh("exit 3").with_monitoring(Monitoring::none()),
        Transport::new(),
    )
    .unwrap();
    process.start_monitoring();

    sleep(Duration::from_millis(800)).await;
    assert_eq!(process.status().0, ProcessState::Running);

    process.stop_monitoring().await;
}

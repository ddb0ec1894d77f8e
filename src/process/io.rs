/*!
 * Process I/O Capture
 * Reader tasks, bounded stdout tail, and per-stream log sinks
 */

use crate::core::limits::STDOUT_TAIL_CAPACITY;
use log::{debug, warn};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{ChildStderr, ChildStdin, ChildStdout};
use tokio::task::JoinHandle;

type Tail = Arc<Mutex<VecDeque<String>>>;

/// Captured I/O of one local child: line-reader tasks feeding an in-memory
/// stdout tail and optional log files, plus the writable stdin handle.
pub struct IoCapture {
    name: String,
    tail: Tail,
    stdin: tokio::sync::Mutex<Option<ChildStdin>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    running: Arc<AtomicBool>,
}

impl IoCapture {
    /// Start reader tasks for whichever pipes were captured.
    ///
    /// `stderr_merged` marks a stderr pipe that was only taken so the
    /// child's diagnostics land in the stdout stream: it feeds the stdout
    /// tail and the stdout log, mirroring a merged-stream capture. A
    /// distinctly requested stderr gets its own log and stays out of the
    /// stdout tail.
    pub fn start(
        name: String,
        stdout: Option<ChildStdout>,
        stderr: Option<ChildStderr>,
        stderr_merged: bool,
        stdin: Option<ChildStdin>,
        stdout_log: Option<PathBuf>,
        stderr_log: Option<PathBuf>,
    ) -> Self {
        let tail: Tail = Arc::new(Mutex::new(VecDeque::with_capacity(STDOUT_TAIL_CAPACITY)));
        let running = Arc::new(AtomicBool::new(true));
        let mut tasks = Vec::new();

        if let Some(out) = stdout {
            tasks.push(spawn_reader(
                format!("{}:stdout", name),
                out,
                Some(Arc::clone(&tail)),
                stdout_log.clone(),
            ));
        }
        if let Some(err) = stderr {
            let (err_tail, err_log) = if stderr_merged {
                (Some(Arc::clone(&tail)), stdout_log)
            } else {
                (None, stderr_log)
            };
            tasks.push(spawn_reader(format!("{}:stderr", name), err, err_tail, err_log));
        }

        debug!("{}: i/o capture started ({} reader tasks)", name, tasks.len());

        Self {
            name,
            tail,
            stdin: tokio::sync::Mutex::new(stdin),
            tasks: Mutex::new(tasks),
            running,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Last `lines` captured stdout lines, oldest first.
    pub fn tail_stdout(&self, lines: usize) -> Vec<String> {
        let tail = self.tail.lock();
        let skip = tail.len().saturating_sub(lines);
        tail.iter().skip(skip).cloned().collect()
    }

    /// Write raw bytes to the child's stdin, if it was captured.
    pub async fn write_stdin(&self, data: &[u8]) -> std::io::Result<()> {
        let mut guard = self.stdin.lock().await;
        match guard.as_mut() {
            Some(stdin) => {
                stdin.write_all(data).await?;
                stdin.flush().await
            }
            None => Err(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "stdin not captured",
            )),
        }
    }

    /// Stop the reader tasks and close the child's stdin.
    pub async fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.stdin.lock().await.take();

        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            task.abort();
            let _ = task.await;
        }
        debug!("{}: i/o capture stopped", self.name);
    }
}

/// Read `stream` line by line into the tail buffer and/or a log file until
/// the pipe closes. Log failures demote the sink, never the reader.
fn spawn_reader<R>(
    label: String,
    stream: R,
    tail: Option<Tail>,
    log_path: Option<PathBuf>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut log_file = match log_path {
            Some(path) => match File::create(&path).await {
                Ok(file) => Some(file),
                Err(e) => {
                    warn!("{}: cannot open log {}: {}", label, path.display(), e);
                    None
                }
            },
            None => None,
        };

        let mut lines = BufReader::new(stream).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if let Some(ref tail) = tail {
                        let mut tail = tail.lock();
                        if tail.len() == STDOUT_TAIL_CAPACITY {
                            tail.pop_front();
                        }
                        tail.push_back(line.clone());
                    }
                    if let Some(mut file) = log_file.take() {
                        match write_line(&mut file, &line).await {
                            Ok(()) => log_file = Some(file),
                            Err(e) => debug!("{}: log write failed: {}", label, e),
                        }
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    debug!("{}: read error: {}", label, e);
                    break;
                }
            }
        }

        if let Some(mut file) = log_file {
            let _ = file.flush().await;
        }
        debug!("{}: capture drained", label);
    })
}

async fn write_line(file: &mut File, line: &str) -> std::io::Result<()> {
    file.write_all(line.as_bytes()).await?;
    file.write_all(b"\n").await
}

// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Runtime child process: spawning, output capture and exit watching.
//!
//! The [`tokio::process::Child`] is owned by a watcher task; the supervisor
//! keeps only the pid and signals the process through `nix`. Output readers
//! frame the byte streams into lines and store them in the log, and the exit
//! watcher posts an exit event once both streams are drained.

use std::collections::HashMap;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::actor::{Event, Message};
use crate::error::{Error, Result};
use crate::log_store::{LogEntry, RingLog};

/// Longest line kept before it is flushed without a newline.
const MAX_LINE_BYTES: usize = 64 * 1024;

/// How long the exit watcher waits for output streams after the process exits.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Everything needed to launch the runtime.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    /// Executable.
    pub program: PathBuf,
    /// Arguments.
    pub args: Vec<String>,
    /// Working directory.
    pub cwd: PathBuf,
    /// Complete environment of the process.
    pub env: HashMap<String, String>,
}

/// Splits a byte stream into lines.
///
/// Lines end at `\n`; a trailing `\r` is dropped. Incomplete data is kept
/// until the next chunk arrives or the stream is finished.
#[derive(Debug, Default)]
pub struct LineFramer {
    buf: Vec<u8>,
}

impl LineFramer {
    /// Empty framer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk; returns the lines it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in chunk {
            if byte == b'\n' {
                lines.push(self.take_line());
            } else {
                self.buf.push(byte);
                if self.buf.len() >= MAX_LINE_BYTES {
                    lines.push(self.take_line());
                }
            }
        }
        lines
    }

    /// Flush a final partial line.
    pub fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            None
        } else {
            Some(self.take_line())
        }
    }

    fn take_line(&mut self) -> String {
        if self.buf.last() == Some(&b'\r') {
            self.buf.pop();
        }
        let line = String::from_utf8_lossy(&self.buf).into_owned();
        self.buf.clear();
        line
    }
}

/// Turn one output line into a log entry.
///
/// JSON objects supply `ts`, `level` and `msg`; any other fields become the
/// payload. Anything else is stored as text at `default_level`.
pub fn parse_line(line: &str, default_level: &str) -> LogEntry {
    if let Ok(Value::Object(mut fields)) = serde_json::from_str::<Value>(line) {
        let ts = fields.remove("ts").and_then(|v| v.as_u64());
        let level = match fields.remove("level") {
            Some(Value::String(level)) => level,
            _ => default_level.to_string(),
        };
        let msg = match fields.remove("msg") {
            Some(Value::String(msg)) => msg,
            Some(other) => other.to_string(),
            None => String::new(),
        };
        let mut entry = LogEntry::new(level, msg);
        entry.ts = ts;
        if !fields.is_empty() {
            entry.payload = Some(Value::Object(fields));
        }
        return entry;
    }
    LogEntry::new(default_level, line)
}

/// A spawned runtime process.
#[derive(Debug)]
pub(crate) struct ChildProcess {
    pub(crate) pid: Option<u32>,
    pub(crate) generation: u64,
    pub(crate) started: Instant,
    pub(crate) terminating: bool,
}

impl ChildProcess {
    /// Send `sig` to the process.
    pub(crate) fn signal(&self, sig: Signal) {
        let Some(pid) = self.pid else {
            return;
        };
        match signal::kill(Pid::from_raw(pid as i32), sig) {
            Ok(()) => debug!(pid, signal = ?sig, "Signalled runtime"),
            // ESRCH: already gone, the exit watcher will report it.
            Err(nix::errno::Errno::ESRCH) => {}
            Err(e) => warn!(pid, signal = ?sig, error = %e, "Failed to signal runtime"),
        }
    }
}

/// Spawn the runtime and its output and exit watchers.
pub(crate) fn spawn(
    spec: &LaunchSpec,
    generation: u64,
    log: Arc<Mutex<RingLog>>,
    events: mpsc::UnboundedSender<Message>,
) -> Result<ChildProcess> {
    let mut child = Command::new(&spec.program)
        .args(&spec.args)
        .current_dir(&spec.cwd)
        .env_clear()
        .envs(&spec.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| Error::ChildSpawn(format!("{}: {}", spec.program.display(), e)))?;

    let pid = child.id();
    let mut readers = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        readers.push(tokio::spawn(read_output(stdout, "info", log.clone())));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(tokio::spawn(read_output(stderr, "error", log)));
    }

    tokio::spawn(async move {
        let (code, signal) = match child.wait().await {
            Ok(status) => (status.code(), status.signal()),
            Err(e) => {
                warn!(error = %e, "Failed to wait for runtime");
                (None, None)
            }
        };
        drain(readers).await;
        let _ = events.send(Message::Event(Event::Exited {
            generation,
            code,
            signal,
        }));
    });

    Ok(ChildProcess {
        pid,
        generation,
        started: Instant::now(),
        terminating: false,
    })
}

async fn drain(readers: Vec<JoinHandle<()>>) {
    for reader in readers {
        let abort = reader.abort_handle();
        if tokio::time::timeout(DRAIN_TIMEOUT, reader).await.is_err() {
            // Stream held open by a grandchild.
            abort.abort();
        }
    }
}

async fn read_output<R>(mut stream: R, default_level: &'static str, log: Arc<Mutex<RingLog>>)
where
    R: AsyncRead + Unpin,
{
    let mut framer = LineFramer::new();
    let mut chunk = vec![0u8; 8192];
    loop {
        let read = match stream.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                debug!(error = %e, "Runtime output stream failed");
                break;
            }
        };
        let lines = framer.push(&chunk[..read]);
        store(&log, lines, default_level).await;
    }
    let rest: Vec<String> = framer.finish().into_iter().collect();
    store(&log, rest, default_level).await;
}

async fn store(log: &Mutex<RingLog>, lines: Vec<String>, default_level: &str) {
    if lines.iter().all(|l| l.trim().is_empty()) {
        return;
    }
    let mut log = log.lock().await;
    for line in lines.iter().filter(|l| !l.trim().is_empty()) {
        log.add(parse_line(line, default_level));
    }
}

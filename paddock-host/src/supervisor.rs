//! Managed child processes
//!
//! Spawns external programs out of a confined root, tracks them by pid,
//! captures their output streams, and guarantees teardown on shutdown. All
//! registry and buffer state is owned by a single supervisor task; stream
//! readers, exit waiters, and callers talk to it through messages, so an
//! append and a drain can never interleave.

use crate::boundary::Boundary;
use crate::events::{Event, EventKind, EventSink, NullEventSink};
use paddock_api::{RootSelector, Started};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};

/// How launch targets are interpreted.
#[derive(Debug, Clone)]
pub struct LaunchPolicy {
    /// Interpreter used for script targets.
    pub interpreter: PathBuf,
    /// Extension (without the dot) treated as a script.
    pub script_extension: String,
    /// Extra environment set on script launches, e.g. a marker telling the
    /// interpreter to run as a plain language runtime.
    pub script_env: Vec<(String, String)>,
}

impl Default for LaunchPolicy {
    fn default() -> Self {
        Self {
            interpreter: PathBuf::from("node"),
            script_extension: "js".to_string(),
            script_env: Vec::new(),
        }
    }
}

/// Supervisor construction parameters.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Launch root for `RootSelector::Static` (shipped content).
    pub static_root: Boundary,
    /// Launch root for `RootSelector::Dynamic` (staged content).
    pub dynamic_root: Boundary,
    /// Working directory of every child: the application root, not the
    /// launched file's directory.
    pub workdir: PathBuf,
    pub launch: LaunchPolicy,
}

/// Errors surfaced by supervisor operations.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("launch path must be a non-empty relative path")]
    InvalidPath,

    #[error("path outside allowed launch directory: {0}")]
    UnsafePath(String),

    #[error("launch target does not exist: {0}")]
    TargetNotFound(PathBuf),

    #[error("unsupported file type: {0}")]
    UnsupportedType(String),

    #[error("failed to spawn '{path}': {source}")]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no managed process with pid {0}")]
    UnknownPid(u32),

    #[error("failed to signal pid {pid}: {source}")]
    Signal {
        pid: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("supervisor is shut down")]
    ShutDown,
}

/// Bytes taken out of a process's buffers by one drain: everything appended
/// since the previous drain, nothing more, nothing twice.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TakenOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamKind {
    Stdout,
    Stderr,
}

enum Msg {
    Register {
        pid: u32,
        name: String,
        ack: oneshot::Sender<()>,
    },
    Chunk {
        pid: u32,
        stream: StreamKind,
        data: Vec<u8>,
    },
    Exited {
        pid: u32,
        code: Option<i32>,
        signal: Option<i32>,
    },
    Errored {
        pid: u32,
        error: String,
    },
    Kill {
        pid: u32,
        reply: oneshot::Sender<Result<(), SupervisorError>>,
    },
    List {
        reply: oneshot::Sender<Vec<u32>>,
    },
    Drain {
        pid: u32,
        reply: oneshot::Sender<Result<TakenOutput, SupervisorError>>,
    },
    KillAll {
        reply: oneshot::Sender<usize>,
    },
    Shutdown {
        reply: oneshot::Sender<usize>,
    },
}

struct ProcEntry {
    name: String,
    stdout: Vec<Vec<u8>>,
    stderr: Vec<Vec<u8>>,
}

impl ProcEntry {
    fn new(name: String) -> Self {
        Self {
            name,
            stdout: Vec::new(),
            stderr: Vec::new(),
        }
    }
}

/// Handle to the supervisor task. Cheap to clone; all clones talk to the
/// same registry.
#[derive(Clone)]
pub struct Supervisor {
    tx: mpsc::Sender<Msg>,
    shared: Arc<SupervisorConfig>,
}

impl Supervisor {
    /// Spawn the supervisor task with a null event sink.
    pub fn new(config: SupervisorConfig) -> Self {
        Self::with_events(config, Arc::new(NullEventSink::new()))
    }

    /// Spawn the supervisor task recording to the given sink.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn with_events(config: SupervisorConfig, events: Arc<dyn EventSink>) -> Self {
        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(run_registry(rx, events));
        Self {
            tx,
            shared: Arc::new(config),
        }
    }

    /// Validate, spawn, and register an external program.
    ///
    /// A spawn failure never leaves a partially registered process: the
    /// registry learns about the child only after the OS confirms it
    /// started.
    pub async fn start(
        &self,
        path: &str,
        root: RootSelector,
    ) -> Result<Started, SupervisorError> {
        if path.trim().is_empty() {
            return Err(SupervisorError::InvalidPath);
        }

        let boundary = match root {
            RootSelector::Static => &self.shared.static_root,
            RootSelector::Dynamic => &self.shared.dynamic_root,
        };
        let absolute = boundary
            .confine(path)
            .ok_or_else(|| SupervisorError::UnsafePath(path.to_string()))?;

        if tokio::fs::metadata(&absolute).await.is_err() {
            return Err(SupervisorError::TargetNotFound(absolute));
        }

        let launch = &self.shared.launch;
        let extension = absolute
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);

        let mut cmd = match extension.as_deref() {
            None => {
                tracing::debug!(path = %absolute.display(), "launching binary");
                Command::new(&absolute)
            }
            Some(ext) if ext == launch.script_extension => {
                tracing::debug!(path = %absolute.display(), "launching script");
                let mut c = Command::new(&launch.interpreter);
                c.arg(&absolute);
                for (key, value) in &launch.script_env {
                    c.env(key, value);
                }
                c
            }
            Some(other) => {
                return Err(SupervisorError::UnsupportedType(format!(".{}", other)));
            }
        };

        cmd.current_dir(&self.shared.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        // Own process group, so a kill reaches everything the child spawned.
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|e| SupervisorError::Spawn {
            path: absolute.clone(),
            source: e,
        })?;

        let Some(pid) = child.id() else {
            return Err(SupervisorError::Spawn {
                path: absolute,
                source: std::io::Error::other("process exited before it could be tracked"),
            });
        };

        let name = absolute
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string());

        let (ack_tx, ack_rx) = oneshot::channel();
        let registered = self
            .tx
            .send(Msg::Register {
                pid,
                name: name.clone(),
                ack: ack_tx,
            })
            .await
            .is_ok()
            && ack_rx.await.is_ok();
        if !registered {
            // Supervisor already gone; do not leave a stray child behind.
            let _ = child.start_kill();
            return Err(SupervisorError::ShutDown);
        }

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let stdout_task =
            stdout.map(|s| tokio::spawn(pump_stream(s, pid, StreamKind::Stdout, self.tx.clone())));
        let stderr_task =
            stderr.map(|s| tokio::spawn(pump_stream(s, pid, StreamKind::Stderr, self.tx.clone())));

        let tx = self.tx.clone();
        tokio::spawn(async move {
            // Let the readers run dry first: every chunk is then enqueued
            // ahead of the exit notice.
            if let Some(task) = stdout_task {
                let _ = task.await;
            }
            if let Some(task) = stderr_task {
                let _ = task.await;
            }
            match child.wait().await {
                Ok(status) => {
                    #[cfg(unix)]
                    let signal = {
                        use std::os::unix::process::ExitStatusExt;
                        status.signal()
                    };
                    #[cfg(not(unix))]
                    let signal = None;
                    let _ = tx
                        .send(Msg::Exited {
                            pid,
                            code: status.code(),
                            signal,
                        })
                        .await;
                }
                Err(e) => {
                    let _ = tx
                        .send(Msg::Errored {
                            pid,
                            error: e.to_string(),
                        })
                        .await;
                }
            }
        });

        Ok(Started {
            pid,
            launched: name,
        })
    }

    /// Terminate the process tree rooted at `pid`. On success the process is
    /// deregistered immediately; on signal failure the bookkeeping stays so
    /// the caller can retry.
    pub async fn kill(&self, pid: u32) -> Result<(), SupervisorError> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(Msg::Kill { pid, reply: tx })
            .await
            .map_err(|_| SupervisorError::ShutDown)?;
        rx.await.map_err(|_| SupervisorError::ShutDown)?
    }

    /// Currently registered pids.
    pub async fn list(&self) -> Result<Vec<u32>, SupervisorError> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(Msg::List { reply: tx })
            .await
            .map_err(|_| SupervisorError::ShutDown)?;
        rx.await.map_err(|_| SupervisorError::ShutDown)
    }

    /// Atomically take and clear everything buffered for `pid`.
    pub async fn drain_output(&self, pid: u32) -> Result<TakenOutput, SupervisorError> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(Msg::Drain { pid, reply: tx })
            .await
            .map_err(|_| SupervisorError::ShutDown)?;
        rx.await.map_err(|_| SupervisorError::ShutDown)?
    }

    /// Signal every registered process and clear the registry. Individual
    /// signal failures are logged, not returned; this is best-effort
    /// shutdown cleanup. Returns how many processes were signalled.
    pub async fn kill_all(&self) -> usize {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(Msg::KillAll { reply: tx }).await.is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    /// Kill everything and stop the supervisor task. Further calls on any
    /// clone of this handle fail with `ShutDown`.
    pub async fn shutdown(&self) -> usize {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(Msg::Shutdown { reply: tx }).await.is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("workdir", &self.shared.workdir)
            .finish()
    }
}

/// Forward one stream's chunks into the registry until EOF.
async fn pump_stream<R: AsyncRead + Unpin>(
    mut reader: R,
    pid: u32,
    stream: StreamKind,
    tx: mpsc::Sender<Msg>,
) {
    let mut buf = [0u8; 8192];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                tracing::debug!(pid, stream = ?stream, bytes = n, "child output");
                if tx
                    .send(Msg::Chunk {
                        pid,
                        stream,
                        data: buf[..n].to_vec(),
                    })
                    .await
                    .is_err()
                {
                    break;
                }
            }
            Err(e) => {
                tracing::debug!(pid, error = %e, "stream read ended");
                break;
            }
        }
    }
}

/// The registry task: sole owner of per-process state.
async fn run_registry(mut rx: mpsc::Receiver<Msg>, events: Arc<dyn EventSink>) {
    let mut procs: HashMap<u32, ProcEntry> = HashMap::new();

    while let Some(msg) = rx.recv().await {
        match msg {
            Msg::Register { pid, name, ack } => {
                tracing::info!(pid, launched = %name, "process registered");
                record(
                    &events,
                    Event::new(EventKind::ProcessSpawned, name.clone()).with_pid(pid),
                );
                procs.insert(pid, ProcEntry::new(name));
                let _ = ack.send(());
            }
            Msg::Chunk { pid, stream, data } => {
                // Chunks may straggle in after a kill; they have nowhere to go.
                if let Some(entry) = procs.get_mut(&pid) {
                    match stream {
                        StreamKind::Stdout => entry.stdout.push(data),
                        StreamKind::Stderr => entry.stderr.push(data),
                    }
                }
            }
            Msg::Exited { pid, code, signal } => {
                if let Some(entry) = procs.remove(&pid) {
                    tracing::info!(pid, ?code, ?signal, launched = %entry.name, "process exited");
                    record(
                        &events,
                        Event::new(
                            EventKind::ProcessExited,
                            format!("code {:?}, signal {:?}", code, signal),
                        )
                        .with_pid(pid),
                    );
                }
            }
            Msg::Errored { pid, error } => {
                if let Some(entry) = procs.remove(&pid) {
                    tracing::error!(pid, launched = %entry.name, error = %error, "process errored");
                    record(&events, Event::new(EventKind::ProcessErrored, error).with_pid(pid));
                }
            }
            Msg::Kill { pid, reply } => {
                let result = if !procs.contains_key(&pid) {
                    Err(SupervisorError::UnknownPid(pid))
                } else {
                    match signal_tree(pid) {
                        Ok(()) => {
                            // Deliberate termination: drop the entry now
                            // rather than waiting for the exit event.
                            procs.remove(&pid);
                            tracing::info!(pid, "process killed");
                            record(&events, Event::new(EventKind::ProcessKilled, "killed").with_pid(pid));
                            Ok(())
                        }
                        Err(e) => {
                            tracing::error!(pid, error = %e, "failed to kill process");
                            Err(SupervisorError::Signal { pid, source: e })
                        }
                    }
                };
                let _ = reply.send(result);
            }
            Msg::List { reply } => {
                let mut pids: Vec<u32> = procs.keys().copied().collect();
                pids.sort_unstable();
                let _ = reply.send(pids);
            }
            Msg::Drain { pid, reply } => {
                let result = match procs.get_mut(&pid) {
                    None => Err(SupervisorError::UnknownPid(pid)),
                    Some(entry) => {
                        let taken = TakenOutput {
                            stdout: std::mem::take(&mut entry.stdout).concat(),
                            stderr: std::mem::take(&mut entry.stderr).concat(),
                        };
                        tracing::debug!(
                            pid,
                            stdout_bytes = taken.stdout.len(),
                            stderr_bytes = taken.stderr.len(),
                            "output drained"
                        );
                        Ok(taken)
                    }
                };
                let _ = reply.send(result);
            }
            Msg::KillAll { reply } => {
                let _ = reply.send(kill_everything(&mut procs, &events));
            }
            Msg::Shutdown { reply } => {
                let _ = reply.send(kill_everything(&mut procs, &events));
                break;
            }
        }
    }
}

/// Signal every registered process, log each outcome, clear the registry.
fn kill_everything(procs: &mut HashMap<u32, ProcEntry>, events: &Arc<dyn EventSink>) -> usize {
    let count = procs.len();
    if count > 0 {
        tracing::info!(count, "killing all managed processes");
    }
    for (pid, entry) in procs.iter() {
        match signal_tree(*pid) {
            Ok(()) => {
                tracing::info!(pid, launched = %entry.name, "process killed");
                record(events, Event::new(EventKind::ProcessKilled, "shutdown").with_pid(*pid));
            }
            Err(e) => {
                tracing::error!(pid, error = %e, "failed to kill process");
            }
        }
    }
    procs.clear();
    count
}

fn record(events: &Arc<dyn EventSink>, event: Event) {
    if let Err(e) = events.record(event) {
        tracing::warn!(error = %e, "event sink rejected record");
    }
}

/// Send SIGTERM to the whole process group rooted at `pid`. Children are
/// spawned with their own group, so the group id equals the pid.
#[cfg(unix)]
fn signal_tree(pid: u32) -> std::io::Result<()> {
    let rc = unsafe { libc::kill(-(pid as i32), libc::SIGTERM) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn signal_tree(_pid: u32) -> std::io::Result<()> {
    Err(std::io::Error::other(
        "process-tree termination is only supported on unix",
    ))
}

//! Host façade and operation dispatch
//!
//! A `Host` is constructed once at startup and handed by reference to every
//! caller; it owns the confinement boundaries, the staging engine, the
//! process supervisor, and the resource resolver for the process lifetime.
//! `dispatch` is the single entry point for named operations: whatever goes
//! wrong inside, callers get the uniform envelope back, never a fault.

use crate::boundary::Roots;
use crate::events::{Event, EventKind, EventSink, FileEventSink, NullEventSink};
use crate::resolver::{ResourceResolver, ServeOrigin};
use crate::staging::StagingEngine;
use crate::supervisor::{LaunchPolicy, Supervisor, SupervisorConfig};
use paddock_api::{
    envelope, Assembled, Cleared, ClearArgs, ConfigArgs, DrainedOutput, Killed, KilledAll,
    PidArgs, Prepared, ProcessList, Resolved, ResolveArgs, SessionEnded, StartArgs,
};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Host construction parameters.
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Application base directory; the content roots live underneath it.
    pub base_dir: PathBuf,
    /// Where the event log lands. Defaults to the platform-local data
    /// directory.
    pub state_dir: Option<PathBuf>,
    pub launch: LaunchPolicy,
}

impl HostConfig {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            state_dir: None,
            launch: LaunchPolicy::default(),
        }
    }
}

/// Errors that can occur while constructing a host.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("failed to open event log: {0}")]
    EventLog(#[from] crate::events::EventError),
}

/// The long-lived core object: boundaries, staging, supervision, resolution.
pub struct Host {
    roots: Roots,
    staging: StagingEngine,
    supervisor: Supervisor,
    resolver: ResourceResolver,
    events: Arc<dyn EventSink>,
}

impl Host {
    /// Build a host with a file event sink under the state directory.
    pub fn new(config: HostConfig) -> Result<Self, HostError> {
        let state_dir = config.state_dir.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("paddock")
        });
        let events: Arc<dyn EventSink> =
            Arc::new(FileEventSink::new(state_dir.join("events.jsonl"))?);
        Ok(Self::with_events(config, events))
    }

    /// Build a host that discards events. Useful for embedders that wire
    /// their own sink or none at all.
    pub fn without_events(config: HostConfig) -> Self {
        Self::with_events(config, Arc::new(NullEventSink::new()))
    }

    /// Build a host recording to the given sink.
    pub fn with_events(config: HostConfig, events: Arc<dyn EventSink>) -> Self {
        let roots = Roots::under(&config.base_dir);

        let staging = StagingEngine::with_events(
            roots.sandbox.clone(),
            roots.components.clone(),
            roots.configs.clone(),
            events.clone(),
        );
        let supervisor = Supervisor::with_events(
            SupervisorConfig {
                static_root: roots.app.clone(),
                dynamic_root: roots.sandbox.clone(),
                workdir: roots.app.base().to_path_buf(),
                launch: config.launch,
            },
            events.clone(),
        );
        let resolver = ResourceResolver::new(roots.app.clone(), roots.sandbox.clone());

        Self {
            roots,
            staging,
            supervisor,
            resolver,
            events,
        }
    }

    pub fn roots(&self) -> &Roots {
        &self.roots
    }

    pub fn staging(&self) -> &StagingEngine {
        &self.staging
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    pub fn resolver(&self) -> &ResourceResolver {
        &self.resolver
    }

    /// Invoke a named operation. Always answers with the uniform envelope;
    /// internal errors become `{success: false, message}`.
    pub async fn dispatch(&self, op: &str, args: Value) -> Value {
        match self.dispatch_inner(op, args).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::error!(op, error = %e, "operation failed");
                envelope::failure(e.to_string())
            }
        }
    }

    async fn dispatch_inner(&self, op: &str, args: Value) -> anyhow::Result<Value> {
        Ok(match op {
            "clear" => {
                let args: ClearArgs = parse_args(args)?;
                let message = self.staging.clear(&args.zone).await?;
                envelope::success(&Cleared { message })
            }
            "prepare" => {
                let args: ConfigArgs = parse_args(args)?;
                let prepared = self.staging.prepare(&args.config).await?;
                envelope::success(&Prepared { prepared })
            }
            "assemble" => {
                let args: ConfigArgs = parse_args(args)?;
                self.staging.assemble(&args.config).await?;
                envelope::success(&Assembled {
                    message: "assembly complete".to_string(),
                })
            }
            "start" => {
                let args: StartArgs = parse_args(args)?;
                let started = self.supervisor.start(&args.path, args.root).await?;
                envelope::success(&started)
            }
            "kill" => {
                let args: PidArgs = parse_args(args)?;
                self.supervisor.kill(args.pid).await?;
                envelope::success(&Killed {
                    message: format!("process {} killed", args.pid),
                })
            }
            "list" => {
                let pids = self.supervisor.list().await?;
                let count = pids.len();
                envelope::success(&ProcessList { pids, count })
            }
            "read-output" => {
                let args: PidArgs = parse_args(args)?;
                let taken = self.supervisor.drain_output(args.pid).await?;
                envelope::success(&DrainedOutput::from_bytes(
                    args.pid,
                    &taken.stdout,
                    &taken.stderr,
                ))
            }
            "kill-all" => {
                let killed = self.supervisor.kill_all().await;
                envelope::success(&KilledAll { killed })
            }
            "resolve" => {
                let args: ResolveArgs = parse_args(args)?;
                let path = self
                    .resolver
                    .resolve(ServeOrigin::App, &args.path)
                    .await?;
                envelope::success(&Resolved { path })
            }
            "end-session" => {
                let message = self.end_session().await;
                envelope::success(&SessionEnded { message })
            }
            unknown => anyhow::bail!("unknown operation: {}", unknown),
        })
    }

    /// Clear the whole sandbox, then shut the supervisor down. The host is
    /// inert afterwards; process-control operations answer `ShutDown`.
    pub async fn end_session(&self) -> String {
        match self.staging.clear("all").await {
            Ok(_) => tracing::info!("sandbox cleared for session end"),
            Err(e) => tracing::error!(error = %e, "failed to clear sandbox at session end"),
        }
        self.shutdown().await;
        "session ended".to_string()
    }

    /// Drive kill-all to completion and stop the supervisor. Must finish
    /// before the embedding process exits, or children are orphaned.
    pub async fn shutdown(&self) {
        let killed = self.supervisor.shutdown().await;
        tracing::info!(killed, "supervisor shut down");
        if let Err(e) = self
            .events
            .record(Event::new(EventKind::SessionEnded, format!("killed {}", killed)))
        {
            tracing::warn!(error = %e, "event sink rejected record");
        }
        if let Err(e) = self.events.flush() {
            tracing::warn!(error = %e, "event sink flush failed");
        }
    }
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("root", &self.roots.root.base())
            .finish()
    }
}

/// Missing argument objects count as empty, so no-argument operations accept
/// `null`.
fn parse_args<T: serde::de::DeserializeOwned>(args: Value) -> anyhow::Result<T> {
    let args = if args.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        args
    };
    serde_json::from_value(args).map_err(|e| anyhow::anyhow!("invalid arguments: {}", e))
}

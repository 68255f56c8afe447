//! Declarative sandbox staging
//!
//! Materializes a sandbox directory tree from an assembly configuration:
//! `clear` empties zones, `prepare` creates them fresh, `assemble` builds
//! output files by copying or concatenating named components. Every
//! caller-supplied path is confined before any filesystem mutation; a rule
//! that fails is skipped and logged while the rest of the batch proceeds.

use crate::boundary::Boundary;
use crate::events::{Event, EventKind, EventSink, NullEventSink};
use paddock_api::{AssemblyConfig, AssemblyMode, AssemblyRule, ConfigError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::fs;

/// Errors that fail a staging operation outright. Per-rule problems inside
/// `assemble` never surface here; they are logged and skipped.
#[derive(Debug, Error)]
pub enum StagingError {
    #[error("invalid zone name: {0}")]
    UnsafeZone(String),

    #[error("invalid or missing config path")]
    UnsafeConfigPath,

    #[error("config file does not exist: {0}")]
    ConfigNotFound(PathBuf),

    #[error("failed to read config {path}: {source}")]
    ReadConfig {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config is not valid JSON: {0}")]
    ParseConfig(#[from] serde_json::Error),

    #[error(transparent)]
    Invalid(#[from] ConfigError),

    #[error("failed to clear '{path}': {source}")]
    Clear {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to create zone '{zone}': {source}")]
    CreateZone {
        zone: String,
        #[source]
        source: std::io::Error,
    },
}

/// Why a single rule was skipped during `assemble`.
#[derive(Debug, Error)]
enum RuleError {
    #[error("unsafe output path: {0}")]
    UnsafeOutput(String),

    #[error("unsafe output directory: {0}")]
    UnsafeOutputDir(String),

    #[error("unsafe component directory: {0}")]
    UnsafeComponentDir(String),

    #[error("unsafe component name: {0}")]
    UnsafeComponent(String),

    #[error("failed to {action} '{path}': {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Stages sandbox content. Operates over three boundaries: the writable
/// sandbox root, and the read-only components and configs roots.
pub struct StagingEngine {
    sandbox: Boundary,
    components: Boundary,
    configs: Boundary,
    events: Arc<dyn EventSink>,
}

impl std::fmt::Debug for StagingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagingEngine")
            .field("sandbox", &self.sandbox)
            .finish()
    }
}

impl StagingEngine {
    pub fn new(sandbox: Boundary, components: Boundary, configs: Boundary) -> Self {
        Self::with_events(sandbox, components, configs, Arc::new(NullEventSink::new()))
    }

    pub fn with_events(
        sandbox: Boundary,
        components: Boundary,
        configs: Boundary,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            sandbox,
            components,
            configs,
            events,
        }
    }

    /// Remove the contents of one zone, or of the whole sandbox when `zone`
    /// is `"all"`. Zone directories themselves are retained; missing targets
    /// count as already clear.
    pub async fn clear(&self, zone: &str) -> Result<String, StagingError> {
        if zone == "all" {
            let base = self.sandbox.base().to_path_buf();
            remove_children(&base)
                .await
                .map_err(|source| StagingError::Clear { path: base, source })?;
            self.record(Event::new(EventKind::SandboxCleared, "all zones"));
            return Ok("sandbox fully cleared".to_string());
        }

        let dir = self.sandbox.confine(zone).ok_or_else(|| {
            tracing::warn!(zone, "unsafe zone name rejected");
            self.record(Event::new(EventKind::UnsafePathBlocked, zone));
            StagingError::UnsafeZone(zone.to_string())
        })?;
        remove_children(&dir)
            .await
            .map_err(|source| StagingError::Clear { path: dir, source })?;
        Ok(format!("zone '{}' cleared", zone))
    }

    /// Load and validate a config, then create each safe zone directory and
    /// clear its contents. Unsafe zone names are skipped and logged, not
    /// fatal. Returns the zones actually prepared, in config order.
    pub async fn prepare(&self, config_path: &str) -> Result<Vec<String>, StagingError> {
        let config = self.load_config(config_path).await?;

        let mut prepared = Vec::new();
        for zone in config.zone_names() {
            let Some(dir) = self.sandbox.confine(zone) else {
                self.skip_zone(zone);
                continue;
            };
            fs::create_dir_all(&dir)
                .await
                .map_err(|source| StagingError::CreateZone {
                    zone: zone.to_string(),
                    source,
                })?;
            remove_children(&dir)
                .await
                .map_err(|source| StagingError::Clear { path: dir, source })?;
            prepared.push(zone.to_string());
        }

        tracing::info!(?prepared, "zones prepared");
        Ok(prepared)
    }

    /// Load and validate a config, then build every rule's output file.
    /// Individual rule failures (unsafe paths, missing components, write
    /// errors) skip only that rule; the batch completes best-effort.
    /// Re-running with identical inputs reproduces byte-identical outputs.
    pub async fn assemble(&self, config_path: &str) -> Result<(), StagingError> {
        let config = self.load_config(config_path).await?;

        for (zone, rules) in &config.zones {
            let Some(zone_dir) = self.sandbox.confine(zone) else {
                self.skip_zone(zone);
                continue;
            };
            let zone_boundary = Boundary::new(&zone_dir);

            for rule in rules {
                if let Err(e) = self
                    .apply_rule(&zone_boundary, rule, config.default_assemble)
                    .await
                {
                    tracing::warn!(zone, output = %rule.output, error = %e, "rule skipped");
                    self.record(
                        Event::new(
                            EventKind::RuleSkipped,
                            format!("{}/{}: {}", zone, rule.output, e),
                        ),
                    );
                }
            }
        }

        Ok(())
    }

    async fn apply_rule(
        &self,
        zone: &Boundary,
        rule: &AssemblyRule,
        doc_default: Option<bool>,
    ) -> Result<(), RuleError> {
        if !zone.is_safe(&rule.output) {
            return Err(RuleError::UnsafeOutput(rule.output.clone()));
        }
        let out_dir_rel = rule.output_dir.as_deref().unwrap_or("");
        let out_dir = zone
            .confine(out_dir_rel)
            .ok_or_else(|| RuleError::UnsafeOutputDir(out_dir_rel.to_string()))?;

        let comp_dir_rel = rule.component_dir.as_deref().unwrap_or("");
        let comp_dir = self
            .components
            .confine(comp_dir_rel)
            .ok_or_else(|| RuleError::UnsafeComponentDir(comp_dir_rel.to_string()))?;
        for component in &rule.components {
            if !self.components.is_safe(component) {
                return Err(RuleError::UnsafeComponent(component.clone()));
            }
        }

        let out_file = out_dir.join(&rule.output);
        if let Some(parent) = out_file.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|source| RuleError::Io {
                    action: "create directory",
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        match (rule.components.len(), rule.mode(doc_default)) {
            (0, _) => {
                fs::write(&out_file, b"").await.map_err(|source| RuleError::Io {
                    action: "write",
                    path: out_file.clone(),
                    source,
                })?;
            }
            (1, AssemblyMode::Copy) => {
                let source_file = comp_dir.join(&rule.components[0]);
                fs::copy(&source_file, &out_file)
                    .await
                    .map_err(|source| RuleError::Io {
                        action: "copy",
                        path: source_file.clone(),
                        source,
                    })?;
            }
            (n, mode) => {
                if mode == AssemblyMode::Copy && n > 1 {
                    tracing::warn!(
                        output = %rule.output,
                        components = n,
                        "copy mode with multiple components, concatenating"
                    );
                }
                self.concatenate(&comp_dir, rule, &out_file).await?;
            }
        }

        tracing::debug!(output = %out_file.display(), "rule applied");
        Ok(())
    }

    /// Join the components' contents with single newlines, in listed order.
    async fn concatenate(
        &self,
        comp_dir: &Path,
        rule: &AssemblyRule,
        out_file: &Path,
    ) -> Result<(), RuleError> {
        let mut assembled: Vec<u8> = Vec::new();
        for (i, component) in rule.components.iter().enumerate() {
            let path = comp_dir.join(component);
            let bytes = fs::read(&path).await.map_err(|source| RuleError::Io {
                action: "read",
                path: path.clone(),
                source,
            })?;
            if i > 0 {
                assembled.push(b'\n');
            }
            assembled.extend_from_slice(&bytes);
        }
        fs::write(out_file, &assembled)
            .await
            .map_err(|source| RuleError::Io {
                action: "write",
                path: out_file.to_path_buf(),
                source,
            })
    }

    /// Confine and load a config file, then validate its structure. Nothing
    /// is touched in the sandbox until this succeeds.
    async fn load_config(&self, config_path: &str) -> Result<AssemblyConfig, StagingError> {
        if config_path.is_empty() {
            return Err(StagingError::UnsafeConfigPath);
        }
        let path = self.configs.confine(config_path).ok_or_else(|| {
            tracing::warn!(path = config_path, "unsafe config path rejected");
            self.record(Event::new(EventKind::UnsafePathBlocked, config_path));
            StagingError::UnsafeConfigPath
        })?;

        if fs::metadata(&path).await.is_err() {
            return Err(StagingError::ConfigNotFound(path));
        }

        let text = fs::read_to_string(&path)
            .await
            .map_err(|source| StagingError::ReadConfig { path, source })?;
        let doc: serde_json::Value = serde_json::from_str(&text)?;
        Ok(AssemblyConfig::from_value(&doc)?)
    }

    fn skip_zone(&self, zone: &str) {
        tracing::warn!(zone, "unsafe zone name, skipping");
        self.record(Event::new(EventKind::ZoneSkipped, zone));
    }

    fn record(&self, event: Event) {
        if let Err(e) = self.events.record(event) {
            tracing::warn!(error = %e, "event sink rejected record");
        }
    }
}

/// Delete every entry directly under `dir`, keeping `dir` itself. A missing
/// directory is already clear.
async fn remove_children(dir: &Path) -> std::io::Result<()> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let file_type = entry.file_type().await?;
        if file_type.is_dir() {
            fs::remove_dir_all(&path).await?;
        } else {
            fs::remove_file(&path).await?;
        }
    }
    Ok(())
}

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{ensure, Context, Result};
use cmdrelay_dispatch::{Pattern, PatternTable};
use indexmap::IndexMap;
use serde::Deserialize;

const DEFAULT_TIMEOUT_MS: u64 = 60_000;

/// Loaded relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Bus project identifier.
    pub project_id: String,
    /// Subscription (inbound topic) name.
    pub subscription_name: String,
    /// Topic results are published to.
    pub topic_name: String,
    /// Credentials file, resolved against the config directory.
    pub credentials: Option<PathBuf>,
    /// Enables debug-level logging.
    pub debug: bool,
    /// Loop and process settings.
    pub runtime: RuntimeSettings,
    /// Command patterns keyed by canonical trigger key.
    pub patterns: Arc<PatternTable>,
    source_dir: PathBuf,
}

#[derive(Debug, Deserialize)]
struct RelayConfigSerde {
    #[serde(default)]
    project_id: String,
    subscription_name: String,
    topic_name: String,
    #[serde(default)]
    credentials: Option<PathBuf>,
    #[serde(default)]
    debug: bool,
    #[serde(default)]
    runtime: RuntimeSettings,
    #[serde(default)]
    pattern: IndexMap<String, Pattern>,
}

/// Settings for the message loop and process execution.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RuntimeSettings {
    /// Messages to process before stopping; `0` runs until the inbox closes.
    #[serde(default)]
    pub max_messages: u64,
    /// Per-command timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// JSON-lines log file; logs go to stderr when unset.
    #[serde(default)]
    pub log_path: Option<PathBuf>,
    /// Optional JSON-lines file receiving lifecycle events.
    #[serde(default)]
    pub event_log: Option<PathBuf>,
    /// Inbound JSON-lines file; `-` or unset reads stdin.
    #[serde(default)]
    pub inbox: Option<PathBuf>,
    /// Outbound JSON-lines file; defaults to `outbox/<topic>.jsonl`.
    #[serde(default)]
    pub outbox: Option<PathBuf>,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            max_messages: 0,
            timeout_ms: default_timeout_ms(),
            log_path: None,
            event_log: None,
            inbox: None,
            outbox: None,
        }
    }
}

impl RuntimeSettings {
    /// Per-command timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

const fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

impl RelayConfig {
    /// Loads configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading relay config {}", path.display()))?;
        let source_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self::from_toml(&raw, source_dir).with_context(|| format!("parsing {}", path.display()))
    }

    /// Parses configuration text; relative paths resolve against `source_dir`.
    pub fn from_toml(raw: &str, source_dir: impl Into<PathBuf>) -> Result<Self> {
        let source_dir = source_dir.into();
        let mut document: RelayConfigSerde = toml::from_str(raw)?;
        ensure!(
            !document.subscription_name.trim().is_empty(),
            "subscription_name must not be empty"
        );
        ensure!(
            !document.topic_name.trim().is_empty(),
            "topic_name must not be empty"
        );
        if document.runtime.timeout_ms == 0 {
            document.runtime.timeout_ms = default_timeout_ms();
        }
        let patterns = PatternTable::from_entries(document.pattern)?;

        let resolve = |candidate: PathBuf| resolve_against(&source_dir, candidate);
        let runtime = RuntimeSettings {
            log_path: document.runtime.log_path.map(resolve),
            event_log: document.runtime.event_log.map(resolve),
            inbox: document
                .runtime
                .inbox
                .map(|inbox| if is_stdio(&inbox) { inbox } else { resolve(inbox) }),
            outbox: document.runtime.outbox.map(resolve),
            ..document.runtime
        };

        Ok(Self {
            project_id: document.project_id,
            subscription_name: document.subscription_name,
            topic_name: document.topic_name,
            credentials: document.credentials.map(resolve),
            debug: document.debug,
            runtime,
            patterns: Arc::new(patterns),
            source_dir,
        })
    }

    /// Resolves a path relative to the configuration file.
    #[must_use]
    pub fn resolve_path(&self, candidate: impl AsRef<Path>) -> PathBuf {
        resolve_against(&self.source_dir, candidate.as_ref().to_path_buf())
    }

    /// Outbound file, falling back to `outbox/<topic>.jsonl` next to the config.
    #[must_use]
    pub fn outbox_path(&self) -> PathBuf {
        self.runtime.outbox.clone().unwrap_or_else(|| {
            self.source_dir
                .join("outbox")
                .join(format!("{}.jsonl", self.topic_name))
        })
    }

    /// Pattern definitions worth flagging at startup.
    #[must_use]
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings: Vec<String> = self
            .patterns
            .conflicting_policies()
            .into_iter()
            .map(|key| {
                format!("pattern {key:?} sets both pass_args and pass_stdin; stdin is ignored")
            })
            .collect();
        warnings.extend(
            self.patterns
                .empty_commands()
                .into_iter()
                .map(|key| format!("pattern {key:?} has an empty command")),
        );
        if self.patterns.is_empty() {
            warnings.push("no patterns configured; every message is a miss".into());
        }
        if let Some(credentials) = &self.credentials {
            if !credentials.exists() {
                warnings.push(format!(
                    "credentials file {} does not exist",
                    credentials.display()
                ));
            }
        }
        warnings
    }
}

/// `-` stands for the process's standard streams.
#[must_use]
pub fn is_stdio(path: &Path) -> bool {
    path.as_os_str() == "-"
}

fn resolve_against(base: &Path, candidate: PathBuf) -> PathBuf {
    if candidate.is_absolute() {
        candidate
    } else {
        base.join(candidate)
    }
}

use std::{fmt, path::PathBuf, sync::Arc};

use anyhow::Result;
use serde_json::Value;
use shared_event_bus::{BusMessage, FileMessagePublisher, MessagePublisher};
use shared_logging::{JsonLogger, LogLevel, LogRecord};

const EVENTS_TOPIC: &str = "relay.events";

/// Builder configuring relay telemetry sinks.
pub struct RelayTelemetryBuilder {
    module: String,
    log_path: Option<PathBuf>,
    debug: bool,
    event_log: Option<PathBuf>,
    event_publisher: Option<Arc<dyn MessagePublisher>>,
}

impl RelayTelemetryBuilder {
    /// Creates a new builder for the given module label.
    #[must_use]
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            log_path: None,
            debug: false,
            event_log: None,
            event_publisher: None,
        }
    }

    /// Writes logs to this file instead of stderr.
    #[must_use]
    pub fn log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// Enables debug-level records.
    #[must_use]
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Appends lifecycle events to a JSON-lines file.
    #[must_use]
    pub fn event_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.event_log = Some(path.into());
        self
    }

    /// Publishes lifecycle events through an existing publisher.
    #[must_use]
    pub fn event_publisher(mut self, publisher: Arc<dyn MessagePublisher>) -> Self {
        self.event_publisher = Some(publisher);
        self
    }

    /// Finalizes the builder.
    pub fn build(self) -> Result<RelayTelemetry> {
        let logger = match self.log_path {
            Some(path) => JsonLogger::new(path)?,
            None => JsonLogger::stderr(),
        };
        let logger = logger.with_min_level(if self.debug {
            LogLevel::Debug
        } else {
            LogLevel::Info
        });
        let events = match (self.event_publisher, self.event_log) {
            (Some(publisher), _) => Some(publisher),
            (None, Some(path)) => {
                Some(Arc::new(FileMessagePublisher::new(path)?) as Arc<dyn MessagePublisher>)
            }
            (None, None) => None,
        };
        Ok(RelayTelemetry {
            inner: Arc::new(TelemetryInner {
                module: self.module,
                logger,
                events,
            }),
        })
    }
}

/// Telemetry handle shared by the relay loop and the CLI.
#[derive(Clone)]
pub struct RelayTelemetry {
    inner: Arc<TelemetryInner>,
}

impl fmt::Debug for RelayTelemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayTelemetry")
            .field("module", &self.inner.module)
            .field("logger", &self.inner.logger)
            .field("events", &self.inner.events.is_some())
            .finish()
    }
}

struct TelemetryInner {
    module: String,
    logger: JsonLogger,
    events: Option<Arc<dyn MessagePublisher>>,
}

impl RelayTelemetry {
    /// Returns a builder for this telemetry helper.
    #[must_use]
    pub fn builder(module: impl Into<String>) -> RelayTelemetryBuilder {
        RelayTelemetryBuilder::new(module)
    }

    /// Logs a structured record. Sink failures are reported on stderr and swallowed.
    pub fn log(&self, level: LogLevel, message: &str, metadata: Value) {
        if !self.inner.logger.enabled(level) {
            return;
        }
        let record = LogRecord::new(&self.inner.module, level, message).with_metadata(metadata);
        if let Err(err) = self.inner.logger.log(&record) {
            eprintln!("relay log write failed: {err:?}");
        }
    }

    /// Emits a lifecycle event when an event sink is configured.
    pub async fn event(&self, event_type: &str, payload: Value) {
        let Some(events) = &self.inner.events else {
            return;
        };
        let message = BusMessage::new(payload.to_string())
            .with_attribute("event_type", event_type)
            .with_attribute("source", self.inner.module.as_str());
        if let Err(err) = events.publish(EVENTS_TOPIC, message).await {
            self.log(
                LogLevel::Warn,
                "relay.telemetry.event_failed",
                serde_json::json!({ "event_type": event_type, "error": err.to_string() }),
            );
        }
    }
}

use std::{fmt, path::PathBuf, sync::Arc};

use anyhow::Result;
use serde_json::Value;
use shared_event_bus::{EventPublisher, EventRecord};
use shared_logging::{FilteredSink, JsonLogger, LogLevel, LogRecord, LogSink};

/// Builder for comments telemetry sinks.
pub struct CommentsTelemetryBuilder {
    module: String,
    log_path: Option<PathBuf>,
    sink: Option<Arc<dyn LogSink>>,
    min_level: LogLevel,
    event_publisher: Option<Arc<dyn EventPublisher>>,
}

impl CommentsTelemetryBuilder {
    /// Creates the builder.
    #[must_use]
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            log_path: None,
            sink: None,
            min_level: LogLevel::Info,
            event_publisher: None,
        }
    }

    /// Writes JSON lines to `path`.
    #[must_use]
    pub fn log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// Uses a custom sink; takes precedence over [`Self::log_path`].
    #[must_use]
    pub fn sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Drops records below `level`.
    #[must_use]
    pub const fn min_level(mut self, level: LogLevel) -> Self {
        self.min_level = level;
        self
    }

    /// Sets the event publisher.
    #[must_use]
    pub fn event_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.event_publisher = Some(publisher);
        self
    }

    /// Builds the telemetry handle.
    pub fn build(self) -> Result<CommentsTelemetry> {
        let sink: Option<Arc<dyn LogSink>> = match (self.sink, self.log_path) {
            (Some(sink), _) => Some(sink),
            (None, Some(path)) => Some(Arc::new(JsonLogger::new(path)?)),
            (None, None) => None,
        };
        let sink = sink.map(|inner| Arc::new(FilteredSink::new(inner, self.min_level)));
        Ok(CommentsTelemetry {
            inner: Arc::new(TelemetryInner {
                module: self.module,
                sink,
                publisher: self.event_publisher,
            }),
        })
    }
}

/// Telemetry handle shared by the cache, orchestrator and reply actions.
#[derive(Clone)]
pub struct CommentsTelemetry {
    inner: Arc<TelemetryInner>,
}

struct TelemetryInner {
    module: String,
    sink: Option<Arc<FilteredSink>>,
    publisher: Option<Arc<dyn EventPublisher>>,
}

impl fmt::Debug for CommentsTelemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommentsTelemetry")
            .field("module", &self.inner.module)
            .finish()
    }
}

impl CommentsTelemetry {
    /// Returns a builder.
    #[must_use]
    pub fn builder(module: impl Into<String>) -> CommentsTelemetryBuilder {
        CommentsTelemetryBuilder::new(module)
    }

    /// Logs structured metadata.
    pub fn log(&self, level: LogLevel, message: &str, metadata: &Value) -> Result<()> {
        if let Some(sink) = &self.inner.sink {
            let record = LogRecord::new(&self.inner.module, level, message).with_fields(metadata);
            sink.write(&record)?;
        }
        Ok(())
    }

    /// Publishes an event on the bus.
    pub async fn event(&self, event_type: &str, payload: Value) -> Result<()> {
        if let Some(publisher) = &self.inner.publisher {
            publisher
                .publish(EventRecord::new(&self.inner.module, event_type, payload))
                .await?;
        }
        Ok(())
    }
}

/// Logs through an optional handle; sink failures never reach callers.
pub(crate) fn log_to(
    telemetry: Option<&CommentsTelemetry>,
    level: LogLevel,
    message: &str,
    metadata: &Value,
) {
    if let Some(tel) = telemetry {
        let _ = tel.log(level, message, metadata);
    }
}

/// Publishes through an optional handle; bus failures never reach callers.
pub(crate) async fn event_to(
    telemetry: Option<&CommentsTelemetry>,
    event_type: &str,
    payload: Value,
) {
    if let Some(tel) = telemetry {
        if let Err(err) = tel.event(event_type, payload).await {
            let _ = tel.log(
                LogLevel::Warn,
                "comments.event.publish_failed",
                &serde_json::json!({ "event_type": event_type, "reason": err.to_string() }),
            );
        }
    }
}

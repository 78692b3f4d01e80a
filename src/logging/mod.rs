//! Structured Logging
//!
//! JSON records on stdout plus four size-rotated file sinks:
//! - `app.log`: everything at INFO and above
//! - `error.log`: ERROR only
//! - `model_predictions.log`: the `model_predictions` target
//! - `mlops.log`: the `mlops` target
//!
//! File sinks write through `tracing_appender` non-blocking workers, so a
//! slow or failing disk never blocks or errors the caller.

pub mod rotating;

use std::path::Path;

use serde_json::Value;
use tracing::Level;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{
    filter::{LevelFilter, Targets},
    fmt::{self, MakeWriter},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

use crate::config::LoggingSettings;
use crate::context::RequestContext;
use rotating::RotatingFileWriter;

pub const GENERAL_TARGET: &str = "app";
pub const PREDICTIONS_TARGET: &str = "model_predictions";
pub const MLOPS_TARGET: &str = "mlops";

const MIB: u64 = 1024 * 1024;

/// File sink definition
#[derive(Debug, Clone, Copy)]
pub struct SinkSpec {
    pub file_name: &'static str,
    pub max_bytes: u64,
    pub max_backups: usize,
}

pub const APP_SINK: SinkSpec = SinkSpec {
    file_name: "app.log",
    max_bytes: 10 * MIB,
    max_backups: 5,
};

pub const ERROR_SINK: SinkSpec = SinkSpec {
    file_name: "error.log",
    max_bytes: 10 * MIB,
    max_backups: 5,
};

pub const PREDICTIONS_SINK: SinkSpec = SinkSpec {
    file_name: "model_predictions.log",
    max_bytes: 50 * MIB,
    max_backups: 10,
};

pub const MLOPS_SINK: SinkSpec = SinkSpec {
    file_name: "mlops.log",
    max_bytes: 20 * MIB,
    max_backups: 7,
};

/// Caller-declared routing for [`log`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogCategory {
    General,
    /// Always emitted at ERROR so it reaches the error sink
    Error,
    Predictions,
    Ops,
}

impl LogCategory {
    pub fn target(&self) -> &'static str {
        match self {
            LogCategory::General | LogCategory::Error => GENERAL_TARGET,
            LogCategory::Predictions => PREDICTIONS_TARGET,
            LogCategory::Ops => MLOPS_TARGET,
        }
    }
}

/// Keeps the non-blocking file workers alive; drop on shutdown to flush
pub struct LoggingGuard {
    _guards: Vec<WorkerGuard>,
}

/// Initialize the global subscriber
pub fn init_logging(settings: &LoggingSettings) -> anyhow::Result<LoggingGuard> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    let mut guards = Vec::new();

    layers.push(
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .with_writer(std::io::stdout)
            .with_filter(env_filter)
            .boxed(),
    );

    if settings.file_sinks_enabled {
        let dir = Path::new(&settings.directory);

        let (writer, guard) = open_sink(dir, APP_SINK)?;
        layers.push(json_file_layer(writer).with_filter(LevelFilter::INFO).boxed());
        guards.push(guard);

        let (writer, guard) = open_sink(dir, ERROR_SINK)?;
        layers.push(json_file_layer(writer).with_filter(LevelFilter::ERROR).boxed());
        guards.push(guard);

        let (writer, guard) = open_sink(dir, PREDICTIONS_SINK)?;
        layers.push(
            json_file_layer(writer)
                .with_filter(Targets::new().with_target(PREDICTIONS_TARGET, Level::INFO))
                .boxed(),
        );
        guards.push(guard);

        let (writer, guard) = open_sink(dir, MLOPS_SINK)?;
        layers.push(
            json_file_layer(writer)
                .with_filter(Targets::new().with_target(MLOPS_TARGET, Level::INFO))
                .boxed(),
        );
        guards.push(guard);
    }

    tracing_subscriber::registry()
        .with(layers)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {}", e))?;

    tracing::info!(
        level = %settings.level,
        directory = %settings.directory,
        file_sinks = settings.file_sinks_enabled,
        "Logging initialized"
    );

    Ok(LoggingGuard { _guards: guards })
}

fn open_sink(dir: &Path, spec: SinkSpec) -> anyhow::Result<(NonBlocking, WorkerGuard)> {
    let writer = RotatingFileWriter::new(dir.join(spec.file_name), spec.max_bytes, spec.max_backups)?;
    Ok(tracing_appender::non_blocking(writer))
}

fn json_file_layer<S, W>(writer: W) -> impl Layer<S>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(false)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false)
        .with_writer(writer)
}

macro_rules! emit_at {
    ($target:expr, $level:expr, $($fields:tt)*) => {
        match $level {
            Level::ERROR => tracing::event!(target: $target, Level::ERROR, $($fields)*),
            Level::WARN => tracing::event!(target: $target, Level::WARN, $($fields)*),
            Level::INFO => tracing::event!(target: $target, Level::INFO, $($fields)*),
            Level::DEBUG => tracing::event!(target: $target, Level::DEBUG, $($fields)*),
            _ => tracing::event!(target: $target, Level::TRACE, $($fields)*),
        }
    };
}

/// Emit one record with a dynamic level and category.
///
/// The current request's id and elapsed time are attached when a
/// `RequestContext` is bound.
pub fn log(category: LogCategory, level: Level, message: &str, fields: &Value) {
    let ctx = RequestContext::current();
    let request_id = ctx.as_ref().map(|c| c.request_id().to_string());
    let request_id = request_id.as_deref().unwrap_or("-");
    let duration_ms = ctx.as_ref().map(|c| c.duration_ms()).unwrap_or(0.0);

    match category {
        LogCategory::General => emit_at!(
            GENERAL_TARGET,
            level,
            request_id,
            duration_ms,
            context = %fields,
            "{}",
            message
        ),
        LogCategory::Error => emit_at!(
            GENERAL_TARGET,
            Level::ERROR,
            request_id,
            duration_ms,
            context = %fields,
            "{}",
            message
        ),
        LogCategory::Predictions => emit_at!(
            PREDICTIONS_TARGET,
            level,
            request_id,
            duration_ms,
            context = %fields,
            "{}",
            message
        ),
        LogCategory::Ops => emit_at!(
            MLOPS_TARGET,
            level,
            request_id,
            duration_ms,
            context = %fields,
            "{}",
            message
        ),
    }
}

/// Record a served prediction on the predictions sink
pub fn log_prediction(model_version: &str, label: &str, confidence: f64, latency_ms: f64) {
    log(
        LogCategory::Predictions,
        Level::INFO,
        "Prediction served",
        &serde_json::json!({
            "model_version": model_version,
            "predicted_label": label,
            "confidence": confidence,
            "latency_ms": latency_ms,
        }),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::io;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl Capture {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().clone()).unwrap()
        }
    }

    impl io::Write for Capture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for Capture {
        type Writer = Capture;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    fn capture_sink(filter: Targets) -> (Capture, impl tracing::Subscriber + Send + Sync) {
        let capture = Capture::default();
        let subscriber = tracing_subscriber::registry().with(
            json_file_layer(capture.clone()).with_filter(filter),
        );
        (capture, subscriber)
    }

    #[test]
    fn test_category_targets() {
        assert_eq!(LogCategory::General.target(), "app");
        assert_eq!(LogCategory::Error.target(), "app");
        assert_eq!(LogCategory::Predictions.target(), "model_predictions");
        assert_eq!(LogCategory::Ops.target(), "mlops");
    }

    #[test]
    fn test_log_without_subscriber_is_silent() {
        log(LogCategory::Ops, Level::INFO, "nobody listening", &Value::Null);
    }

    #[test]
    fn test_record_carries_request_context() {
        let (capture, subscriber) =
            capture_sink(Targets::new().with_target(PREDICTIONS_TARGET, Level::INFO));

        tracing::subscriber::with_default(subscriber, || {
            let ctx = RequestContext::begin(Some("req-log-1".to_string()), None);
            ctx.sync_scope(|| {
                log_prediction("v1", "Influenza", 0.8, 120.0);
            });
        });

        let output = capture.contents();
        let record: Value = serde_json::from_str(output.lines().next().unwrap()).unwrap();
        assert_eq!(record["level"], "INFO");
        assert_eq!(record["target"], "model_predictions");
        assert_eq!(record["fields"]["message"], "Prediction served");
        assert_eq!(record["fields"]["request_id"], "req-log-1");
        assert!(record["timestamp"].is_string());
        assert!(record["fields"]["context"]
            .as_str()
            .unwrap()
            .contains("Influenza"));
    }

    #[test]
    fn test_sinks_only_receive_their_category() {
        let (capture, subscriber) =
            capture_sink(Targets::new().with_target(MLOPS_TARGET, Level::INFO));

        tracing::subscriber::with_default(subscriber, || {
            log(LogCategory::General, Level::INFO, "general record", &Value::Null);
            log(LogCategory::Predictions, Level::INFO, "prediction record", &Value::Null);
            log(LogCategory::Ops, Level::INFO, "ops record", &Value::Null);
        });

        let output = capture.contents();
        assert_eq!(output.lines().count(), 1);
        assert!(output.contains("ops record"));
    }

    #[test]
    fn test_error_category_forces_error_level() {
        let (capture, subscriber) =
            capture_sink(Targets::new().with_target(GENERAL_TARGET, Level::ERROR));

        tracing::subscriber::with_default(subscriber, || {
            log(LogCategory::Error, Level::INFO, "escalated", &Value::Null);
            log(LogCategory::General, Level::INFO, "not escalated", &Value::Null);
        });

        let output = capture.contents();
        assert!(output.contains("escalated"));
        assert!(!output.contains("not escalated"));
    }
}

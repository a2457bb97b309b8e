//! Subscriber setup for hosts embedding the engine.
//!
//! The engine itself only emits `tracing` events: recorded outcomes at
//! `info`, skipped signal sources at `warn`, input substitutions at `debug`,
//! and per-decision contributor breakdowns at `debug` on
//! [`DIAGNOSTICS_TARGET`].

use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::EngineError;
use crate::integration::diagnostics::DIAGNOSTICS_TARGET;

pub const DEFAULT_FILTER: &str = "warn,retention_engine=info";
const LOG_FILE_PREFIX: &str = "retention-engine.log";

/// Keeps the non-blocking file writer alive; drop it at shutdown to flush.
pub struct FileLogGuard {
    _guard: WorkerGuard,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    /// `EnvFilter` directives.
    pub filter: String,
    /// Raise [`DIAGNOSTICS_TARGET`] to `debug` on top of `filter`.
    pub diagnostics: bool,
    /// Daily-rotated file output next to stdout.
    pub log_dir: Option<PathBuf>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self::with_filter(DEFAULT_FILTER)
    }
}

impl LogSettings {
    pub fn with_filter(filter: impl Into<String>) -> Self {
        Self {
            filter: filter.into(),
            diagnostics: false,
            log_dir: None,
        }
    }

    pub fn with_diagnostics(mut self) -> Self {
        self.diagnostics = true;
        self
    }

    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }

    /// Reads `RETENTION_LOG`, `RETENTION_DIAGNOSTICS`, `ENABLE_FILE_LOGS` and `LOG_DIR`.
    pub fn from_env() -> Self {
        let mut settings = Self::default();
        if let Ok(filter) = std::env::var("RETENTION_LOG") {
            settings.filter = filter;
        }
        if let Ok(val) = std::env::var("RETENTION_DIAGNOSTICS") {
            settings.diagnostics = val.parse().unwrap_or(false);
        }
        let file_logs = std::env::var("ENABLE_FILE_LOGS")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);
        if file_logs {
            settings.log_dir =
                Some(std::env::var("LOG_DIR").map_or_else(|_| PathBuf::from("./logs"), PathBuf::from));
        }
        settings
    }

    pub fn directives(&self) -> String {
        if self.diagnostics {
            format!("{},{DIAGNOSTICS_TARGET}=debug", self.filter)
        } else {
            self.filter.clone()
        }
    }
}

/// Installs the global subscriber. Fails if the filter does not parse, the
/// log directory cannot be created, or a subscriber is already installed.
pub fn init_tracing(settings: &LogSettings) -> Result<Option<FileLogGuard>, EngineError> {
    let directives = settings.directives();
    let env_filter = EnvFilter::try_new(&directives)
        .map_err(|err| EngineError::Logging(format!("invalid filter {directives:?}: {err}")))?;

    let (file_layer, guard) = match &settings.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir).map_err(|err| {
                EngineError::Logging(format!("cannot create log directory {}: {err}", dir.display()))
            })?;
            let appender = RollingFileAppender::new(Rotation::DAILY, dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true);
            (Some(layer), Some(FileLogGuard { _guard: guard }))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true))
        .with(file_layer)
        .try_init()
        .map_err(|err| EngineError::Logging(err.to_string()))?;

    tracing::debug!(filter = %directives, file = settings.log_dir.is_some(), "tracing initialized");
    Ok(guard)
}

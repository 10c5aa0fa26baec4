use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::OnceLock;

use clap::ValueEnum;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::EnvFilter;

pub const FILTER_ENV: &str = "RESPONDER_LOG_FILTER";

/// Crates whose events follow `--log-level`. Everything else, the HTTP stack
/// included, stays at `warn` unless `RESPONDER_LOG_FILTER` says otherwise.
const OWN_TARGETS: &[&str] = &["chat_sync", "responder_api", "responder_chat"];

#[derive(Clone, Copy, Debug, Default, ValueEnum, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error,
    #[default]
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn as_directive(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct LogConfig {
    pub level: LogLevel,
    pub file: Option<PathBuf>,
}

#[derive(thiserror::Error, Debug)]
pub enum InitError {
    #[error("failed to open log file {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid {FILTER_ENV}: {0}")]
    Filter(String),
    #[error("failed to configure logger: {0}")]
    Configure(String),
}

static GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Installs the global subscriber. Later calls are no-ops.
///
/// Stdout belongs to the conversation, so events go to stderr or to the
/// configured file. Terminal output is kept short; file output carries
/// targets and timestamps.
pub fn init(config: &LogConfig) -> Result<(), InitError> {
    if GUARD.get().is_some() {
        return Ok(());
    }

    let filter = match std::env::var(FILTER_ENV) {
        Ok(custom) if !custom.trim().is_empty() => {
            EnvFilter::try_new(custom.trim()).map_err(|err| InitError::Filter(err.to_string()))?
        }
        _ => EnvFilter::new(directives(config.level)),
    };
    let (writer, guard) = open_sink(config)?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer);
    let installed = if config.file.is_some() {
        tracing::subscriber::set_global_default(builder.with_ansi(false).finish())
    } else {
        tracing::subscriber::set_global_default(
            builder.compact().without_time().with_target(false).finish(),
        )
    };
    installed.map_err(|err| InitError::Configure(err.to_string()))?;

    let _ = GUARD.set(guard);
    Ok(())
}

fn open_sink(config: &LogConfig) -> Result<(NonBlocking, WorkerGuard), InitError> {
    match &config.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| InitError::Io {
                    path: path.clone(),
                    source,
                })?;
            Ok(tracing_appender::non_blocking(file))
        }
        None => Ok(tracing_appender::non_blocking(std::io::stderr())),
    }
}

/// Filter directives for `level`: our crates at `level`, the rest capped at
/// `warn` (or lower when `level` is `error`).
fn directives(level: LogLevel) -> String {
    let fallback = level.min(LogLevel::Warn).as_directive();
    let mut out = fallback.to_string();
    if level > LogLevel::Warn {
        for target in OWN_TARGETS {
            out.push(',');
            out.push_str(target);
            out.push('=');
            out.push_str(level.as_directive());
        }
    }
    out
}

//! Tracing subscriber setup.

use std::path::Path;

use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::Layered;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::config::{LogFormat, LogRotation, LoggingConfig};
use crate::{Error, Result};

type Filtered = Layered<EnvFilter, Registry>;
type BoxedLayer = Box<dyn Layer<Filtered> + Send + Sync>;

fn fmt_layer<W>(format: LogFormat, writer: W, ansi: bool) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(ansi);
    match format {
        LogFormat::Full => layer.boxed(),
        LogFormat::Compact => layer.compact().boxed(),
    }
}

/// Appender writing `path`, rolled over per `config.rotation`.
///
/// Rolled files are named `{stem}.{date}.{extension}` next to `path`; with
/// rotation `never` the file is `path` itself.
fn file_appender(path: &Path, config: &LoggingConfig) -> Result<RollingFileAppender> {
    let invalid = |reason: &str| Error::Config(format!("logging.file {}: {reason}", path.display()));

    let prefix = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .ok_or_else(|| invalid("no file name"))?;
    let directory = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(directory)?;

    let rotation = match config.rotation {
        LogRotation::Never => Rotation::NEVER,
        LogRotation::Hourly => Rotation::HOURLY,
        LogRotation::Daily => Rotation::DAILY,
    };
    let mut builder = RollingFileAppender::builder()
        .rotation(rotation)
        .filename_prefix(prefix);
    if let Some(extension) = path.extension().and_then(|ext| ext.to_str()) {
        builder = builder.filename_suffix(extension);
    }
    if config.rotation != LogRotation::Never {
        builder = builder.max_log_files(config.backup_count + 1);
    }

    builder
        .build(directory)
        .map_err(|e| invalid(&e.to_string()))
}

/// Install the global subscriber.
///
/// `RUST_LOG` takes precedence over `config.level`. When `config.file` is set,
/// a second non-ANSI layer writes to that file, rolled over per
/// `config.rotation` with `config.backup_count` old files kept. A subscriber
/// that is already installed is left in place.
///
/// # Errors
///
/// Returns `Error::Config` if the filter directive is invalid or the log file
/// cannot be opened.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level).map_err(|e| {
            Error::Config(format!("invalid logging.level '{}': {e}", config.level))
        })?,
    };

    let mut layers = vec![fmt_layer(config.format, std::io::stderr, config.ansi)];
    if let Some(path) = &config.file {
        let appender = file_appender(path, config)?;
        layers.push(fmt_layer(config.format, appender, false));
    }

    let init_result = tracing_subscriber::registry()
        .with(env_filter)
        .with(layers)
        .try_init();

    if let Err(err) = init_result {
        tracing::warn!(error = %err, "tracing already initialized; keeping existing subscriber");
    }
    Ok(())
}

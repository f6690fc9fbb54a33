//! Logging setup
//!
//! `run` gets a console layer and, when `logging.file` is set, a
//! non-blocking rolling file layer. `RUST_LOG` directives are honored on
//! top of the configured level. One-shot subcommands use [`init_simple`].

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use crate::config::LoggingSettings;
use crate::error::{Error, Result};

/// Dependencies that are chatty below WARN
const NOISY_CRATES: &[&str] = &["hyper", "reqwest", "tokio_tungstenite", "tungstenite", "surge_ping"];

type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync>;

/// Keeps the file writer thread alive; drop it last so buffered lines are written
pub struct LogGuards {
    _file: Option<WorkerGuard>,
}

pub fn init_logging(settings: &LoggingSettings, verbose: u8, quiet: bool) -> Result<LogGuards> {
    let level = effective_level(&settings.level, verbose, quiet);

    let (file_layer, guard) = match settings.file.as_deref() {
        Some(file) => {
            let (layer, guard) = LogFile::new(file, settings).into_layer(settings.json_format)?;
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter(level)?)
        .with(console_layer(settings.json_format))
        .with(file_layer)
        .try_init()
        .map_err(|e| Error::Internal(format!("Failed to initialize logging: {}", e)))?;

    tracing::debug!(%level, file = ?settings.file, json = settings.json_format, "Logging initialized");
    Ok(LogGuards { _file: guard })
}

/// `-q` wins over `-v`; `-v` means DEBUG and `-vv` TRACE
fn effective_level(configured: &str, verbose: u8, quiet: bool) -> Level {
    if quiet {
        return Level::ERROR;
    }
    match verbose {
        0 => parse_level(configured).unwrap_or(Level::INFO),
        1 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

fn parse_level(name: &str) -> Option<Level> {
    if name.eq_ignore_ascii_case("warning") {
        return Some(Level::WARN);
    }
    Level::from_str(name).ok()
}

fn env_filter(level: Level) -> Result<EnvFilter> {
    let base = level.as_str().to_lowercase();
    let mut filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&base));

    let directives = std::iter::once(format!("probe_node={}", base))
        .chain(NOISY_CRATES.iter().map(|krate| format!("{}=warn", krate)));
    for directive in directives {
        let parsed = directive
            .parse()
            .map_err(|e| Error::Internal(format!("Invalid log directive '{}': {}", directive, e)))?;
        filter = filter.add_directive(parsed);
    }
    Ok(filter)
}

fn console_layer<S>(json: bool) -> BoxedLayer<S>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    if json {
        fmt::layer().json().with_current_span(false).boxed()
    } else {
        fmt::layer().compact().with_target(false).boxed()
    }
}

/// Rolling file destination derived from `logging.file`
struct LogFile {
    directory: PathBuf,
    prefix: String,
    rotation: Rotation,
    keep: usize,
}

impl LogFile {
    fn new(file: &str, settings: &LoggingSettings) -> Self {
        let path = Path::new(file);
        let directory = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let prefix = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("probe-node.log")
            .to_string();

        // The appender rotates by time only, so small size caps rotate hourly
        let rotation = match settings.max_file_size_mb {
            1..=9 => Rotation::HOURLY,
            _ => Rotation::DAILY,
        };

        Self {
            directory,
            prefix,
            rotation,
            keep: settings.max_files.max(1) as usize,
        }
    }

    fn into_layer<S>(self, json: bool) -> Result<(BoxedLayer<S>, WorkerGuard)>
    where
        S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    {
        fs::create_dir_all(&self.directory).map_err(|e| Error::IoWrite {
            path: self.directory.clone(),
            source: e,
        })?;

        let appender = RollingFileAppender::builder()
            .rotation(self.rotation)
            .filename_prefix(&self.prefix)
            .max_log_files(self.keep)
            .build(&self.directory)
            .map_err(|e| Error::Internal(format!("Failed to open log file in {}: {}", self.directory.display(), e)))?;
        let (writer, guard) = tracing_appender::non_blocking(appender);

        let layer = fmt::layer().with_writer(writer).with_ansi(false);
        let layer = if json {
            layer.json().boxed()
        } else {
            layer.with_thread_ids(true).boxed()
        };
        Ok((layer, guard))
    }
}

/// stderr-only subscriber for `config` and other short commands
pub fn init_simple(level: Level) -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(level.into()))
        .with(fmt::layer().compact().with_writer(std::io::stderr))
        .try_init()
        .map_err(|e| Error::Internal(format!("Failed to initialize logging: {}", e)))
}

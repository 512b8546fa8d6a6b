// crates/observability/src/lib.rs
//! Process-wide `tracing` setup shared by jobwatch binaries.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "warn,jobwatch=info";
const VERBOSE_FILTER: &str = "info,jobwatch=debug";
const LOG_FILE_PREFIX: &str = "jobwatch.log";

#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    /// Emit one JSON object per line instead of human-readable output.
    pub json: bool,
    /// Raise the default filter to debug for jobwatch crates.
    pub verbose: bool,
    /// Also write logs to a daily-rolling file in this directory.
    pub log_dir: Option<PathBuf>,
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Install the global subscriber.
///
/// Keep the returned guard alive for the life of the process; dropping it
/// flushes and stops the file writer.
pub fn init_tracing(options: &LogOptions) -> Result<Option<WorkerGuard>> {
    let filter = build_filter(options)?;
    let (file_layer, guard) = match &options.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt_layer(options.json, false, writer)), Some(guard))
        }
        None => (None, None),
    };

    let mut layers: Vec<BoxedLayer> = vec![fmt_layer(options.json, true, std::io::stderr)];
    layers.extend(file_layer);
    Registry::default()
        .with(layers)
        .with(filter)
        .try_init()
        .context("installing tracing subscriber")?;
    Ok(guard)
}

fn build_filter(options: &LogOptions) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    let default = if options.verbose {
        VERBOSE_FILTER
    } else {
        DEFAULT_FILTER
    };
    EnvFilter::try_new(default).with_context(|| format!("parsing log filter {default:?}"))
}

/// Both outputs share formatting; ANSI only on the terminal.
fn fmt_layer<W>(json: bool, ansi: bool, writer: W) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = tracing_subscriber::fmt::layer()
        .with_ansi(ansi)
        .with_target(true)
        .with_writer(writer);
    if json {
        layer.json().flatten_event(true).boxed()
    } else {
        layer.boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // One test owns the global subscriber; the others stay side-effect free.
    #[test]
    fn test_init_with_log_dir_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let options = LogOptions {
            json: true,
            verbose: false,
            log_dir: Some(dir.path().join("logs")),
        };
        let guard = init_tracing(&options).unwrap();
        assert!(guard.is_some());
        tracing::warn!(target: "jobwatch_test", job_id = "J1", "hello");
        drop(guard);

        let files: Vec<_> = std::fs::read_dir(dir.path().join("logs"))
            .unwrap()
            .filter_map(|e| e.ok())
            .collect();
        assert_eq!(files.len(), 1);
        let written = std::fs::read_to_string(files[0].path()).unwrap();
        assert!(written.contains("\"job_id\":\"J1\""), "{written}");

        // A second install is reported, not silently ignored.
        assert!(init_tracing(&LogOptions::default()).is_err());
    }

    #[test]
    fn test_default_filters_parse() {
        assert!(EnvFilter::try_new(DEFAULT_FILTER).is_ok());
        assert!(EnvFilter::try_new(VERBOSE_FILTER).is_ok());
    }
}

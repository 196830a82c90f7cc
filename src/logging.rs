use anyhow::Context;
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;

pub const LOG_FILE_NAME: &str = "speaksync.log";

/// Logs to stdout and to a daily rolling file under `log_file_root`.
/// `RUST_LOG` overrides the configured level.
///
/// The returned guard flushes the file writer on drop, keep it alive for the
/// lifetime of the program.
pub fn init_logging(config: &Config) -> anyhow::Result<WorkerGuard> {
	config.init_log_file_dir().with_context(|| {
		format!("failed to create log dir {}", config.log_file_root.display())
	})?;

	let appender = tracing_appender::rolling::daily(&config.log_file_root, LOG_FILE_NAME);
	let (file_writer, guard) = tracing_appender::non_blocking(appender);

	let level = tracing::Level::from(config.log_level);
	let filter = EnvFilter::builder()
		.with_default_directive(LevelFilter::from_level(level).into())
		.from_env_lossy();

	tracing_subscriber::registry()
		.with(filter)
		.with(fmt::layer().with_writer(std::io::stdout))
		.with(fmt::layer().with_ansi(false).with_writer(file_writer))
		.try_init()
		.context("a global logger is already installed")?;

	Ok(guard)
}

use std::{
	net::{IpAddr, Ipv4Addr},
	path::{Path, PathBuf},
	time::Duration,
};

pub const CONFIG_PATH: &str = "config.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
	#[error("failed to access config file: {0}")]
	Io(#[from] std::io::Error),
	#[error("failed to parse config file: {0}")]
	Parse(#[from] toml::de::Error),
	#[error("failed to serialize config: {0}")]
	Serialize(#[from] toml::ser::Error),
	#[error("invalid config: {0}")]
	Invalid(String),
}

/// Wrapper for [`tracing::Level`] which supports serde
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum LogLevel {
	Trace,
	Debug,
	Info,
	Warn,
	Error,
}

impl From<LogLevel> for tracing::Level {
	fn from(value: LogLevel) -> Self {
		match value {
			LogLevel::Trace => tracing::Level::TRACE,
			LogLevel::Debug => tracing::Level::DEBUG,
			LogLevel::Info => tracing::Level::INFO,
			LogLevel::Warn => tracing::Level::WARN,
			LogLevel::Error => tracing::Level::ERROR,
		}
	}
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Config {
	pub log_level: LogLevel,
	pub log_file_root: PathBuf,
	pub bind_address: IpAddr,
	pub port: u16,
	/// Origin of the processing service, `/process/` is appended to it.
	pub backend_url: String,
	pub max_file_size: u64,
	/// No timeout when absent, a slow processing run keeps the request open.
	pub request_timeout_secs: Option<u64>,
	pub session_ttl_secs: u64,
	pub allowed_origins: Vec<String>,
	/// Advisory `accept` filter of the file picker.
	pub accept: String,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			#[cfg(debug_assertions)]
			log_level: LogLevel::Trace,
			#[cfg(not(debug_assertions))]
			log_level: LogLevel::Info,
			log_file_root: PathBuf::from("./logs"),
			bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
			port: 3000,
			backend_url: "http://127.0.0.1:8000".to_owned(),
			max_file_size: 1024 * 1024 * 1024, // 1 GiB
			request_timeout_secs: None,
			session_ttl_secs: 60 * 60,
			allowed_origins: vec!["http://localhost:3000".to_owned()],
			accept: "video/mp4".to_owned(),
		}
	}
}

impl Config {
	pub fn request_timeout(&self) -> Option<Duration> {
		self.request_timeout_secs.map(Duration::from_secs)
	}

	pub fn session_ttl(&self) -> Duration {
		Duration::from_secs(self.session_ttl_secs)
	}

	pub fn init_log_file_dir(&self) -> std::io::Result<()> {
		std::fs::create_dir_all(&self.log_file_root)
	}

	pub fn validate(&self) -> Result<(), ConfigError> {
		let url = reqwest::Url::parse(&self.backend_url).map_err(|err| {
			ConfigError::Invalid(format!("backend_url {:?}: {err}", self.backend_url))
		})?;
		if !matches!(url.scheme(), "http" | "https") {
			return Err(ConfigError::Invalid(format!(
				"backend_url must use http or https, got {}",
				url.scheme()
			)));
		}
		if self.max_file_size == 0 {
			return Err(ConfigError::Invalid("max_file_size must be positive".to_owned()));
		}
		Ok(())
	}
}

/// Loads the app config.
///
/// Reads the config from `path` if the file exists, otherwise writes the
/// default config to `path` and returns it. The result is validated either way.
///
/// The flag is `true` when the default file was written. This runs before the
/// logger exists, so reporting that is up to the caller.
pub fn load_config(path: impl AsRef<Path>) -> Result<(Config, bool), ConfigError> {
	let path = path.as_ref();

	let (config, written) = if path.try_exists()? {
		let file_data = std::fs::read_to_string(path)?;
		(toml::from_str::<Config>(&file_data)?, false)
	} else {
		let config = Config::default();
		std::fs::write(path, toml::to_string(&config)?)?;
		(config, true)
	};

	config.validate()?;
	Ok((config, written))
}

use std::{
	io::{self, Write},
	path::PathBuf,
	process::ExitCode,
	sync::Arc,
};

use anyhow::Context;
use clap::{Parser, Subcommand};

use crate::{
	client::{HttpProcessClient, ProcessEndpoint},
	config::{load_config, CONFIG_PATH},
	logging::init_logging,
	uploader::{UploadReport, Uploader, ViewSnapshot},
	uri::encode_uri,
	view::SelectedFile,
	web,
};

#[derive(Debug, Parser)]
#[command(name = "speaksync", version, about = "Upload a video for processing and get a download link back")]
pub struct Cli {
	/// Config file, written with defaults if missing
	#[arg(long, default_value = CONFIG_PATH)]
	pub config: PathBuf,

	#[command(subcommand)]
	pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
	/// Serve the uploader page (default)
	Serve {
		/// Overrides `port` from the config
		#[arg(long)]
		port: Option<u16>,
	},
	/// Upload one file and print the download link
	Upload {
		file: Option<PathBuf>,

		/// Overrides `backend_url` from the config
		#[arg(long)]
		endpoint: Option<String>,
	},
}

pub async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
	let (mut config, written) = load_config(&cli.config)
		.with_context(|| format!("failed to load {}", cli.config.display()))?;
	let _guard = init_logging(&config)?;
	if written {
		tracing::info!("wrote default config to {}", cli.config.display());
	}

	match cli.command.unwrap_or(Command::Serve { port: None }) {
		Command::Serve { port } => {
			if let Some(port) = port {
				config.port = port;
			}
			web::initialize_server(&config).await?;
			Ok(ExitCode::SUCCESS)
		}
		Command::Upload { file, endpoint } => {
			let backend_url = endpoint.unwrap_or_else(|| config.backend_url.clone());
			let client = HttpProcessClient::new(&backend_url, config.request_timeout())
				.context("failed to set up the processing client")?;
			let uploader = Arc::new(Uploader::new(Arc::new(client)));

			let succeeded = upload_once(&uploader, file, &mut io::stdout().lock()).await?;
			Ok(if succeeded { ExitCode::SUCCESS } else { ExitCode::FAILURE })
		}
	}
}

/// Selects `file` if given, triggers one upload and prints the feedback.
/// Returns whether a download link was obtained.
pub async fn upload_once<E: ProcessEndpoint>(
	uploader: &Arc<Uploader<E>>,
	file: Option<PathBuf>,
	out: &mut impl Write,
) -> io::Result<bool> {
	if let Some(path) = file {
		uploader.select_file(SelectedFile::from_path(path)).await;
	}
	let snapshot = match uploader.trigger_upload().await {
		UploadReport::Completed(snapshot) => snapshot,
		_ => uploader.snapshot().await,
	};
	write_feedback(out, &snapshot)?;
	Ok(snapshot.link.is_some())
}

/// The feedback area as text: the message, then the link target.
pub fn write_feedback(out: &mut impl Write, snapshot: &ViewSnapshot) -> io::Result<()> {
	if !snapshot.message.is_empty() {
		writeln!(out, "{}", snapshot.message)?;
	}
	if let Some(link) = &snapshot.link {
		writeln!(out, "{}", encode_uri(link))?;
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{
		uploader::tests::FakeEndpoint,
		view::{FAILURE_MESSAGE, PROMPT_MESSAGE, SUCCESS_MESSAGE},
	};

	#[test]
	fn serve_is_the_default() {
		let cli = Cli::try_parse_from(["speaksync"]).unwrap();
		assert!(cli.command.is_none());
		assert_eq!(cli.config, PathBuf::from("config.toml"));

		let cli = Cli::try_parse_from(["speaksync", "--config", "x.toml", "serve", "--port", "8080"])
			.unwrap();
		assert!(matches!(cli.command, Some(Command::Serve { port: Some(8080) })));
		assert_eq!(cli.config, PathBuf::from("x.toml"));
	}

	#[test]
	fn upload_takes_file_and_endpoint() {
		let cli = Cli::try_parse_from([
			"speaksync",
			"upload",
			"demo.mp4",
			"--endpoint",
			"http://dub.local:8000",
		])
		.unwrap();
		let Some(Command::Upload { file, endpoint }) = cli.command else {
			panic!("expected upload");
		};
		assert_eq!(file, Some(PathBuf::from("demo.mp4")));
		assert_eq!(endpoint.as_deref(), Some("http://dub.local:8000"));
	}

	#[tokio::test]
	async fn upload_without_file_prints_prompt() {
		let endpoint = Arc::new(FakeEndpoint::succeeding("/files/abc123.mp4"));
		let uploader = Arc::new(Uploader::new(endpoint.clone()));
		let mut out = Vec::new();

		assert!(!upload_once(&uploader, None, &mut out).await.unwrap());
		assert_eq!(String::from_utf8(out).unwrap(), format!("{PROMPT_MESSAGE}\n"));
		assert_eq!(endpoint.calls(), 0);
	}

	#[tokio::test]
	async fn successful_upload_prints_message_and_link() {
		let uploader = Arc::new(Uploader::new(Arc::new(FakeEndpoint::succeeding("/files/abc 123.mp4"))));
		let mut out = Vec::new();

		assert!(upload_once(&uploader, Some("demo.mp4".into()), &mut out).await.unwrap());
		assert_eq!(
			String::from_utf8(out).unwrap(),
			format!("{SUCCESS_MESSAGE}\n/files/abc%20123.mp4\n")
		);
	}

	#[tokio::test]
	async fn failed_upload_prints_failure_only() {
		let uploader = Arc::new(Uploader::new(Arc::new(FakeEndpoint::failing())));
		let mut out = Vec::new();

		assert!(!upload_once(&uploader, Some("demo.mp4".into()), &mut out).await.unwrap());
		assert_eq!(String::from_utf8(out).unwrap(), format!("{FAILURE_MESSAGE}\n"));
	}
}

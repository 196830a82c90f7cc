use std::process::ExitCode;

use clap::Parser;

use speaksync::cli::{self, Cli};

#[tokio::main]
async fn main() -> ExitCode {
	match cli::run(Cli::parse()).await {
		Ok(code) => code,
		Err(err) => {
			// the logger may not be up yet
			eprintln!("error: {err:#}");
			ExitCode::FAILURE
		}
	}
}

use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;

use thesaurus_builder::config::Cli;
use thesaurus_builder::error::ExitCode as ThesaurusExitCode;
use thesaurus_builder::logging;
use thesaurus_builder::Run;

fn main() -> ExitCode {
    let start = Instant::now();
    let cli = Cli::parse();

    if let Err(e) = logging::init_tracing(cli.verbose, cli.log_level.as_deref(), cli.log_json) {
        eprintln!("Warning: Failed to initialize logging: {}", e);
    }
    tracing::debug!(elapsed = ?start.elapsed(), "parse_args");

    match Run::run(&cli) {
        Ok(()) => ExitCode::from(ThesaurusExitCode::Success as u8),
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

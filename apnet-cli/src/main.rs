//! Apnet CLI - Command-line interface
//!
//! Runs shared-medium AP experiments and validates their configuration.

mod commands;

use std::process::ExitCode;

use clap::Parser;

#[derive(Parser)]
#[command(name = "apnet")]
#[command(about = "Deterministic shared-medium access point experiments")]
struct Cli {
    #[command(subcommand)]
    command: commands::Commands,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match commands::handle_command(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", commands::describe(&e));
            ExitCode::from(commands::exit_code(&e))
        }
    }
}

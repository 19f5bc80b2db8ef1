// ABOUTME: Main entry point for the snapsight CLI application
// ABOUTME: Parses arguments, sets up logging and color, loads config, and runs one command

use clap::Parser;
use std::io::IsTerminal;
use std::process::ExitCode;

use snapsight_cli::cli::Cli;
use snapsight_cli::cli_output::CliOutput;
use snapsight_cli::commands::App;
use snapsight_cli::config::Config;
use snapsight_cli::output;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    // Determine if color should be used
    let use_color = !cli.no_color
        && std::env::var_os("NO_COLOR").is_none()
        && std::env::var("TERM").unwrap_or_default() != "dumb";
    let cli_output = CliOutput::with_color(use_color && std::io::stderr().is_terminal());

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            cli_output.report(&e);
            return ExitCode::FAILURE;
        }
    };

    let app = App {
        config,
        output: output::formatter(
            cli.json,
            use_color && std::io::stdout().is_terminal(),
            cli.verbose,
        ),
        cli: cli_output,
    };

    match app.run(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            app.cli.report(&e);
            ExitCode::FAILURE
        }
    }
}

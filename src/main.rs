use clap::Parser;
use colored::Colorize;
use helm_ci::{
    ReconcileOutcome,
    cli::Cli,
    common::{ConsoleReporter, SystemRunner, TerminalConfirmation},
};
use std::process;
use std::sync::Arc;

/// Exit code for a deployment the user declined.
const EXIT_CANCELLED: i32 = 2;

fn main() {
    let cli = Cli::parse();
    cli.init_logging();

    let config = match helm_ci::build_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} {}", "error:".red().bold(), e);
            process::exit(1);
        }
    };

    if config.debug {
        eprintln!(
            "{}",
            "Debug output is enabled and may print secrets".yellow().bold()
        );
    }

    let reporter = Arc::new(ConsoleReporter::new(config.debug));
    let confirmation = TerminalConfirmation::new(config.auto_approve);

    match helm_ci::deploy(&config, &SystemRunner, &confirmation, reporter) {
        Ok(ReconcileOutcome::Applied) => {
            println!("{}", "✓ Deployment succeeded".green().bold());
        }
        Ok(ReconcileOutcome::Cancelled) => {
            eprintln!("{}", "Deployment cancelled".yellow());
            process::exit(EXIT_CANCELLED);
        }
        Ok(ReconcileOutcome::Failed(e)) | Err(e) => {
            eprintln!("{} Deployment failed: {}", "error:".red().bold(), e);
            process::exit(1);
        }
    }
}

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::commands::{self, CommandReport};
use crate::logging;

#[derive(Debug, Parser)]
#[command(
    name = "case-intake",
    version,
    about = "Merge pending attendance uploads into per-case file records"
)]
pub struct Cli {
    /// Print the command report as JSON.
    #[arg(long, global = true)]
    pub json: bool,
    /// Enable debug logging on stderr.
    #[arg(long, short, global = true)]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Poll the pending index and merge new uploads into the case table.
    Watch {
        /// Run a single poll cycle and exit (default).
        #[arg(long)]
        once: bool,
        /// Keep polling until interrupted.
        #[arg(long)]
        daemon: bool,
    },
    /// Stop a running watcher daemon.
    Stop,
    /// Show paths, configuration and the last watcher outcome.
    Status,
    /// Print the stored record for one case.
    Case {
        case_id: String,
    },
}

fn emit(report: &CommandReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        print!("{}", report.render_text());
    }
    Ok(())
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose)?;

    let report = match &cli.command {
        Command::Watch { once, daemon } => commands::watch::run(&commands::watch::WatchOptions {
            once: *once,
            daemon: *daemon,
        })?,
        Command::Stop => commands::stop::run()?,
        Command::Status => commands::status::run()?,
        Command::Case { case_id } => commands::show_case::run(case_id)?,
    };

    emit(&report, cli.json)?;
    if !report.ok {
        std::process::exit(1);
    }
    Ok(())
}

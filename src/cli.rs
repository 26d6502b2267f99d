use anyhow::{Result, anyhow};
use clap::{Parser, Subcommand};

use crate::commands::{self, CommandReport};
use crate::commands::migrate::MigrateOptions;

#[derive(Parser, Debug)]
#[command(name = "rowmigrate")]
#[command(
    version,
    about = "Move classified rows between spreadsheet collections without losing any"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one snapshot → copy → verify → delete pass
    Migrate {
        /// Plan and report without writing
        #[arg(long)]
        dry_run: bool,
        /// Copy matching rows but keep them in their sources
        #[arg(long)]
        copy_only: bool,
        #[arg(long)]
        json: bool,
    },
    /// Dry run that lists every planned item
    Plan {
        #[arg(long)]
        json: bool,
    },
    /// Configuration, store collections and last run state
    Status {
        #[arg(long)]
        json: bool,
    },
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let (report, json) = match cli.command {
        Command::Migrate {
            dry_run,
            copy_only,
            json,
        } => (
            commands::migrate::run(&MigrateOptions { dry_run, copy_only })?,
            json,
        ),
        Command::Plan { json } => (commands::plan::run()?, json),
        Command::Status { json } => (commands::status::run()?, json),
    };

    print_report(&report, json)?;
    if !report.ok {
        return Err(anyhow!("{} reported {} issue(s)", report.command, report.issues.len()));
    }
    Ok(())
}

fn print_report(report: &CommandReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    let verdict = if report.ok { "ok" } else { "failed" };
    println!("{}: {verdict}", report.command);
    for detail in &report.details {
        println!("  {detail}");
    }
    for issue in &report.issues {
        println!("  issue: {issue}");
    }
    Ok(())
}

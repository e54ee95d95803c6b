use anyhow::{Result, bail};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};

use crate::commands::gap_fill::GapFillCommandOptions;
use crate::commands::sync::SyncCommandOptions;
use crate::commands::verify::VerifyOptions;
use crate::commands::{self, CommandReport};
use crate::logging;

#[derive(Parser)]
#[command(name = "jvault", bin_name = "jvault", version)]
#[command(about = "Archive scraped court judgments into multi-part tar archives")]
#[command(propagate_version = true)]
struct Cli {
    /// Enable debug logging
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Only log errors
    #[arg(short = 'q', long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Print the command report as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Archive every day after the newest archived decision date
    Sync(SyncArgs),
    /// Backfill history in checkpointed chunks
    GapFill(GapFillArgs),
    /// Check indexes against the part objects in the bucket
    Verify(VerifyArgs),
    /// Show archives, the high-water mark and the gap-fill checkpoint
    Status,
    /// Show the effective configuration and recognised environment keys
    Config,
}

#[derive(Args)]
struct SyncArgs {
    /// Last day to scrape (defaults to today in the archive time zone)
    #[arg(long, value_name = "YYYY-MM-DD")]
    until: Option<NaiveDate>,
}

#[derive(Args)]
struct GapFillArgs {
    /// Last day to backfill (defaults to today in the archive time zone)
    #[arg(long, value_name = "YYYY-MM-DD")]
    until: Option<NaiveDate>,

    /// Stop after this many chunks
    #[arg(long)]
    max_chunks: Option<u32>,

    /// Wall-clock budget in seconds; 0 disables it
    #[arg(long)]
    timeout_secs: Option<u64>,
}

#[derive(Args)]
struct VerifyArgs {
    /// Compare tar members with the index and fail on unreferenced parts
    #[arg(long)]
    strict: bool,
}

fn render(report: &CommandReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    let status = if report.ok { "ok" } else { "failed" };
    println!("{}: {status}", report.command);
    for line in &report.details {
        println!("  {line}");
    }
    for issue in &report.issues {
        println!("  ! {issue}");
    }
    Ok(())
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    logging::init_logger(cli.verbose, cli.quiet);

    let report = match cli.command {
        Command::Sync(args) => commands::sync::run(&SyncCommandOptions { until: args.until })?,
        Command::GapFill(args) => commands::gap_fill::run(&GapFillCommandOptions {
            until: args.until,
            max_chunks: args.max_chunks,
            timeout_secs: args.timeout_secs,
        })?,
        Command::Verify(args) => commands::verify::run(&VerifyOptions {
            strict: args.strict,
        })?,
        Command::Status => commands::status::run()?,
        Command::Config => commands::config::run()?,
    };

    render(&report, cli.json)?;
    if !report.ok {
        bail!("{} reported {} issue(s)", report.command, report.issues.len());
    }
    Ok(())
}

mod cli;
mod collaborators;
mod config;
mod json_output;
mod matcher;
mod normalize;
mod parser;
mod path_cache;
mod pipeline;
mod ranking;
mod record;
mod resolver;
mod similarity;

use anyhow::{bail, Result};
use clap::Parser;
use cli::Args;
use collaborators::Collaborators;
use colored::*;
use config::Settings;
use log::info;
use pipeline::{Organizer, RunReport};

fn main() -> Result<()> {
    let args = Args::parse();

    let mut builder = env_logger::Builder::from_default_env();
    builder.format_timestamp_millis();
    if args.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.init();

    info!("Starting comic organizer with args: {:?}", args);

    let mut settings = Settings::load(args.config.as_deref())?;
    args.apply_to(&mut settings);

    if settings.library_dirs.is_empty() {
        bail!("no library directories configured; pass --library or set library_dirs in the settings file");
    }
    if !args.check_duplicates && settings.download_dirs.is_empty() {
        bail!("no download directories given; pass one or set download_dirs in the settings file");
    }

    let organizer = Organizer::new(settings, Collaborators::default())?;
    let policy = resolver::ApplyPolicy::new(args.dry_run, args.no_delete);
    let report = if args.check_duplicates {
        organizer.check_duplicates(policy)?
    } else {
        organizer.process_downloads(policy)?
    };

    if args.json {
        println!("{}", json_output::RunOutput::from_report(&report).to_json()?);
    } else {
        print_report(&report, args.dry_run);
    }

    Ok(())
}

fn print_report(report: &RunReport, dry_run: bool) {
    if dry_run {
        println!("\n{}", "═══ DRY RUN MODE ═══".bold().bright_blue());
    }

    for (from, to) in &report.moved {
        println!(
            "{} {} {} {}",
            "MOVE:".green().bold(),
            from.display().to_string().bright_white(),
            "→".bright_blue().bold(),
            to.display().to_string().bright_cyan()
        );
    }

    for (from, to) in &report.upgrades {
        println!(
            "{} {} {} {}",
            "UPGRADE:".blue().bold(),
            from.display().to_string().bright_white(),
            "→".bright_blue().bold(),
            to.display().to_string().bright_cyan()
        );
    }

    for path in &report.removed {
        println!(
            "{} {}",
            "DELETE:".red().bold(),
            path.display().to_string().bright_black()
        );
    }

    if !report.unresolved.is_empty() {
        println!("\n{}", "⚖️  UNRESOLVED TIES (decide manually):".yellow().bold());
        for (incoming, existing) in &report.unresolved {
            println!(
                "  {} {}",
                "incoming:".bright_yellow(),
                incoming.display().to_string().bright_white()
            );
            println!(
                "  {} {}",
                "existing:".bright_yellow(),
                existing.display().to_string().bright_white()
            );
        }
    }

    if !report.unmatched.is_empty() {
        println!("\n{}", "🔍 UNMATCHED (left in place):".yellow().bold());
        for path in &report.unmatched {
            println!("  {}", path.display().to_string().bright_white());
        }
    }

    if !report.errors.is_empty() {
        println!("\n{}", "⚠️  ERRORS:".red().bold());
        for error in &report.errors {
            println!("  {}", error.yellow());
        }
    }

    println!(
        "\n{} {} processed, {} moved, {} upgraded, {} removed",
        "✓".green().bold(),
        report.processed.to_string().bright_cyan(),
        report.moved.len().to_string().bright_cyan(),
        report.upgrades.len().to_string().bright_cyan(),
        report.removed.len().to_string().bright_cyan()
    );
}

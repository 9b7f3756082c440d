use std::io;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDate};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use weedmaster::config::AppConfig;
use weedmaster::error::AppError;
use weedmaster::telemetry;
use weedmaster::workflows::weeding::catalog::{CatalogQueryAdapter, ScriptCatalog};
use weedmaster::workflows::weeding::ledger::{CardLedger, LedgerError};
use weedmaster::workflows::weeding::{
    scan, CardConversion, ConversionOrchestrator, CyclePaths, CycleSummary, ScanReport, ScriptSink,
};

#[derive(Parser, Debug)]
#[command(
    name = "weedmaster",
    about = "Select discard cards and screen their items for safe removal from circulation",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Rebuild the card ledger from the catalog's discard-profile report
    Reset(ResetArgs),
    /// Dry pass: report card health and the recommendation set, no writes
    Scan(ScanArgs),
    /// Run a full quota-bounded conversion cycle
    Convert(ConvertArgs),
    /// Convert a single named card, bypassing the quota
    ConvertCard(ConvertCardArgs),
}

#[derive(Args, Debug)]
struct ResetArgs {
    /// Replace the ledger even if it still has unconverted cards
    #[arg(long)]
    force: bool,
}

#[derive(Args, Debug)]
struct ScanArgs {
    /// Restrict recommendations to one branch code
    #[arg(long)]
    branch: Option<String>,
    /// Override the configured item quota
    #[arg(long)]
    quota: Option<u32>,
    /// Include the full card listing in the output
    #[arg(long)]
    list_cards: bool,
    /// Emit the report as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct ConvertArgs {
    /// Restrict conversion to one branch code
    #[arg(long)]
    branch: Option<String>,
    /// Override the configured item quota
    #[arg(long)]
    quota: Option<u32>,
    /// Conversion date for ledger stamps (defaults to today)
    #[arg(long, value_parser = parse_date)]
    today: Option<NaiveDate>,
    /// Emit the summary as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct ConvertCardArgs {
    /// Card id to convert
    id: String,
    /// Conversion date for ledger stamps (defaults to today)
    #[arg(long, value_parser = parse_date)]
    today: Option<NaiveDate>,
    /// Emit the result as JSON
    #[arg(long)]
    json: bool,
}

fn main() {
    if let Err(err) = run_cli() {
        eprintln!("application error: {err}");
        std::process::exit(1);
    }
}

fn run_cli() -> Result<(), AppError> {
    let cli = Cli::parse();
    let config = AppConfig::load()?;
    telemetry::init(&config.telemetry)?;
    info!(?config.environment, "weedmaster starting");

    match cli.command {
        Command::Reset(args) => run_reset(config, args),
        Command::Scan(args) => run_scan(config, args),
        Command::Convert(args) => run_convert(config, args),
        Command::ConvertCard(args) => run_convert_card(config, args),
    }
}

fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|err| format!("failed to parse '{raw}' as YYYY-MM-DD ({err})"))
}

fn script_catalog(config: &AppConfig) -> Result<ScriptCatalog, AppError> {
    let command = config.catalog.require_command()?;
    Ok(ScriptCatalog::new(
        command,
        Duration::from_secs(config.catalog.timeout_secs),
    ))
}

fn cycle_paths(config: &AppConfig) -> CyclePaths {
    CyclePaths {
        ledger: config.storage.ledger_path.clone(),
        pending: config.storage.pending_path.clone(),
        lock: config.storage.lock_path.clone(),
    }
}

fn run_reset(config: AppConfig, args: ResetArgs) -> Result<(), AppError> {
    match CardLedger::load(&config.storage.ledger_path) {
        Ok(existing) if existing.unconverted_count() > 0 && !args.force => {
            return Err(LedgerError::ResetRefused.into());
        }
        // A missing or unreadable ledger is exactly what reset repairs.
        _ => {}
    }

    let catalog = script_catalog(&config)?;
    let seeds = catalog.discard_profile_cards()?;
    let pulled = seeds.len();
    let ledger = CardLedger::reset_from(seeds, &config.weeding.reset_denylist);
    ledger.save(&config.storage.ledger_path)?;

    info!(cards = ledger.len(), "ledger reset complete");
    println!(
        "Ledger reset: {} cards written ({} excluded by denylist)",
        ledger.len(),
        pulled - ledger.len()
    );
    Ok(())
}

fn run_scan(config: AppConfig, args: ScanArgs) -> Result<(), AppError> {
    let mut weeding = config.weeding.clone();
    if let Some(quota) = args.quota {
        weeding.item_quota = quota;
    }

    let ledger = CardLedger::load(&config.storage.ledger_path)?;
    let outcome = scan(&ledger, &weeding, args.branch.as_deref(), 0);
    let report = ScanReport::build(&ledger, &outcome, &weeding);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report).map_err(io::Error::from)?);
    } else {
        render_scan_report(&report, args.list_cards);
    }
    Ok(())
}

fn run_convert(config: AppConfig, args: ConvertArgs) -> Result<(), AppError> {
    let mut weeding = config.weeding.clone();
    if let Some(quota) = args.quota {
        weeding.item_quota = quota;
    }
    let today = args.today.unwrap_or_else(|| Local::now().date_naive());

    let catalog = Arc::new(script_catalog(&config)?);
    let command = config.catalog.require_command()?;
    let sink = Arc::new(ScriptSink::new(
        command,
        Duration::from_secs(config.catalog.timeout_secs),
    ));
    let orchestrator =
        ConversionOrchestrator::new(catalog, sink, weeding, cycle_paths(&config));

    let summary = orchestrator.run_cycle(args.branch.as_deref(), today)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary).map_err(io::Error::from)?);
    } else {
        render_cycle_summary(&summary);
    }
    Ok(())
}

fn run_convert_card(config: AppConfig, args: ConvertCardArgs) -> Result<(), AppError> {
    let today = args.today.unwrap_or_else(|| Local::now().date_naive());

    let catalog = Arc::new(script_catalog(&config)?);
    let command = config.catalog.require_command()?;
    let sink = Arc::new(ScriptSink::new(
        command,
        Duration::from_secs(config.catalog.timeout_secs),
    ));
    let orchestrator = ConversionOrchestrator::new(
        catalog,
        sink,
        config.weeding.clone(),
        cycle_paths(&config),
    );

    let conversion = orchestrator.convert_card(&args.id, today)?;

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&conversion).map_err(io::Error::from)?
        );
    } else {
        render_card_conversion(&conversion);
    }
    Ok(())
}

fn render_scan_report(report: &ScanReport, list_cards: bool) {
    println!("Discard ledger scan");
    println!(
        "Quota {} | recommended items {} | cards done {}/{}",
        report.quota, report.running_total, report.cards_done, report.cards_total
    );

    println!("\nBranch rollup");
    for branch in &report.branches {
        println!(
            "- {}: {} cards, {} done, {} recommended ({} items), {} barred, {} overloaded, {} misnamed",
            branch.branch,
            branch.cards,
            branch.done,
            branch.recommended,
            branch.recommended_items,
            branch.barred,
            branch.overloaded,
            branch.misnamed
        );
    }

    if list_cards {
        println!("\nCard listing");
        for card in &report.cards {
            let converted_note = match card.date_converted {
                Some(date) => format!(" (converted {date}, {} total)", card.converted_total),
                None => String::new(),
            };
            println!(
                "- {} | {} | {} items | {} | {}{}",
                card.id,
                card.description,
                card.item_count,
                card.status,
                card.flags.join("+"),
                converted_note
            );
        }
    }
}

fn render_cycle_summary(summary: &CycleSummary) {
    println!("Conversion cycle {}", summary.outcome.label());
    println!(
        "{} items converted across {} cards in {} passes; {} cards force-closed, {} still open",
        summary.items_converted,
        summary.cards_converted,
        summary.passes,
        summary.cards_force_closed,
        summary.cards_remaining
    );

    if summary.bucket_totals.is_empty() {
        println!("\nPreserved items: none");
    } else {
        println!("\nPreserved items by policy");
        for (policy, count) in &summary.bucket_totals {
            println!("- {policy}: {count}");
        }
    }

    if summary.diagnostics.is_clean() {
        println!("\nPredicate queries: all healthy");
    } else {
        println!(
            "\nWARNING: {} predicate query failures (fail-open; affected checks let items through)",
            summary.diagnostics.total_failures()
        );
        for (query, count) in &summary.diagnostics.failed_queries {
            println!("- {query}: {count}");
        }
    }
}

fn render_card_conversion(conversion: &CardConversion) {
    if conversion.force_closed {
        println!(
            "Card {} was not legitimate discard material and was closed untouched",
            conversion.card_id
        );
        return;
    }

    println!(
        "Card {}: {} charged items, {} staged for discard, {} submitted",
        conversion.card_id, conversion.candidates, conversion.staged, conversion.submitted
    );
    for bucket in &conversion.buckets {
        if !bucket.items.is_empty() {
            println!("- preserved by {}: {}", bucket.policy, bucket.items.len());
        }
    }
    if !conversion.diagnostics.is_clean() {
        println!(
            "WARNING: {} predicate query failures during screening",
            conversion.diagnostics.total_failures()
        );
    }
}

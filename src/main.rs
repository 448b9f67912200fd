use anyhow::Result;
use bess_leaderboard::{
    AssetRegister, CachedSource, DailyLeaderboardRow, DateRange, FileSource, LeaderboardPipeline,
    MarketDataSource,
};
use chrono::NaiveDate;
use clap::{Parser, ValueEnum};
use log::{info, warn};
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "bess_leaderboard")]
#[command(about = "Rank a UK BESS fleet by annualised revenue per MW")]
struct Args {
    /// Path to the asset register CSV
    #[arg(long)]
    register: PathBuf,

    /// Start date (YYYY-MM-DD)
    #[arg(long)]
    start_date: String,

    /// End date (YYYY-MM-DD); defaults to the start date
    #[arg(long)]
    end_date: Option<String>,

    /// Physical notification feed path pattern (use {date} for date substitution)
    #[arg(long)]
    pn_pattern: String,

    /// Market index price feed path pattern
    #[arg(long)]
    mid_pattern: String,

    /// BM acceptance feed path pattern
    #[arg(long)]
    acceptance_pattern: String,

    /// DFR auction result feed path pattern
    #[arg(long)]
    dfr_pattern: String,

    /// Output format
    #[arg(short, long, value_enum, default_value = "summary")]
    output: OutputFormat,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Json,
    Csv,
    Summary,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let start = NaiveDate::parse_from_str(&args.start_date, "%Y-%m-%d")?;
    let end = match &args.end_date {
        Some(end) => NaiveDate::parse_from_str(end, "%Y-%m-%d")?,
        None => start,
    };
    let range = DateRange::new(start, end)?;

    let register = AssetRegister::from_csv(&args.register)?;
    if register.is_empty() {
        anyhow::bail!("asset register {} is empty", args.register.display());
    }
    info!("loaded {} assets from register", register.len());

    let source = CachedSource::new(FileSource {
        pn_pattern: args.pn_pattern,
        mid_pattern: args.mid_pattern,
        acceptance_pattern: args.acceptance_pattern,
        dfr_pattern: args.dfr_pattern,
    });

    let report = run_pipeline(&source, &register, range);

    for failure in &report.failed_fetches {
        warn!("feed unavailable: {}", failure);
    }
    if !report.rejected_records.is_empty() {
        warn!("{} malformed records skipped", report.rejected_records.len());
    }
    if !report.missing_prices.is_empty() {
        warn!(
            "{} period buckets excluded for missing prices",
            report.missing_prices.len()
        );
    }

    match args.output {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&report.rows)?);
        }
        OutputFormat::Csv => print_csv(&report.rows),
        OutputFormat::Summary => print_summary(range, &report.rows),
    }

    Ok(())
}

fn run_pipeline<S: MarketDataSource>(
    source: &S,
    register: &AssetRegister,
    range: DateRange,
) -> bess_leaderboard::LeaderboardReport {
    LeaderboardPipeline::new(source, register).run(range)
}

fn print_csv(rows: &[DailyLeaderboardRow]) {
    println!(
        "asset_id,date,wholesale_gbp,bm_gbp,dfr_gbp,total_gbp,\
         wholesale_gbp_per_mw_yr,bm_gbp_per_mw_yr,dfr_gbp_per_mw_yr,total_gbp_per_mw_yr"
    );
    for row in rows {
        println!(
            "{},{},{:.2},{:.2},{:.2},{:.2},{:.2},{:.2},{:.2},{:.2}",
            row.asset_id,
            row.date,
            row.wholesale_gbp,
            row.balancing_gbp,
            row.frequency_gbp,
            row.total_gbp,
            row.wholesale_gbp_per_mw_year,
            row.balancing_gbp_per_mw_year,
            row.frequency_gbp_per_mw_year,
            row.total_gbp_per_mw_year,
        );
    }
}

fn print_summary(range: DateRange, rows: &[DailyLeaderboardRow]) {
    println!("BESS Leaderboard");
    println!("================");
    println!("Period: {} to {}", range.start, range.end);
    println!();

    // fleet totals across the window, averaged to a £/MW/yr rate per asset
    let mut totals: BTreeMap<&str, (f64, f64, u32)> = BTreeMap::new();
    for row in rows {
        let entry = totals.entry(row.asset_id.as_str()).or_insert((0.0, 0.0, 0));
        entry.0 += row.total_gbp;
        entry.1 += row.total_gbp_per_mw_year;
        entry.2 += 1;
    }

    let mut ranked: Vec<_> = totals
        .into_iter()
        .map(|(asset, (total, annualised_sum, days))| {
            (asset, total, annualised_sum / days.max(1) as f64)
        })
        .collect();
    ranked.sort_by(|a, b| {
        b.2.partial_cmp(&a.2)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });

    println!("Revenue by asset:");
    for (position, (asset, total, annualised)) in ranked.iter().enumerate() {
        println!(
            "  {}. {} - £{:.2} total (£{:.0}/MW/yr)",
            position + 1,
            asset,
            total,
            annualised
        );
    }
}

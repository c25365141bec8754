//! rfmseg: customer segmentation CLI using quantile-based RFM scoring
//!
//! This is the thin driver around the core pipeline: it sources raw rows from
//! a CSV file, runs normalize → aggregate → score, and writes the two result
//! tables back out as CSV.

use std::fs::File;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use rfmseg::{
    aggregate_rfm, normalize_records, read_raw_csv, score_and_segment, summarize_segments, Args,
    IdResolution, NormalizeReport,
};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    if args.verbose {
        println!("rfmseg - Customer Segmentation using RFM scoring");
        println!("================================================\n");
    }

    let start_time = Instant::now();

    // Step 1: Load and normalize raw transactions
    if args.verbose {
        println!("Step 1: Loading and normalizing transactions");
        println!("  Input file: {}", args.input);
    }

    let file = File::open(&args.input)
        .with_context(|| format!("failed to open input file {}", args.input))?;
    let records = read_raw_csv(file)?;
    let (transactions, report) = normalize_records(&records)?;

    println!("✓ Transactions normalized: {} rows kept", report.rows_kept);
    print_normalize_report(&report);

    // Step 2: Aggregate per-customer RFM metrics
    let analysis_instant = args.parse_analysis_instant()?;
    if args.verbose {
        println!("\nStep 2: Aggregating RFM metrics");
        match analysis_instant {
            Some(instant) => println!("  Analysis instant: {instant}"),
            None => println!("  Analysis instant: latest invoice + 1 day"),
        }
    }

    let rfm = aggregate_rfm(&transactions, analysis_instant)?;
    println!("✓ RFM metrics computed: {} customers", rfm.len());

    // Step 3: Score and segment
    if args.verbose {
        println!("\nStep 3: Scoring and segmenting");
        println!("  Quantiles: {}", args.quantiles);
    }

    let scoring = score_and_segment(&rfm, args.quantiles)?;
    if scoring.fell_back {
        println!(
            "! Sparse data: fell back from {} to {} quantiles",
            args.quantiles, scoring.quantiles_used
        );
    }
    println!(
        "✓ Customers segmented with {} quantiles",
        scoring.quantiles_used
    );

    // Step 4: Summarize and write outputs
    let summaries = summarize_segments(&scoring.customers);

    println!("\n=== Segment Summary ===");
    println!(
        "{:<20} {:>10} {:>10} {:>12} {:>7} {:>7}",
        "Segment", "Recency", "Frequency", "Monetary", "Count", "Pct"
    );
    for summary in &summaries {
        println!(
            "{:<20} {:>10.1} {:>10.1} {:>12.2} {:>7} {:>6.2}%",
            summary.segment.label(),
            summary.mean_recency,
            summary.mean_frequency,
            summary.mean_monetary,
            summary.count,
            summary.percentage
        );
    }

    write_csv(&args.output, &scoring.customers)?;
    write_csv(&args.summary_output, &summaries)?;

    let total_time = start_time.elapsed();
    println!("\n=== Pipeline Complete ===");
    println!("Total processing time: {:.2}s", total_time.as_secs_f64());
    println!("Customer segments saved to: {}", args.output);
    println!("Segment analysis saved to: {}", args.summary_output);

    Ok(())
}

fn print_normalize_report(report: &NormalizeReport) {
    if report.total_dropped() > 0 {
        println!(
            "  Dropped {} of {} rows: {} missing customer, {} missing invoice, {} bad numeric, {} non-positive, {} bad timestamp",
            report.total_dropped(),
            report.rows_in,
            report.dropped_missing_customer,
            report.dropped_missing_invoice,
            report.dropped_bad_numeric,
            report.dropped_non_positive,
            report.dropped_bad_timestamp
        );
    }
    match report.id_resolution {
        IdResolution::Direct => {}
        IdResolution::Alias(ref column) => {
            println!("  Customer ids resolved via alias column '{column}'");
        }
        IdResolution::InvoiceProxy => {
            println!("  No customer column found: invoice ids used as proxy customers");
        }
    }
}

fn write_csv<T: Serialize>(path: &str, rows: &[T]) -> Result<()> {
    let mut writer =
        csv::Writer::from_path(path).with_context(|| format!("failed to create {path}"))?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

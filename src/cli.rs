//! Command-line interface definitions and argument parsing

use chrono::NaiveDateTime;
use clap::Parser;

/// Customer segmentation CLI using quantile-based RFM scoring
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the input transactions CSV file
    #[arg(short, long, default_value = "data.csv")]
    pub input: String,

    /// Quantile count for scoring (5 or 3; 5 falls back to 3 on sparse data)
    #[arg(short, long, default_value = "5")]
    pub quantiles: usize,

    /// Analysis instant for recency, e.g. "2011-12-09" or "2011-12-09 00:00:00".
    /// Defaults to one day after the latest invoice in the data.
    #[arg(long)]
    pub analysis_date: Option<String>,

    /// Output path for the per-customer scored table
    #[arg(short, long, default_value = "rfm_customer_segments.csv")]
    pub output: String,

    /// Output path for the per-segment summary table
    #[arg(long, default_value = "rfm_segment_analysis.csv")]
    pub summary_output: String,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    /// Parse the optional analysis instant, accepting a bare date or a full
    /// date-time.
    pub fn parse_analysis_instant(&self) -> anyhow::Result<Option<NaiveDateTime>> {
        let Some(ref raw) = self.analysis_date else {
            return Ok(None);
        };

        let parsed = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").or_else(|_| {
            chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .map(|d| d.and_hms_opt(0, 0, 0).unwrap_or_default())
        });

        match parsed {
            Ok(instant) => Ok(Some(instant)),
            Err(_) => anyhow::bail!(
                "Invalid analysis date '{raw}': expected YYYY-MM-DD or YYYY-MM-DD HH:MM:SS"
            ),
        }
    }
}

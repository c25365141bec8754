//! Error types for rfmseg

use chrono::NaiveDateTime;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// A structurally required column is entirely absent from the input schema.
    #[error("required column missing from input schema: {0}")]
    Schema(String),

    /// Quantile partitioning failed, or there is nothing to aggregate.
    #[error("insufficient data for segmentation: {0}")]
    InsufficientData(String),

    /// An explicitly supplied analysis instant precedes an observed invoice time,
    /// which would produce negative recency.
    #[error("analysis instant {instant} precedes latest observed invoice time {latest}")]
    InvalidAnalysisInstant {
        instant: NaiveDateTime,
        latest: NaiveDateTime,
    },

    /// Segment decision tables exist only for 5 and 3 quantiles.
    #[error("unsupported quantile count {0}: segment policies are defined for 5 and 3")]
    UnsupportedQuantiles(usize),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

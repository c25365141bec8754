//! rfmseg: customer segmentation using quantile-based RFM scoring
//!
//! This library converts raw transaction records into Recency/Frequency/Monetary
//! metrics per customer, scores each metric into quantile buckets, and assigns a
//! named behavioral segment via an ordered decision table.

pub mod cli;
pub mod data;
pub mod error;
pub mod rfm;
pub mod score;

// Re-export public items for easier access
pub use cli::Args;
pub use data::{
    normalize_records, read_raw_csv, IdResolution, NormalizeReport, RawRecord, Transaction,
};
pub use error::{Error, Result};
pub use rfm::{aggregate_rfm, CustomerRfm};
pub use score::{
    assign_segment, score_and_segment, summarize_segments, ScoredCustomer, Scoring, Segment,
    SegmentSummary,
};

//! Quantile scoring and segment assignment
//!
//! Each RFM metric is partitioned into Q equal-population buckets and mapped
//! to an integer score in [1, Q]; the (R, F, M) triple is then matched against
//! an ordered decision table to pick a named segment. When the customer
//! population is too small or too concentrated for Q=5, the whole scoring step
//! retries once at Q=3 with a simplified decision table and fails for good
//! after that.

use std::collections::HashMap;
use std::fmt;

use serde::{Serialize, Serializer};
use tracing::warn;

use crate::error::{Error, Result};
use crate::rfm::CustomerRfm;

/// Named behavioral segments, shared by both decision tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Segment {
    Champions,
    LoyalCustomers,
    PotentialLoyalists,
    RecentCustomers,
    Promising,
    NeedAttention,
    AboutToSleep,
    AtRisk,
    CannotLoseThem,
    Hibernating,
    Lost,
}

impl Segment {
    pub fn label(self) -> &'static str {
        match self {
            Segment::Champions => "Champions",
            Segment::LoyalCustomers => "Loyal Customers",
            Segment::PotentialLoyalists => "Potential Loyalists",
            Segment::RecentCustomers => "Recent Customers",
            Segment::Promising => "Promising",
            Segment::NeedAttention => "Need Attention",
            Segment::AboutToSleep => "About to Sleep",
            Segment::AtRisk => "At Risk",
            Segment::CannotLoseThem => "Cannot Lose Them",
            Segment::Hibernating => "Hibernating",
            Segment::Lost => "Lost",
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl Serialize for Segment {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

/// One decision rule: a predicate over (R, F, M) scores and the segment it
/// assigns. Tables are evaluated in order, first match wins.
pub type SegmentRule = (fn(u8, u8, u8) -> bool, Segment);

/// Decision table for the 5-quantile system.
pub static PRIMARY_RULES: &[SegmentRule] = &[
    (|r, f, m| r >= 4 && f >= 4 && m >= 4, Segment::Champions),
    (
        |r, f, m| r >= 3 && f >= 3 && m >= 3 && r + f + m >= 10,
        Segment::LoyalCustomers,
    ),
    (
        |r, f, m| r >= 4 && f >= 2 && m >= 2 && r + f + m >= 8,
        Segment::PotentialLoyalists,
    ),
    (|r, f, _m| r >= 4 && f <= 2, Segment::RecentCustomers),
    (|r, f, m| r >= 3 && f <= 2 && m <= 2, Segment::Promising),
    (|r, f, m| r >= 3 && f >= 3 && m <= 2, Segment::NeedAttention),
    (
        |r, f, m| (2..=3).contains(&r) && (2..=3).contains(&f) && m <= 2,
        Segment::AboutToSleep,
    ),
    (|r, f, m| r <= 2 && (f >= 3 || m >= 3), Segment::AtRisk),
    (|r, f, m| r <= 1 && (f >= 4 || m >= 4), Segment::CannotLoseThem),
    (|r, f, m| r <= 2 && f <= 2 && m <= 3, Segment::Hibernating),
    (|_r, _f, _m| true, Segment::Lost),
];

/// Decision table for the 3-quantile fallback. The monetary score is unused
/// here; that asymmetry matches the primary source of these rules and is
/// deliberate.
pub static FALLBACK_RULES: &[SegmentRule] = &[
    (|r, f, _m| r == 3 && f == 3, Segment::Champions),
    (|r, f, _m| r == 3 && f == 2, Segment::PotentialLoyalists),
    (|r, f, _m| r == 3 && f == 1, Segment::RecentCustomers),
    (|r, f, _m| r == 2 && f == 3, Segment::LoyalCustomers),
    (|r, f, _m| r == 2 && f == 2, Segment::NeedAttention),
    (|r, f, _m| r == 2 && f == 1, Segment::AboutToSleep),
    (|r, f, _m| r == 1 && f == 3, Segment::AtRisk),
    (|r, f, _m| r == 1 && f == 2, Segment::CannotLoseThem),
    (|_r, _f, _m| true, Segment::Lost),
];

/// Pick the segment for a score triple under the given quantile count.
/// Pure function of its inputs; identical triples always yield the same label.
pub fn assign_segment(quantiles: usize, r: u8, f: u8, m: u8) -> Segment {
    let rules = if quantiles == 5 {
        PRIMARY_RULES
    } else {
        FALLBACK_RULES
    };
    rules
        .iter()
        .find(|(matches, _)| matches(r, f, m))
        .map(|&(_, segment)| segment)
        .unwrap_or(Segment::Lost)
}

/// A customer with quantile scores and an assigned segment.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredCustomer {
    pub customer_id: String,
    pub recency_days: i64,
    pub frequency: usize,
    pub monetary: f64,
    pub r_score: u8,
    pub f_score: u8,
    pub m_score: u8,
    /// Concatenated scores in R, F, M order, e.g. "543".
    pub rfm_code: String,
    pub segment: Segment,
}

/// Result of a scoring run: the quantile count actually used may differ from
/// the requested one when the fallback fired.
#[derive(Debug, Clone)]
pub struct Scoring {
    pub customers: Vec<ScoredCustomer>,
    pub quantiles_used: usize,
    pub fell_back: bool,
}

/// Per-segment aggregate row for the scored population.
#[derive(Debug, Clone, Serialize)]
pub struct SegmentSummary {
    pub segment: Segment,
    pub mean_recency: f64,
    pub mean_frequency: f64,
    pub mean_monetary: f64,
    pub count: usize,
    /// Share of the total customer count, rounded to 2 decimal places.
    pub percentage: f64,
}

/// Score and segment the RFM table.
///
/// With `quantiles == 5`, a partition failure on any metric retries the whole
/// step once at Q=3 with the fallback decision table; a failure there is
/// [`Error::InsufficientData`] and no further reduction is attempted. Only
/// 5 and 3 are accepted since those are the only decision tables defined.
pub fn score_and_segment(rfm: &[CustomerRfm], quantiles: usize) -> Result<Scoring> {
    if quantiles != 5 && quantiles != 3 {
        return Err(Error::UnsupportedQuantiles(quantiles));
    }

    match try_score(rfm, quantiles) {
        Ok(customers) => Ok(Scoring {
            customers,
            quantiles_used: quantiles,
            fell_back: false,
        }),
        Err(Error::InsufficientData(reason)) if quantiles == 5 => {
            warn!(%reason, "5-quantile partitioning failed, retrying with 3 quantiles");
            let customers = try_score(rfm, 3)?;
            Ok(Scoring {
                customers,
                quantiles_used: 3,
                fell_back: true,
            })
        }
        Err(err) => Err(err),
    }
}

fn try_score(rfm: &[CustomerRfm], q: usize) -> Result<Vec<ScoredCustomer>> {
    let recency: Vec<f64> = rfm.iter().map(|c| c.recency_days as f64).collect();
    let frequency: Vec<f64> = rfm.iter().map(|c| c.frequency as f64).collect();
    let monetary: Vec<f64> = rfm.iter().map(|c| c.monetary).collect();

    // Recency scores inverted: the smallest recencies land in the top bucket.
    // Frequency and monetary are rank-broken first so heavy ties still split
    // into equal buckets.
    let r_scores = score_metric(&recency, q, true, false)
        .ok_or_else(|| partition_error("recency", q, rfm.len()))?;
    let f_scores = score_metric(&frequency, q, false, true)
        .ok_or_else(|| partition_error("frequency", q, rfm.len()))?;
    let m_scores = score_metric(&monetary, q, false, true)
        .ok_or_else(|| partition_error("monetary", q, rfm.len()))?;

    Ok(rfm
        .iter()
        .enumerate()
        .map(|(i, customer)| {
            let (r, f, m) = (r_scores[i], f_scores[i], m_scores[i]);
            ScoredCustomer {
                customer_id: customer.customer_id.clone(),
                recency_days: customer.recency_days,
                frequency: customer.frequency,
                monetary: customer.monetary,
                r_score: r,
                f_score: f,
                m_score: m,
                rfm_code: format!("{r}{f}{m}"),
                segment: assign_segment(q, r, f, m),
            }
        })
        .collect())
}

fn partition_error(metric: &str, q: usize, population: usize) -> Error {
    Error::InsufficientData(format!(
        "cannot split {metric} of {population} customers into {q} non-empty equal buckets"
    ))
}

/// Bucket one metric into `q` quantile groups and return a score per value.
///
/// `invert` flips the score direction (bucket 0 → q instead of 1); `pre_rank`
/// replaces values with their first-seen-order rank before bucketing. Returns
/// `None` when the values cannot form `q` non-empty equal-population buckets.
fn score_metric(values: &[f64], q: usize, invert: bool, pre_rank: bool) -> Option<Vec<u8>> {
    let ranked;
    let values = if pre_rank {
        ranked = first_seen_ranks(values);
        &ranked[..]
    } else {
        values
    };

    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let edges = quantile_edges(&sorted, q)?;

    Some(
        values
            .iter()
            .map(|&v| {
                let bucket = bucket_of(&edges, v);
                if invert {
                    (q - bucket) as u8
                } else {
                    (bucket + 1) as u8
                }
            })
            .collect(),
    )
}

/// Rank values 1..n in ascending order, ties broken by original position.
fn first_seen_ranks(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]).then(a.cmp(&b)));

    let mut ranks = vec![0.0; values.len()];
    for (position, &index) in order.iter().enumerate() {
        ranks[index] = (position + 1) as f64;
    }
    ranks
}

/// Linear-interpolated quantile edges at j/q for j in 0..=q.
///
/// Edges must be strictly increasing for every bucket to be non-empty; a
/// population smaller than `q` or duplicate edges from concentrated values
/// make the partition impossible.
fn quantile_edges(sorted: &[f64], q: usize) -> Option<Vec<f64>> {
    if sorted.len() < q || q == 0 {
        return None;
    }
    let edges: Vec<f64> = (0..=q)
        .map(|j| interpolated_quantile(sorted, j as f64 / q as f64))
        .collect();
    if edges.windows(2).any(|pair| pair[0] >= pair[1]) {
        return None;
    }
    Some(edges)
}

fn interpolated_quantile(sorted: &[f64], p: f64) -> f64 {
    let position = p * (sorted.len() - 1) as f64;
    let lo = position.floor() as usize;
    let hi = position.ceil() as usize;
    let fraction = position - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * fraction
}

/// Right-closed intervals; the first bucket absorbs the minimum.
fn bucket_of(edges: &[f64], value: f64) -> usize {
    let buckets = edges.len() - 1;
    for i in 1..=buckets {
        if value <= edges[i] {
            return i - 1;
        }
    }
    buckets - 1
}

/// Group scored customers by segment and compute per-segment aggregates,
/// ordered by descending mean monetary.
pub fn summarize_segments(customers: &[ScoredCustomer]) -> Vec<SegmentSummary> {
    let total = customers.len();
    let mut groups: HashMap<Segment, (f64, f64, f64, usize)> = HashMap::new();
    for customer in customers {
        let entry = groups.entry(customer.segment).or_insert((0.0, 0.0, 0.0, 0));
        entry.0 += customer.recency_days as f64;
        entry.1 += customer.frequency as f64;
        entry.2 += customer.monetary;
        entry.3 += 1;
    }

    let mut summaries: Vec<SegmentSummary> = groups
        .into_iter()
        .map(|(segment, (recency, frequency, monetary, count))| {
            let n = count as f64;
            SegmentSummary {
                segment,
                mean_recency: recency / n,
                mean_frequency: frequency / n,
                mean_monetary: monetary / n,
                count,
                percentage: round2(count as f64 / total as f64 * 100.0),
            }
        })
        .collect();

    // Descending mean monetary, label as tie-break for stable output.
    summaries.sort_by(|a, b| {
        b.mean_monetary
            .total_cmp(&a.mean_monetary)
            .then_with(|| a.segment.label().cmp(b.segment.label()))
    });
    summaries
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn customer(id: &str, recency: i64, frequency: usize, monetary: f64) -> CustomerRfm {
        CustomerRfm {
            customer_id: id.to_string(),
            recency_days: recency,
            frequency,
            monetary,
        }
    }

    #[test]
    fn test_first_match_wins() {
        // (5,5,5) also satisfies the Loyal Customers rule but Champions is
        // evaluated first.
        assert_eq!(assign_segment(5, 5, 5, 5), Segment::Champions);
        assert_eq!(assign_segment(5, 3, 3, 4), Segment::LoyalCustomers);
        // At Risk sits before Cannot Lose Them in the table.
        assert_eq!(assign_segment(5, 1, 1, 4), Segment::AtRisk);
        assert_eq!(assign_segment(5, 1, 1, 1), Segment::Hibernating);
        assert_eq!(assign_segment(5, 5, 1, 1), Segment::RecentCustomers);
    }

    #[test]
    fn test_fallback_table_ignores_monetary() {
        for m in 1..=3 {
            assert_eq!(assign_segment(3, 3, 3, m), Segment::Champions);
            assert_eq!(assign_segment(3, 2, 3, m), Segment::LoyalCustomers);
            assert_eq!(assign_segment(3, 1, 1, m), Segment::Lost);
        }
    }

    #[test]
    fn test_five_quantile_bucket_balance() {
        // 10 customers with distinct metric values: every score 1..=5 must be
        // used exactly twice per metric.
        let rfm: Vec<CustomerRfm> = (0..10)
            .map(|i| {
                customer(
                    &format!("c{i}"),
                    (i + 1) as i64,
                    (i + 1) * 2,
                    100.0 * (i + 1) as f64,
                )
            })
            .collect();

        let scoring = score_and_segment(&rfm, 5).unwrap();
        assert!(!scoring.fell_back);
        assert_eq!(scoring.quantiles_used, 5);

        let picks: [fn(&ScoredCustomer) -> u8; 3] =
            [|c| c.r_score, |c| c.f_score, |c| c.m_score];
        for pick in picks {
            let mut counts = [0usize; 6];
            for c in &scoring.customers {
                counts[pick(c) as usize] += 1;
            }
            assert_eq!(&counts[1..], &[2, 2, 2, 2, 2]);
        }
    }

    #[test]
    fn test_recency_scores_are_inverted() {
        let rfm: Vec<CustomerRfm> = (0..10)
            .map(|i| customer(&format!("c{i}"), (i + 1) as i64, i + 1, (i + 1) as f64))
            .collect();
        let scoring = score_and_segment(&rfm, 5).unwrap();

        // Smallest recency scores highest; largest frequency/monetary score highest.
        assert_eq!(scoring.customers[0].r_score, 5);
        assert_eq!(scoring.customers[9].r_score, 1);
        assert_eq!(scoring.customers[0].f_score, 1);
        assert_eq!(scoring.customers[9].f_score, 5);
    }

    #[test]
    fn test_tie_break_ranks_split_duplicate_values() {
        // Frequency 1 for nine of ten customers would make raw quantile edges
        // collapse; the first-seen rank keeps the buckets equal.
        let rfm: Vec<CustomerRfm> = (0..10)
            .map(|i| {
                let frequency = if i == 9 { 5 } else { 1 };
                customer(&format!("c{i}"), (i + 1) as i64, frequency, (i + 1) as f64)
            })
            .collect();

        let scoring = score_and_segment(&rfm, 5).unwrap();
        assert!(!scoring.fell_back);
        let mut counts = [0usize; 6];
        for c in &scoring.customers {
            counts[c.f_score as usize] += 1;
        }
        assert_eq!(&counts[1..], &[2, 2, 2, 2, 2]);
    }

    #[test]
    fn test_rfm_code_order() {
        let rfm: Vec<CustomerRfm> = (0..10)
            .map(|i| customer(&format!("c{i}"), (i + 1) as i64, i + 1, (i + 1) as f64))
            .collect();
        let scoring = score_and_segment(&rfm, 5).unwrap();

        for c in &scoring.customers {
            assert_eq!(
                c.rfm_code,
                format!("{}{}{}", c.r_score, c.f_score, c.m_score)
            );
        }
        // Most recent customer: best recency, worst frequency and monetary.
        assert_eq!(scoring.customers[0].rfm_code, "511");
    }

    #[test]
    fn test_small_population_falls_back_to_three_quantiles() {
        // Four customers cannot form five buckets; the scorer must retry at
        // Q=3 and assign via the simplified table.
        let rfm = vec![
            customer("c0", 1, 10, 1000.0),
            customer("c1", 10, 1, 50.0),
            customer("c2", 20, 3, 300.0),
            customer("c3", 40, 1, 20.0),
        ];

        let scoring = score_and_segment(&rfm, 5).unwrap();
        assert!(scoring.fell_back);
        assert_eq!(scoring.quantiles_used, 3);

        let segment_of = |id: &str| {
            scoring
                .customers
                .iter()
                .find(|c| c.customer_id == id)
                .map(|c| c.segment)
                .unwrap()
        };
        assert_eq!(segment_of("c0"), Segment::Champions);
        assert_eq!(segment_of("c1"), Segment::RecentCustomers);
        assert_eq!(segment_of("c2"), Segment::NeedAttention);
        assert_eq!(segment_of("c3"), Segment::Lost);
    }

    #[test]
    fn test_fallback_never_cascades() {
        // All recencies equal: both the Q=5 and the Q=3 partition fail, so the
        // run must abort rather than reduce further.
        let rfm: Vec<CustomerRfm> = (0..6)
            .map(|i| customer(&format!("c{i}"), 5, i + 1, (i + 1) as f64))
            .collect();

        let err = score_and_segment(&rfm, 5).unwrap_err();
        assert!(matches!(err, Error::InsufficientData(_)));
    }

    #[test]
    fn test_unsupported_quantile_count() {
        let rfm = vec![customer("c0", 1, 1, 1.0)];
        let err = score_and_segment(&rfm, 4).unwrap_err();
        assert!(matches!(err, Error::UnsupportedQuantiles(4)));
    }

    #[test]
    fn test_summary_percentages_and_order() {
        let rfm: Vec<CustomerRfm> = (0..10)
            .map(|i| customer(&format!("c{i}"), (i + 1) as i64, i + 1, (i + 1) as f64))
            .collect();
        let scoring = score_and_segment(&rfm, 5).unwrap();
        let summaries = summarize_segments(&scoring.customers);

        let total_count: usize = summaries.iter().map(|s| s.count).sum();
        assert_eq!(total_count, 10);

        let percentage_sum: f64 = summaries.iter().map(|s| s.percentage).sum();
        assert!((percentage_sum - 100.0).abs() <= 0.01 * summaries.len() as f64);

        for pair in summaries.windows(2) {
            assert!(pair[0].mean_monetary >= pair[1].mean_monetary);
        }
    }
}

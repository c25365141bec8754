//! RFM aggregation: transactions → one Recency/Frequency/Monetary row per customer

use std::collections::{BTreeMap, HashSet};

use chrono::{Duration, NaiveDateTime};
use tracing::debug;

use crate::data::Transaction;
use crate::error::{Error, Result};

/// Per-customer RFM metrics, immutable once aggregated.
#[derive(Debug, Clone, PartialEq)]
pub struct CustomerRfm {
    pub customer_id: String,
    /// Whole days since the customer's latest invoice, relative to the
    /// analysis instant. Never negative.
    pub recency_days: i64,
    /// Count of distinct invoice ids, not transaction rows.
    pub frequency: usize,
    /// Total line value across the customer's transactions.
    pub monetary: f64,
}

/// Reduce normalized transactions to one [`CustomerRfm`] per customer.
///
/// When `analysis_instant` is `None`, it defaults to one day after the latest
/// observed invoice time, which keeps every recency non-negative. An explicit
/// instant earlier than an observed invoice time is rejected outright with
/// [`Error::InvalidAnalysisInstant`].
///
/// Output is sorted by customer id so reruns are deterministic.
pub fn aggregate_rfm(
    transactions: &[Transaction],
    analysis_instant: Option<NaiveDateTime>,
) -> Result<Vec<CustomerRfm>> {
    let latest = transactions
        .iter()
        .map(|t| t.invoice_time)
        .max()
        .ok_or_else(|| Error::InsufficientData("no transactions to aggregate".into()))?;

    let instant = match analysis_instant {
        Some(instant) if instant < latest => {
            return Err(Error::InvalidAnalysisInstant { instant, latest });
        }
        Some(instant) => instant,
        None => latest + Duration::days(1),
    };
    debug!(%instant, transactions = transactions.len(), "aggregating RFM metrics");

    // BTreeMap keeps customer order stable across runs.
    let mut per_customer: BTreeMap<&str, (NaiveDateTime, HashSet<&str>, f64)> = BTreeMap::new();
    for tx in transactions {
        let entry = per_customer
            .entry(&tx.customer_id)
            .or_insert_with(|| (tx.invoice_time, HashSet::new(), 0.0));
        entry.0 = entry.0.max(tx.invoice_time);
        entry.1.insert(&tx.invoice_id);
        entry.2 += tx.line_value;
    }

    Ok(per_customer
        .into_iter()
        .map(|(customer_id, (last_purchase, invoices, monetary))| CustomerRfm {
            customer_id: customer_id.to_string(),
            recency_days: (instant - last_purchase).num_days(),
            frequency: invoices.len(),
            monetary,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(customer: &str, invoice: &str, time: &str, line_value: f64) -> Transaction {
        Transaction {
            customer_id: customer.to_string(),
            invoice_id: invoice.to_string(),
            invoice_time: NaiveDateTime::parse_from_str(time, "%Y-%m-%d %H:%M:%S").unwrap(),
            quantity: 1.0,
            unit_price: line_value,
            line_value,
        }
    }

    #[test]
    fn test_frequency_counts_distinct_invoices() {
        // Two line items on one invoice plus a second invoice: frequency 2, not 3.
        let txs = vec![
            tx("17850", "536365", "2010-12-01 08:26:00", 15.30),
            tx("17850", "536365", "2010-12-01 08:26:00", 20.34),
            tx("17850", "536366", "2010-12-05 09:00:00", 11.10),
        ];
        let rfm = aggregate_rfm(&txs, None).unwrap();

        assert_eq!(rfm.len(), 1);
        assert_eq!(rfm[0].frequency, 2);
        assert!((rfm[0].monetary - 46.74).abs() < 1e-9);
    }

    #[test]
    fn test_default_instant_gives_recency_one_for_latest() {
        let txs = vec![
            tx("A", "1", "2011-12-01 10:00:00", 10.0),
            tx("B", "2", "2011-11-01 10:00:00", 10.0),
        ];
        let rfm = aggregate_rfm(&txs, None).unwrap();

        // Auto instant is max + 1 day, so the most recent customer sits at 1.
        let a = rfm.iter().find(|c| c.customer_id == "A").unwrap();
        let b = rfm.iter().find(|c| c.customer_id == "B").unwrap();
        assert_eq!(a.recency_days, 1);
        assert_eq!(b.recency_days, 31);
        assert!(rfm.iter().all(|c| c.recency_days >= 0));
    }

    #[test]
    fn test_explicit_earlier_instant_is_rejected() {
        let txs = vec![tx("A", "1", "2011-12-01 10:00:00", 10.0)];
        let instant =
            NaiveDateTime::parse_from_str("2011-11-01 00:00:00", "%Y-%m-%d %H:%M:%S").unwrap();

        let err = aggregate_rfm(&txs, Some(instant)).unwrap_err();
        assert!(matches!(err, Error::InvalidAnalysisInstant { .. }));
    }

    #[test]
    fn test_empty_input_is_insufficient_data() {
        let err = aggregate_rfm(&[], None).unwrap_err();
        assert!(matches!(err, Error::InsufficientData(_)));
    }

    #[test]
    fn test_output_sorted_by_customer_id() {
        let txs = vec![
            tx("C", "1", "2011-12-01 10:00:00", 1.0),
            tx("A", "2", "2011-12-01 10:00:00", 1.0),
            tx("B", "3", "2011-12-01 10:00:00", 1.0),
        ];
        let rfm = aggregate_rfm(&txs, None).unwrap();
        let ids: Vec<&str> = rfm.iter().map(|c| c.customer_id.as_str()).collect();
        assert_eq!(ids, vec!["A", "B", "C"]);
    }
}

//! Transaction intake and normalization
//!
//! Raw rows arrive as field-name → value maps so the pipeline does not care
//! whether they came from a CSV file, a query result, or a test fixture. This
//! module resolves the column names once per run, validates every row, and
//! produces canonical [`Transaction`] values plus an audit report of what was
//! dropped and why.

use std::collections::{BTreeSet, HashMap};
use std::io::Read;

use chrono::NaiveDateTime;
use csv::ReaderBuilder;
use tracing::warn;

use crate::error::{Error, Result};

/// One raw input row: field name → string value, schema unknown up front.
pub type RawRecord = HashMap<String, String>;

/// Primary invoice timestamp format, retried with the secondary on failure.
const PRIMARY_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const SECONDARY_TIME_FORMAT: &str = "%m/%d/%Y %H:%M";

/// A cleaned, validated transaction row.
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    pub customer_id: String,
    pub invoice_id: String,
    pub invoice_time: NaiveDateTime,
    pub quantity: f64,
    pub unit_price: f64,
    /// quantity * unit_price, strictly positive for every surviving row.
    pub line_value: f64,
}

/// How the customer identifier column was resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdResolution {
    /// An exact `customer_id`/`CustomerID` column was present.
    Direct,
    /// No exact match; a column whose name contains "customer" was used.
    Alias(String),
    /// No customer column at all; the invoice id stands in as a proxy
    /// customer, one proxy customer per invoice. Degraded mode.
    InvoiceProxy,
}

impl IdResolution {
    pub fn is_degraded(&self) -> bool {
        matches!(self, IdResolution::InvoiceProxy)
    }
}

/// Audit record for one normalization run. Row-level data-quality problems
/// never abort the run; they are counted here instead.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizeReport {
    pub rows_in: usize,
    pub rows_kept: usize,
    pub dropped_missing_customer: usize,
    pub dropped_missing_invoice: usize,
    pub dropped_bad_numeric: usize,
    pub dropped_non_positive: usize,
    pub dropped_bad_timestamp: usize,
    pub id_resolution: IdResolution,
}

impl NormalizeReport {
    pub fn total_dropped(&self) -> usize {
        self.rows_in - self.rows_kept
    }
}

/// Resolved mapping from canonical fields to actual column names.
struct Columns {
    /// None means the invoice column doubles as the customer identifier.
    customer: Option<String>,
    invoice: String,
    timestamp: String,
    quantity: String,
    unit_price: String,
    resolution: IdResolution,
}

/// Column names are matched case-insensitively with `_`, `-`, and spaces
/// stripped, so `InvoiceDate`, `invoice_date`, and `Invoice Date` all agree.
fn normalize_name(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, '_' | '-' | ' '))
        .collect::<String>()
        .to_lowercase()
}

fn find_column(schema: &[String], aliases: &[&str]) -> Option<String> {
    schema
        .iter()
        .find(|col| aliases.contains(&normalize_name(col).as_str()))
        .cloned()
}

fn resolve_columns(schema: &[String]) -> Result<Columns> {
    let invoice = find_column(schema, &["invoiceno", "invoiceid", "invoice"])
        .ok_or_else(|| Error::Schema("invoice_id".into()))?;
    let timestamp = find_column(schema, &["invoicedate", "invoicetime", "invoicetimestamp"])
        .ok_or_else(|| Error::Schema("invoice_time".into()))?;
    let quantity = find_column(schema, &["quantity", "qty"])
        .ok_or_else(|| Error::Schema("quantity".into()))?;
    let unit_price = find_column(schema, &["unitprice", "price"])
        .ok_or_else(|| Error::Schema("unit_price".into()))?;

    // Customer identifier resolution order: exact column, then any column
    // whose name mentions "customer", then the invoice id as a proxy.
    let (customer, resolution) = if let Some(col) = find_column(schema, &["customerid"]) {
        (Some(col), IdResolution::Direct)
    } else if let Some(col) = schema
        .iter()
        .find(|col| normalize_name(col).contains("customer"))
    {
        (Some(col.clone()), IdResolution::Alias(col.clone()))
    } else {
        (None, IdResolution::InvoiceProxy)
    };

    Ok(Columns {
        customer,
        invoice,
        timestamp,
        quantity,
        unit_price,
        resolution,
    })
}

/// NaN and infinities parse as valid f64 but are unusable as quantities or
/// prices, and NaN would slip through a `<= 0.0` comparison; treat them as
/// coercion failures.
fn parse_numeric(raw: &str) -> Option<f64> {
    raw.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn parse_invoice_time(raw: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, PRIMARY_TIME_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(raw, SECONDARY_TIME_FORMAT))
        .ok()
}

fn field<'a>(record: &'a RawRecord, column: &str) -> Option<&'a str> {
    record
        .get(column)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
}

/// Normalize raw records into valid transactions.
///
/// Returns the surviving rows together with a [`NormalizeReport`] counting
/// every drop by cause and recording which identifier-resolution path fired.
/// Fails with [`Error::Schema`] when a required column is entirely absent
/// from the input schema, and with [`Error::InsufficientData`] when there are
/// no rows at all: with nothing observed there is no schema to judge and
/// nothing downstream to aggregate.
pub fn normalize_records(records: &[RawRecord]) -> Result<(Vec<Transaction>, NormalizeReport)> {
    if records.is_empty() {
        return Err(Error::InsufficientData(
            "no transaction rows in input".into(),
        ));
    }

    // Union of observed field names, sorted for deterministic resolution.
    let schema: Vec<String> = records
        .iter()
        .flat_map(|r| r.keys().cloned())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let columns = resolve_columns(&schema)?;

    if columns.resolution.is_degraded() {
        warn!("no customer identifier column found; using invoice id as proxy customer");
    } else if let IdResolution::Alias(ref name) = columns.resolution {
        warn!(column = %name, "customer_id column not found; using alias column");
    }

    let mut report = NormalizeReport {
        rows_in: records.len(),
        rows_kept: 0,
        dropped_missing_customer: 0,
        dropped_missing_invoice: 0,
        dropped_bad_numeric: 0,
        dropped_non_positive: 0,
        dropped_bad_timestamp: 0,
        id_resolution: columns.resolution.clone(),
    };

    let mut transactions = Vec::with_capacity(records.len());
    for record in records {
        let Some(invoice_id) = field(record, &columns.invoice) else {
            report.dropped_missing_invoice += 1;
            continue;
        };

        let customer_id = match columns.customer {
            Some(ref col) => match field(record, col) {
                Some(id) => id,
                None => {
                    report.dropped_missing_customer += 1;
                    continue;
                }
            },
            None => invoice_id,
        };

        let (Some(quantity), Some(unit_price)) = (
            field(record, &columns.quantity).and_then(parse_numeric),
            field(record, &columns.unit_price).and_then(parse_numeric),
        ) else {
            report.dropped_bad_numeric += 1;
            continue;
        };

        if !(quantity > 0.0 && unit_price > 0.0) {
            report.dropped_non_positive += 1;
            continue;
        }

        let Some(invoice_time) = field(record, &columns.timestamp).and_then(parse_invoice_time)
        else {
            report.dropped_bad_timestamp += 1;
            continue;
        };

        transactions.push(Transaction {
            customer_id: customer_id.to_string(),
            invoice_id: invoice_id.to_string(),
            invoice_time,
            quantity,
            unit_price,
            line_value: quantity * unit_price,
        });
    }

    report.rows_kept = transactions.len();
    if report.total_dropped() > 0 {
        warn!(
            rows_in = report.rows_in,
            rows_kept = report.rows_kept,
            missing_customer = report.dropped_missing_customer,
            missing_invoice = report.dropped_missing_invoice,
            bad_numeric = report.dropped_bad_numeric,
            non_positive = report.dropped_non_positive,
            bad_timestamp = report.dropped_bad_timestamp,
            "dropped rows during normalization"
        );
    }

    Ok((transactions, report))
}

/// Read a CSV source into raw records, headers as field names.
pub fn read_raw_csv<R: Read>(reader: R) -> Result<Vec<RawRecord>> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);

    let headers = rdr.headers()?.clone();
    let mut records = Vec::new();
    for result in rdr.records() {
        let record = result?;
        let mut row = RawRecord::with_capacity(headers.len());
        for (i, header) in headers.iter().enumerate() {
            if let Some(value) = record.get(i) {
                row.insert(header.to_string(), value.to_string());
            }
        }
        records.push(row);
    }
    Ok(records)
}

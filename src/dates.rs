//! Decoding of the compound date tokens the portal embeds in each
//! invoice option value.
//!
//! An option value looks like `"5/3/2024|3|2024"`: the due date in
//! day/month/year order, then the month and year of the billing period
//! the document covers.

use std::fmt;

use chrono::NaiveDate;

/// Year and month a billing document covers, distinct from its due date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReferencePeriod {
    pub year: i32,
    pub month: u32,
}

impl fmt::Display for ReferencePeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// Dates decoded from a single invoice option value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvoiceDates {
    pub due_date: NaiveDate,
    pub reference: ReferencePeriod,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DateTokenError {
    #[error("expected 3 '|'-separated segments, got {0}")]
    SegmentCount(usize),
    #[error("invalid due date {0:?}")]
    DueDate(String),
    #[error("invalid reference period {month:?}/{year:?}")]
    ReferencePeriod { month: String, year: String },
}

/// Decode an invoice option value into its due date and reference
/// period.
///
/// Both dates must be real calendar dates; nothing is clamped. An
/// undecodable token means the invoice cannot be named
/// deterministically, so callers skip that single invoice rather than
/// failing the run.
pub fn parse_invoice_token(token: &str) -> Result<InvoiceDates, DateTokenError> {
    let segments: Vec<&str> = token.split('|').collect();
    if segments.len() != 3 {
        return Err(DateTokenError::SegmentCount(segments.len()));
    }

    let due_date = NaiveDate::parse_from_str(segments[0], "%d/%m/%Y")
        .map_err(|_| DateTokenError::DueDate(segments[0].to_string()))?;

    let reference = parse_reference(segments[1], segments[2]).ok_or_else(|| {
        DateTokenError::ReferencePeriod {
            month: segments[1].to_string(),
            year: segments[2].to_string(),
        }
    })?;

    Ok(InvoiceDates {
        due_date,
        reference,
    })
}

fn parse_reference(month: &str, year: &str) -> Option<ReferencePeriod> {
    if !is_ascii_digits(month) || !is_ascii_digits(year) {
        return None;
    }
    let month: u32 = month.parse().ok()?;
    let year: i32 = year.parse().ok()?;

    // First-of-month construction doubles as the range check.
    NaiveDate::from_ymd_opt(year, month, 1)?;
    Some(ReferencePeriod { year, month })
}

fn is_ascii_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

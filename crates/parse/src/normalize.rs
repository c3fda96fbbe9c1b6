use chrono::NaiveDate;
use thiserror::Error;
use tracing::debug;

use extrait_core::dates::{self, DateError};
use extrait_core::money::{parse_statement_amount, AmountError};
use extrait_core::statement::TransactionRecord;

use crate::scan::RawTransaction;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum NormalizeError {
    #[error("line {line_no}: {source}")]
    BadAmount { line_no: usize, source: AmountError },
    #[error("line {line_no}: {source}")]
    BadDate { line_no: usize, source: DateError },
}

/// Convert a raw segmented row into a typed record.
///
/// `end_date` is the statement's closing balance date, used to complete
/// the day/month date fragments. Zero-amount rows are notification-only
/// lines and resolve to `None`.
pub fn resolve_row(
    raw: &RawTransaction,
    end_date: NaiveDate,
) -> Result<Option<TransactionRecord>, NormalizeError> {
    let line_no = raw.line_no;

    let unsigned = parse_statement_amount(&raw.amount)
        .map_err(|source| NormalizeError::BadAmount { line_no, source })?;
    if unsigned.is_zero() {
        debug!(line_no, payee = %raw.payee, "dropping zero-amount row");
        return Ok(None);
    }
    let amount = raw.side.signed(unsigned);

    let complete = |text: &str| {
        dates::complete_day_month(text, end_date)
            .map_err(|source| NormalizeError::BadDate { line_no, source })
    };
    let accounting_date = complete(&raw.accounting_date)?;
    let operation_date = complete(&raw.operation_date)?;
    let value_date = complete(&raw.value_date)?;

    Ok(Some(TransactionRecord {
        date: accounting_date,
        accounting_date,
        operation_date,
        value_date,
        amount,
        payee: raw.payee.clone(),
        memo: raw.memo.clone(),
        check_no: raw.check_no.clone(),
        id: None,
    }))
}

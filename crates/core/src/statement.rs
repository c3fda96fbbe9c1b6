use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One recovered transaction.
///
/// `date` starts out as the accounting date and may later be overwritten
/// with the posted date from a reconciled authoritative record. `amount` is
/// signed: debits are negative. `id` stays `None` until reconciliation or
/// content-hash assignment fills it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub date: NaiveDate,
    pub accounting_date: NaiveDate,
    pub operation_date: NaiveDate,
    pub value_date: NaiveDate,
    pub amount: Decimal,
    pub payee: String,
    pub memo: String,
    pub check_no: Option<String>,
    pub id: Option<String>,
}

/// A parsed statement: header metadata plus the ordered transaction list.
///
/// Header fields are optional while the statement is being assembled; the
/// consistency rules are enforced by [`Statement::validate`], never
/// mid-parse.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Statement {
    pub bank_id: Option<String>,
    pub account_id: Option<String>,
    pub currency: Option<String>,
    pub account_type: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub start_balance: Option<Decimal>,
    /// Exclusive upper bound: one day past the last valid transaction date.
    pub end_date: Option<NaiveDate>,
    pub end_balance: Option<Decimal>,
    pub records: Vec<TransactionRecord>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StatementError {
    #[error("statement end date is not set")]
    MissingEndDate,
    #[error("statement start date {start} is after the earliest record date {earliest}")]
    StartAfterEarliestRecord { start: NaiveDate, earliest: NaiveDate },
    #[error("statement end date {end} is not after the latest record date {latest}")]
    EndNotAfterLatestRecord { end: NaiveDate, latest: NaiveDate },
}

impl Statement {
    /// Check the date-range invariant:
    /// `start_date <= r.accounting_date < end_date` for every record.
    pub fn validate(&self) -> Result<(), StatementError> {
        let end = self.end_date.ok_or(StatementError::MissingEndDate)?;

        let accounting_dates = self.records.iter().map(|r| r.accounting_date);
        let (earliest, latest) = match (accounting_dates.clone().min(), accounting_dates.max()) {
            (Some(min), Some(max)) => (min, max),
            _ => return Ok(()),
        };

        if let Some(start) = self.start_date {
            if start > earliest {
                return Err(StatementError::StartAfterEarliestRecord { start, earliest });
            }
        }
        if end <= latest {
            return Err(StatementError::EndNotAfterLatestRecord { end, latest });
        }
        Ok(())
    }
}

//! Recovery of structured transactions from layout-preserving text dumps
//! of bank statements.
//!
//! The text format is positional: column membership is a matter of
//! character offset, transactions span one to several physical lines, and
//! amounts carry no sign. [`parse_statement`] runs the whole pipeline:
//! header discovery, column layout learning, transaction segmentation and
//! field normalization.

pub mod layout;
pub mod normalize;
pub mod scan;
pub(crate) mod util;

use thiserror::Error;

use extrait_core::statement::Statement;

pub use normalize::NormalizeError;
pub use scan::{scan_lines, RawTransaction, ScanError, ScanOptions, ScanOutput};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    Normalize(#[from] NormalizeError),
    #[error("statement has transactions but no closing balance date")]
    MissingEndDate,
}

/// Parse one statement's worth of positional text into a [`Statement`].
///
/// Records come back without identifiers; reconciliation and id assignment
/// are a separate pass. The returned end date is exclusive (one day past
/// the closing balance date). The caller decides when to run
/// [`Statement::validate`].
pub fn parse_statement(text: &str, options: &ScanOptions) -> Result<Statement, ParseError> {
    let lines: Vec<&str> = text.lines().collect();
    let scanned = scan_lines(&lines, options)?;

    let mut records = Vec::new();
    if !scanned.rows.is_empty() {
        let end_date = scanned.end_date.ok_or(ParseError::MissingEndDate)?;
        for raw in &scanned.rows {
            if let Some(record) = normalize::resolve_row(raw, end_date)? {
                records.push(record);
            }
        }
    }

    Ok(Statement {
        bank_id: scanned.bank_id,
        account_id: scanned.account_id,
        currency: Some("EUR".to_string()),
        account_type: Some("CHECKING".to_string()),
        start_date: scanned.start_date,
        start_balance: scanned.start_balance,
        end_date: scanned.end_date.map(|date| date + chrono::Duration::days(1)),
        end_balance: scanned.end_balance,
        records,
    })
}

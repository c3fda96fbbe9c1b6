use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{debug, warn};

use extrait_core::dates::{self, DateError};
use extrait_core::money::{parse_statement_amount, AmountError, Side};
use extrait_core::text::{char_len, find_chars, prefix_chars, suffix_chars};

use crate::layout::{LayoutTracker, ResolvedColumns};
use crate::util::split_columns;

// ── Compiled regex cache ─────────────────────────────────────────────────────

macro_rules! re {
    ($name:ident, $pat:expr) => {
        fn $name() -> &'static Regex {
            static R: OnceLock<Regex> = OnceLock::new();
            R.get_or_init(|| Regex::new($pat).expect("invalid regex"))
        }
    };
}

re!(re_account_id, r"^VOTRE .* N° (\d+)");
re!(re_bank_id, r"^IBAN\s+(\S.+\S)\s+BIC\s+(\S+)");
re!(re_balance, r"^SOLDE (CRED|DEB)ITEUR AU (\d{2}/\d{2}/\d{4}).\s+([ ,0-9]+)$");
re!(re_transaction, r"^\d{2}/\d{2}\s+\S.*\s+\d{2}/\d{2}\s+\d{2}/\d{2}\s+[ ,0-9]+$");
re!(re_f_prefix, r"^F\s+");
re!(re_f_inline, r"F\s+");

/// The line announcing that the next balance line closes the statement.
const TOTAL_MARKER: &str = "TOTAL DES MOUVEMENTS";

// ── Options and errors ───────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Fallback bank id, used only when the text carries no IBAN/BIC line.
    pub bank_id: Option<String>,
    /// Width of the band left of the operation-date column in which a
    /// trailing reference counts as a check number. Empirically tuned
    /// against the observed layout; recalibrate for new layouts rather
    /// than trusting it.
    pub check_no_margin: usize,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            bank_id: None,
            check_no_margin: 20,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScanError {
    #[error("line {line_no}: transaction before the {field} column was resolved")]
    LayoutIncomplete { line_no: usize, field: &'static str },
    #[error("line {line_no}: balance line before the credit column was resolved")]
    BalanceBeforeHeader { line_no: usize },
    #[error("line {line_no}: {source}")]
    BadAmount { line_no: usize, source: AmountError },
    #[error("line {line_no}: {source}")]
    BadDate { line_no: usize, source: DateError },
}

// ── Output ───────────────────────────────────────────────────────────────────

/// One segmented transaction with its fields still as raw positional
/// strings; dates carry day/month only. Continuation lines grow `memo`
/// until the next transaction line or end of input.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTransaction {
    pub line_no: usize,
    pub accounting_date: String,
    pub operation_date: String,
    pub value_date: String,
    pub payee: String,
    pub memo: String,
    pub amount: String,
    pub side: Side,
    pub check_no: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ScanOutput {
    pub account_id: Option<String>,
    pub bank_id: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub start_balance: Option<Decimal>,
    pub end_date: Option<NaiveDate>,
    pub end_balance: Option<Decimal>,
    pub rows: Vec<RawTransaction>,
}

// ── Scanner ──────────────────────────────────────────────────────────────────

/// State machine for the orphaned-marker artifact: an image embedded in the
/// source document renders as a blank line plus an `F`-prefixed fragment
/// one line above the memo text it belongs to.
#[derive(Debug, Clone, PartialEq)]
enum PendingPayee {
    /// No blank line seen.
    Idle,
    /// One blank line seen; an `F` fragment may follow.
    Armed,
    /// Payee text captured, to be spliced into the next transaction row.
    Captured(String),
}

/// Single forward pass over the buffered line sequence.
///
/// The buffer is materialized because the marker repair needs two-line
/// lookahead; a consumed lookahead line is marked rather than removed so
/// that indices stay stable.
pub fn scan_lines(lines: &[&str], options: &ScanOptions) -> Result<ScanOutput, ScanError> {
    Scanner::new(options).run(lines)
}

struct Scanner<'a> {
    options: &'a ScanOptions,
    tracker: LayoutTracker,
    columns: Option<ResolvedColumns>,
    out: ScanOutput,
    open: Option<RawTransaction>,
    pending_payee: PendingPayee,
    read_end_balance: bool,
}

impl<'a> Scanner<'a> {
    fn new(options: &'a ScanOptions) -> Self {
        Self {
            options,
            tracker: LayoutTracker::new(options.check_no_margin),
            columns: None,
            out: ScanOutput::default(),
            open: None,
            pending_payee: PendingPayee::Idle,
            read_end_balance: false,
        }
    }

    fn run(mut self, lines: &[&str]) -> Result<ScanOutput, ScanError> {
        let mut consumed = vec![false; lines.len()];

        for i in 0..lines.len() {
            if consumed[i] {
                continue;
            }
            let line = lines[i];
            let line_no = i + 1;
            let stripped = line.trim();

            if !stripped.is_empty() {
                debug!(line_no, line = stripped, "scanning");
                if stripped.starts_with(TOTAL_MARKER) {
                    self.read_end_balance = true;
                    continue;
                }
            }

            // Everything before the account id declaration is preamble.
            if self.out.account_id.is_none() {
                if let Some(c) = re_account_id().captures(stripped) {
                    let account_id = c[1].to_string();
                    debug!(account_id = %account_id, "account id");
                    self.out.account_id = Some(account_id);
                }
                continue;
            }

            // Same for the bank id, with the configured fallback.
            if self.out.bank_id.is_none() {
                if let Some(c) = re_bank_id().captures(stripped) {
                    let bank_id = c[2].to_string();
                    debug!(bank_id = %bank_id, "bank id");
                    self.out.bank_id = Some(bank_id);
                } else if let Some(fallback) = &self.options.bank_id {
                    self.out.bank_id = Some(fallback.clone());
                    debug!(bank_id = %fallback, "bank id from configuration");
                }
                continue;
            }

            if let Some(caps) = re_balance().captures(stripped) {
                let (date_text, amount_text) = (&caps[2], &caps[3]);
                if self.handle_balance(line, line_no, date_text, amount_text)? {
                    break;
                }
                continue;
            }

            if self.tracker.observe_first_header(line, stripped) {
                continue;
            }
            if self.tracker.armed() {
                self.tracker.observe_second_header(line, stripped);
                continue;
            }

            if stripped.is_empty() {
                let previous = std::mem::replace(&mut self.pending_payee, PendingPayee::Idle);
                self.pending_payee = match previous {
                    // First blank line after a committed transaction.
                    PendingPayee::Idle => PendingPayee::Armed,
                    // Several blank lines before an F line are possible.
                    PendingPayee::Armed => PendingPayee::Armed,
                    // A blank line after the F line cancels the capture.
                    PendingPayee::Captured(_) => PendingPayee::Idle,
                };
                continue;
            }

            let row = split_columns(stripped);

            if self.pending_payee == PendingPayee::Armed && row.len() == 1 {
                if let Some(m) = re_f_prefix().find(row[0]) {
                    let payee = row[0][m.end()..].to_string();
                    debug!(payee = %payee, "deferred payee fragment");
                    self.pending_payee = PendingPayee::Captured(payee);
                    continue;
                }
            }

            if re_transaction().is_match(stripped) {
                self.emit_transaction(line, line_no, &row)?;
                continue;
            }

            // The marker repair: this line plus the line two ahead may be
            // one transaction torn apart by the artifact.
            if let Some(combined) = try_marker_repair(lines, &mut consumed, i, &row) {
                let combined_stripped = combined.trim();
                let row = split_columns(combined_stripped);
                self.emit_transaction(&combined, line_no, &row)?;
                continue;
            }

            self.append_continuation(line, stripped);
        }

        self.flush_open();
        Ok(self.out)
    }

    /// Balance lines carry a full date and an unsigned amount; the column
    /// of the amount decides the sign. The first one is the opening
    /// balance, the first one after the TOTAL marker closes the statement
    /// (returns true to stop scanning).
    fn handle_balance(
        &mut self,
        line: &str,
        line_no: usize,
        date_text: &str,
        amount_text: &str,
    ) -> Result<bool, ScanError> {
        let date = dates::parse_full_date(date_text)
            .map_err(|source| ScanError::BadDate { line_no, source })?;
        let credit_pos = self
            .tracker
            .layout
            .credit_pos
            .ok_or(ScanError::BalanceBeforeHeader { line_no })?;
        let side = Side::from_position(line, amount_text, credit_pos);
        let amount = side.signed(
            parse_statement_amount(amount_text)
                .map_err(|source| ScanError::BadAmount { line_no, source })?,
        );
        debug!(line_no, %date, %amount, "balance line");

        if self.read_end_balance {
            self.out.end_balance = Some(amount);
            self.out.end_date = Some(date);
            return Ok(true);
        }
        if self.out.start_balance.is_none() {
            self.out.start_balance = Some(amount);
            self.out.start_date = Some(date);
        }
        Ok(false)
    }

    fn emit_transaction(
        &mut self,
        line: &str,
        line_no: usize,
        row: &[&str],
    ) -> Result<(), ScanError> {
        let columns = match self.columns {
            Some(columns) => columns,
            None => {
                let columns = self
                    .tracker
                    .layout
                    .resolve()
                    .map_err(|field| ScanError::LayoutIncomplete { line_no, field })?;
                self.columns = Some(columns);
                columns
            }
        };

        self.flush_open();

        let mut fields: Vec<String> = row.iter().map(|s| s.to_string()).collect();

        match std::mem::replace(&mut self.pending_payee, PendingPayee::Idle) {
            PendingPayee::Captured(payee) => {
                debug!(payee = %payee, "splicing deferred payee into the row");
                fields.insert(1, payee);
            }
            other => self.pending_payee = other,
        }

        // Occasional whitespace-split artifacts produce extra middle
        // fields; fold them back into the reference slot.
        while fields.len() > 6 {
            let merged = format!("{} {}", fields[2], fields[3]);
            fields[2] = merged;
            fields.remove(3);
        }

        if fields.len() < 5 {
            warn!(line_no, ?fields, "transaction-shaped line with too few columns, ignoring");
            return Ok(());
        }

        let n = fields.len();
        let amount = fields[n - 1].clone();
        let side = Side::from_position(line, &amount, columns.credit_pos);

        // A six-field row carries a trailing reference that is a check
        // number only when it sits inside the check-number band; left of
        // the band it is payee text with a numeric-looking tail.
        let mut payee = fields[1].clone();
        let mut check_no = None;
        if n >= 6 {
            let candidate = &fields[n - 4];
            match find_chars(line, candidate) {
                Some(pos) if pos >= columns.check_no_pos => {
                    debug!(check_no = %candidate, pos, "check number");
                    check_no = Some(candidate.clone());
                }
                _ => {
                    debug!(candidate = %candidate, "reference left of the check-number band, folding into payee");
                    payee.push(' ');
                    payee.push_str(candidate);
                }
            }
        }

        self.open = Some(RawTransaction {
            line_no,
            accounting_date: fields[0].clone(),
            operation_date: fields[n - 3].clone(),
            value_date: fields[n - 2].clone(),
            payee,
            memo: String::new(),
            amount,
            side,
            check_no,
        });
        Ok(())
    }

    /// A non-transaction line continues the open record's memo only when
    /// its text fits entirely within the description column's visual span.
    fn append_continuation(&mut self, line: &str, stripped: &str) {
        let (Some(open), Some(columns)) = (self.open.as_mut(), self.columns) else {
            return;
        };
        let pos = find_chars(line, stripped).unwrap_or(0);
        if pos > columns.accounting_date_pos && pos + char_len(stripped) < columns.operation_date_pos
        {
            if open.memo.is_empty() {
                open.memo = stripped.to_string();
            } else {
                open.memo.push(' ');
                open.memo.push_str(stripped);
            }
            debug!(memo = %open.memo, "continuation line");
        }
    }

    fn flush_open(&mut self) {
        if let Some(row) = self.open.take() {
            debug!(line_no = row.line_no, payee = %row.payee, "transaction complete");
            self.out.rows.push(row);
        }
    }
}

// ── Marker repair ────────────────────────────────────────────────────────────

/// Two transactions torn apart by the image artifact leave a date line
/// whose description starts with `F ` and whose positional tail sits two
/// lines further down. Rebuild the line by dropping the marker and
/// splicing in the far line's tail, but only when the far line is blank up
/// to the splice point and the result actually matches the transaction
/// pattern; otherwise both lines are left untouched.
fn try_marker_repair(
    lines: &[&str],
    consumed: &mut [bool],
    i: usize,
    row: &[&str],
) -> Option<String> {
    if row.len() < 2 {
        return None;
    }
    let marked = re_f_prefix().is_match(row[1]) || (row.len() >= 3 && row[1] == "F");
    if !marked {
        return None;
    }
    let ahead = lookahead_two(consumed, i)?;

    let mut combined = lines[i].trim_end().to_string();
    let marker_range = re_f_inline().find(&combined)?.range();
    combined.replace_range(marker_range, "");

    let cut = char_len(&combined);
    if !prefix_chars(lines[ahead], cut).trim().is_empty() {
        return None;
    }
    combined.push_str(suffix_chars(lines[ahead], cut));

    if !re_transaction().is_match(combined.trim()) {
        return None;
    }
    debug!(line = combined.trim(), "combined split transaction line");
    consumed[ahead] = true;
    Some(combined)
}

/// Index of the second not-yet-consumed line after `i`, mirroring "two
/// lines ahead" in a stream where repaired lines have been dropped.
fn lookahead_two(consumed: &[bool], i: usize) -> Option<usize> {
    let mut remaining = 2;
    for (j, eaten) in consumed.iter().enumerate().skip(i + 1) {
        if *eaten {
            continue;
        }
        remaining -= 1;
        if remaining == 0 {
            return Some(j);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    const ACCOUNT: &str = "VOTRE COMPTE CHEQUES N° 99999999999";
    const IBAN: &str = "IBAN FR76 9999 9999 9999 9999 9999 999  BIC CCBPFRPPBDX";
    const HEADER_1: &str =
        " DATE                                             DATE       DATE       DEBIT     CREDIT";
    const HEADER_2A: &str = "COMPTA";
    const HEADER_2B: &str =
        "        LIBELLE/REFERENCE                         OPERATION  VALEUR     EUROS     EUROS";
    const OPENING: &str =
        "        SOLDE CREDITEUR AU 04/06/2019                                             401,99";

    fn preamble() -> Vec<&'static str> {
        vec![ACCOUNT, IBAN, HEADER_1, HEADER_2A, HEADER_2B]
    }

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn failed_repair_keeps_both_lines() {
        // The line two ahead is not blank up to the splice point, so the
        // marker line stays unrepaired and the far line is processed as
        // the transaction it is.
        let mut lines = preamble();
        lines.extend([
            OPENING,
            "",
            " 26/06  F COTIS AFFINEA",
            "        SOMETHING",
            " 27/06  REAL PAYEE                                27/06      27/06      5,00",
        ]);
        let out = scan_lines(&lines, &ScanOptions::default()).unwrap();
        assert_eq!(out.rows.len(), 1);
        assert_eq!(out.rows[0].payee, "REAL PAYEE");
        assert_eq!(out.rows[0].amount, "5,00");
        assert_eq!(out.rows[0].side, Side::Debit);
    }

    #[test]
    fn transaction_before_header_is_a_layout_error() {
        let lines = vec![
            ACCOUNT,
            IBAN,
            " 20/06  PRLV SEPA                                 20/06      20/06      43,70",
        ];
        let err = scan_lines(&lines, &ScanOptions::default()).unwrap_err();
        assert!(matches!(err, ScanError::LayoutIncomplete { line_no: 3, .. }));
    }

    #[test]
    fn balance_before_header_is_an_error() {
        let lines = vec![ACCOUNT, IBAN, OPENING];
        let err = scan_lines(&lines, &ScanOptions::default()).unwrap_err();
        assert!(matches!(err, ScanError::BalanceBeforeHeader { line_no: 3 }));
    }

    #[test]
    fn bank_id_fallback_when_no_iban_line() {
        let lines = vec![ACCOUNT, "", HEADER_1, HEADER_2A, HEADER_2B, OPENING];
        let options = ScanOptions {
            bank_id: Some("CCBPFRPPXXX".to_string()),
            ..ScanOptions::default()
        };
        let out = scan_lines(&lines, &options).unwrap();
        assert_eq!(out.bank_id.as_deref(), Some("CCBPFRPPXXX"));
        assert_eq!(out.start_balance, Some(dec("401.99")));
    }

    #[test]
    fn without_iban_or_fallback_nothing_is_recovered() {
        let lines = vec![ACCOUNT, "", HEADER_1, HEADER_2A, HEADER_2B, OPENING];
        let out = scan_lines(&lines, &ScanOptions::default()).unwrap();
        assert_eq!(out.bank_id, None);
        assert_eq!(out.start_balance, None);
        assert!(out.rows.is_empty());
    }

    #[test]
    fn debit_balance_is_negative() {
        let mut lines = preamble();
        lines.push("        SOLDE DEBITEUR AU 04/06/2019                                    12,50");
        let out = scan_lines(&lines, &ScanOptions::default()).unwrap();
        assert_eq!(out.start_balance, Some(dec("-12.50")));
    }

    #[test]
    fn duplicate_id_declarations_are_ignored() {
        let mut lines = preamble();
        lines.extend([
            "VOTRE COMPTE CHEQUES N° 11111111111",
            "IBAN FR76 Y  BIC OTHERBIC",
            OPENING,
        ]);
        let out = scan_lines(&lines, &ScanOptions::default()).unwrap();
        assert_eq!(out.account_id.as_deref(), Some("99999999999"));
        assert_eq!(out.bank_id.as_deref(), Some("CCBPFRPPBDX"));
    }

    #[test]
    fn only_the_balance_after_the_total_marker_closes_the_statement() {
        let mut lines = preamble();
        lines.extend([
            OPENING,
            "        SOLDE CREDITEUR AU 10/06/2019                                             500,00",
            "        TOTAL DES MOUVEMENTS",
            "        SOLDE CREDITEUR AU 03/07/2019                                             374,55",
        ]);
        let out = scan_lines(&lines, &ScanOptions::default()).unwrap();
        assert_eq!(out.start_balance, Some(dec("401.99")));
        assert_eq!(out.end_balance, Some(dec("374.55")));
        assert_eq!(
            out.end_date,
            NaiveDate::from_ymd_opt(2019, 7, 3)
        );
    }

    #[test]
    fn lookahead_two_skips_consumed_lines() {
        let consumed = vec![false, false, true, false, false];
        assert_eq!(lookahead_two(&consumed, 0), Some(3));
        assert_eq!(lookahead_two(&consumed, 3), None);
        assert_eq!(lookahead_two(&consumed, 1), Some(4));
    }
}

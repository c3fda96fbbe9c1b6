use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

use crate::text::rfind_chars;

/// Which side of the ledger an unsigned statement amount belongs to.
///
/// The statement text prints amounts without a sign; the column the amount
/// sits in is the only carrier of that information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Debit,
    Credit,
}

impl Side {
    /// Column-position rule: an amount whose rightmost occurrence starts at
    /// or past the credit column is a credit, anything left of it is a
    /// debit. Offsets are character offsets, matching the positional layout.
    pub fn from_position(line: &str, amount: &str, credit_pos: usize) -> Side {
        match rfind_chars(line, amount) {
            Some(pos) if pos >= credit_pos => Side::Credit,
            _ => Side::Debit,
        }
    }

    /// Apply the sign convention: debits are negative.
    pub fn signed(self, amount: Decimal) -> Decimal {
        match self {
            Side::Debit => -amount,
            Side::Credit => amount,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmountError {
    #[error("not a statement amount: {0:?}")]
    Invalid(String),
}

/// Parse an unsigned amount in the statement's locale: a space as the
/// thousands separator and a comma as the decimal separator ("1 827,97").
/// The decimal comma is detected three characters from the end; amounts
/// without one are whole numbers.
pub fn parse_statement_amount(text: &str) -> Result<Decimal, AmountError> {
    let text = text.trim();
    if text.is_empty()
        || !text
            .chars()
            .all(|c| c.is_ascii_digit() || c == ' ' || c == ',')
    {
        return Err(AmountError::Invalid(text.to_string()));
    }

    let chars: Vec<char> = text.chars().collect();
    let has_decimal_comma = chars.len() >= 3 && chars[chars.len() - 3] == ',';
    let normalized: String = if has_decimal_comma {
        text.replace(' ', "").replace(',', ".")
    } else {
        text.replace(' ', "")
    };

    Decimal::from_str(&normalized).map_err(|_| AmountError::Invalid(text.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    // ── parse_statement_amount ────────────────────────────────────────────────

    #[test]
    fn parse_amount_plain() {
        assert_eq!(parse_statement_amount("43,70").unwrap(), dec("43.70"));
    }

    #[test]
    fn parse_amount_space_thousands() {
        assert_eq!(parse_statement_amount("1 827,97").unwrap(), dec("1827.97"));
        assert_eq!(
            parse_statement_amount("12 345 678,00").unwrap(),
            dec("12345678.00")
        );
    }

    #[test]
    fn parse_amount_whole_number_without_comma() {
        assert_eq!(parse_statement_amount("55").unwrap(), dec("55"));
    }

    #[test]
    fn parse_amount_trims_surrounding_whitespace() {
        assert_eq!(parse_statement_amount("  401,99 ").unwrap(), dec("401.99"));
    }

    #[test]
    fn parse_amount_rejects_other_characters() {
        assert!(parse_statement_amount("43.70").is_err());
        assert!(parse_statement_amount("-43,70").is_err());
        assert!(parse_statement_amount("").is_err());
        assert!(parse_statement_amount("abc").is_err());
    }

    // ── Side ─────────────────────────────────────────────────────────────────

    #[test]
    fn side_from_position_credit_at_or_after_column() {
        let line = " 04/06 VIREMENT SEPA        04/06 04/06          55,00";
        let credit_pos = line.rfind("55,00").unwrap();
        assert_eq!(Side::from_position(line, "55,00", credit_pos), Side::Credit);
    }

    #[test]
    fn side_from_position_debit_before_column() {
        let line = " 20/06 PRLV SEPA            20/06 20/06 43,70";
        assert_eq!(Side::from_position(line, "43,70", 50), Side::Debit);
    }

    #[test]
    fn side_from_position_missing_amount_is_debit() {
        assert_eq!(Side::from_position("no amount here", "9,99", 0), Side::Debit);
    }

    #[test]
    fn side_uses_rightmost_occurrence() {
        // "20" appears in the dates too; only the rightmost hit counts.
        let line = " 20/06 X 20/06 20/06                             20,00";
        let credit_pos = 45;
        assert_eq!(Side::from_position(line, "20,00", credit_pos), Side::Credit);
    }

    #[test]
    fn signed_applies_debit_sign() {
        assert_eq!(Side::Debit.signed(dec("43.70")), dec("-43.70"));
        assert_eq!(Side::Credit.signed(dec("43.70")), dec("43.70"));
    }
}

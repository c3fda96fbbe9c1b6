use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

/// One transaction from an authoritative OFX export.
#[derive(Debug, Clone, PartialEq)]
pub struct OfxTransaction {
    pub fit_id: String,
    pub date: NaiveDate,
    pub amount: Decimal,
    pub name: Option<String>,
    pub memo: Option<String>,
    pub check_number: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OfxStatement {
    pub account_id: String,
    pub bank_id: Option<String>,
    pub transactions: Vec<OfxTransaction>,
}

#[derive(Error, Debug)]
pub enum OfxError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),
}

/// Parse an OFX export's transaction list.
///
/// OFX is SGML-flavoured tag soup: elements are usually unclosed, tags may
/// be any case, and the value sits on the tag's own line. A line-oriented
/// scan with case-insensitive tag matching handles every export seen so
/// far; sibling STMTTRN order is preserved.
pub fn parse(data: &str) -> Result<OfxStatement, OfxError> {
    let mut account_id = String::new();
    let mut bank_id = None;
    let mut transactions = Vec::new();

    let mut in_stmttrn = false;
    let mut current: Option<BuildingTrx> = None;

    for line in data.lines() {
        let line = line.trim();
        let Some(tag) = line.strip_prefix('<') else {
            continue;
        };

        let (tag_name, value) = match tag.split_once('>') {
            Some((name, val)) => (name.trim(), Some(val.trim().to_string())),
            None => (tag.trim_end_matches(['>', '\r', '\n']), None),
        };

        match tag_name.to_uppercase().as_str() {
            "ACCTID" => {
                if let Some(v) = value {
                    account_id = v;
                }
            }
            "BANKID" => {
                if let Some(v) = value {
                    bank_id = Some(v);
                }
            }
            "STMTTRN" => {
                in_stmttrn = true;
                current = Some(BuildingTrx::default());
            }
            "/STMTTRN" => {
                if let Some(trx) = current.take() {
                    match trx.finish() {
                        Some(done) => transactions.push(done),
                        None => debug!("skipping transaction without FITID or DTPOSTED"),
                    }
                }
                in_stmttrn = false;
            }
            other if in_stmttrn => {
                if let (Some(trx), Some(v)) = (current.as_mut(), value) {
                    match other {
                        "FITID" => trx.fit_id = Some(v),
                        "DTPOSTED" => trx.date = parse_ofx_date(&v),
                        "TRNAMT" => trx.amount = parse_ofx_amount(&v),
                        "MEMO" => trx.memo = Some(v),
                        "NAME" => trx.name = Some(v),
                        "CHECKNUM" => trx.check_number = Some(v),
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }

    if account_id.is_empty() {
        return Err(OfxError::MissingField("ACCTID"));
    }

    Ok(OfxStatement {
        account_id,
        bank_id,
        transactions,
    })
}

#[derive(Default)]
struct BuildingTrx {
    fit_id: Option<String>,
    date: Option<NaiveDate>,
    amount: Option<Decimal>,
    name: Option<String>,
    memo: Option<String>,
    check_number: Option<String>,
}

impl BuildingTrx {
    /// A cache entry is only useful with an identifier and a posted date.
    fn finish(self) -> Option<OfxTransaction> {
        Some(OfxTransaction {
            fit_id: self.fit_id.filter(|id| !id.is_empty())?,
            date: self.date?,
            amount: self.amount.unwrap_or_default(),
            name: self.name,
            memo: self.memo,
            check_number: self.check_number,
        })
    }
}

/// `YYYYMMDD`, optionally followed by a time and timezone suffix.
fn parse_ofx_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if s.len() < 8 {
        return None;
    }
    let y: i32 = s[0..4].parse().ok()?;
    let m: u32 = s[4..6].parse().ok()?;
    let d: u32 = s[6..8].parse().ok()?;
    NaiveDate::from_ymd_opt(y, m, d)
}

fn parse_ofx_amount(s: &str) -> Option<Decimal> {
    Decimal::from_str(&s.trim().replace(',', ".")).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    // ── field helpers ─────────────────────────────────────────────────────────

    #[test]
    fn parse_ofx_date_basic() {
        assert_eq!(
            parse_ofx_date("20190620"),
            NaiveDate::from_ymd_opt(2019, 6, 20)
        );
    }

    #[test]
    fn parse_ofx_date_time_suffix_ignored() {
        assert_eq!(
            parse_ofx_date("20190620120000[-5:EST]"),
            NaiveDate::from_ymd_opt(2019, 6, 20)
        );
    }

    #[test]
    fn parse_ofx_date_invalid() {
        assert_eq!(parse_ofx_date("not-a-date"), None);
        assert_eq!(parse_ofx_date(""), None);
        assert_eq!(parse_ofx_date("20191350"), None);
    }

    #[test]
    fn parse_ofx_amount_signed() {
        assert_eq!(parse_ofx_amount("-43.70"), Some(dec("-43.70")));
        assert_eq!(parse_ofx_amount("55.00"), Some(dec("55.00")));
        // Some exports use a decimal comma.
        assert_eq!(parse_ofx_amount("-43,70"), Some(dec("-43.70")));
        assert_eq!(parse_ofx_amount("abc"), None);
    }

    // ── full statement parse ──────────────────────────────────────────────────

    const SAMPLE_OFX: &str = r#"
OFXHEADER:100
DATA:OFXSGML
VERSION:102

<OFX>
<BANKMSGSRSV1>
<STMTTRNRS>
<STMTRS>
<CURDEF>EUR
<BANKACCTFROM>
<BANKID>CCBPFRPPBDX
<ACCTID>99999999999
<ACCTTYPE>CHECKING
</BANKACCTFROM>
<BANKTRANLIST>
<DTSTART>20190604
<DTEND>20190704
<STMTTRN>
<TRNTYPE>DIRECTDEBIT
<DTPOSTED>20190620
<TRNAMT>-43.70
<FITID>201906200001
<CHECKNUM>YYYYYYY
<NAME>AUTOROUTES DU SUD
<MEMO>PEAGE JUIN
</STMTTRN>
<stmttrn>
<trntype>XFER
<dtposted>20190606
<trnamt>55.00
<fitid>201906060001
<name>M NNNNN NNNNN
</stmttrn>
</BANKTRANLIST>
</STMTRS>
</STMTTRNRS>
</BANKMSGSRSV1>
</OFX>
"#;

    #[test]
    fn parse_full_export() {
        let stmt = parse(SAMPLE_OFX).unwrap();
        assert_eq!(stmt.account_id, "99999999999");
        assert_eq!(stmt.bank_id.as_deref(), Some("CCBPFRPPBDX"));
        assert_eq!(stmt.transactions.len(), 2);

        let t0 = &stmt.transactions[0];
        assert_eq!(t0.fit_id, "201906200001");
        assert_eq!(t0.date, NaiveDate::from_ymd_opt(2019, 6, 20).unwrap());
        assert_eq!(t0.amount, dec("-43.70"));
        assert_eq!(t0.check_number.as_deref(), Some("YYYYYYY"));
        assert_eq!(t0.name.as_deref(), Some("AUTOROUTES DU SUD"));
        assert_eq!(t0.memo.as_deref(), Some("PEAGE JUIN"));
    }

    #[test]
    fn tags_are_case_insensitive() {
        let stmt = parse(SAMPLE_OFX).unwrap();
        let t1 = &stmt.transactions[1];
        assert_eq!(t1.fit_id, "201906060001");
        assert_eq!(t1.amount, dec("55.00"));
        assert_eq!(t1.name.as_deref(), Some("M NNNNN NNNNN"));
        assert!(t1.memo.is_none());
    }

    #[test]
    fn missing_account_id_errors() {
        let bad = "<OFX>\n<BANKTRANLIST>\n</BANKTRANLIST>\n</OFX>\n";
        assert!(matches!(parse(bad), Err(OfxError::MissingField("ACCTID"))));
    }

    #[test]
    fn transaction_without_fitid_is_skipped() {
        let data = "\
<OFX>
<ACCTID>99999999999
<STMTTRN>
<DTPOSTED>20190620
<TRNAMT>-1.00
</STMTTRN>
</OFX>
";
        let stmt = parse(data).unwrap();
        assert!(stmt.transactions.is_empty());
    }
}

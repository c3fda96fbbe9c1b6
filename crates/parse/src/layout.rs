use std::collections::HashSet;

use tracing::{debug, warn};

use extrait_core::text::find_chars;

use crate::util::split_columns;

/// The first header row always prints as five tokens on one line.
const FIRST_HEADER_ROW: [&str; 5] = ["DATE", "DATE", "DATE", "DEBIT", "CREDIT"];

/// The second header row is spread over one or two further physical lines,
/// each carrying a strict subset of these tokens.
const SECOND_HEADER_TOKENS: [&str; 6] = [
    "COMPTA",
    "LIBELLE/REFERENCE",
    "OPERATION",
    "VALEUR",
    "EUROS",
    "EUROS",
];

/// Character-column offsets of the statement's logical fields, learned from
/// the header rows. Every positional decision downstream is relative to
/// these.
#[derive(Debug, Clone, Copy, Default)]
pub struct ColumnLayout {
    pub accounting_date_pos: Option<usize>,
    pub description_pos: Option<usize>,
    pub operation_date_pos: Option<usize>,
    pub value_date_pos: Option<usize>,
    pub debit_pos: Option<usize>,
    pub credit_pos: Option<usize>,
    /// Left edge of the band in which a trailing reference counts as a
    /// check number: `operation_date_pos - margin`.
    pub check_no_pos: Option<usize>,
}

/// The fully-populated layout required before any transaction line may be
/// accepted.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedColumns {
    pub accounting_date_pos: usize,
    pub description_pos: usize,
    pub operation_date_pos: usize,
    pub value_date_pos: usize,
    pub debit_pos: usize,
    pub credit_pos: usize,
    pub check_no_pos: usize,
}

impl ColumnLayout {
    /// Returns the name of the first missing field on failure.
    pub fn resolve(&self) -> Result<ResolvedColumns, &'static str> {
        Ok(ResolvedColumns {
            accounting_date_pos: self.accounting_date_pos.ok_or("accounting date")?,
            description_pos: self.description_pos.ok_or("description")?,
            operation_date_pos: self.operation_date_pos.ok_or("operation date")?,
            value_date_pos: self.value_date_pos.ok_or("value date")?,
            debit_pos: self.debit_pos.ok_or("debit")?,
            credit_pos: self.credit_pos.ok_or("credit")?,
            check_no_pos: self.check_no_pos.ok_or("check number")?,
        })
    }
}

/// Consumes header lines and accumulates column offsets. Missing or
/// misplaced tokens are logged and skipped; the layout simply stays
/// unresolved, which hard-stops the scan at the first transaction line.
#[derive(Debug)]
pub struct LayoutTracker {
    pub layout: ColumnLayout,
    pending: Vec<&'static str>,
    check_no_margin: usize,
}

impl LayoutTracker {
    pub fn new(check_no_margin: usize) -> Self {
        Self {
            layout: ColumnLayout::default(),
            pending: Vec::new(),
            check_no_margin,
        }
    }

    /// True while second-header tokens are still outstanding; every line is
    /// treated as a header candidate until the set is satisfied.
    pub fn armed(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Returns true when `line` is the first header row. Offsets are taken
    /// from the unstripped line, since columns are absolute.
    pub fn observe_first_header(&mut self, line: &str, stripped: &str) -> bool {
        if split_columns(stripped) != FIRST_HEADER_ROW {
            return false;
        }
        self.layout.debit_pos = find_chars(line, "DEBIT");
        self.layout.credit_pos = find_chars(line, "CREDIT");
        self.pending = SECOND_HEADER_TOKENS.to_vec();
        debug!(
            debit_pos = ?self.layout.debit_pos,
            credit_pos = ?self.layout.credit_pos,
            "first header row"
        );
        true
    }

    /// Consume one physical line of the split second header row. The line's
    /// tokens must form a strict subset of the expected set; anything else
    /// is swallowed without recording offsets.
    pub fn observe_second_header(&mut self, line: &str, stripped: &str) {
        let expected: HashSet<&str> = SECOND_HEADER_TOKENS.iter().copied().collect();
        let row: Vec<&str> = stripped.split_whitespace().collect();
        let row_set: HashSet<&str> = row.iter().copied().collect();

        if row.is_empty()
            || !row_set.is_subset(&expected)
            || row_set.len() >= expected.len()
        {
            debug!(line = stripped, "skipping non-header line while header is incomplete");
            return;
        }

        for token in row {
            match token {
                "COMPTA" => self.layout.accounting_date_pos = find_chars(line, token),
                "LIBELLE/REFERENCE" => self.layout.description_pos = find_chars(line, token),
                "OPERATION" => {
                    self.layout.operation_date_pos = find_chars(line, token);
                    self.layout.check_no_pos = self.layout.operation_date_pos.map(|pos| {
                        if pos < self.check_no_margin {
                            warn!(
                                pos,
                                margin = self.check_no_margin,
                                "operation date column left of the check-number margin"
                            );
                        }
                        pos.saturating_sub(self.check_no_margin)
                    });
                }
                "VALEUR" => self.layout.value_date_pos = find_chars(line, token),
                "EUROS" => {}
                _ => unreachable!("token outside the expected header set"),
            }
            if let Some(idx) = self.pending.iter().position(|p| *p == token) {
                self.pending.remove(idx);
            }
        }
        debug!(pending = ?self.pending, layout = ?self.layout, "second header row");
    }
}

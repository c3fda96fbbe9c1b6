use thiserror::Error;
use tracing::{debug, warn};

use extrait_core::statement::{Statement, TransactionRecord};

use crate::cache::{CacheError, ReconcileCache, TxData, TxKey};
use crate::ident;

/// Payee emitted by the text layout for SEPA transfers. It carries no
/// discriminating detail, so a successful match replaces the descriptive
/// fields wholesale instead of merging.
pub const SEPA_PLACEHOLDER: &str = "VIREMENT SEPA";

/// A fuzzy candidate must match at least this many field bits (half of
/// the four compared fields), one of which has to be the check number or
/// the counterparty name — date and amount alone already hold for the
/// whole bucket.
const SCORE_THRESHOLD: u32 = 2;

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Enriches text-derived records with authoritative identifiers and
/// canonical text, then assigns content-hash ids to whatever stayed
/// unmatched.
#[derive(Debug)]
pub struct Reconciler {
    cache: ReconcileCache,
    /// One-shot latch: the first unmatched record logs a warning, the
    /// rest only a debug line.
    missing_match_logged: bool,
}

impl Reconciler {
    pub fn new(cache: ReconcileCache) -> Self {
        Self {
            cache,
            missing_match_logged: false,
        }
    }

    /// A reconciler with no authoritative data: every record falls back
    /// to its content-hash identifier.
    pub fn empty() -> Self {
        Self::new(ReconcileCache::new())
    }

    /// Load authoritative exports from comma-separated glob patterns
    /// resolved against `cwd`.
    pub fn load(patterns: &str, cwd: &std::path::Path) -> Result<Self, ReconcileError> {
        Ok(Self::new(ReconcileCache::load(patterns, cwd)?))
    }

    /// Run the full enrichment pass over a parsed statement: match every
    /// record against the cache, then fill the remaining identifiers from
    /// the per-account content-hash scheme.
    pub fn apply(&mut self, statement: &mut Statement) {
        let Some(account_id) = statement.account_id.clone() else {
            debug!("statement has no account id, skipping reconciliation");
            return;
        };

        if !self.cache.is_empty() {
            for record in &mut statement.records {
                self.enrich(&account_id, record);
            }
        }

        let used = self.cache.unique_ids_mut(&account_id);
        for record in &mut statement.records {
            if record.id.is_none() {
                ident::assign_content_id(record, used);
            }
        }
    }

    /// Match one record against the cache and overwrite or fill its
    /// fields. Misses and abandoned ties leave the record untouched.
    pub fn enrich(&mut self, account_id: &str, record: &mut TransactionRecord) {
        match self.find(account_id, record) {
            Some(data) => apply_match(record, &data),
            None => {
                if !self.missing_match_logged {
                    self.missing_match_logged = true;
                    warn!(
                        account_id,
                        date = %record.accounting_date,
                        amount = %record.amount,
                        cache_entries = self.cache.len(),
                        "no authoritative match; keeping statement-derived fields \
                         (further misses logged at debug level)"
                    );
                } else {
                    debug!(
                        date = %record.accounting_date,
                        amount = %record.amount,
                        "no authoritative match"
                    );
                }
            }
        }
    }

    /// Try the three candidate dates against the refined key variants,
    /// most specific first; fall back to a ranked fuzzy match within the
    /// base bucket. An irresolvable tie abandons the match.
    fn find(&self, account_id: &str, record: &TransactionRecord) -> Option<TxData> {
        let dates = [
            record.accounting_date,
            record.operation_date,
            record.value_date,
        ];
        let check = record.check_no.clone();
        let name = (!record.payee.is_empty()).then(|| record.payee.clone());

        let mut variants: Vec<(Option<String>, Option<String>)> = Vec::new();
        if check.is_some() && name.is_some() {
            variants.push((check.clone(), name.clone()));
        }
        if check.is_some() {
            variants.push((check.clone(), None));
        }
        if name.is_some() {
            variants.push((None, name.clone()));
        }
        // The base (account, date, amount) bucket comes last.
        variants.push((None, None));

        for (check_no, name) in variants {
            for date in dates {
                let key = TxKey {
                    account_id: account_id.to_string(),
                    date,
                    amount: record.amount,
                    check_no: check_no.clone(),
                    name: name.clone(),
                };
                let candidates = self.cache.candidates(&key);
                match candidates.len() {
                    0 => continue,
                    1 => {
                        debug!(key = ?key, "unique cache hit");
                        return Some(candidates[0].clone());
                    }
                    _ => match ranked(record, &candidates) {
                        Ranked::Unique(data) => return Some(data.clone()),
                        Ranked::Tie => {
                            warn!(
                                date = %date,
                                amount = %record.amount,
                                "ambiguous match between equally-ranked candidates, \
                                 keeping statement-derived fields"
                            );
                            return None;
                        }
                        Ranked::None => continue,
                    },
                }
            }
        }
        None
    }
}

enum Ranked<'a> {
    /// No candidate cleared the threshold.
    None,
    Unique(&'a TxData),
    /// Multiple top candidates too similar to tell apart.
    Tie,
}

/// Rank a bucket's candidates by the number of matching field bits and
/// keep the best one. Top candidates that are themselves similar above
/// the threshold are an irresolvable tie.
fn ranked<'a>(record: &TransactionRecord, candidates: &[&'a TxData]) -> Ranked<'a> {
    let mut best: Vec<&'a TxData> = Vec::new();
    let mut best_bits = 0;
    for &candidate in candidates {
        let score = match_score(record, candidate);
        if !score.keyed || score.bits < SCORE_THRESHOLD {
            continue;
        }
        if score.bits > best_bits {
            best_bits = score.bits;
            best = vec![candidate];
        } else if score.bits == best_bits {
            best.push(candidate);
        }
    }

    match best.len() {
        0 => Ranked::None,
        1 => Ranked::Unique(best[0]),
        _ => {
            let indistinct = best.iter().enumerate().any(|(i, a)| {
                best[i + 1..]
                    .iter()
                    .any(|b| entry_similarity(a, b) >= SCORE_THRESHOLD)
            });
            if indistinct {
                Ranked::Tie
            } else {
                Ranked::Unique(best[0])
            }
        }
    }
}

struct Score {
    bits: u32,
    /// Whether the check number or the counterparty name contributed.
    keyed: bool,
}

/// Field-match bits between a text-derived record and a cache entry:
/// check number (exact), counterparty name vs payee (partial), memo
/// (partial), and a whitespace-free authoritative id.
fn match_score(record: &TransactionRecord, candidate: &TxData) -> Score {
    let mut bits = 0;
    let mut keyed = false;

    if let (Some(a), Some(b)) = (&record.check_no, &candidate.check_no) {
        if a == b {
            bits += 1;
            keyed = true;
        }
    }
    if let Some(name) = &candidate.name {
        if contains_ci(&record.payee, name) {
            bits += 1;
            keyed = true;
        }
    }
    if let Some(memo) = &candidate.memo {
        if contains_ci(&record.memo, memo) {
            bits += 1;
        }
    }
    if is_clean_id(&candidate.fit_id) {
        bits += 1;
    }

    Score { bits, keyed }
}

/// Symmetric similarity between two cache entries, used to decide whether
/// equally-ranked candidates are really distinguishable.
fn entry_similarity(a: &TxData, b: &TxData) -> u32 {
    let mut bits = 0;
    if let (Some(x), Some(y)) = (&a.check_no, &b.check_no) {
        if x == y {
            bits += 1;
        }
    }
    if let (Some(x), Some(y)) = (&a.name, &b.name) {
        if contains_ci(x, y) {
            bits += 1;
        }
    }
    if let (Some(x), Some(y)) = (&a.memo, &b.memo) {
        if contains_ci(x, y) {
            bits += 1;
        }
    }
    if is_clean_id(&a.fit_id) && is_clean_id(&b.fit_id) {
        bits += 1;
    }
    bits
}

/// Case-insensitive partial match: one side contains the other.
fn contains_ci(a: &str, b: &str) -> bool {
    if a.is_empty() || b.is_empty() {
        return false;
    }
    let (a, b) = (a.to_uppercase(), b.to_uppercase());
    a.contains(&b) || b.contains(&a)
}

fn is_clean_id(id: &str) -> bool {
    !id.is_empty() && !id.contains(char::is_whitespace)
}

/// Overwrite the record's date and id from the authoritative entry. A
/// SEPA placeholder also takes the authoritative descriptive fields
/// wholesale; anything else merges non-destructively.
fn apply_match(record: &mut TransactionRecord, data: &TxData) {
    debug!(
        fit_id = %data.fit_id,
        date = %data.date,
        "matched authoritative transaction"
    );
    record.date = data.date;
    record.id = Some(data.fit_id.clone());

    if record.payee == SEPA_PLACEHOLDER {
        if let Some(name) = &data.name {
            record.payee = name.clone();
        }
        if let Some(memo) = &data.memo {
            record.memo = memo.clone();
        }
        if data.check_no.is_some() {
            record.check_no = data.check_no.clone();
        }
    } else {
        if record.payee.is_empty() {
            if let Some(name) = &data.name {
                record.payee = name.clone();
            }
        }
        if record.memo.is_empty() {
            if let Some(memo) = &data.memo {
                record.memo = memo.clone();
            }
        }
        if record.check_no.is_none() {
            record.check_no = data.check_no.clone();
        }
    }
}

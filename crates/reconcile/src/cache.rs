use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::debug;

use crate::ofx;

/// Composite lookup key into the authoritative cache. `check_no` and
/// `name` are optional refinements; the bare (account, date, amount)
/// tuple is the base bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TxKey {
    pub account_id: String,
    pub date: NaiveDate,
    pub amount: Decimal,
    pub check_no: Option<String>,
    pub name: Option<String>,
}

/// Canonical data for one authoritative transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct TxData {
    pub account_id: String,
    pub date: NaiveDate,
    pub amount: Decimal,
    pub fit_id: String,
    pub check_no: Option<String>,
    pub name: Option<String>,
    pub memo: Option<String>,
    pub source: PathBuf,
}

impl TxData {
    /// Every key this entry is findable under, most specific first. The
    /// base key is always present; partial keys let a lookup that only
    /// knows a check number or only a counterparty name still hit.
    fn key_variants(&self) -> Vec<TxKey> {
        let mut keys = Vec::new();
        let mut push = |check_no: Option<String>, name: Option<String>| {
            let key = TxKey {
                account_id: self.account_id.clone(),
                date: self.date,
                amount: self.amount,
                check_no,
                name,
            };
            if !keys.contains(&key) {
                keys.push(key);
            }
        };
        if self.check_no.is_some() && self.name.is_some() {
            push(self.check_no.clone(), self.name.clone());
        }
        if self.check_no.is_some() {
            push(self.check_no.clone(), None);
        }
        if self.name.is_some() {
            push(None, self.name.clone());
        }
        push(None, None);
        keys
    }
}

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("invalid glob pattern {pattern:?}: {source}")]
    BadPattern {
        pattern: String,
        source: glob::PatternError,
    },
    #[error("pattern {pattern:?} matched no files")]
    EmptyGlob { pattern: String },
    #[error("unreadable path while expanding {pattern:?}: {source}")]
    Walk {
        pattern: String,
        source: glob::GlobError,
    },
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{path}: {source}")]
    Ofx {
        path: PathBuf,
        source: ofx::OfxError,
    },
    #[error(
        "conflicting authoritative entries for {account_id} {date} {amount}: \
         {existing} vs {incoming}"
    )]
    ConflictingEntries {
        account_id: String,
        date: NaiveDate,
        amount: Decimal,
        existing: String,
        incoming: String,
    },
}

/// Preloaded authoritative transactions, indexed by every key variant.
///
/// Also owns the per-account identifier sets: every authoritative id is
/// registered so that content-hash ids assigned later cannot collide with
/// them.
#[derive(Debug, Default)]
pub struct ReconcileCache {
    entries: Vec<TxData>,
    index: HashMap<TxKey, Vec<usize>>,
    unique_ids: HashMap<String, HashSet<String>>,
}

impl ReconcileCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Expand `patterns` (comma-separated shell globs, relative ones
    /// resolved against `cwd`) and load every matched OFX export. A
    /// pattern matching nothing is a configuration error.
    pub fn load(patterns: &str, cwd: &Path) -> Result<Self, CacheError> {
        let mut cache = Self::new();
        for pattern in patterns.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let resolved = if Path::new(pattern).is_absolute() {
                PathBuf::from(pattern)
            } else {
                cwd.join(pattern)
            };
            let walker = glob::glob(&resolved.to_string_lossy()).map_err(|source| {
                CacheError::BadPattern {
                    pattern: pattern.to_string(),
                    source,
                }
            })?;

            let mut matched = false;
            for entry in walker {
                let path = entry.map_err(|source| CacheError::Walk {
                    pattern: pattern.to_string(),
                    source,
                })?;
                matched = true;
                cache.load_file(&path)?;
            }
            if !matched {
                return Err(CacheError::EmptyGlob {
                    pattern: pattern.to_string(),
                });
            }
        }
        Ok(cache)
    }

    fn load_file(&mut self, path: &Path) -> Result<(), CacheError> {
        debug!(path = %path.display(), "loading authoritative export");
        let data = std::fs::read_to_string(path).map_err(|source| CacheError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let stmt = ofx::parse(&data).map_err(|source| CacheError::Ofx {
            path: path.to_path_buf(),
            source,
        })?;
        for trx in stmt.transactions {
            self.insert(TxData {
                account_id: stmt.account_id.clone(),
                date: trx.date,
                amount: trx.amount,
                fit_id: trx.fit_id,
                check_no: trx.check_number,
                name: trx.name,
                memo: trx.memo,
                source: path.to_path_buf(),
            })?;
        }
        Ok(())
    }

    /// Add one authoritative entry.
    ///
    /// Two entries with the same refined identity (check number,
    /// counterparty, memo all equal) are the same transaction seen in two
    /// exports and merge, preferring the id without embedded whitespace.
    /// Same check number and counterparty but different memo is
    /// conflicting data and a hard error — unless the entry carries
    /// neither refinement, in which case it legitimately coexists in the
    /// base bucket (two card payments, same day, same amount).
    pub fn insert(&mut self, data: TxData) -> Result<(), CacheError> {
        self.unique_ids
            .entry(data.account_id.clone())
            .or_default()
            .insert(data.fit_id.clone());

        let base = TxKey {
            account_id: data.account_id.clone(),
            date: data.date,
            amount: data.amount,
            check_no: None,
            name: None,
        };
        if let Some(bucket) = self.index.get(&base) {
            for &idx in bucket {
                let existing = &self.entries[idx];
                if existing.check_no != data.check_no || existing.name != data.name {
                    continue;
                }
                if existing.memo == data.memo {
                    merge_ids(&mut self.entries[idx], &data);
                    return Ok(());
                }
                if data.check_no.is_some() || data.name.is_some() {
                    return Err(CacheError::ConflictingEntries {
                        account_id: data.account_id.clone(),
                        date: data.date,
                        amount: data.amount,
                        existing: existing.fit_id.clone(),
                        incoming: data.fit_id.clone(),
                    });
                }
                // Unrefined entries with different memos coexist.
            }
        }

        let idx = self.entries.len();
        let keys = data.key_variants();
        self.entries.push(data);
        for key in keys {
            self.index.entry(key).or_default().push(idx);
        }
        Ok(())
    }

    /// All entries findable under `key`, in insertion order.
    pub fn candidates(&self, key: &TxKey) -> Vec<&TxData> {
        self.index
            .get(key)
            .map(|bucket| bucket.iter().map(|&idx| &self.entries[idx]).collect())
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Per-account set of assigned identifiers, seeded with every
    /// authoritative id for the account.
    pub fn unique_ids_mut(&mut self, account_id: &str) -> &mut HashSet<String> {
        self.unique_ids.entry(account_id.to_string()).or_default()
    }
}

/// Deterministic merge of two ids for the same transaction: an id with
/// embedded whitespace is a display form, the whitespace-free one wins.
/// Otherwise the first-seen id is kept.
fn merge_ids(existing: &mut TxData, incoming: &TxData) {
    let existing_clean = !existing.fit_id.contains(char::is_whitespace);
    let incoming_clean = !incoming.fit_id.contains(char::is_whitespace);
    if !existing_clean && incoming_clean {
        debug!(
            old = %existing.fit_id,
            new = %incoming.fit_id,
            "merged duplicate entry, taking whitespace-free id"
        );
        existing.fit_id = incoming.fit_id.clone();
        existing.source = incoming.source.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn entry(fit_id: &str, check_no: Option<&str>, name: Option<&str>, memo: Option<&str>) -> TxData {
        TxData {
            account_id: "99999999999".to_string(),
            date: date(2019, 6, 20),
            amount: dec("-43.70"),
            fit_id: fit_id.to_string(),
            check_no: check_no.map(str::to_string),
            name: name.map(str::to_string),
            memo: memo.map(str::to_string),
            source: PathBuf::from("june.ofx"),
        }
    }

    fn key(check_no: Option<&str>, name: Option<&str>) -> TxKey {
        TxKey {
            account_id: "99999999999".to_string(),
            date: date(2019, 6, 20),
            amount: dec("-43.70"),
            check_no: check_no.map(str::to_string),
            name: name.map(str::to_string),
        }
    }

    #[test]
    fn entry_is_findable_under_all_key_variants() {
        let mut cache = ReconcileCache::new();
        cache
            .insert(entry("ID1", Some("0010929"), Some("AUTOROUTES"), None))
            .unwrap();

        for k in [
            key(Some("0010929"), Some("AUTOROUTES")),
            key(Some("0010929"), None),
            key(None, Some("AUTOROUTES")),
            key(None, None),
        ] {
            assert_eq!(cache.candidates(&k).len(), 1, "missing under {k:?}");
        }
        assert!(cache.candidates(&key(Some("OTHER"), None)).is_empty());
    }

    #[test]
    fn same_day_same_amount_entries_share_the_base_bucket() {
        let mut cache = ReconcileCache::new();
        cache
            .insert(entry("ID1", None, Some("CARD MERCHANT A"), Some("CB A")))
            .unwrap();
        cache
            .insert(entry("ID2", None, Some("CARD MERCHANT B"), Some("CB B")))
            .unwrap();
        assert_eq!(cache.candidates(&key(None, None)).len(), 2);
        assert_eq!(cache.candidates(&key(None, Some("CARD MERCHANT A"))).len(), 1);
    }

    #[test]
    fn duplicate_entry_with_identical_data_merges() {
        let mut cache = ReconcileCache::new();
        cache
            .insert(entry("ID1", Some("0010929"), None, Some("PEAGE")))
            .unwrap();
        cache
            .insert(entry("ID1", Some("0010929"), None, Some("PEAGE")))
            .unwrap();
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn merge_prefers_the_whitespace_free_id() {
        let mut cache = ReconcileCache::new();
        cache
            .insert(entry("2019 06 20 01", Some("0010929"), None, Some("PEAGE")))
            .unwrap();
        cache
            .insert(entry("201906200001", Some("0010929"), None, Some("PEAGE")))
            .unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.candidates(&key(None, None))[0].fit_id, "201906200001");
    }

    #[test]
    fn clean_id_is_kept_over_a_later_whitespace_id() {
        let mut cache = ReconcileCache::new();
        cache
            .insert(entry("201906200001", Some("0010929"), None, Some("PEAGE")))
            .unwrap();
        cache
            .insert(entry("2019 06 20 01", Some("0010929"), None, Some("PEAGE")))
            .unwrap();
        assert_eq!(cache.candidates(&key(None, None))[0].fit_id, "201906200001");
    }

    #[test]
    fn conflicting_memo_under_a_refined_key_is_a_hard_error() {
        let mut cache = ReconcileCache::new();
        cache
            .insert(entry("ID1", Some("0010929"), None, Some("PEAGE JUIN")))
            .unwrap();
        let err = cache
            .insert(entry("ID2", Some("0010929"), None, Some("AUTRE CHOSE")))
            .unwrap_err();
        assert!(matches!(err, CacheError::ConflictingEntries { .. }));
    }

    #[test]
    fn authoritative_ids_seed_the_per_account_set() {
        let mut cache = ReconcileCache::new();
        cache.insert(entry("ID1", None, None, None)).unwrap();
        assert!(cache.unique_ids_mut("99999999999").contains("ID1"));
        assert!(!cache.unique_ids_mut("11111111111").contains("ID1"));
    }

    // ── glob loading ──────────────────────────────────────────────────────────

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir()
            .join("extrait-cache-tests")
            .join(format!("{}-{}", name, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    const MINIMAL_OFX: &str = "\
<OFX>
<ACCTID>99999999999
<STMTTRN>
<DTPOSTED>20190620
<TRNAMT>-43.70
<FITID>201906200001
<CHECKNUM>YYYYYYY
</STMTTRN>
</OFX>
";

    #[test]
    fn load_expands_relative_globs_against_cwd() {
        let dir = scratch_dir("relative");
        std::fs::write(dir.join("june.ofx"), MINIMAL_OFX).unwrap();
        let cache = ReconcileCache::load("*.ofx", &dir).unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.candidates(&key(Some("YYYYYYY"), None)).len(), 1);
    }

    #[test]
    fn load_accepts_comma_separated_patterns() {
        let dir = scratch_dir("multi");
        std::fs::write(dir.join("a.ofx"), MINIMAL_OFX).unwrap();
        let other = MINIMAL_OFX.replace("20190620", "20190621");
        std::fs::write(dir.join("b.qfx"), other).unwrap();
        let cache = ReconcileCache::load("*.ofx, *.qfx", &dir).unwrap();
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn load_fails_fast_on_a_pattern_matching_nothing() {
        let dir = scratch_dir("empty");
        let err = ReconcileCache::load("nothing-*.ofx", &dir).unwrap_err();
        assert!(matches!(err, CacheError::EmptyGlob { .. }));
    }
}

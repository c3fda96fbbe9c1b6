use regex::Regex;
use std::sync::OnceLock;

fn re_column_sep() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| Regex::new(r"\s\s+|\t").expect("invalid regex"))
}

/// Split a stripped line into its positional columns. Runs of two or more
/// whitespace characters (or a tab) separate fields; single spaces stay
/// inside a field, so "PRLV SEPA AUTOROUTES DU" remains one column.
pub(crate) fn split_columns(s: &str) -> Vec<&str> {
    re_column_sep().split(s).collect()
}

use chrono::{Datelike, NaiveDate};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DateError {
    #[error("not a day/month fragment: {0:?}")]
    InvalidFragment(String),
    #[error("not a dd/mm/yyyy date: {0:?}")]
    InvalidFull(String),
}

/// Complete a `dd/mm` fragment into a full date using the reference date's
/// year. A fragment landing after the reference belongs to the previous
/// year: a statement closed in early January still lists December entries.
pub fn complete_day_month(fragment: &str, reference: NaiveDate) -> Result<NaiveDate, DateError> {
    let (day, month) = split_fragment(fragment)?;

    let candidate = from_ymd_adjusted(reference.year(), month, day)
        .ok_or_else(|| DateError::InvalidFragment(fragment.to_string()))?;
    if candidate <= reference {
        return Ok(candidate);
    }
    from_ymd_adjusted(reference.year() - 1, month, day)
        .ok_or_else(|| DateError::InvalidFragment(fragment.to_string()))
}

/// Parse a full `dd/mm/yyyy` date as printed on balance lines.
pub fn parse_full_date(text: &str) -> Result<NaiveDate, DateError> {
    NaiveDate::parse_from_str(text, "%d/%m/%Y")
        .map_err(|_| DateError::InvalidFull(text.to_string()))
}

fn split_fragment(fragment: &str) -> Result<(u32, u32), DateError> {
    let invalid = || DateError::InvalidFragment(fragment.to_string());
    let (day, month) = fragment.split_once('/').ok_or_else(invalid)?;
    if day.len() != 2 || month.len() != 2 {
        return Err(invalid());
    }
    let day: u32 = day.parse().map_err(|_| invalid())?;
    let month: u32 = month.parse().map_err(|_| invalid())?;
    Ok((day, month))
}

/// `NaiveDate::from_ymd_opt` with the leap-day rule applied: Feb 29 moved
/// into a non-leap year lands on Mar 1 instead of disappearing.
fn from_ymd_adjusted(year: i32, month: u32, day: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, day).or_else(|| {
        if month == 2 && day == 29 {
            NaiveDate::from_ymd_opt(year, 3, 1)
        } else {
            None
        }
    })
}

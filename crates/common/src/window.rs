//! Date window resolution.
//!
//! A run covers a window of clip creation dates. The window feeds the
//! output file name (`<identity>_<start>_to_<end>_compilation.<ext>`).
//! Inputs accept `MM/DD/YYYY`, `MM-DD-YYYY`, `YYYY-MM-DD` or full RFC 3339.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{StitchError, StitchResult};

const SIMPLE_DATE_FORMATS: [&str; 3] = ["%m/%d/%Y", "%m-%d-%Y", "%Y-%m-%d"];

/// Days covered when neither end of the window is given.
pub const DEFAULT_LOOKBACK_DAYS: i64 = 3;

/// A resolved creation-date window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl DateWindow {
    /// A window with no bounds.
    pub const UNBOUNDED: Self = Self {
        start: None,
        end: None,
    };

    /// Resolve user input into a concrete window.
    ///
    /// Start becomes 00:00:00 of its date and end 23:59:59 of its date.
    /// With only a start, the window ends now. With neither, the window is
    /// the last [`DEFAULT_LOOKBACK_DAYS`] days up to now.
    pub fn resolve(
        start: Option<&str>,
        end: Option<&str>,
        now: DateTime<Utc>,
    ) -> StitchResult<Self> {
        let start = start.map(str::trim).filter(|s| !s.is_empty());
        let end = end.map(str::trim).filter(|s| !s.is_empty());

        if start.is_none() && end.is_none() {
            let start_date = now.date_naive() - Duration::days(DEFAULT_LOOKBACK_DAYS);
            return Ok(Self {
                start: Some(at_time(start_date, NaiveTime::MIN)),
                end: Some(now),
            });
        }

        let start = start.map(|s| parse_bound(s, false)).transpose()?;
        let end = match end {
            Some(e) => Some(parse_bound(e, true)?),
            None if start.is_some() => Some(now),
            None => None,
        };

        if let (Some(s), Some(e)) = (start, end) {
            if s > e {
                return Err(StitchError::configuration(format!(
                    "date window start {s} is after end {e}"
                )));
            }
        }

        Ok(Self { start, end })
    }

    /// Name fragment for output files: `YYYY-MM-DD_to_YYYY-MM-DD`, or just
    /// `today` when the window is unbounded.
    pub fn label(&self, today: DateTime<Utc>) -> String {
        let day = |d: DateTime<Utc>| d.format("%Y-%m-%d").to_string();
        match (self.start, self.end) {
            (None, None) => day(today),
            (Some(s), None) => format!("{}_to_{}", day(s), day(s)),
            (None, Some(e)) => format!("unknown_to_{}", day(e)),
            (Some(s), Some(e)) => format!("{}_to_{}", day(s), day(e)),
        }
    }
}

fn at_time(date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(time))
}

fn parse_bound(input: &str, end_of_day: bool) -> StitchResult<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Ok(dt.with_timezone(&Utc));
    }
    let date = SIMPLE_DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(input, fmt).ok())
        .ok_or_else(|| {
            StitchError::configuration(format!("Invalid date format: {input}. Use MM/DD/YYYY."))
        })?;
    let time = if end_of_day {
        NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN)
    } else {
        NaiveTime::MIN
    };
    Ok(at_time(date, time))
}

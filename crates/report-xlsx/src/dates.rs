//! Calendar values to Excel serial numbers.
//!
//! - 1900 system: serial 1 is 1900-01-01 and the phantom 1900-02-29 (serial 60) is
//!   kept for Lotus compatibility, so dates from 1900-03-01 onwards count from
//!   1899-12-30.
//! - 1904 system: serial 0 is 1904-01-01.

use chrono::{NaiveDate, NaiveDateTime, Timelike};

use crate::sheet_metadata::DateSystem;

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Serial day number of `date`, or `None` when it precedes the workbook epoch.
pub fn date_to_serial(date: NaiveDate, system: DateSystem) -> Option<f64> {
    let days = match system {
        DateSystem::Excel1900 => {
            let leap_bug_cutoff = NaiveDate::from_ymd_opt(1900, 3, 1)?;
            let days = if date >= leap_bug_cutoff {
                (date - NaiveDate::from_ymd_opt(1899, 12, 30)?).num_days()
            } else {
                (date - NaiveDate::from_ymd_opt(1899, 12, 31)?).num_days()
            };
            if days < 1 {
                return None;
            }
            days
        }
        DateSystem::Excel1904 => {
            let days = (date - NaiveDate::from_ymd_opt(1904, 1, 1)?).num_days();
            if days < 0 {
                return None;
            }
            days
        }
    };
    Some(days as f64)
}

/// Serial number of `dt`: whole days plus the time of day as a fraction.
pub fn datetime_to_serial(dt: NaiveDateTime, system: DateSystem) -> Option<f64> {
    let days = date_to_serial(dt.date(), system)?;
    let time = dt.time();
    let seconds = f64::from(time.num_seconds_from_midnight())
        + f64::from(time.nanosecond()) / 1_000_000_000.0;
    Some(days + seconds / SECONDS_PER_DAY)
}

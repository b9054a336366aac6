//! Calendar granularities for time partitioning.
//!
//! A schema maps an instant (ms since the Unix epoch, UTC) to a bucket
//! with a directory-style name, and parses such a name back into the
//! bucket's `[start, end)` bounds. The round trip is exact: parsing the
//! directory of any instant's bucket yields the same bounds the instant
//! produced.

use chrono::{DateTime, Datelike, NaiveDate, Utc};

use crate::error::{CairnError, Result};

const MS_PER_DAY: i64 = 86_400_000;

/// One time bucket: its directory name and `[start, end)` bounds in ms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimePartitionInfo {
    /// Directory-style bucket name.
    pub dir: String,
    /// Inclusive start of the bucket, ms since the epoch.
    pub start: i64,
    /// Exclusive end of the bucket, ms since the epoch.
    pub end: i64,
}

/// Directory-naming granularity for time partitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimePartitionSchema {
    /// One bucket per calendar year, named `YYYY`.
    Yyyy,
    /// One bucket per calendar month, named `YYYY/MM`.
    YyyyMm,
    /// One bucket per day, named `YYYY/DOY` with a 3-digit day-of-year.
    YyyyDoy,
}

impl TimePartitionSchema {
    /// The schema's configuration name.
    pub fn name(&self) -> &'static str {
        match self {
            TimePartitionSchema::Yyyy => "YYYY",
            TimePartitionSchema::YyyyMm => "YYYY/MM",
            TimePartitionSchema::YyyyDoy => "YYYY/DOY",
        }
    }

    /// Resolves a configuration name, case-insensitively.
    pub fn from_name(name: &str) -> Result<Self> {
        match name.to_ascii_uppercase().as_str() {
            "YYYY" => Ok(TimePartitionSchema::Yyyy),
            "YYYY/MM" => Ok(TimePartitionSchema::YyyyMm),
            "YYYY/DOY" => Ok(TimePartitionSchema::YyyyDoy),
            other => Err(CairnError::Schema(format!(
                "unknown time partition schema '{other}'"
            ))),
        }
    }

    /// The bucket containing `instant`.
    pub fn partition_for(&self, instant: i64) -> Result<TimePartitionInfo> {
        let dt = datetime(instant)?;
        let info = match self {
            TimePartitionSchema::Yyyy => {
                let year = dt.year();
                TimePartitionInfo {
                    dir: format!("{year:04}"),
                    start: year_start(year)?,
                    end: year_start(year + 1)?,
                }
            }
            TimePartitionSchema::YyyyMm => {
                let (year, month) = (dt.year(), dt.month());
                TimePartitionInfo {
                    dir: format!("{year:04}/{month:02}"),
                    start: month_start(year, month)?,
                    end: next_month_start(year, month)?,
                }
            }
            TimePartitionSchema::YyyyDoy => {
                let (year, doy) = (dt.year(), dt.ordinal());
                let start = day_start(year, doy)?;
                TimePartitionInfo {
                    dir: format!("{year:04}/{doy:03}"),
                    start,
                    end: start + MS_PER_DAY,
                }
            }
        };
        Ok(info)
    }

    /// Parses a directory name produced by [`partition_for`] back into its
    /// bucket. Returns `None` for names that do not belong to this schema
    /// (foreign directories are common next to partition trees).
    ///
    /// [`partition_for`]: TimePartitionSchema::partition_for
    pub fn parse_dir(&self, dir: &str) -> Option<TimePartitionInfo> {
        match self {
            TimePartitionSchema::Yyyy => {
                let year: i32 = dir.parse().ok()?;
                Some(TimePartitionInfo {
                    dir: format!("{year:04}"),
                    start: year_start(year).ok()?,
                    end: year_start(year + 1).ok()?,
                })
            }
            TimePartitionSchema::YyyyMm => {
                let (y, m) = dir.split_once('/')?;
                let year: i32 = y.parse().ok()?;
                let month: u32 = m.parse().ok()?;
                if !(1..=12).contains(&month) {
                    return None;
                }
                Some(TimePartitionInfo {
                    dir: format!("{year:04}/{month:02}"),
                    start: month_start(year, month).ok()?,
                    end: next_month_start(year, month).ok()?,
                })
            }
            TimePartitionSchema::YyyyDoy => {
                let (y, d) = dir.split_once('/')?;
                let year: i32 = y.parse().ok()?;
                let doy: u32 = d.parse().ok()?;
                // rejects day 366 of non-leap years
                NaiveDate::from_yo_opt(year, doy)?;
                let start = day_start(year, doy).ok()?;
                Some(TimePartitionInfo {
                    dir: format!("{year:04}/{doy:03}"),
                    start,
                    end: start + MS_PER_DAY,
                })
            }
        }
    }
}

fn datetime(instant: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(instant).ok_or_else(|| {
        CairnError::LimitExceeded(format!("instant {instant} outside representable time range"))
    })
}

fn out_of_range(what: impl std::fmt::Display) -> CairnError {
    CairnError::LimitExceeded(format!("{what} outside representable time range"))
}

fn year_start(year: i32) -> Result<i64> {
    NaiveDate::from_ymd_opt(year, 1, 1)
        .and_then(midnight_ms)
        .ok_or_else(|| out_of_range(format_args!("year {year}")))
}

fn month_start(year: i32, month: u32) -> Result<i64> {
    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(midnight_ms)
        .ok_or_else(|| out_of_range(format_args!("month {year}-{month}")))
}

fn next_month_start(year: i32, month: u32) -> Result<i64> {
    if month == 12 {
        month_start(year + 1, 1)
    } else {
        month_start(year, month + 1)
    }
}

fn day_start(year: i32, doy: u32) -> Result<i64> {
    NaiveDate::from_yo_opt(year, doy)
        .and_then(midnight_ms)
        .ok_or_else(|| out_of_range(format_args!("day {year}/{doy}")))
}

fn midnight_ms(day: NaiveDate) -> Option<i64> {
    Some(day.and_hms_opt(0, 0, 0)?.and_utc().timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2020-06-01T12:00:00Z
    const MID_2020: i64 = 1_590_926_400_000;

    #[test]
    fn test_yearly_bucket_bounds() {
        let p = TimePartitionSchema::Yyyy.partition_for(MID_2020).unwrap();
        assert_eq!(p.dir, "2020");
        assert_eq!(p.start, year_start(2020).unwrap());
        assert_eq!(p.end, year_start(2021).unwrap());
        assert!(p.start <= MID_2020 && MID_2020 < p.end);
    }

    #[test]
    fn test_monthly_bucket_december_rolls_year() {
        // 2020-12-15T00:00:00Z
        let instant = 1_607_990_400_000;
        let p = TimePartitionSchema::YyyyMm.partition_for(instant).unwrap();
        assert_eq!(p.dir, "2020/12");
        assert_eq!(p.end, year_start(2021).unwrap());
    }

    #[test]
    fn test_doy_bucket_leap_day() {
        // 2020-02-29T08:00:00Z, day 60 of a leap year
        let instant = 1_582_963_200_000;
        let p = TimePartitionSchema::YyyyDoy.partition_for(instant).unwrap();
        assert_eq!(p.dir, "2020/060");
        assert_eq!(p.end - p.start, MS_PER_DAY);
    }

    #[test]
    fn test_dir_roundtrip_all_schemas() {
        for schema in [
            TimePartitionSchema::Yyyy,
            TimePartitionSchema::YyyyMm,
            TimePartitionSchema::YyyyDoy,
        ] {
            let p = schema.partition_for(MID_2020).unwrap();
            let parsed = schema.parse_dir(&p.dir).unwrap();
            assert_eq!(parsed, p, "{}", schema.name());
        }
    }

    #[test]
    fn test_parse_rejects_foreign_dirs() {
        assert!(TimePartitionSchema::Yyyy.parse_dir("tmp").is_none());
        assert!(TimePartitionSchema::YyyyMm.parse_dir("2020/13").is_none());
        // day 366 only exists in leap years
        assert!(TimePartitionSchema::YyyyDoy.parse_dir("2019/366").is_none());
        assert!(TimePartitionSchema::YyyyDoy.parse_dir("2020/366").is_some());
    }

    #[test]
    fn test_pre_epoch_instants() {
        // 1961-04-12T06:07:00Z
        let instant = -275_248_380_000;
        let p = TimePartitionSchema::Yyyy.partition_for(instant).unwrap();
        assert_eq!(p.dir, "1961");
        assert!(p.start <= instant && instant < p.end);
    }

    #[test]
    fn test_from_name() {
        assert_eq!(
            TimePartitionSchema::from_name("yyyy/doy").unwrap(),
            TimePartitionSchema::YyyyDoy
        );
        assert!(TimePartitionSchema::from_name("weekly").is_err());
    }
}

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use serde::{Deserialize, Serialize, Serializer};

use crate::error::AnalysisError;

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y"];

// Spreadsheet serial dates count days from 1899-12-30; 2958465 is 9999-12-31.
const SERIAL_MIN: f64 = 1.0;
const SERIAL_MAX: f64 = 2_958_465.0;

/// Bucket resolution chosen for one analysis run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Day,
    Week,
    Month,
    Quarter,
    Year,
    Total,
}

impl Granularity {
    pub fn label(self) -> &'static str {
        match self {
            Granularity::Day => "day",
            Granularity::Week => "week",
            Granularity::Month => "month",
            Granularity::Quarter => "quarter",
            Granularity::Year => "year",
            Granularity::Total => "total",
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Granularity {
    type Err = AnalysisError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "day" | "jour" => Ok(Granularity::Day),
            "week" | "semaine" => Ok(Granularity::Week),
            "month" | "mois" => Ok(Granularity::Month),
            "quarter" | "trimestre" => Ok(Granularity::Quarter),
            "year" | "année" | "annee" => Ok(Granularity::Year),
            "total" => Ok(Granularity::Total),
            _ => Err(AnalysisError::UnknownGranularity(value.to_string())),
        }
    }
}

/// Calendar bucket a timestamp falls into. Ordering is chronological
/// within a single granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BucketKey {
    Day(NaiveDate),
    Week { year: i32, week: u32 },
    Month { year: i32, month: u32 },
    Quarter { year: i32, quarter: u32 },
    Year(i32),
    Total,
}

impl BucketKey {
    pub fn granularity(&self) -> Granularity {
        match self {
            BucketKey::Day(_) => Granularity::Day,
            BucketKey::Week { .. } => Granularity::Week,
            BucketKey::Month { .. } => Granularity::Month,
            BucketKey::Quarter { .. } => Granularity::Quarter,
            BucketKey::Year(_) => Granularity::Year,
            BucketKey::Total => Granularity::Total,
        }
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BucketKey::Day(date) => write!(f, "{}", date.format("%Y-%m-%d")),
            BucketKey::Week { year, week } => write!(f, "{year}-W{week:02}"),
            BucketKey::Month { year, month } => write!(f, "{year}-{month:02}"),
            BucketKey::Quarter { year, quarter } => write!(f, "{year}Q{quarter}"),
            BucketKey::Year(year) => write!(f, "{year}"),
            BucketKey::Total => f.write_str("Total"),
        }
    }
}

impl Serialize for BucketKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

pub fn bucket_for(timestamp: NaiveDateTime, granularity: Granularity) -> BucketKey {
    let date = timestamp.date();
    match granularity {
        Granularity::Day => BucketKey::Day(date),
        Granularity::Week => {
            let iso = date.iso_week();
            BucketKey::Week {
                year: iso.year(),
                week: iso.week(),
            }
        }
        Granularity::Month => BucketKey::Month {
            year: date.year(),
            month: date.month(),
        },
        Granularity::Quarter => BucketKey::Quarter {
            year: date.year(),
            quarter: (date.month() - 1) / 3 + 1,
        },
        Granularity::Year => BucketKey::Year(date.year()),
        Granularity::Total => BucketKey::Total,
    }
}

/// `None` means "no bucket": the record is left out of every
/// bucket-dependent view.
pub fn bucket_key(timestamp: Option<NaiveDateTime>, granularity: Granularity) -> Option<BucketKey> {
    timestamp.map(|value| bucket_for(value, granularity))
}

/// Number of buckets from `first` to `last` inclusive, counted without
/// walking the span. Zero when the keys belong to different granularities
/// or are out of order.
pub fn bucket_span_len(first: BucketKey, last: BucketKey) -> usize {
    if first.granularity() != last.granularity() || first > last {
        return 0;
    }

    let steps = match (first, last) {
        (BucketKey::Day(a), BucketKey::Day(b)) => (b - a).num_days(),
        (BucketKey::Week { year: ay, week: aw }, BucketKey::Week { year: by, week: bw }) => {
            match (
                NaiveDate::from_isoywd_opt(ay, aw, Weekday::Mon),
                NaiveDate::from_isoywd_opt(by, bw, Weekday::Mon),
            ) {
                (Some(a), Some(b)) => (b - a).num_days() / 7,
                _ => 0,
            }
        }
        (BucketKey::Month { year: ay, month: am }, BucketKey::Month { year: by, month: bm }) => {
            i64::from(by - ay) * 12 + i64::from(bm) - i64::from(am)
        }
        (
            BucketKey::Quarter {
                year: ay,
                quarter: aq,
            },
            BucketKey::Quarter {
                year: by,
                quarter: bq,
            },
        ) => i64::from(by - ay) * 4 + i64::from(bq) - i64::from(aq),
        (BucketKey::Year(a), BucketKey::Year(b)) => i64::from(b - a),
        _ => 0,
    };
    usize::try_from(steps).unwrap_or(0) + 1
}

pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let value = raw.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.naive_local());
    }

    for format in DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, format) {
            return Some(parsed);
        }
    }

    for format in DATE_FORMATS {
        if let Ok(parsed) = NaiveDate::parse_from_str(value, format) {
            return Some(parsed.and_time(NaiveTime::MIN));
        }
    }

    parse_serial(value)
}

fn parse_serial(value: &str) -> Option<NaiveDateTime> {
    let serial: f64 = value.replace(',', ".").parse().ok()?;
    if !serial.is_finite() || !(SERIAL_MIN..=SERIAL_MAX).contains(&serial) {
        return None;
    }

    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_time(NaiveTime::MIN);
    let days = serial.trunc() as i64;
    let seconds = ((serial - serial.trunc()) * 86_400.0).round() as i64;
    epoch
        .checked_add_signed(Duration::days(days))?
        .checked_add_signed(Duration::seconds(seconds))
}

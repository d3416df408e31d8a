use std::fmt;

use anyhow::anyhow;
use chrono::{
    DateTime, Days, Local, Months, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc,
};
use chrono_tz::Tz;

pub const ISO_DATE_FORMAT: &str = "%Y-%m-%d";

/// Source of "today". Every date computation in the crate takes the day as
/// an argument; only a `Clock` looks at the wall clock.
pub trait Clock {
    fn today(&self) -> NaiveDate;
}

impl<C: Clock + ?Sized> Clock for &C {
    fn today(&self) -> NaiveDate {
        (**self).today()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock {
    zone: Option<Tz>,
}

impl SystemClock {
    pub fn local() -> Self {
        Self { zone: None }
    }

    pub fn in_zone(zone: Tz) -> Self {
        Self { zone: Some(zone) }
    }

    pub fn zone(&self) -> Option<Tz> {
        self.zone
    }
}

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        let now = Utc::now();
        let midnight = match self.zone {
            Some(zone) => start_of_day(&now.with_timezone(&zone)),
            None => start_of_day(&now.with_timezone(&Local)),
        };
        midnight.date()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedClock(pub NaiveDate);

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        self.0
    }
}

#[must_use]
pub fn start_of_day<Z: TimeZone>(moment: &DateTime<Z>) -> NaiveDateTime {
    moment.date_naive().and_time(NaiveTime::MIN)
}

/// Day distance to a due date. `Never` sorts after every finite distance,
/// so a task without a usable date is never due or overdue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DaysUntil {
    Days(i64),
    Never,
}

impl DaysUntil {
    pub fn days(self) -> Option<i64> {
        match self {
            DaysUntil::Days(days) => Some(days),
            DaysUntil::Never => None,
        }
    }

    pub fn is_due(self) -> bool {
        matches!(self, DaysUntil::Days(days) if days <= 0)
    }
}

impl fmt::Display for DaysUntil {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DaysUntil::Days(days) => write!(f, "{days}"),
            DaysUntil::Never => f.write_str("∞"),
        }
    }
}

#[must_use]
pub fn days_until(date: Option<NaiveDate>, today: NaiveDate) -> DaysUntil {
    match date {
        Some(date) => DaysUntil::Days(date.signed_duration_since(today).num_days()),
        None => DaysUntil::Never,
    }
}

#[must_use]
pub fn days_until_str(raw: Option<&str>, today: NaiveDate) -> DaysUntil {
    days_until(raw.and_then(parse_iso_date), today)
}

/// Reads the `YYYY-MM-DD` prefix of a stored date. A trailing time
/// component (`T...` or ` ...`) is accepted and ignored.
#[must_use]
pub fn parse_iso_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let (date, rest) = NaiveDate::parse_and_remainder(trimmed, ISO_DATE_FORMAT).ok()?;
    if rest.is_empty() || rest.starts_with('T') || rest.starts_with(' ') {
        Some(date)
    } else {
        None
    }
}

#[must_use]
pub fn format_iso(date: NaiveDate) -> String {
    date.format(ISO_DATE_FORMAT).to_string()
}

#[must_use]
pub fn add_days(date: NaiveDate, days: i64) -> NaiveDate {
    let step = Days::new(days.unsigned_abs());
    if days >= 0 {
        date.checked_add_days(step).unwrap_or(NaiveDate::MAX)
    } else {
        date.checked_sub_days(step).unwrap_or(NaiveDate::MIN)
    }
}

/// Calendar-month addition clamped to the last day of the target month:
/// Jan 31 + 1 month is the last day of February, never a day in March.
#[must_use]
pub fn add_months(date: NaiveDate, months: u32) -> NaiveDate {
    date.checked_add_months(Months::new(months)).unwrap_or(NaiveDate::MAX)
}

pub fn add_days_iso(raw: &str, days: i64) -> anyhow::Result<String> {
    let date = parse_iso_date(raw).ok_or_else(|| anyhow!("invalid ISO date: {raw}"))?;
    Ok(format_iso(add_days(date, days)))
}

pub fn add_months_iso(raw: &str, months: u32) -> anyhow::Result<String> {
    let date = parse_iso_date(raw).ok_or_else(|| anyhow!("invalid ISO date: {raw}"))?;
    Ok(format_iso(add_months(date, months)))
}

pub fn parse_timezone(raw: &str, source: &str) -> Option<Tz> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        tracing::warn!(source, "timezone source was empty");
        return None;
    }

    match trimmed.parse::<Tz>() {
        Ok(tz) => {
            tracing::info!(source, timezone = %trimmed, "configured timezone");
            Some(tz)
        }
        Err(err) => {
            tracing::error!(
                source,
                timezone = %trimmed,
                error = %err,
                "failed to parse timezone id"
            );
            None
        }
    }
}

/// Serde adapters for dates stored as `YYYY-MM-DD` strings. Reading never
/// fails: blank, malformed or non-string values come back as `None`.
pub mod iso_date_serde {
    pub mod option {
        use chrono::NaiveDate;
        use serde::{Deserialize, Deserializer, Serializer};
        use serde_json::Value;

        use crate::dates::{format_iso, parse_iso_date};

        pub fn serialize<S>(date: &Option<NaiveDate>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match date {
                Some(value) => serializer.serialize_str(&format_iso(*value)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
        where
            D: Deserializer<'de>,
        {
            let raw = Option::<Value>::deserialize(deserializer)?;
            Ok(match raw {
                None | Some(Value::Null) => None,
                Some(Value::String(text)) => {
                    let parsed = parse_iso_date(&text);
                    if parsed.is_none() && !text.trim().is_empty() {
                        tracing::warn!(value = %text, "ignoring unparseable stored date");
                    }
                    parsed
                }
                Some(other) => {
                    tracing::warn!(value = %other, "ignoring non-string stored date");
                    None
                }
            })
        }
    }

    pub mod update {
        use chrono::NaiveDate;
        use serde::Serializer;

        pub fn serialize<S>(
            update: &Option<Option<NaiveDate>>,
            serializer: S,
        ) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            super::option::serialize(&update.flatten(), serializer)
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, TimeZone, Utc};

    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    #[test]
    fn missing_date_is_never_due() {
        let today = ymd(2025, 2, 1);
        assert_eq!(days_until(None, today), DaysUntil::Never);
        assert_eq!(days_until_str(None, today), DaysUntil::Never);
        assert!(!DaysUntil::Never.is_due());
        assert!(DaysUntil::Days(i64::MAX) < DaysUntil::Never);
    }

    #[test]
    fn time_of_day_is_ignored() {
        let today = ymd(2025, 2, 1);
        for raw in [
            "2025-02-01",
            "2025-02-01T00:00:00",
            "2025-02-01T23:59:59Z",
            "2025-02-01 18:30",
        ] {
            assert_eq!(days_until_str(Some(raw), today), DaysUntil::Days(0), "{raw}");
        }
    }

    #[test]
    fn malformed_dates_read_as_no_date() {
        let today = ymd(2025, 2, 1);
        for raw in ["", "   ", "soon", "2025-13-01", "2025-02-30", "2025-02-01x"] {
            assert_eq!(days_until_str(Some(raw), today), DaysUntil::Never, "{raw}");
        }
    }

    #[test]
    fn counts_signed_days() {
        let today = ymd(2025, 3, 1);
        assert_eq!(days_until(Some(ymd(2025, 2, 28)), today), DaysUntil::Days(-1));
        assert_eq!(days_until(Some(ymd(2025, 3, 4)), today), DaysUntil::Days(3));
        assert_eq!(days_until(Some(ymd(2026, 3, 1)), today), DaysUntil::Days(365));
    }

    #[test]
    fn month_addition_clamps_to_month_end() {
        assert_eq!(add_months_iso("2024-01-31", 1).expect("add"), "2024-02-29");
        assert_eq!(add_months_iso("2023-01-31", 1).expect("add"), "2023-02-28");
        assert_eq!(add_months_iso("2024-08-31", 6).expect("add"), "2025-02-28");
        assert_eq!(add_months_iso("2024-02-29", 12).expect("add"), "2025-02-28");
        assert_eq!(add_months_iso("2025-03-31", 1).expect("add"), "2025-04-30");
        assert_eq!(add_months_iso("2025-01-15", 1).expect("add"), "2025-02-15");
    }

    #[test]
    fn day_addition_crosses_month_and_year() {
        assert_eq!(add_days_iso("2025-01-28", 7).expect("add"), "2025-02-04");
        assert_eq!(add_days_iso("2024-12-29", 7).expect("add"), "2025-01-05");
        assert_eq!(add_days_iso("2025-03-01", -1).expect("add"), "2025-02-28");
        assert!(add_days_iso("not a date", 7).is_err());
    }

    #[test]
    fn start_of_day_uses_the_moment_zone() {
        let moment = Utc
            .with_ymd_and_hms(2025, 2, 1, 3, 30, 0)
            .single()
            .expect("valid moment");
        let zone: Tz = "America/Mexico_City".parse().expect("zone");
        let local = start_of_day(&moment.with_timezone(&zone));
        assert_eq!(local.date(), ymd(2025, 1, 31));
        assert_eq!(local.time(), NaiveTime::MIN);
    }

    #[test]
    fn fixed_clock_through_reference() {
        fn read<C: Clock>(clock: C) -> NaiveDate {
            clock.today()
        }

        let clock = FixedClock(ymd(2025, 2, 15));
        assert_eq!(read(&clock), ymd(2025, 2, 15));
    }
}

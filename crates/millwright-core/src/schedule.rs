use chrono::NaiveDate;

use crate::dates::{add_days, add_months, format_iso, parse_iso_date};
use crate::store::Record;
use crate::task::{Frequency, MaintenanceTask};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interval {
    Days(u32),
    Months(u32),
}

impl Interval {
    pub fn for_frequency(frequency: Option<Frequency>) -> Self {
        match frequency {
            Some(Frequency::Monthly) => Interval::Months(1),
            Some(Frequency::HalfYear) => Interval::Months(6),
            Some(Frequency::Yearly) => Interval::Months(12),
            Some(Frequency::Weekly) | None => Interval::Days(7),
        }
    }

    pub fn apply(self, base: NaiveDate) -> NaiveDate {
        match self {
            Interval::Days(days) => add_days(base, i64::from(days)),
            Interval::Months(months) => add_months(base, months),
        }
    }
}

pub fn compute_next_from(
    base: Option<NaiveDate>,
    category: Option<Frequency>,
    today: NaiveDate,
) -> NaiveDate {
    Interval::for_frequency(category).apply(base.unwrap_or(today))
}

/// String form of [`compute_next_from`]. Unrecognized categories recur
/// weekly; an unreadable base date anchors on `today`.
pub fn compute_next_from_str(base: Option<&str>, category: &str, today: NaiveDate) -> String {
    let anchor = base.and_then(|raw| {
        let parsed = parse_iso_date(raw);
        if parsed.is_none() && !raw.trim().is_empty() {
            tracing::warn!(base = raw, "unreadable anchor date; using today");
        }
        parsed
    });
    let frequency = category.parse::<Frequency>().ok();
    format_iso(compute_next_from(anchor, frequency, today))
}

/// The due date a completion is measured against: the stored next date,
/// or one interval after the last service (or today) when none is stored.
pub fn projected_next_due(task: &MaintenanceTask, today: NaiveDate) -> NaiveDate {
    task.next_service_date.unwrap_or_else(|| {
        compute_next_from(task.last_service_date, task.category, today)
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceAdvance {
    pub last_service_date: NaiveDate,
    pub next_service_date: NaiveDate,
}

impl ServiceAdvance {
    pub fn to_record(&self) -> Record {
        let mut record = Record::new();
        record.insert(
            "lastServiceDate".to_string(),
            format_iso(self.last_service_date).into(),
        );
        record.insert(
            "nextServiceDate".to_string(),
            format_iso(self.next_service_date).into(),
        );
        record
    }
}

pub fn advance_on_completion(task: &MaintenanceTask, today: NaiveDate) -> ServiceAdvance {
    ServiceAdvance {
        last_service_date: today,
        next_service_date: compute_next_from(Some(today), Some(task.frequency()), today),
    }
}

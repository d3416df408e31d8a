use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::dates::{DaysUntil, days_until};
use crate::task::MaintenanceTask;

pub const UPCOMING_WINDOW_DAYS: i64 = 3;

/// Due status of a task relative to a given day. Never stored: "today"
/// moves on its own, so callers compute it whenever they read a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ServiceStatus {
    #[serde(rename = "overdue")]
    Overdue,
    #[serde(rename = "ongoing")]
    DueToday,
    #[serde(rename = "upcoming")]
    Upcoming,
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "nodate")]
    NoDate,
}

impl ServiceStatus {
    pub const ALL: [ServiceStatus; 5] = [
        ServiceStatus::Overdue,
        ServiceStatus::DueToday,
        ServiceStatus::Upcoming,
        ServiceStatus::Pending,
        ServiceStatus::NoDate,
    ];

    pub fn key(self) -> &'static str {
        match self {
            ServiceStatus::Overdue => "overdue",
            ServiceStatus::DueToday => "ongoing",
            ServiceStatus::Upcoming => "upcoming",
            ServiceStatus::Pending => "pending",
            ServiceStatus::NoDate => "nodate",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ServiceStatus::Overdue => "Overdue",
            ServiceStatus::DueToday => "Due Today",
            ServiceStatus::Upcoming => "Upcoming",
            ServiceStatus::Pending => "Pending",
            ServiceStatus::NoDate => "—",
        }
    }

    pub fn from_days(days: DaysUntil) -> Self {
        match days {
            DaysUntil::Never => ServiceStatus::NoDate,
            DaysUntil::Days(d) if d < 0 => ServiceStatus::Overdue,
            DaysUntil::Days(0) => ServiceStatus::DueToday,
            DaysUntil::Days(d) if d <= UPCOMING_WINDOW_DAYS => ServiceStatus::Upcoming,
            DaysUntil::Days(_) => ServiceStatus::Pending,
        }
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for ServiceStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        ServiceStatus::ALL
            .into_iter()
            .find(|status| {
                status.key() == wanted || status.label().to_ascii_lowercase() == wanted
            })
            .ok_or_else(|| {
                anyhow!(
                    "unknown status '{s}' (expected overdue, ongoing, upcoming, pending or nodate)"
                )
            })
    }
}

pub fn status_for(next_service_date: Option<NaiveDate>, today: NaiveDate) -> ServiceStatus {
    ServiceStatus::from_days(days_until(next_service_date, today))
}

pub fn compute_status(task: &MaintenanceTask, today: NaiveDate) -> ServiceStatus {
    status_for(task.next_service_date, today)
}

use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::dates::iso_date_serde;
use crate::store::Record;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Frequency {
    Weekly,
    Monthly,
    #[serde(rename = "Half-Year")]
    HalfYear,
    Yearly,
}

impl Frequency {
    pub const ALL: [Frequency; 4] = [
        Frequency::Weekly,
        Frequency::Monthly,
        Frequency::HalfYear,
        Frequency::Yearly,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Frequency::Weekly => "Weekly",
            Frequency::Monthly => "Monthly",
            Frequency::HalfYear => "Half-Year",
            Frequency::Yearly => "Yearly",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActivityType {
    Preventive,
    Corrective,
    Predictive,
    Breakdown,
}

impl ActivityType {
    pub const ALL: [ActivityType; 4] = [
        ActivityType::Preventive,
        ActivityType::Corrective,
        ActivityType::Predictive,
        ActivityType::Breakdown,
    ];

    pub fn label(self) -> &'static str {
        match self {
            ActivityType::Preventive => "Preventive",
            ActivityType::Corrective => "Corrective",
            ActivityType::Predictive => "Predictive",
            ActivityType::Breakdown => "Breakdown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    pub const ALL: [Priority; 4] = [
        Priority::Low,
        Priority::Medium,
        Priority::High,
        Priority::Critical,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Priority::Low => "Low",
            Priority::Medium => "Medium",
            Priority::High => "High",
            Priority::Critical => "Critical",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Downtime {
    No,
    #[serde(rename = "Yes - Minor")]
    Minor,
    #[serde(rename = "Yes - Major")]
    Major,
}

impl Downtime {
    pub const ALL: [Downtime; 3] = [Downtime::No, Downtime::Minor, Downtime::Major];

    pub fn label(self) -> &'static str {
        match self {
            Downtime::No => "No",
            Downtime::Minor => "Yes - Minor",
            Downtime::Major => "Yes - Major",
        }
    }
}

fn parse_label<T: Copy>(
    raw: &str,
    all: &[T],
    label: fn(T) -> &'static str,
    kind: &str,
) -> anyhow::Result<T> {
    let wanted = normalize_label(raw);
    all.iter()
        .copied()
        .find(|candidate| normalize_label(label(*candidate)) == wanted)
        .ok_or_else(|| {
            let known = all.iter().map(|v| label(*v)).collect::<Vec<_>>().join(", ");
            anyhow!("unknown {kind} '{raw}' (expected one of: {known})")
        })
}

fn normalize_label(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

macro_rules! label_traits {
    ($ty:ident, $kind:literal) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.label())
            }
        }

        impl FromStr for $ty {
            type Err = anyhow::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                parse_label(s, &$ty::ALL, $ty::label, $kind)
            }
        }
    };
}

label_traits!(Frequency, "frequency");
label_traits!(ActivityType, "activity type");
label_traits!(Priority, "priority");
label_traits!(Downtime, "downtime option");

/// A recurring maintenance activity as stored under the schedule collection.
///
/// `id` is the store key and is never written into the record itself. Any
/// optional field may be absent or hold junk in the store; unreadable values
/// come back as `None` rather than failing the whole record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceTask {
    #[serde(skip)]
    pub id: String,

    #[serde(default, deserialize_with = "lenient::string")]
    pub task_name: String,

    #[serde(
        default,
        deserialize_with = "lenient::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub category: Option<Frequency>,

    #[serde(
        default,
        deserialize_with = "lenient::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub activity_type: Option<ActivityType>,

    #[serde(
        default,
        deserialize_with = "lenient::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub priority: Option<Priority>,

    #[serde(
        default,
        deserialize_with = "lenient::text",
        skip_serializing_if = "Option::is_none"
    )]
    pub machine: Option<String>,

    #[serde(
        default,
        deserialize_with = "lenient::text",
        skip_serializing_if = "Option::is_none"
    )]
    pub location: Option<String>,

    #[serde(
        default,
        deserialize_with = "lenient::text",
        skip_serializing_if = "Option::is_none"
    )]
    pub estimated_man_hours: Option<String>,

    #[serde(
        default,
        deserialize_with = "lenient::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub downtime_required: Option<Downtime>,

    #[serde(
        default,
        deserialize_with = "lenient::text",
        skip_serializing_if = "Option::is_none"
    )]
    pub maintenance_checklist: Option<String>,

    #[serde(
        default,
        deserialize_with = "lenient::text",
        skip_serializing_if = "Option::is_none"
    )]
    pub description: Option<String>,

    #[serde(
        default,
        deserialize_with = "lenient::text",
        skip_serializing_if = "Option::is_none"
    )]
    pub risk_if_not_done: Option<String>,

    #[serde(
        default,
        with = "iso_date_serde::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_service_date: Option<NaiveDate>,

    #[serde(
        default,
        with = "iso_date_serde::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub next_service_date: Option<NaiveDate>,

    #[serde(
        default,
        with = "iso_date_serde::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<NaiveDate>,
}

impl MaintenanceTask {
    pub fn from_record(id: &str, record: &Record) -> anyhow::Result<Self> {
        let mut task: MaintenanceTask =
            serde_json::from_value(serde_json::Value::Object(record.clone()))?;
        task.id = id.to_string();
        // older records carry `name` instead of `taskName`
        if task.task_name.trim().is_empty()
            && let Some(serde_json::Value::String(name)) = record.get("name")
        {
            task.task_name = name.clone();
        }
        Ok(task)
    }

    pub fn to_record(&self) -> anyhow::Result<Record> {
        into_record(self)
    }

    /// Recurrence used for scheduling and grouping; tasks without a
    /// readable category behave as weekly.
    pub fn frequency(&self) -> Frequency {
        self.category.unwrap_or(Frequency::Weekly)
    }

    pub fn display_name(&self) -> &str {
        if self.task_name.trim().is_empty() {
            "Maintenance Task"
        } else {
            &self.task_name
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewTask {
    pub task_name: String,
    pub category: Option<Frequency>,
    pub activity_type: Option<ActivityType>,
    pub priority: Option<Priority>,
    pub machine: Option<String>,
    pub location: Option<String>,
    pub estimated_man_hours: Option<String>,
    pub downtime_required: Option<Downtime>,
    pub maintenance_checklist: Option<String>,
    pub description: Option<String>,
    pub risk_if_not_done: Option<String>,
    pub last_service_date: Option<NaiveDate>,
    pub next_service_date: Option<NaiveDate>,
    pub created_at: Option<NaiveDate>,
}

impl NewTask {
    pub fn new(task_name: impl Into<String>, category: Frequency) -> Self {
        Self {
            task_name: task_name.into(),
            category: Some(category),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskField {
    ActivityType,
    Priority,
    Machine,
    Location,
    EstimatedManHours,
    DowntimeRequired,
    MaintenanceChecklist,
    Description,
    RiskIfNotDone,
    LastServiceDate,
    NextServiceDate,
}

impl TaskField {
    pub const ALL: [TaskField; 11] = [
        TaskField::ActivityType,
        TaskField::Priority,
        TaskField::Machine,
        TaskField::Location,
        TaskField::EstimatedManHours,
        TaskField::DowntimeRequired,
        TaskField::MaintenanceChecklist,
        TaskField::Description,
        TaskField::RiskIfNotDone,
        TaskField::LastServiceDate,
        TaskField::NextServiceDate,
    ];

    pub fn label(self) -> &'static str {
        match self {
            TaskField::ActivityType => "activity",
            TaskField::Priority => "priority",
            TaskField::Machine => "machine",
            TaskField::Location => "location",
            TaskField::EstimatedManHours => "hours",
            TaskField::DowntimeRequired => "downtime",
            TaskField::MaintenanceChecklist => "checklist",
            TaskField::Description => "description",
            TaskField::RiskIfNotDone => "risk",
            TaskField::LastServiceDate => "last",
            TaskField::NextServiceDate => "next",
        }
    }
}

label_traits!(TaskField, "field");

/// Partial update merged into an existing record. `None` leaves a field
/// alone, `Some(None)` writes `null` so the field reads back as absent.
/// Nothing is recomputed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<Frequency>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activity_type: Option<Option<ActivityType>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<Option<Priority>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub machine: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_man_hours: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub downtime_required: Option<Option<Downtime>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maintenance_checklist: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_if_not_done: Option<Option<String>>,
    #[serde(
        serialize_with = "iso_date_serde::update::serialize",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_service_date: Option<Option<NaiveDate>>,
    #[serde(
        serialize_with = "iso_date_serde::update::serialize",
        skip_serializing_if = "Option::is_none"
    )]
    pub next_service_date: Option<Option<NaiveDate>>,
}

impl TaskPatch {
    pub fn to_record(&self) -> anyhow::Result<Record> {
        into_record(self)
    }

    pub fn is_empty(&self) -> bool {
        *self == TaskPatch::default()
    }

    pub fn clear(&mut self, field: TaskField) {
        match field {
            TaskField::ActivityType => self.activity_type = Some(None),
            TaskField::Priority => self.priority = Some(None),
            TaskField::Machine => self.machine = Some(None),
            TaskField::Location => self.location = Some(None),
            TaskField::EstimatedManHours => self.estimated_man_hours = Some(None),
            TaskField::DowntimeRequired => self.downtime_required = Some(None),
            TaskField::MaintenanceChecklist => self.maintenance_checklist = Some(None),
            TaskField::Description => self.description = Some(None),
            TaskField::RiskIfNotDone => self.risk_if_not_done = Some(None),
            TaskField::LastServiceDate => self.last_service_date = Some(None),
            TaskField::NextServiceDate => self.next_service_date = Some(None),
        }
    }
}

fn into_record<T: Serialize>(value: &T) -> anyhow::Result<Record> {
    match serde_json::to_value(value)? {
        serde_json::Value::Object(map) => Ok(map),
        other => Err(anyhow!("expected a JSON object, got {other}")),
    }
}

mod lenient {
    use serde::de::DeserializeOwned;
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    pub fn option<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: DeserializeOwned,
    {
        let raw = Option::<Value>::deserialize(deserializer)?;
        Ok(raw.and_then(|value| {
            if is_blank(&value) {
                return None;
            }
            match serde_json::from_value::<T>(value.clone()) {
                Ok(parsed) => Some(parsed),
                Err(_) => {
                    tracing::warn!(value = %value, "ignoring unrecognized stored value");
                    None
                }
            }
        }))
    }

    pub fn text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<Value>::deserialize(deserializer)?;
        Ok(match raw {
            Some(Value::String(text)) if !text.trim().is_empty() => Some(text),
            Some(Value::Number(number)) => Some(number.to_string()),
            Some(Value::Bool(flag)) => Some(flag.to_string()),
            _ => None,
        })
    }

    pub fn string<'de, D>(deserializer: D) -> Result<String, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(text(deserializer)?.unwrap_or_default())
    }

    fn is_blank(value: &Value) -> bool {
        match value {
            Value::Null => true,
            Value::String(text) => text.trim().is_empty(),
            _ => false,
        }
    }
}

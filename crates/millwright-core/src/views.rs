use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::status::{ServiceStatus, compute_status};
use crate::task::{Frequency, MaintenanceTask, Priority};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskQuery {
    pub text: Option<String>,
    pub status: Option<ServiceStatus>,
    pub frequency: Option<Frequency>,
    pub machine: Option<String>,
}

impl TaskQuery {
    pub fn matches(&self, task: &MaintenanceTask, today: NaiveDate) -> bool {
        if let Some(frequency) = self.frequency
            && task.frequency() != frequency
        {
            return false;
        }
        if let Some(machine) = &self.machine
            && task.machine.as_deref() != Some(machine.as_str())
        {
            return false;
        }
        if let Some(status) = self.status
            && compute_status(task, today) != status
        {
            return false;
        }
        match self.text.as_deref().map(str::trim) {
            Some(text) if !text.is_empty() => text_matches(task, &text.to_lowercase()),
            _ => true,
        }
    }
}

fn text_matches(task: &MaintenanceTask, needle: &str) -> bool {
    [
        Some(task.task_name.as_str()),
        task.description.as_deref(),
        task.machine.as_deref(),
        task.location.as_deref(),
    ]
    .into_iter()
    .flatten()
    .any(|field| field.to_lowercase().contains(needle))
}

pub fn filter_tasks<'a>(
    tasks: &'a [MaintenanceTask],
    query: &TaskQuery,
    today: NaiveDate,
) -> Vec<&'a MaintenanceTask> {
    tasks.iter().filter(|task| query.matches(task, today)).collect()
}

pub fn group_by_frequency<'a, I>(tasks: I) -> Vec<(Frequency, Vec<&'a MaintenanceTask>)>
where
    I: IntoIterator<Item = &'a MaintenanceTask>,
{
    let mut groups: BTreeMap<Frequency, Vec<&'a MaintenanceTask>> = BTreeMap::new();
    for task in tasks {
        groups.entry(task.frequency()).or_default().push(task);
    }
    groups.into_iter().collect()
}

pub fn frequency_counts(tasks: &[MaintenanceTask]) -> [(Frequency, usize); 4] {
    Frequency::ALL.map(|frequency| {
        let count = tasks
            .iter()
            .filter(|task| task.frequency() == frequency)
            .count();
        (frequency, count)
    })
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub total: usize,
    pub due_today: usize,
    pub upcoming: usize,
    pub overdue: usize,
    pub pending: usize,
    pub no_date: usize,
}

impl StatusCounts {
    pub fn tally(tasks: &[MaintenanceTask], today: NaiveDate) -> Self {
        let mut counts = Self::default();
        for task in tasks {
            counts.total += 1;
            match compute_status(task, today) {
                ServiceStatus::Overdue => counts.overdue += 1,
                ServiceStatus::DueToday => counts.due_today += 1,
                ServiceStatus::Upcoming => counts.upcoming += 1,
                ServiceStatus::Pending => counts.pending += 1,
                ServiceStatus::NoDate => counts.no_date += 1,
            }
        }
        counts
    }

    pub fn get(&self, status: ServiceStatus) -> usize {
        match status {
            ServiceStatus::Overdue => self.overdue,
            ServiceStatus::DueToday => self.due_today,
            ServiceStatus::Upcoming => self.upcoming,
            ServiceStatus::Pending => self.pending,
            ServiceStatus::NoDate => self.no_date,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EventTone {
    Overdue,
    DueToday,
    Critical,
    High,
    Medium,
    Low,
}

impl EventTone {
    pub fn for_task(task: &MaintenanceTask, today: NaiveDate) -> Self {
        match compute_status(task, today) {
            ServiceStatus::Overdue => EventTone::Overdue,
            ServiceStatus::DueToday => EventTone::DueToday,
            _ => match task.priority {
                Some(Priority::Critical) => EventTone::Critical,
                Some(Priority::High) => EventTone::High,
                Some(Priority::Medium) => EventTone::Medium,
                _ => EventTone::Low,
            },
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            EventTone::Overdue => "overdue",
            EventTone::DueToday => "due today",
            EventTone::Critical => "critical",
            EventTone::High => "high",
            EventTone::Medium => "medium",
            EventTone::Low => "low",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarEvent {
    pub id: String,
    pub title: String,
    pub date: NaiveDate,
    pub tone: EventTone,
}

pub fn calendar_events<'a, I>(tasks: I, today: NaiveDate) -> Vec<CalendarEvent>
where
    I: IntoIterator<Item = &'a MaintenanceTask>,
{
    let mut events: Vec<CalendarEvent> = tasks
        .into_iter()
        .filter_map(|task| {
            Some(CalendarEvent {
                id: task.id.clone(),
                title: task.display_name().to_string(),
                date: task.next_service_date?,
                tone: EventTone::for_task(task, today),
            })
        })
        .collect();
    events.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.title.cmp(&b.title)));
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dates::add_days;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 10).expect("valid date")
    }

    fn task(id: &str, category: Option<Frequency>, due_in: Option<i64>) -> MaintenanceTask {
        MaintenanceTask {
            id: id.to_string(),
            task_name: format!("Task {id}"),
            category,
            next_service_date: due_in.map(|days| add_days(today(), days)),
            ..MaintenanceTask::default()
        }
    }

    fn sample() -> Vec<MaintenanceTask> {
        let mut hydraulics = task("a", Some(Frequency::Monthly), Some(-2));
        hydraulics.description = Some("Check HYDRAULIC hoses".to_string());
        hydraulics.machine = Some("press-1".to_string());

        let mut belts = task("b", Some(Frequency::Weekly), Some(0));
        belts.location = Some("Packing line".to_string());
        belts.priority = Some(Priority::Critical);

        let mut filters = task("c", Some(Frequency::Yearly), Some(2));
        filters.priority = Some(Priority::High);
        filters.machine = Some("press-1".to_string());

        let uncategorized = task("d", None, None);
        let mut audit = task("e", Some(Frequency::HalfYear), Some(40));
        audit.priority = Some(Priority::Medium);

        vec![hydraulics, belts, filters, uncategorized, audit]
    }

    fn ids(tasks: &[&MaintenanceTask]) -> Vec<String> {
        tasks.iter().map(|task| task.id.clone()).collect()
    }

    #[test]
    fn query_combines_filters() {
        let tasks = sample();
        let by_text = TaskQuery {
            text: Some("hydraulic".to_string()),
            ..TaskQuery::default()
        };
        assert_eq!(ids(&filter_tasks(&tasks, &by_text, today())), ["a"]);

        let by_location = TaskQuery {
            text: Some("packing".to_string()),
            ..TaskQuery::default()
        };
        assert_eq!(ids(&filter_tasks(&tasks, &by_location, today())), ["b"]);

        let press_overdue = TaskQuery {
            machine: Some("press-1".to_string()),
            status: Some(ServiceStatus::Overdue),
            ..TaskQuery::default()
        };
        assert_eq!(ids(&filter_tasks(&tasks, &press_overdue, today())), ["a"]);

        let weekly = TaskQuery {
            frequency: Some(Frequency::Weekly),
            ..TaskQuery::default()
        };
        assert_eq!(ids(&filter_tasks(&tasks, &weekly, today())), ["b", "d"]);

        let blank = TaskQuery {
            text: Some("  ".to_string()),
            ..TaskQuery::default()
        };
        assert_eq!(filter_tasks(&tasks, &blank, today()).len(), tasks.len());
    }

    #[test]
    fn groups_in_frequency_order() {
        let tasks = sample();
        let groups = group_by_frequency(&tasks);
        let order: Vec<_> = groups
            .iter()
            .map(|(frequency, members)| (*frequency, ids(members)))
            .collect();
        assert_eq!(
            order,
            vec![
                (Frequency::Weekly, vec!["b".to_string(), "d".to_string()]),
                (Frequency::Monthly, vec!["a".to_string()]),
                (Frequency::HalfYear, vec!["e".to_string()]),
                (Frequency::Yearly, vec!["c".to_string()]),
            ]
        );
        assert_eq!(
            frequency_counts(&tasks),
            [
                (Frequency::Weekly, 2),
                (Frequency::Monthly, 1),
                (Frequency::HalfYear, 1),
                (Frequency::Yearly, 1),
            ]
        );
    }

    #[test]
    fn tallies_every_status() {
        let counts = StatusCounts::tally(&sample(), today());
        assert_eq!(
            counts,
            StatusCounts {
                total: 5,
                due_today: 1,
                upcoming: 1,
                overdue: 1,
                pending: 1,
                no_date: 1,
            }
        );
        let summed: usize = ServiceStatus::ALL.iter().map(|s| counts.get(*s)).sum();
        assert_eq!(summed, counts.total);
    }

    #[test]
    fn calendar_tones_follow_status_then_priority() {
        let events = calendar_events(&sample(), today());
        let summary: Vec<_> = events
            .iter()
            .map(|event| (event.id.as_str(), event.tone))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("a", EventTone::Overdue),
                ("b", EventTone::DueToday),
                ("c", EventTone::High),
                ("e", EventTone::Medium),
            ]
        );
        assert_eq!(events[0].date, add_days(today(), -2));

        let plain = task("f", Some(Frequency::Weekly), Some(5));
        assert_eq!(EventTone::for_task(&plain, today()), EventTone::Low);
    }
}

use std::io::{self, IsTerminal, Write};

use anyhow::anyhow;
use chrono::NaiveDate;
use unicode_width::UnicodeWidthStr;

use crate::config::Config;
use crate::dates::{days_until, format_iso};
use crate::machines::MachineCatalog;
use crate::status::{ServiceStatus, compute_status};
use crate::task::{Frequency, MaintenanceTask};
use crate::views::{CalendarEvent, EventTone, StatusCounts};

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let color_cfg = cfg.get("color").unwrap_or_else(|| "on".to_string());
        let color = match color_cfg.to_ascii_lowercase().as_str() {
            "on" | "yes" | "true" | "1" => true,
            "off" | "no" | "false" | "0" => false,
            other => return Err(anyhow!("invalid color setting: {other}")),
        };

        Ok(Self {
            color: color && io::stdout().is_terminal(),
        })
    }

    pub fn plain() -> Self {
        Self { color: false }
    }

    #[tracing::instrument(skip_all)]
    pub fn print_task_groups<W: Write>(
        &self,
        out: &mut W,
        groups: &[(Frequency, Vec<&MaintenanceTask>)],
        machines: &MachineCatalog,
        today: NaiveDate,
    ) -> anyhow::Result<()> {
        if groups.is_empty() {
            writeln!(out, "No maintenance tasks.")?;
            return Ok(());
        }

        for (idx, (frequency, tasks)) in groups.iter().enumerate() {
            if idx > 0 {
                writeln!(out)?;
            }
            writeln!(out, "{} ({})", self.paint(frequency.label(), "1"), tasks.len())?;

            let headers = ["ID", "Task", "Status", "Last", "Next", "Machine", "Priority"]
                .map(String::from)
                .to_vec();
            let rows = tasks
                .iter()
                .map(|task| {
                    vec![
                        self.paint(&task.id, "33"),
                        task.display_name().to_string(),
                        self.status_cell(compute_status(task, today)),
                        date_cell(task.last_service_date),
                        date_cell(task.next_service_date),
                        task.machine
                            .as_deref()
                            .map(|reference| machines.label_for(reference).to_string())
                            .unwrap_or_default(),
                        task.priority.map(|p| p.label().to_string()).unwrap_or_default(),
                    ]
                })
                .collect();
            write_table(&mut *out, headers, rows)?;
        }

        Ok(())
    }

    #[tracing::instrument(skip_all, fields(task_id = %task.id))]
    pub fn print_task_info<W: Write>(
        &self,
        out: &mut W,
        task: &MaintenanceTask,
        machines: &MachineCatalog,
        today: NaiveDate,
    ) -> anyhow::Result<()> {
        let status = compute_status(task, today);
        let label = |value: Option<&str>| value.unwrap_or_default().to_string();

        writeln!(out, "id          {}", task.id)?;
        writeln!(out, "task        {}", task.display_name())?;
        writeln!(out, "status      {}", self.status_cell(status))?;
        writeln!(
            out,
            "days left   {}",
            days_until(task.next_service_date, today)
        )?;
        writeln!(out, "frequency   {}", task.frequency().label())?;
        writeln!(out, "activity    {}", label(task.activity_type.map(|a| a.label())))?;
        writeln!(out, "priority    {}", label(task.priority.map(|p| p.label())))?;
        writeln!(
            out,
            "machine     {}",
            label(task.machine.as_deref().map(|m| machines.label_for(m)))
        )?;
        writeln!(out, "location    {}", label(task.location.as_deref()))?;
        writeln!(out, "man-hours   {}", label(task.estimated_man_hours.as_deref()))?;
        writeln!(out, "downtime    {}", label(task.downtime_required.map(|d| d.label())))?;
        writeln!(out, "last        {}", date_cell(task.last_service_date))?;
        writeln!(out, "next        {}", date_cell(task.next_service_date))?;
        writeln!(out, "created     {}", date_cell(task.created_at))?;

        if let Some(checklist) = &task.maintenance_checklist {
            writeln!(out, "checklist   {checklist}")?;
        }
        if let Some(description) = &task.description {
            writeln!(out, "description {description}")?;
        }
        if let Some(risk) = &task.risk_if_not_done {
            writeln!(out, "risk        {risk}")?;
        }

        Ok(())
    }

    pub fn print_stats<W: Write>(
        &self,
        out: &mut W,
        counts: &StatusCounts,
        per_frequency: &[(Frequency, usize)],
    ) -> anyhow::Result<()> {
        let mut rows = vec![vec!["Total".to_string(), counts.total.to_string()]];
        for status in [
            ServiceStatus::DueToday,
            ServiceStatus::Upcoming,
            ServiceStatus::Overdue,
            ServiceStatus::Pending,
            ServiceStatus::NoDate,
        ] {
            let name = match status {
                ServiceStatus::NoDate => "No date",
                other => other.label(),
            };
            rows.push(vec![self.status_paint(name, status), counts.get(status).to_string()]);
        }
        write_table(&mut *out, vec!["Status".into(), "Tasks".into()], rows)?;
        writeln!(out)?;

        let rows = per_frequency
            .iter()
            .map(|(frequency, count)| vec![frequency.label().to_string(), count.to_string()])
            .collect();
        write_table(&mut *out, vec!["Frequency".into(), "Tasks".into()], rows)?;
        Ok(())
    }

    pub fn print_calendar<W: Write>(
        &self,
        out: &mut W,
        events: &[CalendarEvent],
    ) -> anyhow::Result<()> {
        if events.is_empty() {
            writeln!(out, "No scheduled maintenance.")?;
            return Ok(());
        }

        let headers = vec!["Date".into(), "ID".into(), "Task".into(), "Tone".into()];
        let rows = events
            .iter()
            .map(|event| {
                vec![
                    format_iso(event.date),
                    self.paint(&event.id, "33"),
                    event.title.clone(),
                    self.paint(event.tone.label(), tone_color(event.tone)),
                ]
            })
            .collect();
        write_table(out, headers, rows)
    }

    fn status_cell(&self, status: ServiceStatus) -> String {
        self.status_paint(status.label(), status)
    }

    fn status_paint(&self, text: &str, status: ServiceStatus) -> String {
        match status {
            ServiceStatus::Overdue => self.paint(text, "31"),
            ServiceStatus::DueToday => self.paint(text, "33"),
            ServiceStatus::Upcoming => self.paint(text, "36"),
            ServiceStatus::Pending | ServiceStatus::NoDate => text.to_string(),
        }
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn tone_color(tone: EventTone) -> &'static str {
    match tone {
        EventTone::Overdue | EventTone::Critical => "31",
        EventTone::DueToday => "33",
        EventTone::High => "35",
        EventTone::Medium => "36",
        EventTone::Low => "32",
    }
}

fn date_cell(date: Option<NaiveDate>) -> String {
    date.map(format_iso).unwrap_or_else(|| "-".to_string())
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths: Vec<usize> = headers
        .iter()
        .map(|header| UnicodeWidthStr::width(header.as_str()))
        .collect();

    for row in &rows {
        for (idx, cell) in row.iter().enumerate().take(column_count) {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for (header, width) in headers.iter().zip(&widths) {
        write!(writer, "{header:width$} ")?;
    }
    writeln!(writer)?;

    for width in &widths {
        write!(writer, "{:-<width$} ", "")?;
    }
    writeln!(writer)?;

    for row in rows {
        for (cell, width) in row.iter().zip(&widths) {
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = width.saturating_sub(visible_width);
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}

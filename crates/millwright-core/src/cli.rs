use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::anyhow;
use chrono::NaiveDate;
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::dates::parse_iso_date;
use crate::status::ServiceStatus;
use crate::task::{ActivityType, Downtime, Frequency, NewTask, Priority, TaskField, TaskPatch};
use crate::views::TaskQuery;

#[derive(Debug, Clone)]
pub struct KeyVal {
    pub key: String,
    pub value: String,
}

impl std::str::FromStr for KeyVal {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (k, v) = s
            .split_once('=')
            .ok_or_else(|| anyhow!("expected KEY=VALUE, got: {s}"))?;
        Ok(Self {
            key: k.trim().to_string(),
            value: v.trim().to_string(),
        })
    }
}

fn iso_date(raw: &str) -> anyhow::Result<NaiveDate> {
    parse_iso_date(raw).ok_or_else(|| anyhow!("expected a YYYY-MM-DD date, got: {raw}"))
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "millwright",
    version,
    about = "Millwright: recurring maintenance scheduler",
    disable_help_subcommand = true
)]
pub struct GlobalCli {
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[arg(short = 'q', long = "quiet", action = ArgAction::Count, global = true)]
    pub quiet: u8,

    #[arg(
        long = "rc",
        value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<KeyVal>()),
        action = ArgAction::Append,
        global = true
    )]
    pub rc_overrides: Vec<KeyVal>,

    #[arg(long = "config", global = true)]
    pub config: Option<PathBuf>,

    #[arg(long = "data", global = true)]
    pub data: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Tasks grouped by frequency
    List(ListArgs),
    /// Every field of one task
    Info { id: String },
    /// Add a maintenance task
    Add(AddArgs),
    /// Change fields of a task; dates are not recomputed
    Edit {
        id: String,
        #[command(flatten)]
        fields: EditArgs,
    },
    /// Mark a task as serviced today
    Done {
        id: String,
        /// Skip the early-completion prompt
        #[arg(short = 'y', long = "yes")]
        yes: bool,
    },
    /// Move the next service date
    Reschedule {
        id: String,
        #[arg(value_parser = iso_date)]
        date: NaiveDate,
    },
    Delete { id: String },
    /// Status and frequency counts
    Stats,
    /// Upcoming service dates in order
    Calendar {
        #[arg(long)]
        machine: Option<String>,
        #[arg(long)]
        frequency: Option<Frequency>,
    },
}

#[derive(Args, Debug, Clone, Default)]
pub struct ListArgs {
    #[arg(long)]
    pub status: Option<ServiceStatus>,
    #[arg(long)]
    pub frequency: Option<Frequency>,
    #[arg(long)]
    pub search: Option<String>,
    #[arg(long)]
    pub machine: Option<String>,
}

impl ListArgs {
    pub fn query(&self) -> TaskQuery {
        TaskQuery {
            text: self.search.clone(),
            status: self.status,
            frequency: self.frequency,
            machine: self.machine.clone(),
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct AddArgs {
    #[arg(long)]
    pub name: String,
    #[arg(long)]
    pub category: Frequency,
    #[command(flatten)]
    pub details: TaskDetailArgs,
    #[arg(long, value_parser = iso_date)]
    pub created: Option<NaiveDate>,
}

#[derive(Args, Debug, Clone)]
pub struct EditArgs {
    #[arg(long)]
    pub name: Option<String>,
    #[arg(long)]
    pub category: Option<Frequency>,
    #[command(flatten)]
    pub details: TaskDetailArgs,
    /// Remove an optional field; repeatable
    #[arg(long = "clear", value_name = "FIELD")]
    pub clear: Vec<TaskField>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct TaskDetailArgs {
    #[arg(long)]
    pub activity: Option<ActivityType>,
    #[arg(long)]
    pub priority: Option<Priority>,
    #[arg(long)]
    pub machine: Option<String>,
    #[arg(long)]
    pub location: Option<String>,
    #[arg(long)]
    pub hours: Option<String>,
    #[arg(long)]
    pub downtime: Option<Downtime>,
    #[arg(long)]
    pub checklist: Option<String>,
    #[arg(long)]
    pub description: Option<String>,
    #[arg(long)]
    pub risk: Option<String>,
    #[arg(long, value_parser = iso_date)]
    pub last: Option<NaiveDate>,
    #[arg(long, value_parser = iso_date)]
    pub next: Option<NaiveDate>,
}

impl AddArgs {
    pub fn into_new_task(self) -> NewTask {
        let d = self.details;
        NewTask {
            task_name: self.name,
            category: Some(self.category),
            activity_type: d.activity,
            priority: d.priority,
            machine: d.machine,
            location: d.location,
            estimated_man_hours: d.hours,
            downtime_required: d.downtime,
            maintenance_checklist: d.checklist,
            description: d.description,
            risk_if_not_done: d.risk,
            last_service_date: d.last,
            next_service_date: d.next,
            created_at: self.created,
        }
    }
}

impl EditArgs {
    pub fn into_patch(self) -> TaskPatch {
        let d = self.details;
        let mut patch = TaskPatch {
            task_name: self.name,
            category: self.category,
            activity_type: d.activity.map(Some),
            priority: d.priority.map(Some),
            machine: d.machine.map(Some),
            location: d.location.map(Some),
            estimated_man_hours: d.hours.map(Some),
            downtime_required: d.downtime.map(Some),
            maintenance_checklist: d.checklist.map(Some),
            description: d.description.map(Some),
            risk_if_not_done: d.risk.map(Some),
            last_service_date: d.last.map(Some),
            next_service_date: d.next.map(Some),
        };
        for field in self.clear {
            patch.clear(field);
        }
        patch
    }
}

pub fn init_tracing(verbose: u8, quiet: u8) -> anyhow::Result<()> {
    let default_level = if quiet >= 2 {
        "error"
    } else if quiet == 1 {
        "warn"
    } else if verbose >= 3 {
        "trace"
    } else if verbose == 2 {
        "debug"
    } else if verbose == 1 {
        "info"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| anyhow!("invalid RUST_LOG / log filter: {e}"))?;

    let init_result = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .with_thread_ids(true)
        .with_ansi(std::io::stderr().is_terminal())
        .try_init();

    if let Err(err) = init_result {
        debug!(error = %err, "tracing subscriber already set, continuing");
    }

    Ok(())
}

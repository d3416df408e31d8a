use std::io::{self, BufRead, IsTerminal, Write};

use anyhow::anyhow;
use tracing::{debug, info, instrument, warn};

use crate::cli::{Command, ListArgs};
use crate::dates::{Clock, format_iso};
use crate::machines::MachineCatalog;
use crate::render::Renderer;
use crate::repository::{CompletionOutcome, TaskRepository};
use crate::schedule::ServiceAdvance;
use crate::store::RecordStore;
use crate::views::{
    StatusCounts, TaskQuery, calendar_events, filter_tasks, frequency_counts, group_by_frequency,
};

pub type Prompt<'a> = &'a mut dyn FnMut(&str) -> anyhow::Result<bool>;

#[instrument(skip_all)]
pub fn dispatch<S, C, W>(
    repo: &mut TaskRepository<S, C>,
    machines: &MachineCatalog,
    renderer: &Renderer,
    command: Option<Command>,
    out: &mut W,
    prompt: Prompt<'_>,
) -> anyhow::Result<()>
where
    S: RecordStore,
    C: Clock,
    W: Write,
{
    let command = command.unwrap_or_else(|| Command::List(ListArgs::default()));
    let today = repo.today();
    debug!(?command, %today, "dispatching command");

    match command {
        Command::List(args) => {
            let tasks = repo.tasks()?;
            let shown = filter_tasks(&tasks, &args.query(), today);
            info!(total = tasks.len(), shown = shown.len(), "listing tasks");
            renderer.print_task_groups(out, &group_by_frequency(shown), machines, today)?;
        }
        Command::Info { id } => {
            let task = repo.get(&id)?;
            renderer.print_task_info(out, &task, machines, today)?;
        }
        Command::Add(args) => {
            let id = repo.create(args.into_new_task())?;
            let task = repo.get(&id)?;
            writeln!(
                out,
                "Created task {id}. Next service {}.",
                task.next_service_date
                    .map(format_iso)
                    .unwrap_or_else(|| "-".to_string())
            )?;
        }
        Command::Edit { id, fields } => {
            let patch = fields.into_patch();
            if patch.is_empty() {
                writeln!(out, "Nothing to change.")?;
            } else {
                repo.update(&id, patch)?;
                writeln!(out, "Updated task {id}.")?;
            }
        }
        Command::Done { id, yes } => complete(repo, &id, yes, out, prompt)?,
        Command::Reschedule { id, date } => {
            repo.reschedule(&id, date)?;
            writeln!(out, "Task {id} next service moved to {}.", format_iso(date))?;
        }
        Command::Delete { id } => {
            repo.delete(&id)?;
            writeln!(out, "Deleted task {id}.")?;
        }
        Command::Stats => {
            let tasks = repo.tasks()?;
            renderer.print_stats(
                out,
                &StatusCounts::tally(&tasks, today),
                &frequency_counts(&tasks),
            )?;
        }
        Command::Calendar { machine, frequency } => {
            let tasks = repo.tasks()?;
            let query = TaskQuery {
                machine,
                frequency,
                ..TaskQuery::default()
            };
            let events = calendar_events(filter_tasks(&tasks, &query, today), today);
            renderer.print_calendar(out, &events)?;
        }
    }

    Ok(())
}

fn complete<S, C, W>(
    repo: &mut TaskRepository<S, C>,
    id: &str,
    assume_yes: bool,
    out: &mut W,
    prompt: Prompt<'_>,
) -> anyhow::Result<()>
where
    S: RecordStore,
    C: Clock,
    W: Write,
{
    match repo.complete(id)? {
        CompletionOutcome::Completed { task_id, advance } => {
            print_advance(out, &task_id, &advance)?;
        }
        CompletionOutcome::AwaitingConfirmation { message, .. } => {
            let confirmed = assume_yes || prompt(&message)?;
            if !confirmed {
                repo.cancel_completion();
                writeln!(out, "Cancelled. Task {id} unchanged.")?;
                return Ok(());
            }
            match repo.confirm_completion()? {
                Some(CompletionOutcome::Completed { task_id, advance }) => {
                    print_advance(out, &task_id, &advance)?;
                }
                _ => writeln!(out, "Task {id} no longer exists; nothing completed.")?,
            }
        }
        CompletionOutcome::Blocked {
            days_left,
            threshold,
            ..
        } => {
            return Err(anyhow!(
                "task {id} is not due for {days_left} day(s); it can be marked complete \
                 at most {threshold} day(s) early"
            ));
        }
    }
    Ok(())
}

fn print_advance<W: Write>(out: &mut W, id: &str, advance: &ServiceAdvance) -> anyhow::Result<()> {
    writeln!(
        out,
        "Completed task {id}. Last service {}, next service {}.",
        format_iso(advance.last_service_date),
        format_iso(advance.next_service_date)
    )?;
    Ok(())
}

/// Reads the answer from stdin. Without a terminal there is nobody to ask,
/// so the answer is no.
pub fn terminal_prompt(message: &str) -> anyhow::Result<bool> {
    let stdin = io::stdin();
    if !stdin.is_terminal() {
        warn!("stdin is not a terminal; treating confirmation as declined");
        return Ok(false);
    }

    let mut stderr = io::stderr().lock();
    write!(stderr, "{message} [y/N] ")?;
    stderr.flush()?;

    let mut answer = String::new();
    stdin.lock().read_line(&mut answer)?;
    Ok(matches!(
        answer.trim().to_ascii_lowercase().as_str(),
        "y" | "yes"
    ))
}

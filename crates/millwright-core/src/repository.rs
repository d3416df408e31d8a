//! Maintenance schedule persistence on top of a [`RecordStore`].
//!
//! Writes go straight to the store and nothing is cached locally: the next
//! snapshot from [`TaskRepository::list`] is the source of truth. Two
//! concurrent completions of the same task both anchor on "today" and land
//! on the same dates, but a completion racing an edit of `category` or
//! `lastServiceDate` is resolved by the store as last write wins.

use std::sync::mpsc;
use std::time::Duration;

use chrono::NaiveDate;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::dates::{Clock, DaysUntil};
use crate::guard::{CompletionDecision, CompletionGuard, CompletionPolicy, GuardState};
use crate::schedule::{ServiceAdvance, advance_on_completion, compute_next_from};
use crate::store::{RecordStore, Snapshot, Subscription, read_snapshot, record_path};
use crate::task::{MaintenanceTask, NewTask, TaskPatch};

pub const SCHEDULE_COLLECTION: &str = "maintenanceSchedule";

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("invalid task: {0}")]
    Validation(String),

    #[error("maintenance task not found: {0}")]
    NotFound(String),

    #[error("failed to {operation}")]
    Persistence {
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

fn persistence(operation: &'static str) -> impl FnOnce(anyhow::Error) -> RepositoryError {
    move |source| {
        error!(operation, error = %format!("{source:#}"), "store operation failed");
        RepositoryError::Persistence { operation, source }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionOutcome {
    Completed {
        task_id: String,
        advance: ServiceAdvance,
    },
    AwaitingConfirmation {
        task_id: String,
        days_left: i64,
        message: String,
    },
    Blocked {
        task_id: String,
        days_left: DaysUntil,
        threshold: i64,
    },
}

/// Live view of the schedule. Each item is the full task set as of one
/// store notification. Dropping the feed unsubscribes.
#[derive(Debug)]
pub struct TaskFeed {
    receiver: mpsc::Receiver<Snapshot>,
    subscription: Subscription,
}

impl TaskFeed {
    pub fn try_next(&mut self) -> Option<Vec<MaintenanceTask>> {
        self.receiver
            .try_recv()
            .ok()
            .map(|snapshot| tasks_from_snapshot(&snapshot))
    }

    pub fn recv_timeout(&mut self, timeout: Duration) -> Option<Vec<MaintenanceTask>> {
        self.receiver
            .recv_timeout(timeout)
            .ok()
            .map(|snapshot| tasks_from_snapshot(&snapshot))
    }

    pub fn latest(&mut self) -> Option<Vec<MaintenanceTask>> {
        self.receiver.try_iter().last().map(|snapshot| tasks_from_snapshot(&snapshot))
    }

    pub fn close(self) {
        self.subscription.unsubscribe();
    }
}

pub fn tasks_from_snapshot(snapshot: &Snapshot) -> Vec<MaintenanceTask> {
    snapshot
        .iter()
        .filter_map(|(key, record)| match MaintenanceTask::from_record(key, record) {
            Ok(task) => Some(task),
            Err(err) => {
                warn!(key = %key, error = %err, "skipping unreadable task record");
                None
            }
        })
        .collect()
}

#[derive(Debug)]
pub struct TaskRepository<S, C> {
    store: S,
    clock: C,
    collection: String,
    guard: CompletionGuard,
}

impl<S: RecordStore, C: Clock> TaskRepository<S, C> {
    pub fn new(store: S, clock: C, policy: CompletionPolicy) -> Self {
        Self {
            store,
            clock,
            collection: SCHEDULE_COLLECTION.to_string(),
            guard: CompletionGuard::new(policy),
        }
    }

    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    pub fn policy(&self) -> &CompletionPolicy {
        self.guard.policy()
    }

    pub fn guard_state(&self) -> &GuardState {
        self.guard.state()
    }

    #[tracing::instrument(skip(self), fields(collection = %self.collection))]
    pub fn list(&self) -> RepositoryResult<TaskFeed> {
        let (sender, receiver) = mpsc::channel();
        let subscription = self
            .store
            .subscribe(
                &self.collection,
                Box::new(move |snapshot: &Snapshot| {
                    // a closed feed just stops listening
                    let _ = sender.send(snapshot.clone());
                }),
            )
            .map_err(persistence("subscribe to maintenance schedule"))?;
        Ok(TaskFeed {
            receiver,
            subscription,
        })
    }

    pub fn tasks(&self) -> RepositoryResult<Vec<MaintenanceTask>> {
        let snapshot = read_snapshot(&self.store, &self.collection)
            .map_err(persistence("read maintenance schedule"))?;
        Ok(tasks_from_snapshot(&snapshot))
    }

    pub fn get(&self, id: &str) -> RepositoryResult<MaintenanceTask> {
        self.find(id)?
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))
    }

    fn find(&self, id: &str) -> RepositoryResult<Option<MaintenanceTask>> {
        let snapshot = read_snapshot(&self.store, &self.collection)
            .map_err(persistence("read maintenance schedule"))?;
        Ok(snapshot.get(id).and_then(|record| {
            MaintenanceTask::from_record(id, record)
                .map_err(|err| warn!(task_id = id, error = %err, "unreadable task record"))
                .ok()
        }))
    }

    #[tracing::instrument(skip(self, new_task), fields(task_name = %new_task.task_name))]
    pub fn create(&self, new_task: NewTask) -> RepositoryResult<String> {
        if new_task.task_name.trim().is_empty() {
            return Err(RepositoryError::Validation("taskName is required".to_string()));
        }
        let Some(category) = new_task.category else {
            return Err(RepositoryError::Validation("category is required".to_string()));
        };

        let created_at = new_task.created_at.unwrap_or_else(|| self.clock.today());
        let next_service_date = new_task.next_service_date.unwrap_or_else(|| {
            compute_next_from(Some(created_at), Some(category), self.clock.today())
        });

        let task = MaintenanceTask {
            id: String::new(),
            task_name: new_task.task_name,
            category: Some(category),
            activity_type: new_task.activity_type,
            priority: new_task.priority,
            machine: new_task.machine,
            location: new_task.location,
            estimated_man_hours: new_task.estimated_man_hours,
            downtime_required: new_task.downtime_required,
            maintenance_checklist: new_task.maintenance_checklist,
            description: new_task.description,
            risk_if_not_done: new_task.risk_if_not_done,
            last_service_date: new_task.last_service_date,
            next_service_date: Some(next_service_date),
            created_at: Some(created_at),
        };

        let record = task
            .to_record()
            .map_err(|err| RepositoryError::Validation(format!("{err:#}")))?;
        let id = self
            .store
            .insert(&self.collection, record)
            .map_err(persistence("create maintenance task"))?;
        info!(task_id = %id, next = %next_service_date, "created maintenance task");
        Ok(id)
    }

    #[tracing::instrument(skip(self, patch))]
    pub fn update(&self, id: &str, patch: TaskPatch) -> RepositoryResult<()> {
        if patch
            .task_name
            .as_deref()
            .is_some_and(|name| name.trim().is_empty())
        {
            return Err(RepositoryError::Validation("taskName cannot be empty".to_string()));
        }
        if patch.is_empty() {
            debug!("empty patch; nothing to write");
            return Ok(());
        }
        self.get(id)?;

        let record = patch
            .to_record()
            .map_err(|err| RepositoryError::Validation(format!("{err:#}")))?;
        self.store
            .merge(&record_path(&self.collection, id), record)
            .map_err(persistence("update maintenance task"))?;
        info!(task_id = id, "updated maintenance task");
        Ok(())
    }

    pub fn reschedule(&self, id: &str, next_service_date: NaiveDate) -> RepositoryResult<()> {
        self.update(
            id,
            TaskPatch {
                next_service_date: Some(Some(next_service_date)),
                ..TaskPatch::default()
            },
        )
    }

    #[tracing::instrument(skip(self))]
    pub fn delete(&self, id: &str) -> RepositoryResult<()> {
        self.store
            .delete(&record_path(&self.collection, id))
            .map_err(persistence("delete maintenance task"))?;
        info!(task_id = id, "deleted maintenance task");
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub fn complete(&mut self, id: &str) -> RepositoryResult<CompletionOutcome> {
        let task = self.get(id)?;
        let today = self.clock.today();

        match self.guard.request(&task, today) {
            CompletionDecision::Proceed => {
                let advance = self.apply_completion(&task, today)?;
                Ok(CompletionOutcome::Completed {
                    task_id: task.id,
                    advance,
                })
            }
            CompletionDecision::Confirm { days_left, message } => {
                info!(task_id = id, days_left, "completion awaiting confirmation");
                Ok(CompletionOutcome::AwaitingConfirmation {
                    task_id: task.id,
                    days_left,
                    message,
                })
            }
            CompletionDecision::Blocked {
                days_left,
                threshold,
            } => {
                info!(task_id = id, %days_left, threshold, "completion blocked");
                Ok(CompletionOutcome::Blocked {
                    task_id: task.id,
                    days_left,
                    threshold,
                })
            }
        }
    }

    /// Applies the pending early completion. `Ok(None)` when nothing was
    /// pending or the task has since been deleted. On a failed write the
    /// confirmation stays pending.
    #[tracing::instrument(skip(self))]
    pub fn confirm_completion(&mut self) -> RepositoryResult<Option<CompletionOutcome>> {
        let Some(id) = self.guard.pending_task_id().map(str::to_string) else {
            return Ok(None);
        };

        let Some(task) = self.find(&id)? else {
            warn!(task_id = %id, "pending task disappeared before confirmation");
            self.guard.cancel();
            return Ok(None);
        };

        let advance = self.apply_completion(&task, self.clock.today())?;
        self.guard.confirm();
        Ok(Some(CompletionOutcome::Completed {
            task_id: id,
            advance,
        }))
    }

    pub fn cancel_completion(&mut self) -> Option<String> {
        let cancelled = self.guard.cancel();
        if let Some(id) = &cancelled {
            debug!(task_id = %id, "early completion cancelled");
        }
        cancelled
    }

    fn apply_completion(
        &self,
        task: &MaintenanceTask,
        today: NaiveDate,
    ) -> RepositoryResult<ServiceAdvance> {
        let advance = advance_on_completion(task, today);
        self.store
            .merge(&record_path(&self.collection, &task.id), advance.to_record())
            .map_err(persistence("mark maintenance task complete"))?;
        info!(
            task_id = %task.id,
            last = %advance.last_service_date,
            next = %advance.next_service_date,
            "maintenance task completed"
        );
        Ok(advance)
    }
}

use chrono::NaiveDate;
use tracing::debug;

use crate::config::Config;
use crate::dates::{DaysUntil, days_until};
use crate::schedule::projected_next_due;
use crate::task::{Frequency, MaintenanceTask};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EarlyMarkThresholds {
    pub weekly: i64,
    pub monthly: i64,
    pub half_year: i64,
    pub yearly: i64,
}

impl Default for EarlyMarkThresholds {
    fn default() -> Self {
        Self {
            weekly: 2,
            monthly: 7,
            half_year: 30,
            yearly: 30,
        }
    }
}

impl EarlyMarkThresholds {
    pub fn for_frequency(&self, frequency: Frequency) -> i64 {
        match frequency {
            Frequency::Weekly => self.weekly,
            Frequency::Monthly => self.monthly,
            Frequency::HalfYear => self.half_year,
            Frequency::Yearly => self.yearly,
        }
    }
}

/// The two early-completion mechanisms, switched independently:
/// `confirm_early` asks before completing a task that is not yet due,
/// `disallow_early_mark` refuses completion outright beyond the threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionPolicy {
    pub confirm_early: bool,
    pub disallow_early_mark: bool,
    pub thresholds: EarlyMarkThresholds,
}

impl Default for CompletionPolicy {
    fn default() -> Self {
        Self {
            confirm_early: true,
            disallow_early_mark: false,
            thresholds: EarlyMarkThresholds::default(),
        }
    }
}

impl CompletionPolicy {
    #[tracing::instrument(skip(cfg))]
    pub fn from_config(cfg: &Config) -> anyhow::Result<Self> {
        let defaults = EarlyMarkThresholds::default();
        let policy = Self {
            confirm_early: cfg.get_bool("completion.confirm_early").unwrap_or(true),
            disallow_early_mark: cfg
                .get_bool("completion.disallow_early_mark")
                .unwrap_or(false),
            thresholds: EarlyMarkThresholds {
                weekly: cfg
                    .get_i64("completion.threshold.weekly")?
                    .unwrap_or(defaults.weekly),
                monthly: cfg
                    .get_i64("completion.threshold.monthly")?
                    .unwrap_or(defaults.monthly),
                half_year: cfg
                    .get_i64("completion.threshold.half_year")?
                    .unwrap_or(defaults.half_year),
                yearly: cfg
                    .get_i64("completion.threshold.yearly")?
                    .unwrap_or(defaults.yearly),
            },
        };
        debug!(?policy, "loaded completion policy");
        Ok(policy)
    }

    /// Hard gate on the "mark complete" action. Measured against the stored
    /// next date only; a task without one counts as infinitely far out.
    pub fn early_mark_gate(&self, task: &MaintenanceTask, today: NaiveDate) -> EarlyMarkGate {
        if !self.disallow_early_mark {
            return EarlyMarkGate::Open;
        }

        let days_left = days_until(task.next_service_date, today);
        let threshold = self.thresholds.for_frequency(task.frequency());
        if days_left > DaysUntil::Days(threshold) {
            EarlyMarkGate::Closed {
                days_left,
                threshold,
            }
        } else {
            EarlyMarkGate::Open
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EarlyMarkGate {
    Open,
    Closed { days_left: DaysUntil, threshold: i64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum GuardState {
    #[default]
    Idle,
    ConfirmingEarlyCompletion {
        task_id: String,
        days_left: i64,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionDecision {
    Proceed,
    Confirm { days_left: i64, message: String },
    Blocked { days_left: DaysUntil, threshold: i64 },
}

pub fn early_completion_message(days_left: i64) -> String {
    format!(
        "Task is not yet due. Next service is in {days_left} day(s). \
         Are you sure you want to mark as COMPLETED?"
    )
}

#[derive(Debug, Clone, Default)]
pub struct CompletionGuard {
    policy: CompletionPolicy,
    state: GuardState,
}

impl CompletionGuard {
    pub fn new(policy: CompletionPolicy) -> Self {
        Self {
            policy,
            state: GuardState::Idle,
        }
    }

    pub fn policy(&self) -> &CompletionPolicy {
        &self.policy
    }

    pub fn state(&self) -> &GuardState {
        &self.state
    }

    pub fn pending_task_id(&self) -> Option<&str> {
        match &self.state {
            GuardState::Idle => None,
            GuardState::ConfirmingEarlyCompletion { task_id, .. } => Some(task_id),
        }
    }

    #[tracing::instrument(skip(self, task, today), fields(task_id = %task.id))]
    pub fn request(&mut self, task: &MaintenanceTask, today: NaiveDate) -> CompletionDecision {
        if let EarlyMarkGate::Closed {
            days_left,
            threshold,
        } = self.policy.early_mark_gate(task, today)
        {
            debug!(%days_left, threshold, "completion blocked by early-mark gate");
            self.state = GuardState::Idle;
            return CompletionDecision::Blocked {
                days_left,
                threshold,
            };
        }

        let next = projected_next_due(task, today);
        let days_left = next.signed_duration_since(today).num_days();

        if days_left > 0 && self.policy.confirm_early {
            let message = early_completion_message(days_left);
            debug!(days_left, "completion needs confirmation");
            self.state = GuardState::ConfirmingEarlyCompletion {
                task_id: task.id.clone(),
                days_left,
                message: message.clone(),
            };
            return CompletionDecision::Confirm { days_left, message };
        }

        self.state = GuardState::Idle;
        CompletionDecision::Proceed
    }

    pub fn confirm(&mut self) -> Option<String> {
        match std::mem::take(&mut self.state) {
            GuardState::Idle => None,
            GuardState::ConfirmingEarlyCompletion { task_id, .. } => Some(task_id),
        }
    }

    pub fn cancel(&mut self) -> Option<String> {
        self.confirm()
    }
}

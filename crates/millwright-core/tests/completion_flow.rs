use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::anyhow;
use chrono::NaiveDate;
use millwright_core::dates::Clock;
use millwright_core::guard::{CompletionPolicy, EarlyMarkThresholds, GuardState};
use millwright_core::repository::{CompletionOutcome, RepositoryError, TaskRepository};
use millwright_core::schedule::ServiceAdvance;
use millwright_core::status::{ServiceStatus, compute_status};
use millwright_core::store::{Listener, MemoryStore, Record, RecordStore, Subscription};
use millwright_core::task::{Frequency, NewTask};

fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

/// Clock the test moves forward by hand.
struct ManualClock(Cell<NaiveDate>);

impl ManualClock {
    fn at(date: NaiveDate) -> Self {
        Self(Cell::new(date))
    }

    fn set(&self, date: NaiveDate) {
        self.0.set(date);
    }
}

impl Clock for ManualClock {
    fn today(&self) -> NaiveDate {
        self.0.get()
    }
}

/// Memory store whose writes can be switched to fail.
#[derive(Default)]
struct FlakyStore {
    inner: MemoryStore,
    fail_writes: AtomicBool,
}

impl FlakyStore {
    fn set_failing(&self, failing: bool) {
        self.fail_writes.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> anyhow::Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(anyhow!("connection reset by peer"))
        } else {
            Ok(())
        }
    }
}

impl RecordStore for FlakyStore {
    fn subscribe(&self, collection: &str, on_change: Listener) -> anyhow::Result<Subscription> {
        self.inner.subscribe(collection, on_change)
    }

    fn insert(&self, collection: &str, record: Record) -> anyhow::Result<String> {
        self.check()?;
        self.inner.insert(collection, record)
    }

    fn merge(&self, path: &str, partial: Record) -> anyhow::Result<()> {
        self.check()?;
        self.inner.merge(path, partial)
    }

    fn delete(&self, path: &str) -> anyhow::Result<()> {
        self.check()?;
        self.inner.delete(path)
    }
}

#[test]
fn monthly_task_through_due_and_early_completion() {
    let store = MemoryStore::new();
    let clock = ManualClock::at(ymd(2025, 1, 1));
    let mut repo = TaskRepository::new(&store, &clock, CompletionPolicy::default());

    let id = repo
        .create(NewTask {
            created_at: Some(ymd(2025, 1, 1)),
            ..NewTask::new("Replace spindle coolant", Frequency::Monthly)
        })
        .expect("create");
    let task = repo.get(&id).expect("get");
    assert_eq!(task.next_service_date, Some(ymd(2025, 2, 1)));
    assert_eq!(compute_status(&task, clock.today()), ServiceStatus::Pending);

    clock.set(ymd(2025, 1, 29));
    assert_eq!(
        compute_status(&repo.get(&id).expect("get"), clock.today()),
        ServiceStatus::Upcoming
    );

    clock.set(ymd(2025, 2, 1));
    assert_eq!(
        compute_status(&repo.get(&id).expect("get"), clock.today()),
        ServiceStatus::DueToday
    );
    let outcome = repo.complete(&id).expect("complete on due date");
    assert_eq!(
        outcome,
        CompletionOutcome::Completed {
            task_id: id.clone(),
            advance: ServiceAdvance {
                last_service_date: ymd(2025, 2, 1),
                next_service_date: ymd(2025, 3, 1),
            },
        }
    );

    clock.set(ymd(2025, 2, 15));
    match repo.complete(&id).expect("early request") {
        CompletionOutcome::AwaitingConfirmation {
            days_left, message, ..
        } => {
            assert_eq!(days_left, 14);
            assert!(message.contains("Next service is in 14 day(s)"));
        }
        other => panic!("expected confirmation, got {other:?}"),
    }
    assert!(matches!(
        repo.guard_state(),
        GuardState::ConfirmingEarlyCompletion { days_left: 14, .. }
    ));
    let untouched = repo.get(&id).expect("get");
    assert_eq!(untouched.last_service_date, Some(ymd(2025, 2, 1)));

    let confirmed = repo
        .confirm_completion()
        .expect("confirm")
        .expect("something was pending");
    assert!(matches!(confirmed, CompletionOutcome::Completed { .. }));
    let task = repo.get(&id).expect("get");
    assert_eq!(task.last_service_date, Some(ymd(2025, 2, 15)));
    assert_eq!(task.next_service_date, Some(ymd(2025, 3, 15)));
    assert_eq!(task.created_at, Some(ymd(2025, 1, 1)));
    assert_eq!(repo.guard_state(), &GuardState::Idle);
}

#[test]
fn overdue_completion_anchors_on_today() {
    let store = MemoryStore::new();
    let clock = ManualClock::at(ymd(2024, 1, 31));
    let mut repo = TaskRepository::new(&store, &clock, CompletionPolicy::default());
    let id = repo
        .create(NewTask::new("Annual boiler inspection", Frequency::Yearly))
        .expect("create");

    clock.set(ymd(2025, 3, 10));
    let outcome = repo.complete(&id).expect("complete");
    let CompletionOutcome::Completed { advance, .. } = outcome else {
        panic!("overdue task should complete directly");
    };
    assert_eq!(advance.last_service_date, ymd(2025, 3, 10));
    assert_eq!(advance.next_service_date, ymd(2026, 3, 10));
}

#[test]
fn early_mark_gate_refuses_without_pending_state() {
    let store = MemoryStore::new();
    let clock = ManualClock::at(ymd(2025, 4, 1));
    let policy = CompletionPolicy {
        disallow_early_mark: true,
        thresholds: EarlyMarkThresholds {
            weekly: 1,
            ..EarlyMarkThresholds::default()
        },
        ..CompletionPolicy::default()
    };
    let mut repo = TaskRepository::new(&store, &clock, policy);
    let id = repo
        .create(NewTask::new("Clean chip conveyor", Frequency::Weekly))
        .expect("create");

    let outcome = repo.complete(&id).expect("complete");
    assert!(matches!(
        outcome,
        CompletionOutcome::Blocked { threshold: 1, .. }
    ));
    assert_eq!(repo.guard_state(), &GuardState::Idle);

    clock.set(ymd(2025, 4, 7));
    assert!(matches!(
        repo.complete(&id).expect("complete"),
        CompletionOutcome::AwaitingConfirmation { days_left: 1, .. }
    ));
}

#[test]
fn failed_writes_surface_and_keep_state() {
    let store = FlakyStore::default();
    let clock = ManualClock::at(ymd(2025, 2, 15));
    let mut repo = TaskRepository::new(&store, &clock, CompletionPolicy::default());
    let id = repo
        .create(NewTask::new("Test emergency stops", Frequency::Monthly))
        .expect("create");

    store.set_failing(true);
    let err = repo
        .create(NewTask::new("Never stored", Frequency::Weekly))
        .expect_err("insert fails");
    assert!(matches!(err, RepositoryError::Persistence { .. }));
    assert!(format!("{:#}", anyhow::Error::from(err)).contains("connection reset"));

    assert!(matches!(
        repo.complete(&id).expect("request needs no write"),
        CompletionOutcome::AwaitingConfirmation { .. }
    ));
    let err = repo.confirm_completion().expect_err("merge fails");
    assert!(matches!(err, RepositoryError::Persistence { .. }));
    assert_eq!(repo.guard_state().clone(), GuardState::ConfirmingEarlyCompletion {
        task_id: id.clone(),
        days_left: 28,
        message: millwright_core::guard::early_completion_message(28),
    });
    assert_eq!(repo.get(&id).expect("get").last_service_date, None);

    store.set_failing(false);
    assert!(repo.confirm_completion().expect("retry").is_some());
    assert_eq!(
        repo.get(&id).expect("get").last_service_date,
        Some(ymd(2025, 2, 15))
    );
    assert_eq!(repo.tasks().expect("tasks").len(), 1);
}

#[test]
fn validation_errors_write_nothing() {
    let store = MemoryStore::new();
    let clock = ManualClock::at(ymd(2025, 1, 1));
    let repo = TaskRepository::new(&store, &clock, CompletionPolicy::default());

    for fields in [
        NewTask {
            task_name: String::new(),
            category: Some(Frequency::Weekly),
            ..NewTask::default()
        },
        NewTask {
            task_name: "No category".to_string(),
            ..NewTask::default()
        },
    ] {
        assert!(matches!(
            repo.create(fields),
            Err(RepositoryError::Validation(_))
        ));
    }
    assert!(repo.tasks().expect("tasks").is_empty());
    assert_eq!(store.active_listeners(), 0);
}

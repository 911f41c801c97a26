//! Reminder evaluation: which pre-alerts and due-alerts fire at a given minute.
//!
//! `evaluate` is pure over its inputs. Ledger marks it asks for are returned in
//! `Evaluation::new_marks`; the caller commits them before dispatching so a
//! concurrent tick never observes a half-applied evaluation.

pub mod message;

use crate::ledger::DedupLedger;
use crate::model::{ItemKind, OccurrenceKey, minute_of_day};
use crate::notify::Dispatcher;
use crate::planner::SharedPlanner;
use crate::store::Snapshot;
use anyhow::{Result, anyhow};
use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use serde::Serialize;
use tracing::{info, warn};

pub const PRE_ALERT_MINUTES: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertPhase {
    /// Five minutes ahead, deduplicated through the ledger.
    Pre,
    /// The scheduled minute itself, suppressed only by completion.
    Due,
    /// Start-of-day notice for a task without a time.
    AllDay,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Alert {
    pub phase: AlertPhase,
    pub kind: ItemKind,
    pub item_id: String,
    pub date: NaiveDate,
    pub name: String,
    pub description: String,
}

impl Alert {
    pub fn occurrence(&self) -> OccurrenceKey {
        OccurrenceKey::new(self.date, self.kind, self.item_id.clone())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Evaluation {
    pub pre_alerts: Vec<Alert>,
    pub due_alerts: Vec<Alert>,
    pub new_marks: Vec<OccurrenceKey>,
}

impl Evaluation {
    pub fn alerts(&self) -> impl Iterator<Item = &Alert> {
        self.pre_alerts.iter().chain(self.due_alerts.iter())
    }

    pub fn is_empty(&self) -> bool {
        self.pre_alerts.is_empty() && self.due_alerts.is_empty()
    }
}

/// An in-scope item for today, with `minute == None` meaning all-day.
struct Candidate<'a> {
    kind: ItemKind,
    id: &'a str,
    name: &'a str,
    description: &'a str,
    minute: Option<u32>,
}

pub fn evaluate(
    now: NaiveDateTime,
    snapshot: &Snapshot,
    ledger: &dyn DedupLedger,
) -> Result<Evaluation> {
    let today = now.date();
    let current_minute = now.hour() * 60 + now.minute();
    let mut evaluation = Evaluation::default();

    for candidate in candidates(today, snapshot) {
        let key = OccurrenceKey::new(today, candidate.kind, candidate.id);
        let completed = snapshot.completions.contains(&key);

        let Some(item_minute) = candidate.minute else {
            if current_minute == 0 && !completed {
                evaluation
                    .due_alerts
                    .push(alert(AlertPhase::AllDay, &candidate, today));
            }
            continue;
        };

        if in_pre_alert_window(current_minute, item_minute)
            && !evaluation.new_marks.contains(&key)
            && !ledger.has_mark(&key)?
        {
            evaluation
                .pre_alerts
                .push(alert(AlertPhase::Pre, &candidate, today));
            evaluation.new_marks.push(key.clone());
        }

        if current_minute == item_minute && !completed {
            evaluation
                .due_alerts
                .push(alert(AlertPhase::Due, &candidate, today));
        }
    }

    Ok(evaluation)
}

/// Evaluates, commits ledger marks, then dispatches outside the lock.
pub fn run_check(
    planner: &SharedPlanner,
    now: NaiveDateTime,
    dispatcher: &Dispatcher,
    icon: &str,
) -> Result<Evaluation> {
    let evaluation = {
        let mut guard = planner
            .lock()
            .map_err(|_| anyhow!("planner lock poisoned"))?;
        guard.evaluate_and_mark(now)?
    };

    for alert in evaluation.alerts() {
        let notification = message::render(alert, icon);
        let shown = dispatcher.notify(&notification);
        info!(
            phase = ?alert.phase,
            kind = %alert.kind,
            item = %alert.item_id,
            shown,
            "reminder fired"
        );
    }

    Ok(evaluation)
}

fn in_pre_alert_window(current_minute: u32, item_minute: u32) -> bool {
    current_minute + PRE_ALERT_MINUTES >= item_minute && current_minute < item_minute
}

fn alert(phase: AlertPhase, candidate: &Candidate<'_>, date: NaiveDate) -> Alert {
    Alert {
        phase,
        kind: candidate.kind,
        item_id: candidate.id.to_string(),
        date,
        name: candidate.name.to_string(),
        description: candidate.description.to_string(),
    }
}

fn candidates(today: NaiveDate, snapshot: &Snapshot) -> Vec<Candidate<'_>> {
    let weekday = today.weekday();

    let daily = snapshot.daily_rituals.iter().filter_map(|ritual| {
        timed_minute(ItemKind::Daily, &ritual.id, ritual.time.as_deref()).map(|minute| Candidate {
            kind: ItemKind::Daily,
            id: &ritual.id,
            name: &ritual.name,
            description: &ritual.description,
            minute: Some(minute),
        })
    });

    let weekly = snapshot
        .weekly_rituals
        .iter()
        .filter(|ritual| ritual.occurs_on(weekday))
        .filter_map(|ritual| {
            timed_minute(ItemKind::Weekly, &ritual.id, ritual.time.as_deref()).map(|minute| {
                Candidate {
                    kind: ItemKind::Weekly,
                    id: &ritual.id,
                    name: &ritual.name,
                    description: &ritual.description,
                    minute: Some(minute),
                }
            })
        });

    let tasks = snapshot.tasks.iter().filter_map(|task| {
        let schedule = task
            .schedule()
            .map_err(|error| warn!(item = %task.id, error = %error, "skipping task with invalid date"))
            .ok()?;

        (schedule.date == today).then_some(Candidate {
            kind: ItemKind::Task,
            id: &task.id,
            name: &task.name,
            description: &task.description,
            minute: schedule.minute,
        })
    });

    daily.chain(weekly).chain(tasks).collect()
}

fn timed_minute(kind: ItemKind, id: &str, time: Option<&str>) -> Option<u32> {
    let time = time?;
    minute_of_day(time)
        .map_err(|error| warn!(kind = %kind, item = %id, error = %error, "skipping item with invalid time"))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::{AlertPhase, evaluate};
    use crate::ledger::{DedupLedger, MemoryLedger};
    use crate::model::{DailyRitual, ItemKind, OccurrenceKey, Task, WeeklyRitual};
    use crate::store::Snapshot;
    use chrono::{NaiveDate, NaiveDateTime};

    fn at(date: &str, time: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(&format!("{date}T{time}"), "%Y-%m-%dT%H:%M").unwrap()
    }

    fn wednesday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 5).unwrap()
    }

    fn daily(id: &str, time: Option<&str>) -> DailyRitual {
        DailyRitual {
            id: id.to_string(),
            name: format!("ritual {id}"),
            time: time.map(ToOwned::to_owned),
            description: String::new(),
        }
    }

    fn weekly(id: &str, time: &str, days: &[&str]) -> WeeklyRitual {
        WeeklyRitual {
            id: id.to_string(),
            name: format!("weekly {id}"),
            time: Some(time.to_string()),
            description: String::new(),
            days: days.iter().map(|day| day.to_string()).collect(),
        }
    }

    fn task(id: &str, date: &str) -> Task {
        Task {
            id: id.to_string(),
            name: format!("task {id}"),
            description: "bring papers".to_string(),
            date: date.to_string(),
            time: None,
        }
    }

    /// Runs a tick and commits marks, like the service loop does.
    fn tick(
        now: NaiveDateTime,
        snapshot: &Snapshot,
        ledger: &mut MemoryLedger,
    ) -> super::Evaluation {
        let evaluation = evaluate(now, snapshot, &*ledger).expect("evaluation");
        for key in &evaluation.new_marks {
            ledger.set_mark(key).expect("mark");
        }
        evaluation
    }

    #[test]
    fn pre_alert_five_minutes_before_writes_one_mark() {
        let snapshot = Snapshot {
            daily_rituals: vec![daily("a", Some("10:00"))],
            ..Snapshot::default()
        };
        let ledger = MemoryLedger::default();

        let evaluation = evaluate(at("2024-06-05", "09:55"), &snapshot, &ledger).expect("eval");

        assert_eq!(evaluation.pre_alerts.len(), 1);
        assert_eq!(evaluation.pre_alerts[0].item_id, "a");
        assert_eq!(
            evaluation.new_marks,
            vec![OccurrenceKey::new(wednesday(), ItemKind::Daily, "a")]
        );
        assert!(evaluation.due_alerts.is_empty());
    }

    #[test]
    fn pre_alert_fires_once_across_the_window() {
        let snapshot = Snapshot {
            daily_rituals: vec![daily("a", Some("10:00"))],
            ..Snapshot::default()
        };
        let mut ledger = MemoryLedger::default();

        let fired = ["09:55", "09:56", "09:57", "09:58", "09:59"]
            .iter()
            .map(|time| tick(at("2024-06-05", time), &snapshot, &mut ledger).pre_alerts.len())
            .sum::<usize>();

        assert_eq!(fired, 1);
        assert_eq!(ledger.marks.len(), 1);
    }

    #[test]
    fn nothing_fires_outside_the_window() {
        let snapshot = Snapshot {
            daily_rituals: vec![daily("a", Some("10:00"))],
            ..Snapshot::default()
        };
        let ledger = MemoryLedger::default();

        for time in ["09:54", "10:01", "22:00"] {
            let evaluation = evaluate(at("2024-06-05", time), &snapshot, &ledger).expect("eval");
            assert!(evaluation.is_empty(), "unexpected alert at {time}");
        }
    }

    #[test]
    fn due_alert_is_suppressed_by_completion() {
        let mut snapshot = Snapshot {
            daily_rituals: vec![daily("a", Some("10:00"))],
            ..Snapshot::default()
        };
        let ledger = MemoryLedger::default();

        let pending = evaluate(at("2024-06-05", "10:00"), &snapshot, &ledger).expect("eval");
        assert_eq!(pending.due_alerts.len(), 1);
        assert_eq!(pending.due_alerts[0].phase, AlertPhase::Due);
        assert!(pending.new_marks.is_empty());

        snapshot
            .completions
            .insert(OccurrenceKey::new(wednesday(), ItemKind::Daily, "a"));
        let done = evaluate(at("2024-06-05", "10:00"), &snapshot, &ledger).expect("eval");
        assert!(done.due_alerts.is_empty());
    }

    #[test]
    fn yesterdays_mark_does_not_suppress_today() {
        let snapshot = Snapshot {
            daily_rituals: vec![daily("a", Some("10:00"))],
            ..Snapshot::default()
        };
        let mut ledger = MemoryLedger::default();
        tick(at("2024-06-04", "09:58"), &snapshot, &mut ledger);

        let today = evaluate(at("2024-06-05", "09:58"), &snapshot, &ledger).expect("eval");
        assert_eq!(today.pre_alerts.len(), 1);
    }

    #[test]
    fn untimed_daily_ritual_never_fires() {
        let snapshot = Snapshot {
            daily_rituals: vec![daily("a", None)],
            ..Snapshot::default()
        };
        let ledger = MemoryLedger::default();

        for time in ["00:00", "09:55", "10:00"] {
            assert!(evaluate(at("2024-06-05", time), &snapshot, &ledger).expect("eval").is_empty());
        }
    }

    #[test]
    fn weekly_ritual_fires_only_on_listed_weekday() {
        let snapshot = Snapshot {
            weekly_rituals: vec![weekly("w", "18:00", &["3"])],
            ..Snapshot::default()
        };
        let ledger = MemoryLedger::default();

        let wednesday = evaluate(at("2024-06-05", "18:00"), &snapshot, &ledger).expect("eval");
        assert_eq!(wednesday.due_alerts.len(), 1);

        for date in ["2024-06-02", "2024-06-04", "2024-06-06", "2024-06-08"] {
            let other = evaluate(at(date, "18:00"), &snapshot, &ledger).expect("eval");
            assert!(other.is_empty(), "weekly ritual fired on {date}");
        }
    }

    #[test]
    fn all_day_task_fires_once_at_midnight() {
        let snapshot = Snapshot {
            tasks: vec![task("t", "2024-06-05")],
            ..Snapshot::default()
        };
        let mut ledger = MemoryLedger::default();

        let midnight = tick(at("2024-06-05", "00:00"), &snapshot, &mut ledger);
        assert_eq!(midnight.due_alerts.len(), 1);
        assert_eq!(midnight.due_alerts[0].phase, AlertPhase::AllDay);
        assert!(midnight.pre_alerts.is_empty());

        for time in ["00:01", "09:00", "23:59"] {
            assert!(tick(at("2024-06-05", time), &snapshot, &mut ledger).is_empty());
        }
        assert!(tick(at("2024-06-06", "00:00"), &snapshot, &mut ledger).is_empty());
    }

    #[test]
    fn completed_all_day_task_stays_quiet() {
        let mut snapshot = Snapshot {
            tasks: vec![task("t", "2024-06-05")],
            ..Snapshot::default()
        };
        snapshot
            .completions
            .insert(OccurrenceKey::new(wednesday(), ItemKind::Task, "t"));
        let ledger = MemoryLedger::default();

        assert!(evaluate(at("2024-06-05", "00:00"), &snapshot, &ledger).expect("eval").is_empty());
    }

    #[test]
    fn timed_task_gets_pre_and_due_alerts_on_its_date() {
        let snapshot = Snapshot {
            tasks: vec![task("t", "2024-06-05T14:30")],
            ..Snapshot::default()
        };
        let mut ledger = MemoryLedger::default();

        assert_eq!(tick(at("2024-06-05", "14:25"), &snapshot, &mut ledger).pre_alerts.len(), 1);
        assert_eq!(tick(at("2024-06-05", "14:30"), &snapshot, &mut ledger).due_alerts.len(), 1);
        assert!(tick(at("2024-06-04", "14:30"), &snapshot, &mut ledger).is_empty());
        assert!(tick(at("2024-06-05", "00:00"), &snapshot, &mut ledger).is_empty());
    }

    #[test]
    fn early_morning_pre_alert_starts_at_midnight_not_the_day_before() {
        let snapshot = Snapshot {
            daily_rituals: vec![daily("early", Some("00:02"))],
            ..Snapshot::default()
        };
        let mut ledger = MemoryLedger::default();

        assert!(tick(at("2024-06-04", "23:58"), &snapshot, &mut ledger).pre_alerts.is_empty());
        let evaluation = tick(at("2024-06-05", "00:00"), &snapshot, &mut ledger);
        assert_eq!(evaluation.pre_alerts.len(), 1);
        assert_eq!(evaluation.pre_alerts[0].date, wednesday());
        assert!(tick(at("2024-06-05", "00:01"), &snapshot, &mut ledger).pre_alerts.is_empty());
    }

    #[test]
    fn same_id_in_two_kinds_is_tracked_separately() {
        let snapshot = Snapshot {
            daily_rituals: vec![daily("x", Some("10:00"))],
            weekly_rituals: vec![weekly("x", "10:00", &["3"])],
            ..Snapshot::default()
        };
        let ledger = MemoryLedger::default();

        let evaluation = evaluate(at("2024-06-05", "09:57"), &snapshot, &ledger).expect("eval");
        assert_eq!(evaluation.pre_alerts.len(), 2);
        assert_eq!(evaluation.new_marks.len(), 2);
    }
}

//! Server-side reminder sweep over every tenant record.
//!
//! Coarser than the local evaluator on purpose: exact `HH:MM` equality, no
//! pre-alert, and `completed` lives on the item itself, so a recurring item
//! marked completed stays quiet until it is explicitly unmarked.

use crate::db::{Database, TenantItem, TenantList};
use crate::model::{ItemKind, weekday_name};
use crate::notify::Notification;
use crate::push::{MulticastReport, PushSender};
use crate::store::Snapshot;
use anyhow::{Result, anyhow};
use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Mutex;
use tracing::{debug, info, warn};

const SWEEP_TITLE: &str = "🦉 Reminder";

/// Wall-clock values the sweep compares against, derived once per run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepClock {
    pub date: String,
    pub minute_key: String,
    pub current_time: String,
    pub weekday_name: &'static str,
}

impl SweepClock {
    pub fn at(now: NaiveDateTime) -> Self {
        Self {
            date: now.format("%Y-%m-%d").to_string(),
            minute_key: now.format("%Y-%m-%dT%H:%M").to_string(),
            current_time: now.format("%H:%M").to_string(),
            weekday_name: weekday_name(now.weekday()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub tenants: usize,
    pub skipped: usize,
    pub matched: usize,
    pub delivery: MulticastReport,
}

struct Delivery {
    tenant_id: String,
    tokens: Vec<String>,
    messages: Vec<Notification>,
}

pub fn due_items<'a>(
    items: &'a [TenantItem],
    list: TenantList,
    clock: &SweepClock,
) -> impl Iterator<Item = &'a TenantItem> {
    let current_time = clock.current_time.clone();
    let today = clock.date.clone();
    let weekday = clock.weekday_name;

    items.iter().filter(move |item| {
        item.reminder
            && !item.completed
            && item.time == current_time
            && item.date.as_deref().is_none_or(|date| date == today)
            && (list != TenantList::Weekly || item.day.as_deref() == Some(weekday))
    })
}

/// One message per due item. The tag names the item and minute so two items
/// due together never replace each other on the device.
pub fn sweep_message(list: TenantList, item: &TenantItem, clock: &SweepClock) -> Notification {
    let body = match list {
        TenantList::Daily => format!("Daily ritual: {}", item.name),
        TenantList::Weekly => format!("Weekly ritual: {}", item.name),
        TenantList::Master => format!("Task: {}", item.name),
    };

    Notification {
        title: SWEEP_TITLE.to_string(),
        body,
        tag: format!("sweep-{}-{}-{}", list.as_str(), clock.minute_key, item.name),
        icon: String::new(),
        data: BTreeMap::from([
            ("list".to_string(), list.as_str().to_string()),
            ("name".to_string(), item.name.clone()),
        ]),
    }
}

pub async fn run_sweep(
    database: &Mutex<Database>,
    sender: &dyn PushSender,
    clock: &SweepClock,
) -> Result<SweepReport> {
    let mut report = SweepReport::default();
    let deliveries = collect_deliveries(database, clock, &mut report)?;

    for delivery in deliveries {
        for message in &delivery.messages {
            let sent = sender.send_multicast(&delivery.tokens, message).await;
            debug!(
                tenant = %delivery.tenant_id,
                body = %message.body,
                success = sent.success,
                failure = sent.failure,
                "sweep message sent"
            );
            report.delivery.merge(sent);
        }
    }

    if report.matched > 0 || report.delivery.failure > 0 {
        info!(
            minute = %clock.minute_key,
            tenants = report.tenants,
            matched = report.matched,
            success = report.delivery.success,
            failure = report.delivery.failure,
            "sweep finished"
        );
    }

    Ok(report)
}

/// Reads every tenant under the lock; sends happen after it is released.
fn collect_deliveries(
    database: &Mutex<Database>,
    clock: &SweepClock,
    report: &mut SweepReport,
) -> Result<Vec<Delivery>> {
    let database = database
        .lock()
        .map_err(|_| anyhow!("sweep database lock poisoned"))?;
    let tenant_ids = database.list_tenant_ids()?;
    report.tenants = tenant_ids.len();

    let mut deliveries = Vec::new();
    for tenant_id in tenant_ids {
        match tenant_delivery(&database, &tenant_id, clock) {
            Ok(Some(delivery)) => {
                report.matched += delivery.messages.len();
                deliveries.push(delivery);
            }
            Ok(None) => report.skipped += 1,
            Err(error) => {
                warn!(tenant = %tenant_id, error = %error, "sweep failed for tenant");
                report.skipped += 1;
            }
        }
    }

    Ok(deliveries)
}

fn tenant_delivery(
    database: &Database,
    tenant_id: &str,
    clock: &SweepClock,
) -> Result<Option<Delivery>> {
    let record = database.tenant_record(tenant_id)?;
    if record.fcm_tokens.is_empty() {
        return Ok(None);
    }

    let messages = TenantList::ALL
        .into_iter()
        .flat_map(|list| {
            due_items(record.items(list), list, clock).map(move |item| sweep_message(list, item, clock))
        })
        .collect::<Vec<_>>();

    if messages.is_empty() {
        return Ok(None);
    }

    if !database.claim_sweep_minute(tenant_id, &clock.minute_key)? {
        debug!(tenant = %tenant_id, minute = %clock.minute_key, "tenant already swept this minute");
        return Ok(None);
    }

    Ok(Some(Delivery {
        tenant_id: tenant_id.to_string(),
        tokens: record.fcm_tokens,
        messages,
    }))
}

/// Projects the local snapshot onto the three tenant lists.
///
/// Weekly rituals expand to one entry per weekday name. Tasks dated `today`
/// or later are published with their date; past tasks are left out.
pub fn tenant_lists_from_snapshot(
    snapshot: &Snapshot,
    today: NaiveDate,
) -> Vec<(TenantList, Vec<TenantItem>)> {
    let item = |name: &str, time: Option<&str>, day: Option<String>, description: &str| TenantItem {
        name: name.to_string(),
        time: time.unwrap_or_default().to_string(),
        day,
        date: None,
        reminder: time.is_some(),
        completed: false,
        description: (!description.is_empty()).then(|| description.to_string()),
    };

    let daily = snapshot
        .daily_rituals
        .iter()
        .map(|ritual| item(&ritual.name, ritual.time.as_deref(), None, &ritual.description))
        .collect();

    let weekly = snapshot
        .weekly_rituals
        .iter()
        .flat_map(|ritual| {
            ritual
                .days
                .iter()
                .filter_map(|day| crate::model::weekday_from_index(day))
                .map(move |weekday| {
                    item(
                        &ritual.name,
                        ritual.time.as_deref(),
                        Some(weekday_name(weekday).to_string()),
                        &ritual.description,
                    )
                })
        })
        .collect();

    let master = snapshot
        .tasks
        .iter()
        .filter_map(|task| {
            let schedule = task
                .schedule()
                .map_err(|error| {
                    warn!(kind = %ItemKind::Task, item = %task.id, error = %error, "skipping task during sync")
                })
                .ok()?;
            if schedule.date < today {
                return None;
            }
            let time = schedule
                .minute
                .map(|minute| format!("{:02}:{:02}", minute / 60, minute % 60));
            Some(TenantItem {
                date: Some(schedule.date.format("%Y-%m-%d").to_string()),
                ..item(&task.name, time.as_deref(), None, &task.description)
            })
        })
        .collect();

    vec![
        (TenantList::Daily, daily),
        (TenantList::Weekly, weekly),
        (TenantList::Master, master),
    ]
}

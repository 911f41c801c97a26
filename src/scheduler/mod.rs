use crate::clock::Zone;
use crate::config::FIXED_TICK_SECONDS;
use crate::db::Database;
use crate::notify::Dispatcher;
use crate::planner::SharedPlanner;
use crate::push::PushSender;
use crate::reminder::{self, Evaluation};
use crate::sweep::{self, SweepClock, SweepReport};
use anyhow::{Context, Result, anyhow};
use chrono::{NaiveDate, NaiveDateTime, Timelike};
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::time::{Duration, MissedTickBehavior, interval, sleep};
use tracing::{error, info};

const SWEEP_CLAIM_RETENTION_SECONDS: i64 = 24 * 60 * 60;

/// Runs `task` now and then every 60 seconds. Missed ticks are dropped, not replayed.
pub async fn run_minute_ticker<F, Fut>(mut task: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let mut ticker = interval(Duration::from_secs(FIXED_TICK_SECONDS));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        if let Err(error) = task().await {
            error!(error = %error, "reminder tick failed");
        }
    }
}

/// Sleeps to each minute boundary in `zone` and spawns `task` for that minute,
/// so a slow run never delays the next one.
pub async fn run_minute_aligned<F, Fut>(zone: Zone, mut task: F) -> Result<()>
where
    F: FnMut(NaiveDateTime) -> Fut,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    loop {
        sleep(until_next_minute(zone.now())).await;

        let minute = truncate_to_minute(zone.now());
        let run = task(minute);
        tokio::spawn(async move {
            if let Err(error) = run.await {
                error!(error = %error, minute = %minute, "scheduled sweep failed");
            }
        });
    }
}

fn until_next_minute(now: NaiveDateTime) -> Duration {
    let elapsed_ms = u64::from(now.second()) * 1_000 + u64::from(now.nanosecond() / 1_000_000);
    Duration::from_millis(60_000u64.saturating_sub(elapsed_ms).max(1))
}

fn truncate_to_minute(now: NaiveDateTime) -> NaiveDateTime {
    now.with_second(0)
        .and_then(|value| value.with_nanosecond(0))
        .unwrap_or(now)
}

/// The local reminder check plus its once-a-day ledger pruning.
pub struct ReminderJob {
    planner: SharedPlanner,
    dispatcher: Dispatcher,
    icon: String,
    retention_days: u32,
    last_pruned: Mutex<Option<NaiveDate>>,
}

impl ReminderJob {
    pub fn new(planner: SharedPlanner, dispatcher: Dispatcher, icon: String, retention_days: u32) -> Self {
        Self {
            planner,
            dispatcher,
            icon,
            retention_days,
            last_pruned: Mutex::new(None),
        }
    }

    pub fn run_at(&self, now: NaiveDateTime) -> Result<Evaluation> {
        self.prune_once_per_day(now.date())?;
        reminder::run_check(&self.planner, now, &self.dispatcher, &self.icon)
    }

    fn prune_once_per_day(&self, today: NaiveDate) -> Result<()> {
        let mut last_pruned = self
            .last_pruned
            .lock()
            .map_err(|_| anyhow!("prune marker lock poisoned"))?;
        if *last_pruned == Some(today) {
            return Ok(());
        }

        let pruned = self
            .planner
            .lock()
            .map_err(|_| anyhow!("planner lock poisoned"))?
            .prune_ledger(today, self.retention_days)?;
        if pruned > 0 {
            info!(pruned, retention_days = self.retention_days, "old reminder marks pruned");
        }
        *last_pruned = Some(today);
        Ok(())
    }
}

/// One server sweep per minute plus daily cleanup of overlap claims.
pub struct SweepJob {
    database: Arc<Mutex<Database>>,
    sender: Arc<dyn PushSender>,
    last_cleanup: Mutex<Option<NaiveDate>>,
}

impl SweepJob {
    pub fn new(database: Database, sender: Arc<dyn PushSender>) -> Self {
        Self {
            database: Arc::new(Mutex::new(database)),
            sender,
            last_cleanup: Mutex::new(None),
        }
    }

    pub async fn run_at(&self, now: NaiveDateTime) -> Result<SweepReport> {
        self.cleanup_once_per_day(now.date())?;
        sweep::run_sweep(&self.database, self.sender.as_ref(), &SweepClock::at(now)).await
    }

    fn cleanup_once_per_day(&self, today: NaiveDate) -> Result<()> {
        let mut last_cleanup = self
            .last_cleanup
            .lock()
            .map_err(|_| anyhow!("cleanup marker lock poisoned"))?;
        if *last_cleanup == Some(today) {
            return Ok(());
        }

        self.database
            .lock()
            .map_err(|_| anyhow!("sweep database lock poisoned"))?
            .cleanup_old_sweep_claims(SWEEP_CLAIM_RETENTION_SECONDS)
            .context("Failed to prune sweep claims")?;
        *last_cleanup = Some(today);
        Ok(())
    }
}

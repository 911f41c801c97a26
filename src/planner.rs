use crate::ledger::DedupLedger;
use crate::model::{ItemKind, OccurrenceKey};
use crate::reminder::{self, Evaluation};
use crate::store::{Snapshot, Store};
use anyhow::Result;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Entity store and dedup ledger behind one lock, since deletes cascade across both.
pub type SharedPlanner = Arc<Mutex<Planner>>;

pub struct Planner {
    pub store: Store,
    pub ledger: Box<dyn DedupLedger>,
}

impl Planner {
    pub fn new(store: Store, ledger: Box<dyn DedupLedger>) -> Self {
        Self { store, ledger }
    }

    pub fn shared(self) -> SharedPlanner {
        Arc::new(Mutex::new(self))
    }

    pub fn delete_item(&mut self, kind: ItemKind, id: &str) -> Result<bool> {
        let removed = self.store.delete(kind, id)?;
        let forgotten = self.ledger.forget_item(kind, id)?;
        debug!(kind = %kind, item = %id, removed, forgotten, "item deleted");
        Ok(removed)
    }

    pub fn toggle_completion(&mut self, key: OccurrenceKey) -> Result<bool> {
        self.store.toggle_completion(key)
    }

    /// The snapshot as currently persisted, including writes from other processes.
    pub fn current_snapshot(&mut self) -> Result<&Snapshot> {
        self.store.refresh()?;
        Ok(self.store.snapshot())
    }

    pub fn evaluate_and_mark(&mut self, now: NaiveDateTime) -> Result<Evaluation> {
        self.store.refresh()?;
        let evaluation = reminder::evaluate(now, self.store.snapshot(), self.ledger.as_ref())?;
        evaluation
            .new_marks
            .iter()
            .try_for_each(|key| self.ledger.set_mark(key))?;
        Ok(evaluation)
    }

    /// Drops ledger marks older than `retention_days`; 0 keeps everything.
    pub fn prune_ledger(&mut self, today: NaiveDate, retention_days: u32) -> Result<usize> {
        if retention_days == 0 {
            return Ok(0);
        }
        let cutoff = today - Duration::days(i64::from(retention_days));
        self.ledger.prune_before(cutoff)
    }
}

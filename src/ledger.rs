//! Anti-duplicate record of pre-alerts already sent.
//!
//! Kept apart from the completion set: a completion mark is a user action,
//! a ledger mark only means "the 5-minute warning for this occurrence went out".
//! Marks embed the occurrence date, so pruning old dates can never suppress a
//! future occurrence of the same item.

use crate::db::Database;
use crate::model::{ItemKind, OccurrenceKey};
use anyhow::Result;
use chrono::NaiveDate;
#[cfg(test)]
use std::collections::BTreeSet;

pub trait DedupLedger: Send {
    fn has_mark(&self, key: &OccurrenceKey) -> Result<bool>;

    fn set_mark(&mut self, key: &OccurrenceKey) -> Result<()>;

    /// Drops every mark of one item regardless of date.
    fn forget_item(&mut self, kind: ItemKind, id: &str) -> Result<usize>;

    /// Drops marks dated strictly before `date`.
    fn prune_before(&mut self, date: NaiveDate) -> Result<usize>;
}

impl DedupLedger for Database {
    fn has_mark(&self, key: &OccurrenceKey) -> Result<bool> {
        self.has_reminder_mark(&key.dedup_key())
    }

    fn set_mark(&mut self, key: &OccurrenceKey) -> Result<()> {
        self.insert_reminder_mark(&key.dedup_key(), key.date, key.kind.as_str(), &key.id)
    }

    fn forget_item(&mut self, kind: ItemKind, id: &str) -> Result<usize> {
        self.delete_reminder_marks_for_item(kind.as_str(), id)
    }

    fn prune_before(&mut self, date: NaiveDate) -> Result<usize> {
        self.delete_reminder_marks_before(date)
    }
}

#[cfg(test)]
#[derive(Debug, Default)]
pub struct MemoryLedger {
    pub marks: BTreeSet<OccurrenceKey>,
}

#[cfg(test)]
impl DedupLedger for MemoryLedger {
    fn has_mark(&self, key: &OccurrenceKey) -> Result<bool> {
        Ok(self.marks.contains(key))
    }

    fn set_mark(&mut self, key: &OccurrenceKey) -> Result<()> {
        self.marks.insert(key.clone());
        Ok(())
    }

    fn forget_item(&mut self, kind: ItemKind, id: &str) -> Result<usize> {
        let before = self.marks.len();
        self.marks.retain(|key| !key.belongs_to(kind, id));
        Ok(before - self.marks.len())
    }

    fn prune_before(&mut self, date: NaiveDate) -> Result<usize> {
        let before = self.marks.len();
        self.marks.retain(|key| key.date >= date);
        Ok(before - self.marks.len())
    }
}

#[cfg(test)]
mod tests {
    use super::DedupLedger;
    use crate::db::Database;
    use crate::model::{ItemKind, OccurrenceKey};
    use chrono::NaiveDate;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, d).unwrap()
    }

    #[test]
    fn marks_are_per_date() {
        let mut ledger = Database::open_in_memory().expect("db");
        let today = OccurrenceKey::new(day(5), ItemKind::Daily, "a");
        let tomorrow = OccurrenceKey::new(day(6), ItemKind::Daily, "a");

        ledger.set_mark(&today).expect("mark");
        ledger.set_mark(&today).expect("mark twice");

        assert!(ledger.has_mark(&today).expect("lookup"));
        assert!(!ledger.has_mark(&tomorrow).expect("lookup"));
    }

    #[test]
    fn forgetting_an_item_matches_kind_and_id_exactly() {
        let mut ledger = Database::open_in_memory().expect("db");
        let daily = OccurrenceKey::new(day(5), ItemKind::Daily, "x");
        let daily_other_day = OccurrenceKey::new(day(9), ItemKind::Daily, "x");
        let weekly_same_id = OccurrenceKey::new(day(5), ItemKind::Weekly, "x");
        let daily_prefix = OccurrenceKey::new(day(5), ItemKind::Daily, "xy");

        for key in [&daily, &daily_other_day, &weekly_same_id, &daily_prefix] {
            ledger.set_mark(key).expect("mark");
        }

        assert_eq!(ledger.forget_item(ItemKind::Daily, "x").expect("forget"), 2);
        assert!(ledger.has_mark(&weekly_same_id).expect("lookup"));
        assert!(ledger.has_mark(&daily_prefix).expect("lookup"));
    }

    #[test]
    fn pruning_keeps_the_cutoff_date() {
        let mut ledger = Database::open_in_memory().expect("db");
        let old = OccurrenceKey::new(day(1), ItemKind::Task, "t");
        let current = OccurrenceKey::new(day(5), ItemKind::Task, "t");
        ledger.set_mark(&old).expect("mark");
        ledger.set_mark(&current).expect("mark");

        assert_eq!(ledger.prune_before(day(5)).expect("prune"), 1);
        assert!(ledger.has_mark(&current).expect("lookup"));
        assert_eq!(ledger.count_reminder_marks().expect("count"), 1);
    }
}

pub mod backend;

use crate::model::{DailyRitual, ItemDraft, ItemKind, OccurrenceKey, Task, WeeklyRitual};
use anyhow::{Context, Result};
use backend::SnapshotBackend;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;
use tracing::{debug, warn};
use uuid::Uuid;

/// Occurrences the user marked done. Persisted as `{"2024-06-05-daily-a": true}`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompletionSet {
    keys: BTreeSet<OccurrenceKey>,
}

impl CompletionSet {
    pub fn contains(&self, key: &OccurrenceKey) -> bool {
        self.keys.contains(key)
    }

    pub fn insert(&mut self, key: OccurrenceKey) -> bool {
        self.keys.insert(key)
    }

    pub fn remove(&mut self, key: &OccurrenceKey) -> bool {
        self.keys.remove(key)
    }

    pub fn remove_item(&mut self, kind: ItemKind, id: &str) -> usize {
        let before = self.keys.len();
        self.keys.retain(|key| !key.belongs_to(kind, id));
        before - self.keys.len()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }
}

impl Serialize for CompletionSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.keys.len()))?;
        for key in &self.keys {
            map.serialize_entry(&key.to_string(), &true)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for CompletionSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct CompletionVisitor;

        impl<'de> Visitor<'de> for CompletionVisitor {
            type Value = CompletionSet;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a map of occurrence keys to booleans")
            }

            fn visit_map<M: MapAccess<'de>>(self, mut access: M) -> Result<Self::Value, M::Error> {
                let mut set = CompletionSet::default();
                while let Some((raw, done)) = access.next_entry::<String, serde_json::Value>()? {
                    if !done.as_bool().unwrap_or(false) {
                        continue;
                    }
                    match raw.parse::<OccurrenceKey>() {
                        Ok(key) => {
                            set.insert(key);
                        }
                        Err(error) => warn!(key = %raw, error = %error, "skipping malformed completion key"),
                    }
                }
                Ok(set)
            }
        }

        deserializer.deserialize_map(CompletionVisitor)
    }
}

/// The single persisted record: all three collections plus completions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Snapshot {
    pub daily_rituals: Vec<DailyRitual>,
    pub weekly_rituals: Vec<WeeklyRitual>,
    pub tasks: Vec<Task>,
    pub completions: CompletionSet,
}

impl Snapshot {
    /// Bad or missing content decodes to an empty snapshot.
    pub fn decode(content: Option<&str>) -> Self {
        let Some(raw) = content.filter(|raw| !raw.trim().is_empty()) else {
            return Self::default();
        };

        serde_json::from_str(raw).unwrap_or_else(|error| {
            warn!(error = %error, "persisted snapshot is malformed. starting empty");
            Self::default()
        })
    }

    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).context("Failed to serialize snapshot")
    }

    pub fn contains_item(&self, kind: ItemKind, id: &str) -> bool {
        match kind {
            ItemKind::Daily => self.daily_rituals.iter().any(|item| item.id == id),
            ItemKind::Weekly => self.weekly_rituals.iter().any(|item| item.id == id),
            ItemKind::Task => self.tasks.iter().any(|item| item.id == id),
        }
    }

    /// The editable fields of an existing item, for partial edits.
    pub fn draft_for(&self, kind: ItemKind, id: &str) -> Option<ItemDraft> {
        match kind {
            ItemKind::Daily => self.daily_rituals.iter().find(|item| item.id == id).map(|item| ItemDraft {
                name: item.name.clone(),
                time: item.time.clone(),
                description: item.description.clone(),
                ..ItemDraft::default()
            }),
            ItemKind::Weekly => self.weekly_rituals.iter().find(|item| item.id == id).map(|item| ItemDraft {
                name: item.name.clone(),
                time: item.time.clone(),
                description: item.description.clone(),
                days: item.days.iter().cloned().collect(),
                ..ItemDraft::default()
            }),
            ItemKind::Task => self.tasks.iter().find(|item| item.id == id).map(|item| ItemDraft {
                name: item.name.clone(),
                time: item.time.clone(),
                description: item.description.clone(),
                date: Some(item.date.clone()),
                ..ItemDraft::default()
            }),
        }
    }
}

/// In-memory view of the persisted snapshot.
///
/// Other processes may write the same backend, so every mutation re-reads it
/// under the backend lock before changing anything, and readers that need
/// current data call [`Store::refresh`] first.
pub struct Store {
    backend: Box<dyn SnapshotBackend>,
    snapshot: Snapshot,
    loaded: Option<String>,
}

impl Store {
    pub fn open(backend: Box<dyn SnapshotBackend>) -> Self {
        let content = backend.read().unwrap_or_else(|error| {
            warn!(error = %error, "failed to read snapshot. starting empty");
            None
        });
        let snapshot = Snapshot::decode(content.as_deref());

        Self {
            backend,
            snapshot,
            loaded: content,
        }
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    /// Adopts the backend content when another writer changed it. Returns
    /// whether anything was reloaded.
    pub fn refresh(&mut self) -> Result<bool> {
        let content = self.backend.read()?;
        if content == self.loaded {
            return Ok(false);
        }

        self.snapshot = Snapshot::decode(content.as_deref());
        self.loaded = content;
        debug!("snapshot reloaded from backend");
        Ok(true)
    }

    pub fn create(&mut self, kind: ItemKind, draft: &ItemDraft) -> Result<String> {
        draft.validate(kind)?;
        let id = generate_id();

        self.mutate(|snapshot| {
            match kind {
                ItemKind::Daily => snapshot.daily_rituals.push(draft.as_daily(id.clone())),
                ItemKind::Weekly => snapshot.weekly_rituals.push(draft.as_weekly(id.clone())),
                ItemKind::Task => snapshot
                    .tasks
                    .push(draft.as_task(id.clone(), draft.date.clone().unwrap_or_default())),
            }
            (id.clone(), true)
        })
    }

    /// Replaces an item in place. Returns `false` when no item has that id.
    pub fn update(&mut self, kind: ItemKind, id: &str, draft: &ItemDraft) -> Result<bool> {
        draft.validate(kind)?;

        self.mutate(|snapshot| {
            let replaced = match kind {
                ItemKind::Daily => replace_by_id(
                    &mut snapshot.daily_rituals,
                    |item| item.id == id,
                    draft.as_daily(id.to_string()),
                ),
                ItemKind::Weekly => replace_by_id(
                    &mut snapshot.weekly_rituals,
                    |item| item.id == id,
                    draft.as_weekly(id.to_string()),
                ),
                ItemKind::Task => replace_by_id(
                    &mut snapshot.tasks,
                    |item| item.id == id,
                    draft.as_task(id.to_string(), draft.date.clone().unwrap_or_default()),
                ),
            };
            (replaced, replaced)
        })
    }

    /// Removes the item and its completion marks. Unknown ids are a no-op.
    pub fn delete(&mut self, kind: ItemKind, id: &str) -> Result<bool> {
        self.mutate(|snapshot| {
            let removed = match kind {
                ItemKind::Daily => remove_by_id(&mut snapshot.daily_rituals, |item| item.id == id),
                ItemKind::Weekly => remove_by_id(&mut snapshot.weekly_rituals, |item| item.id == id),
                ItemKind::Task => remove_by_id(&mut snapshot.tasks, |item| item.id == id),
            };
            let cleared = snapshot.completions.remove_item(kind, id);
            (removed, removed || cleared > 0)
        })
    }

    /// Flips the completion mark for one occurrence and returns the new state.
    pub fn toggle_completion(&mut self, key: OccurrenceKey) -> Result<bool> {
        self.mutate(|snapshot| {
            let completed = if snapshot.completions.remove(&key) {
                false
            } else {
                snapshot.completions.insert(key)
            };
            (completed, true)
        })
    }

    /// Lock, reload, apply `change`, and persist when it reports a change.
    fn mutate<T>(&mut self, change: impl FnOnce(&mut Snapshot) -> (T, bool)) -> Result<T> {
        let _lock = self.backend.lock()?;
        self.refresh()?;

        let (value, changed) = change(&mut self.snapshot);
        if changed {
            self.persist()?;
        }
        Ok(value)
    }

    fn persist(&mut self) -> Result<()> {
        let content = self.snapshot.encode()?;
        self.backend.write(&content)?;
        self.loaded = Some(content);
        Ok(())
    }
}

fn replace_by_id<T>(items: &mut [T], matches: impl Fn(&T) -> bool, replacement: T) -> bool {
    match items.iter_mut().find(|item| matches(item)) {
        Some(slot) => {
            *slot = replacement;
            true
        }
        None => false,
    }
}

fn remove_by_id<T>(items: &mut Vec<T>, matches: impl Fn(&T) -> bool) -> bool {
    let before = items.len();
    items.retain(|item| !matches(item));
    before != items.len()
}

fn generate_id() -> String {
    Uuid::new_v4().simple().to_string()
}

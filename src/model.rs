use crate::config::parse_hhmm;
use anyhow::{Context, Result, bail};
use chrono::{NaiveDate, NaiveDateTime, Timelike, Weekday};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

static OCCURRENCE_KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{4}-\d{2}-\d{2})-(daily|weekly|task)-(.+)$").expect("static regex compiles")
});

const DEDUP_PREFIX: &str = "reminded-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Daily,
    Weekly,
    Task,
}

impl ItemKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ItemKind::Daily => "daily",
            ItemKind::Weekly => "weekly",
            ItemKind::Task => "task",
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "daily" => Ok(ItemKind::Daily),
            "weekly" => Ok(ItemKind::Weekly),
            "task" | "tasks" | "master" => Ok(ItemKind::Task),
            other => bail!("Unknown item kind: {other}. Expected daily, weekly or task"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyRitual {
    pub id: String,
    pub name: String,
    #[serde(
        default,
        deserialize_with = "empty_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub time: Option<String>,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklyRitual {
    pub id: String,
    pub name: String,
    #[serde(
        default,
        deserialize_with = "empty_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub time: Option<String>,
    #[serde(default)]
    pub description: String,
    /// Weekday indices as strings, `"0"` is Sunday. Written back sorted and deduplicated.
    #[serde(default)]
    pub days: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Kept literally: `YYYY-MM-DD` or `YYYY-MM-DDTHH:MM`.
    pub date: String,
    #[serde(
        default,
        deserialize_with = "empty_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub time: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskSchedule {
    pub date: NaiveDate,
    /// `None` for all-day tasks.
    pub minute: Option<u32>,
}

impl WeeklyRitual {
    pub fn occurs_on(&self, weekday: Weekday) -> bool {
        self.days
            .contains(&weekday.num_days_from_sunday().to_string())
    }
}

impl Task {
    /// Resolves the task's date and time-of-day. A `00:00` time counts as all-day.
    pub fn schedule(&self) -> Result<TaskSchedule> {
        let raw = self.date.trim();

        let (date, embedded) = match NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
            Ok(date) => (date, None),
            Err(_) => {
                let timestamp = ["%Y-%m-%dT%H:%M", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"]
                    .iter()
                    .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
                    .with_context(|| format!("Invalid task date: {raw}"))?;
                (
                    timestamp.date(),
                    Some(timestamp.hour() * 60 + timestamp.minute()),
                )
            }
        };

        let minute = match embedded {
            Some(minute) => Some(minute),
            None => self.time.as_deref().map(minute_of_day).transpose()?,
        };

        Ok(TaskSchedule {
            date,
            minute: minute.filter(|value| *value > 0),
        })
    }
}

pub fn minute_of_day(value: &str) -> Result<u32> {
    let time = parse_hhmm(value.trim())?;
    Ok(time.hour() * 60 + time.minute())
}

/// Identifies one occurrence of an item: the unit of completion and dedup bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OccurrenceKey {
    pub date: NaiveDate,
    pub kind: ItemKind,
    pub id: String,
}

impl OccurrenceKey {
    pub fn new(date: NaiveDate, kind: ItemKind, id: impl Into<String>) -> Self {
        Self {
            date,
            kind,
            id: id.into(),
        }
    }

    pub fn belongs_to(&self, kind: ItemKind, id: &str) -> bool {
        self.kind == kind && self.id == id
    }

    pub fn dedup_key(&self) -> String {
        format!("{DEDUP_PREFIX}{self}")
    }
}

impl fmt::Display for OccurrenceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.date.format("%Y-%m-%d"), self.kind, self.id)
    }
}

impl FromStr for OccurrenceKey {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        let captures = OCCURRENCE_KEY
            .captures(raw)
            .with_context(|| format!("Malformed occurrence key: {raw}"))?;

        let date = NaiveDate::parse_from_str(&captures[1], "%Y-%m-%d")
            .with_context(|| format!("Invalid date in occurrence key: {raw}"))?;

        Ok(Self {
            date,
            kind: captures[2].parse()?,
            id: captures[3].to_string(),
        })
    }
}

/// Fields a user submits when creating or editing an item.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ItemDraft {
    pub name: String,
    pub time: Option<String>,
    pub description: String,
    pub days: Vec<String>,
    pub date: Option<String>,
}

impl ItemDraft {
    pub fn validate(&self, kind: ItemKind) -> Result<()> {
        if self.name.trim().is_empty() {
            bail!("name must not be empty");
        }

        if let Some(time) = self.time.as_deref().filter(|value| !value.trim().is_empty()) {
            minute_of_day(time)?;
        }

        match kind {
            ItemKind::Daily => {}
            ItemKind::Weekly => {
                if let Some(day) = self.days.iter().find(|day| !is_weekday_index(day)) {
                    bail!("weekly days must be 0-6 (0 = Sunday), got {day}");
                }
            }
            ItemKind::Task => {
                let date = self
                    .date
                    .clone()
                    .filter(|value| !value.trim().is_empty())
                    .context("task date is required (YYYY-MM-DD)")?;
                self.as_task(String::new(), date).schedule()?;
            }
        }

        Ok(())
    }

    pub fn as_daily(&self, id: String) -> DailyRitual {
        DailyRitual {
            id,
            name: self.name.trim().to_string(),
            time: self.normalized_time(),
            description: self.description.trim().to_string(),
        }
    }

    pub fn as_weekly(&self, id: String) -> WeeklyRitual {
        WeeklyRitual {
            id,
            name: self.name.trim().to_string(),
            time: self.normalized_time(),
            description: self.description.trim().to_string(),
            days: self.days.iter().map(|day| day.trim().to_string()).collect(),
        }
    }

    pub fn as_task(&self, id: String, date: String) -> Task {
        Task {
            id,
            name: self.name.trim().to_string(),
            description: self.description.trim().to_string(),
            date: date.trim().to_string(),
            time: self.normalized_time(),
        }
    }

    fn normalized_time(&self) -> Option<String> {
        self.time
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(ToOwned::to_owned)
    }
}

fn is_weekday_index(value: &str) -> bool {
    matches!(value.trim(), "0" | "1" | "2" | "3" | "4" | "5" | "6")
}

/// Lowercase English weekday name, as stored on server-side weekly items.
pub fn weekday_name(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Sun => "sunday",
        Weekday::Mon => "monday",
        Weekday::Tue => "tuesday",
        Weekday::Wed => "wednesday",
        Weekday::Thu => "thursday",
        Weekday::Fri => "friday",
        Weekday::Sat => "saturday",
    }
}

pub fn weekday_from_index(index: &str) -> Option<Weekday> {
    index
        .trim()
        .parse::<u8>()
        .ok()
        .filter(|value| *value <= 6)
        .and_then(|value| Weekday::try_from((value + 6) % 7).ok())
}

fn empty_as_none<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|raw| !raw.trim().is_empty()))
}

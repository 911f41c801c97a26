use crate::model::{ItemKind, OccurrenceKey};
use crate::store::Snapshot;
use anyhow::{Context, Result, bail};
use chrono::{Datelike, Duration, NaiveDate};
use serde::Serialize;

const MONTH_NAMES: [&str; 12] = [
    "January", "February", "March", "April", "May", "June", "July", "August", "September",
    "October", "November", "December",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CalendarEntry {
    pub kind: ItemKind,
    pub id: String,
    pub name: String,
    pub description: String,
    pub completed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DayCell {
    pub date: NaiveDate,
    pub today: bool,
    pub entries: Vec<CalendarEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonthView {
    pub year: i32,
    pub month: u32,
    pub title: String,
    /// Blank cells before the 1st in a Monday-first grid.
    pub leading_blanks: u32,
    pub trailing_blanks: u32,
    pub days: Vec<DayCell>,
}

pub fn month_view(year: i32, month: u32, snapshot: &Snapshot, today: NaiveDate) -> Result<MonthView> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)
        .with_context(|| format!("Invalid month: {year}-{month:02}"))?;
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    }
    .with_context(|| format!("Invalid month: {year}-{month:02}"))?;

    let day_count = (next - first).num_days();
    let leading_blanks = first.weekday().num_days_from_monday();
    let total = leading_blanks + day_count as u32;

    let days = (0..day_count)
        .map(|offset| {
            let date = first + Duration::days(offset);
            DayCell {
                date,
                today: date == today,
                entries: entries_on(date, snapshot),
            }
        })
        .collect();

    Ok(MonthView {
        year,
        month,
        title: format!("{} {year}", MONTH_NAMES[(month - 1) as usize]),
        leading_blanks,
        trailing_blanks: (7 - total % 7) % 7,
        days,
    })
}

/// Parses `YYYY-MM` into `(year, month)`.
pub fn parse_month(raw: &str) -> Result<(i32, u32)> {
    let Some((year, month)) = raw.trim().split_once('-') else {
        bail!("Invalid month: {raw}. Example: 2024-06");
    };
    let year = year
        .parse::<i32>()
        .with_context(|| format!("Invalid year in {raw}"))?;
    let month = month
        .parse::<u32>()
        .with_context(|| format!("Invalid month in {raw}"))?;
    if !(1..=12).contains(&month) {
        bail!("Month out of range: {raw}");
    }
    Ok((year, month))
}

fn entries_on(date: NaiveDate, snapshot: &Snapshot) -> Vec<CalendarEntry> {
    let entry = |kind: ItemKind, id: &str, name: &str, description: &str| CalendarEntry {
        kind,
        id: id.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        completed: snapshot
            .completions
            .contains(&OccurrenceKey::new(date, kind, id)),
    };

    let daily = snapshot
        .daily_rituals
        .iter()
        .map(|ritual| entry(ItemKind::Daily, &ritual.id, &ritual.name, &ritual.description));

    let weekly = snapshot
        .weekly_rituals
        .iter()
        .filter(|ritual| ritual.occurs_on(date.weekday()))
        .map(|ritual| entry(ItemKind::Weekly, &ritual.id, &ritual.name, &ritual.description));

    let tasks = snapshot
        .tasks
        .iter()
        .filter(|task| task.schedule().is_ok_and(|schedule| schedule.date == date))
        .map(|task| entry(ItemKind::Task, &task.id, &task.name, &task.description));

    daily.chain(weekly).chain(tasks).collect()
}

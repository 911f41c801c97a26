use crate::model::ItemKind;
use crate::notify::Notification;
use crate::reminder::{Alert, AlertPhase, PRE_ALERT_MINUTES};
use std::collections::BTreeMap;

pub fn render(alert: &Alert, icon: &str) -> Notification {
    let title = match (alert.phase, alert.kind) {
        (AlertPhase::Pre, ItemKind::Daily) => "⏰ Ritual reminder",
        (AlertPhase::Pre, ItemKind::Weekly) => "⏰ Weekly ritual reminder",
        (AlertPhase::Pre, ItemKind::Task) => "⏰ Task reminder",
        (AlertPhase::Due, ItemKind::Daily) => "📅 Time for your ritual!",
        (AlertPhase::Due, ItemKind::Weekly) => "📅 Time for your weekly ritual!",
        (AlertPhase::Due, ItemKind::Task) => "📋 Task is due!",
        (AlertPhase::AllDay, _) => "📋 Task for today",
    };

    let body = match alert.phase {
        AlertPhase::Pre => format!("In {PRE_ALERT_MINUTES} minutes: {}", alert.name),
        AlertPhase::Due | AlertPhase::AllDay if alert.description.is_empty() => alert.name.clone(),
        AlertPhase::Due | AlertPhase::AllDay => format!("{}: {}", alert.name, alert.description),
    };

    let occurrence = alert.occurrence().to_string();
    let data = BTreeMap::from([
        ("occurrence".to_string(), occurrence.clone()),
        ("kind".to_string(), alert.kind.to_string()),
        ("id".to_string(), alert.item_id.clone()),
    ]);

    Notification {
        title: title.to_string(),
        body,
        tag: occurrence,
        icon: icon.to_string(),
        data,
    }
}

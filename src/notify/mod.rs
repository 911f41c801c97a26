pub mod click;

use anyhow::Result;
#[cfg(any(target_os = "macos", target_os = "linux"))]
use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
#[cfg(any(target_os = "macos", target_os = "linux"))]
use std::process::{Command, Stdio};
use std::sync::Arc;
use tracing::{debug, info, warn};

const DEFAULT_PUSH_TITLE: &str = "🦉 Reminder";
const DEFAULT_PUSH_BODY: &str = "Don't forget what matters!";
const DEFAULT_TAG: &str = "reminder";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub tag: String,
    pub icon: String,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

impl Notification {
    /// Decodes `{notification: {title, body, icon}, data: {tag, ...}}`, preferring
    /// `notification` fields over `data` fields and filling defaults for the rest.
    pub fn from_push_payload(payload: &Value, base_path: &str) -> Self {
        let notification = payload.get("notification");
        let data = payload
            .get("data")
            .and_then(Value::as_object)
            .map(|object| {
                object
                    .iter()
                    .map(|(key, value)| {
                        let text = value
                            .as_str()
                            .map(ToOwned::to_owned)
                            .unwrap_or_else(|| value.to_string());
                        (key.clone(), text)
                    })
                    .collect::<BTreeMap<_, _>>()
            })
            .unwrap_or_default();

        let field = |name: &str| {
            notification
                .and_then(|value| value.get(name))
                .and_then(Value::as_str)
                .filter(|value| !value.is_empty())
                .map(ToOwned::to_owned)
                .or_else(|| data.get(name).filter(|value| !value.is_empty()).cloned())
        };

        Self {
            title: field("title").unwrap_or_else(|| DEFAULT_PUSH_TITLE.to_string()),
            body: field("body").unwrap_or_else(|| DEFAULT_PUSH_BODY.to_string()),
            icon: notification
                .and_then(|value| value.get("icon"))
                .and_then(Value::as_str)
                .map(ToOwned::to_owned)
                .unwrap_or_else(|| format!("{base_path}/icon-192.png")),
            tag: data
                .get("tag")
                .cloned()
                .unwrap_or_else(|| DEFAULT_TAG.to_string()),
            data,
        }
    }
}

/// Resolved once at startup; absence of permission turns delivery into a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotificationPermission {
    pub granted: bool,
}

pub trait Notifier: Send + Sync {
    fn show(&self, notification: &Notification) -> Result<()>;
}

#[derive(Clone)]
pub struct Dispatcher {
    permission: NotificationPermission,
    backend: Arc<dyn Notifier>,
}

impl Dispatcher {
    pub fn new(permission: NotificationPermission, backend: Arc<dyn Notifier>) -> Self {
        Self {
            permission,
            backend,
        }
    }

    /// Never fails: missing permission and backend errors are logged and swallowed.
    pub fn notify(&self, notification: &Notification) -> bool {
        if !self.permission.granted {
            debug!(tag = %notification.tag, "notification permission not granted. skipping display");
            return false;
        }

        match self.backend.show(notification) {
            Ok(()) => true,
            Err(error) => {
                warn!(error = %error, tag = %notification.tag, "failed to show notification");
                false
            }
        }
    }
}

/// Shows notifications through the host desktop.
pub struct DesktopNotifier;

impl Notifier for DesktopNotifier {
    #[cfg(target_os = "macos")]
    fn show(&self, notification: &Notification) -> Result<()> {
        let notified = Command::new("terminal-notifier")
            .args([
                "-title",
                &notification.title,
                "-message",
                &notification.body,
                "-group",
                &notification.tag,
            ])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false);

        if notified {
            return Ok(());
        }

        let script = r#"
on run argv
    display notification (item 2 of argv) with title (item 1 of argv)
end run
"#;
        let status = Command::new("osascript")
            .arg("-e")
            .arg(script)
            .arg(&notification.title)
            .arg(&notification.body)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .context("Failed to execute osascript")?;

        if !status.success() {
            bail!("osascript exited with {status}");
        }
        Ok(())
    }

    #[cfg(target_os = "linux")]
    fn show(&self, notification: &Notification) -> Result<()> {
        let status = Command::new("notify-send")
            .args([
                "--app-name",
                "RitualBell",
                "--icon",
                &notification.icon,
                "--hint",
                &format!("string:x-canonical-private-synchronous:{}", notification.tag),
                &notification.title,
                &notification.body,
            ])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .context("Failed to execute notify-send")?;

        if !status.success() {
            bail!("notify-send exited with {status}");
        }
        Ok(())
    }

    #[cfg(not(any(target_os = "macos", target_os = "linux")))]
    fn show(&self, notification: &Notification) -> Result<()> {
        LogNotifier.show(notification)
    }
}

/// Writes notifications to the log only. Used for replayed checks.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn show(&self, notification: &Notification) -> Result<()> {
        info!(title = %notification.title, body = %notification.body, tag = %notification.tag, "notification");
        Ok(())
    }
}

#[cfg(test)]
#[derive(Default)]
pub struct RecordingNotifier {
    pub shown: std::sync::Mutex<Vec<Notification>>,
}

#[cfg(test)]
impl RecordingNotifier {
    pub fn titles(&self) -> Vec<String> {
        self.shown
            .lock()
            .map(|shown| shown.iter().map(|n| n.title.clone()).collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
impl Notifier for RecordingNotifier {
    fn show(&self, notification: &Notification) -> Result<()> {
        self.shown
            .lock()
            .map_err(|_| anyhow::anyhow!("recorder poisoned"))?
            .push(notification.clone());
        Ok(())
    }
}

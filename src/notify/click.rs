use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClickAction {
    /// Click on the notification body.
    #[default]
    Body,
    Open,
    #[serde(alias = "close")]
    Dismiss,
}

/// An open app window the host reports when a notification is clicked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientContext {
    pub id: String,
    pub url: String,
    #[serde(default = "focusable_default")]
    pub focusable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ClickOutcome {
    Ignore,
    Focus { client_id: String },
    OpenWindow { url: String },
}

pub fn resolve_click(action: ClickAction, clients: &[ClientContext], base_path: &str) -> ClickOutcome {
    if action == ClickAction::Dismiss {
        return ClickOutcome::Ignore;
    }

    clients
        .iter()
        .filter(|client| client.focusable)
        .find(|client| is_under_base_path(&client.url, base_path))
        .map(|client| ClickOutcome::Focus {
            client_id: client.id.clone(),
        })
        .unwrap_or_else(|| ClickOutcome::OpenWindow {
            url: format!("{base_path}/"),
        })
}

fn is_under_base_path(client_url: &str, base_path: &str) -> bool {
    if base_path.is_empty() {
        return true;
    }

    let path = Url::parse(client_url)
        .map(|url| url.path().to_string())
        .unwrap_or_else(|_| client_url.to_string());

    path == base_path || path.starts_with(&format!("{base_path}/"))
}

fn focusable_default() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::{ClickAction, ClickOutcome, ClientContext, resolve_click};

    fn client(id: &str, url: &str) -> ClientContext {
        ClientContext {
            id: id.to_string(),
            url: url.to_string(),
            focusable: true,
        }
    }

    #[test]
    fn dismiss_does_nothing() {
        let clients = [client("1", "https://owl.example/calendar/")];
        assert_eq!(
            resolve_click(ClickAction::Dismiss, &clients, "/calendar"),
            ClickOutcome::Ignore
        );
    }

    #[test]
    fn open_focuses_client_under_base_path() {
        let clients = [
            client("other", "https://owl.example/calendarium/"),
            client("app", "https://owl.example/calendar/index.html"),
        ];

        assert_eq!(
            resolve_click(ClickAction::Open, &clients, "/calendar"),
            ClickOutcome::Focus {
                client_id: "app".to_string()
            }
        );
    }

    #[test]
    fn opens_new_window_when_no_client_matches() {
        let clients = [client("other", "https://owl.example/elsewhere")];
        assert_eq!(
            resolve_click(ClickAction::Body, &clients, "/calendar"),
            ClickOutcome::OpenWindow {
                url: "/calendar/".to_string()
            }
        );
    }
}

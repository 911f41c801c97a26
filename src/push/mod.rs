use crate::config::Config;
use crate::notify::Notification;
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::Serialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MulticastReport {
    pub success: usize,
    pub failure: usize,
}

impl MulticastReport {
    pub fn merge(&mut self, other: MulticastReport) {
        self.success += other.success;
        self.failure += other.failure;
    }
}

#[async_trait]
pub trait PushSender: Send + Sync {
    async fn send(&self, token: &str, message: &Notification) -> Result<()>;

    /// Delivers to every token; one failed token does not affect the others.
    async fn send_multicast(&self, tokens: &[String], message: &Notification) -> MulticastReport {
        let mut report = MulticastReport::default();

        for token in tokens {
            match self.send(token, message).await {
                Ok(()) => report.success += 1,
                Err(error) => {
                    warn!(error = %error, token = %abbreviate(token), "push delivery failed");
                    report.failure += 1;
                }
            }
        }

        report
    }
}

/// Posts one JSON message per token to a push gateway.
pub struct HttpPushSender {
    client: Client,
    endpoint: String,
}

impl HttpPushSender {
    pub fn from_config(config: &Config) -> Result<Self> {
        if config.push_endpoint.trim().is_empty() {
            bail!("push_endpoint is empty. Run `ritualbell config set push.endpoint <url>`");
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(api_key) = config.resolve_push_api_key() {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {api_key}"))
                    .context("Failed to build Authorization header")?,
            );
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.push_timeout_seconds.max(1)))
            .default_headers(headers)
            .build()
            .context("Failed to create push HTTP client")?;

        Ok(Self {
            client,
            endpoint: config.push_endpoint.clone(),
        })
    }
}

#[async_trait]
impl PushSender for HttpPushSender {
    async fn send(&self, token: &str, message: &Notification) -> Result<()> {
        let body = json!({
            "message": {
                "token": token,
                "notification": {
                    "title": message.title,
                    "body": message.body,
                },
                "data": message.data,
            }
        });

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .context("Push request failed")?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("Push gateway error {status}: {text}");
        }

        debug!(token = %abbreviate(token), "push delivered");
        Ok(())
    }
}

fn abbreviate(token: &str) -> String {
    let prefix = token.chars().take(8).collect::<String>();
    if prefix.len() < token.len() {
        format!("{prefix}…")
    } else {
        prefix
    }
}

#[cfg(test)]
pub mod testing {
    use super::PushSender;
    use crate::notify::Notification;
    use anyhow::{Result, bail};
    use async_trait::async_trait;
    use std::collections::BTreeSet;
    use std::sync::Mutex;

    /// Records deliveries and fails for tokens listed in `failing`.
    #[derive(Default)]
    pub struct RecordingSender {
        pub failing: BTreeSet<String>,
        pub sent: Mutex<Vec<(String, Notification)>>,
    }

    impl RecordingSender {
        pub fn failing(tokens: &[&str]) -> Self {
            Self {
                failing: tokens.iter().map(|token| token.to_string()).collect(),
                ..Self::default()
            }
        }

        pub fn bodies(&self) -> Vec<String> {
            self.sent
                .lock()
                .map(|sent| sent.iter().map(|(_, message)| message.body.clone()).collect())
                .unwrap_or_default()
        }

        pub fn tokens(&self) -> Vec<String> {
            self.sent
                .lock()
                .map(|sent| sent.iter().map(|(token, _)| token.clone()).collect())
                .unwrap_or_default()
        }
    }

    #[async_trait]
    impl PushSender for RecordingSender {
        async fn send(&self, token: &str, message: &Notification) -> Result<()> {
            if self.failing.contains(token) {
                bail!("token {token} rejected");
            }
            self.sent
                .lock()
                .map_err(|_| anyhow::anyhow!("recorder poisoned"))?
                .push((token.to_string(), message.clone()));
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::RecordingSender;
    use super::{PushSender, abbreviate};
    use crate::notify::Notification;
    use serde_json::json;

    #[tokio::test]
    async fn multicast_isolates_failing_tokens() {
        let sender = RecordingSender::failing(&["stale"]);
        let message = Notification::from_push_payload(&json!({}), "");
        let tokens = vec!["fresh".to_string(), "stale".to_string(), "other".to_string()];

        let report = sender.send_multicast(&tokens, &message).await;

        assert_eq!(report.success, 2);
        assert_eq!(report.failure, 1);
        assert_eq!(sender.tokens(), vec!["fresh".to_string(), "other".to_string()]);
    }

    #[test]
    fn abbreviates_long_tokens() {
        assert_eq!(abbreviate("abc"), "abc");
        assert_eq!(abbreviate("0123456789"), "01234567…");
    }
}

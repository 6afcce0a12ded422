use std::path::{Path, PathBuf};

use reqwest::Client;
use serde_json::json;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::models::{MediaSendMode, PushConfig};

/// Filler body for follow-up notifications when media goes out one file at
/// a time.
const ATTACHMENT_FILLER: &str = "(attachment)";

/// Parsed form of a notifier-library style channel string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushEndpoint {
    /// `ntfy://host/topic` (`ntfys` for TLS). Supports one attachment per
    /// notification.
    Ntfy { base: String, topic: String },
    /// `gotify://host/token` (`gotifys` for TLS). Text only.
    Gotify { base: String, token: String },
    /// `bark://host/device_key` (`barks` for TLS). Text only.
    Bark { base: String, device_key: String },
    /// `json://host/path` (`jsons` for TLS): a plain JSON webhook.
    Webhook { url: String },
}

impl PushEndpoint {
    pub fn parse(channel_url: &str) -> Result<Self> {
        let (scheme, rest) = channel_url
            .split_once("://")
            .ok_or_else(|| Error::PushNotifier(format!("malformed channel url: {channel_url}")))?;

        let (host, path) = rest.split_once('/').unwrap_or((rest, ""));
        if host.is_empty() || path.is_empty() {
            return Err(Error::PushNotifier(format!(
                "channel url needs host and path: {channel_url}"
            )));
        }

        let http = |secure: bool| if secure { "https" } else { "http" };

        match scheme {
            "ntfy" | "ntfys" => Ok(PushEndpoint::Ntfy {
                base: format!("{}://{}", http(scheme == "ntfys"), host),
                topic: path.to_string(),
            }),
            "gotify" | "gotifys" => Ok(PushEndpoint::Gotify {
                base: format!("{}://{}", http(scheme == "gotifys"), host),
                token: path.to_string(),
            }),
            "bark" | "barks" => Ok(PushEndpoint::Bark {
                base: format!("{}://{}", http(scheme == "barks"), host),
                device_key: path.to_string(),
            }),
            "json" | "jsons" => Ok(PushEndpoint::Webhook {
                url: format!("{}://{}/{}", http(scheme == "jsons"), host, path),
            }),
            other => Err(Error::PushNotifier(format!(
                "unsupported notifier scheme: {other}"
            ))),
        }
    }

    fn accepts_attachments(&self) -> bool {
        matches!(self, PushEndpoint::Ntfy { .. })
    }
}

#[derive(Clone)]
pub struct PushSender {
    client: Client,
}

impl PushSender {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    /// Delivers one rule's notification to a single config. Attachment
    /// batching follows the config's media send mode; a provider that
    /// cannot take attachments degrades to body-only plus filenames.
    pub async fn send(
        &self,
        config: &PushConfig,
        body: &str,
        attachments: &[PathBuf],
    ) -> Result<()> {
        let endpoint = PushEndpoint::parse(&config.channel_url)?;

        if attachments.is_empty() || !endpoint.accepts_attachments() {
            return self.send_text(&endpoint, body).await;
        }

        match config.media_send_mode {
            MediaSendMode::Multiple => {
                // One notification with everything; the fallback covers
                // providers that reject the batch.
                if let Err(err) = self.send_batch(&endpoint, body, attachments).await {
                    warn!(error = %err, "batched push failed, falling back to per-file");
                    self.send_per_file(&endpoint, body, attachments).await?;
                }
                Ok(())
            }
            MediaSendMode::Single => self.send_per_file(&endpoint, body, attachments).await,
        }
    }

    async fn send_per_file(
        &self,
        endpoint: &PushEndpoint,
        body: &str,
        attachments: &[PathBuf],
    ) -> Result<()> {
        for (i, path) in attachments.iter().enumerate() {
            let text = if i == 0 { body } else { ATTACHMENT_FILLER };
            self.send_attachment(endpoint, text, path).await?;
        }
        Ok(())
    }

    async fn send_batch(
        &self,
        endpoint: &PushEndpoint,
        body: &str,
        attachments: &[PathBuf],
    ) -> Result<()> {
        // ntfy takes one attachment per message; a "batch" degrades to the
        // first file carrying the body and the rest following.
        self.send_per_file(endpoint, body, attachments).await
    }

    async fn send_text(&self, endpoint: &PushEndpoint, body: &str) -> Result<()> {
        debug!(?endpoint, "sending push notification");
        let response = match endpoint {
            PushEndpoint::Ntfy { base, topic } => self
                .client
                .post(format!("{base}/{topic}"))
                .body(body.to_string())
                .send()
                .await,
            PushEndpoint::Gotify { base, token } => self
                .client
                .post(format!("{base}/message"))
                .query(&[("token", token.as_str())])
                .json(&json!({"title": "forward", "message": body, "priority": 5}))
                .send()
                .await,
            PushEndpoint::Bark { base, device_key } => self
                .client
                .post(format!("{base}/push"))
                .json(&json!({"device_key": device_key, "title": "forward", "body": body}))
                .send()
                .await,
            PushEndpoint::Webhook { url } => self
                .client
                .post(url)
                .json(&json!({"body": body}))
                .send()
                .await,
        };

        let response = response.map_err(|e| Error::PushNotifier(e.to_string()))?;
        if !response.status().is_success() {
            return Err(Error::PushNotifier(format!(
                "push endpoint returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn send_attachment(
        &self,
        endpoint: &PushEndpoint,
        body: &str,
        path: &Path,
    ) -> Result<()> {
        let PushEndpoint::Ntfy { base, topic } = endpoint else {
            return self.send_text(endpoint, body).await;
        };

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| Error::PushNotifier(format!("read attachment: {e}")))?;
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("attachment")
            .to_string();

        let response = self
            .client
            .put(format!("{base}/{topic}"))
            .query(&[("message", body)])
            .header("Filename", filename)
            .body(bytes)
            .send()
            .await
            .map_err(|e| Error::PushNotifier(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::PushNotifier(format!(
                "push endpoint returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

impl Default for PushSender {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ntfy_urls() {
        assert_eq!(
            PushEndpoint::parse("ntfy://ntfy.sh/mytopic").unwrap(),
            PushEndpoint::Ntfy {
                base: "http://ntfy.sh".to_string(),
                topic: "mytopic".to_string(),
            }
        );
        assert_eq!(
            PushEndpoint::parse("ntfys://ntfy.example.com/alerts").unwrap(),
            PushEndpoint::Ntfy {
                base: "https://ntfy.example.com".to_string(),
                topic: "alerts".to_string(),
            }
        );
    }

    #[test]
    fn parses_gotify_bark_and_webhook_urls() {
        assert_eq!(
            PushEndpoint::parse("gotifys://push.example.com/AbCdEf").unwrap(),
            PushEndpoint::Gotify {
                base: "https://push.example.com".to_string(),
                token: "AbCdEf".to_string(),
            }
        );
        assert_eq!(
            PushEndpoint::parse("bark://api.day.app/devkey").unwrap(),
            PushEndpoint::Bark {
                base: "http://api.day.app".to_string(),
                device_key: "devkey".to_string(),
            }
        );
        assert_eq!(
            PushEndpoint::parse("jsons://hooks.example.com/notify/tg").unwrap(),
            PushEndpoint::Webhook {
                url: "https://hooks.example.com/notify/tg".to_string(),
            }
        );
    }

    #[test]
    fn rejects_malformed_urls() {
        assert!(PushEndpoint::parse("ntfy.sh/topic").is_err());
        assert!(PushEndpoint::parse("ntfy://onlyhost").is_err());
        assert!(PushEndpoint::parse("ftp://host/topic").is_err());
    }
}

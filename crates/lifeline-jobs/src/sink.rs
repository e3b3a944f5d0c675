//! Notification sinks.
//!
//! Real SMS, email and push gateways live outside this system. The
//! [`WebhookNotificationSink`] hands every delivery to such a gateway as a
//! signed JSON POST; the [`LogNotificationSink`] only records it.

use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use tracing::{debug, info};

use lifeline_core::defaults::WEBHOOK_TIMEOUT_SECS;
use lifeline_core::{DeliveryPayload, DeliveryTarget, Error, NotificationSink, Result};

type HmacSha256 = Hmac<Sha256>;

/// Header carrying `sha256=<hex hmac of body>` when a secret is set.
pub const SIGNATURE_HEADER: &str = "X-Lifeline-Signature";

/// Header naming the recipient channel (`contact` or `family`).
pub const CHANNEL_HEADER: &str = "X-Lifeline-Channel";

/// Sink that only logs deliveries. Always succeeds.
#[derive(Debug, Clone, Default)]
pub struct LogNotificationSink;

#[async_trait]
impl NotificationSink for LogNotificationSink {
    async fn deliver(&self, target: &DeliveryTarget, payload: &DeliveryPayload) -> Result<()> {
        info!(
            subsystem = "jobs",
            component = "log_sink",
            event_id = %payload.event_id,
            channel = target.channel(),
            recipient_id = %target.recipient_id(),
            severity = %payload.severity,
            "Notification delivered to log sink"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

#[derive(Serialize)]
struct WebhookBody<'a> {
    target: &'a DeliveryTarget,
    payload: &'a DeliveryPayload,
}

/// Sink that POSTs each delivery to a gateway URL.
#[derive(Debug, Clone)]
pub struct WebhookNotificationSink {
    client: reqwest::Client,
    url: String,
    secret: Option<String>,
}

impl WebhookNotificationSink {
    pub fn new(url: impl Into<String>, secret: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(WEBHOOK_TIMEOUT_SECS))
            .build()
            .map_err(|e| Error::Config(format!("failed to build webhook client: {}", e)))?;
        Ok(Self {
            client,
            url: url.into(),
            secret,
        })
    }

    /// Build from `NOTIFY_WEBHOOK_URL` / `NOTIFY_WEBHOOK_SECRET`.
    /// Returns `None` when no URL is configured.
    pub fn from_env() -> Result<Option<Self>> {
        let url = match std::env::var("NOTIFY_WEBHOOK_URL") {
            Ok(url) if !url.trim().is_empty() => url,
            _ => return Ok(None),
        };
        let secret = std::env::var("NOTIFY_WEBHOOK_SECRET")
            .ok()
            .filter(|s| !s.is_empty());
        Self::new(url, secret).map(Some)
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Hex HMAC-SHA256 of `body` keyed with `secret`.
pub fn sign(secret: &str, body: &[u8]) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| Error::Config(format!("invalid webhook secret: {}", e)))?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

#[async_trait]
impl NotificationSink for WebhookNotificationSink {
    async fn deliver(&self, target: &DeliveryTarget, payload: &DeliveryPayload) -> Result<()> {
        let body = serde_json::to_vec(&WebhookBody { target, payload })?;

        let mut request = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .header(CHANNEL_HEADER, target.channel());

        if let Some(secret) = &self.secret {
            let signature = sign(secret, &body)?;
            request = request.header(SIGNATURE_HEADER, format!("sha256={}", signature));
        }

        let response = request.body(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Delivery(format!(
                "gateway answered {} for {} recipient {}",
                status.as_u16(),
                target.channel(),
                target.recipient_id()
            )));
        }

        debug!(
            event_id = %payload.event_id,
            channel = target.channel(),
            recipient_id = %target.recipient_id(),
            status = status.as_u16(),
            "Webhook delivery accepted"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "webhook"
    }
}

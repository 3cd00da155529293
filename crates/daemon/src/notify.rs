//! Notification publisher: the external sink the engine hands completed
//! turns and approval requests to.
//!
//! Every notification is logged; when a webhook URL is configured it is
//! also POSTed there as JSON. Failures never reach the engine.

use std::time::Duration;

use async_trait::async_trait;

use archon_domain::error::{Error, Result};
use archon_sessions::notifier::{DomainNotification, NotificationPublisher};

pub struct WebhookPublisher {
    http: reqwest::Client,
    webhook_url: Option<String>,
}

impl WebhookPublisher {
    pub fn new(webhook_url: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            webhook_url,
        }
    }
}

#[async_trait]
impl NotificationPublisher for WebhookPublisher {
    async fn publish(&self, notification: &DomainNotification) -> Result<()> {
        tracing::info!(
            session_id = %notification.session_id,
            turn_id = %notification.turn_id,
            status = %notification.status,
            trigger = %notification.trigger,
            "session notification"
        );

        let Some(url) = &self.webhook_url else {
            return Ok(());
        };

        let resp = self
            .http
            .post(url)
            .timeout(Duration::from_secs(10))
            .json(notification)
            .send()
            .await
            .map_err(|e| Error::Other(format!("webhook: {e}")))?;
        if !resp.status().is_success() {
            return Err(Error::Transport {
                method: "POST".into(),
                path: url.clone(),
                status: resp.status().as_u16(),
            });
        }
        Ok(())
    }
}

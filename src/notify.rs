//! Monitor events and notification dispatch.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

use crate::config::ServerConfig;
use crate::db::{Incident, SiteStatus};

/// Everything the engine tells the outside world.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    StatusChanged {
        site_id: i64,
        org_id: i64,
        site_name: String,
        previous_status: SiteStatus,
        status: SiteStatus,
        latency_ms: f64,
        error: Option<String>,
        checked_at: DateTime<Utc>,
    },
    IncidentOpened {
        org_id: i64,
        site_name: String,
        incident: Incident,
    },
    IncidentUpdated {
        org_id: i64,
        site_name: String,
        incident: Incident,
    },
    IncidentResolved {
        org_id: i64,
        site_name: String,
        incident: Incident,
    },
    SslExpiring {
        site_id: i64,
        org_id: i64,
        site_name: String,
        days_remaining: i64,
        issuer: Option<String>,
        expires_at: Option<DateTime<Utc>>,
    },
    SslRenewed {
        site_id: i64,
        org_id: i64,
        site_name: String,
        old_expires_at: DateTime<Utc>,
        new_expires_at: DateTime<Utc>,
        days_extended: i64,
    },
    SslValidityChanged {
        site_id: i64,
        org_id: i64,
        site_name: String,
        valid: bool,
    },
    DnsChanged {
        site_id: i64,
        org_id: i64,
        site_name: String,
        diff: Vec<String>,
        checked_at: DateTime<Utc>,
    },
}

/// Notification delivery error types.
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("webhook delivery failed: {0}")]
    Webhook(String),
}

/// A notification channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;
    async fn notify(&self, event: &Event) -> Result<(), NotifyError>;
}

/// Fans events out to every configured channel. Delivery failures are
/// logged and swallowed: losing a notification must never fail the check
/// cycle that produced it.
pub struct Dispatcher {
    notifiers: Vec<Box<dyn Notifier>>,
}

impl Dispatcher {
    pub fn new(notifiers: Vec<Box<dyn Notifier>>) -> Self {
        Self { notifiers }
    }

    /// Build the channel set from configuration: the log channel is
    /// always on, a webhook is added when a URL is configured.
    pub fn from_config(config: &ServerConfig) -> Self {
        let mut notifiers: Vec<Box<dyn Notifier>> = vec![Box::new(LogNotifier)];
        if let Some(url) = &config.webhook_url {
            notifiers.push(Box::new(WebhookNotifier::new(url.clone())));
        }
        Self::new(notifiers)
    }

    pub async fn publish(&self, event: Event) {
        for notifier in &self.notifiers {
            if let Err(e) = notifier.notify(&event).await {
                tracing::error!("Notifier {} failed: {}", notifier.name(), e);
            }
        }
    }
}

/// Writes every event to the log.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn notify(&self, event: &Event) -> Result<(), NotifyError> {
        match event {
            Event::StatusChanged {
                site_name,
                previous_status,
                status,
                ..
            } => {
                tracing::info!("{}: status {} -> {}", site_name, previous_status, status);
            }
            Event::IncidentOpened {
                site_name,
                incident,
                ..
            } => {
                tracing::warn!(
                    "{}: incident opened ({}): {}",
                    site_name,
                    incident.severity,
                    incident.summary
                );
            }
            Event::IncidentUpdated {
                site_name,
                incident,
                ..
            } => {
                tracing::info!(
                    "{}: incident updated ({}): {}",
                    site_name,
                    incident.severity,
                    incident.summary
                );
            }
            Event::IncidentResolved {
                site_name,
                incident,
                ..
            } => {
                tracing::info!(
                    "{}: incident resolved after {}s",
                    site_name,
                    incident.duration_secs.unwrap_or(0)
                );
            }
            Event::SslExpiring {
                site_name,
                days_remaining,
                ..
            } => {
                tracing::warn!(
                    "{}: certificate expires in {} days",
                    site_name,
                    days_remaining
                );
            }
            Event::SslRenewed {
                site_name,
                days_extended,
                ..
            } => {
                tracing::info!(
                    "{}: certificate renewed, extended by {} days",
                    site_name,
                    days_extended
                );
            }
            Event::SslValidityChanged {
                site_name, valid, ..
            } => {
                if *valid {
                    tracing::info!("{}: certificate became valid", site_name);
                } else {
                    tracing::warn!("{}: certificate became invalid", site_name);
                }
            }
            Event::DnsChanged {
                site_name, diff, ..
            } => {
                tracing::warn!("{}: DNS records changed: {}", site_name, diff.join("; "));
            }
        }
        Ok(())
    }
}

/// POSTs each event as JSON to a configured URL.
pub struct WebhookNotifier {
    url: String,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self { url, client }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn notify(&self, event: &Event) -> Result<(), NotifyError> {
        self.client
            .post(&self.url)
            .json(event)
            .send()
            .await
            .map_err(|e| NotifyError::Webhook(e.to_string()))?
            .error_for_status()
            .map_err(|e| NotifyError::Webhook(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization_is_tagged() {
        let event = Event::SslExpiring {
            site_id: 3,
            org_id: 7,
            site_name: "Example".to_string(),
            days_remaining: 7,
            issuer: Some("CN=Test CA".to_string()),
            expires_at: None,
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "ssl_expiring");
        assert_eq!(json["site_id"], 3);
        assert_eq!(json["days_remaining"], 7);
    }

    #[test]
    fn test_dispatcher_from_config_adds_webhook() {
        let mut cfg = ServerConfig::default();
        let d = Dispatcher::from_config(&cfg);
        assert_eq!(d.notifiers.len(), 1);

        cfg.webhook_url = Some("http://127.0.0.1:1/hook".to_string());
        let d = Dispatcher::from_config(&cfg);
        assert_eq!(d.notifiers.len(), 2);
        assert_eq!(d.notifiers[1].name(), "webhook");
    }

    #[tokio::test]
    async fn test_publish_survives_failing_notifier() {
        struct Failing;

        #[async_trait]
        impl Notifier for Failing {
            fn name(&self) -> &str {
                "failing"
            }
            async fn notify(&self, _event: &Event) -> Result<(), NotifyError> {
                Err(NotifyError::Webhook("boom".to_string()))
            }
        }

        let d = Dispatcher::new(vec![Box::new(Failing), Box::new(LogNotifier)]);
        // Must not panic or propagate the failure.
        d.publish(Event::SslValidityChanged {
            site_id: 1,
            org_id: 1,
            site_name: "Example".to_string(),
            valid: true,
        })
        .await;
    }
}

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, Secret};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::models::PromoOffer;

#[derive(Error, Debug)]
pub enum NotificationError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Mail relay rejected the message: {status} - {message}")]
    Rejected { status: StatusCode, message: String },
}

/// Message telling a user which promo codes they hold
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    pub recipient_email: String,
    pub codes: Vec<PromoOffer>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_promo_codes(&self, payload: &NotificationPayload)
        -> Result<(), NotificationError>;
}

/// Delivers notifications by POSTing them to a mail relay.
pub struct HttpNotifier {
    client: Client,
    endpoint: Url,
    api_token: Option<Secret<String>>,
}

impl HttpNotifier {
    pub fn new(
        endpoint: Url,
        api_token: Option<Secret<String>>,
        timeout: Duration,
    ) -> Result<Self, NotificationError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            endpoint,
            api_token,
        })
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn send_promo_codes(
        &self,
        payload: &NotificationPayload,
    ) -> Result<(), NotificationError> {
        let mut request = self.client.post(self.endpoint.clone()).json(payload);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token.expose_secret());
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            tracing::debug!(
                recipient = %payload.recipient_email,
                codes = payload.codes.len(),
                "Promo notification accepted by mail relay"
            );
            return Ok(());
        }

        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        Err(NotificationError::Rejected { status, message })
    }
}

/// Used when no mail relay is configured. Records the dispatch in the log.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_promo_codes(
        &self,
        payload: &NotificationPayload,
    ) -> Result<(), NotificationError> {
        tracing::info!(
            recipient = %payload.recipient_email,
            codes = payload.codes.len(),
            "No mail relay configured, promo notification logged only"
        );
        Ok(())
    }
}

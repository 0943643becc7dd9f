use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use parley_storage::SessionId;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, ensure};

use super::dispatcher::{BoxFuture, ReplyDispatcher};
use super::error::{
    BuildClientSnafu, InvalidUrlSnafu, MissingUrlSnafu, StatusSnafu, TransportSnafu,
    WebhookResult,
};

/// JSON body accepted by the automation endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub session_id: String,
    pub message: String,
    pub timestamp: String,
}

impl WebhookPayload {
    pub fn new(session_id: SessionId, message: impl Into<String>, sent_at: DateTime<Utc>) -> Self {
        Self {
            session_id: session_id.to_string(),
            message: message.into(),
            // Millisecond precision with a `Z` suffix, e.g. 2024-05-01T09:30:00.123Z.
            timestamp: sent_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookConfig {
    pub url: String,
    pub request_timeout: Option<Duration>,
}

impl WebhookConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into().trim().to_string(),
            request_timeout: None,
        }
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = Some(request_timeout);
        self
    }
}

#[derive(Debug, Clone)]
pub struct WebhookClient {
    http: reqwest::Client,
    url: Url,
}

impl WebhookClient {
    pub fn new(config: WebhookConfig) -> WebhookResult<Self> {
        ensure!(
            !config.url.is_empty(),
            MissingUrlSnafu {
                stage: "webhook-client-new",
            }
        );

        let url = Url::parse(&config.url).map_err(|source| {
            InvalidUrlSnafu {
                stage: "webhook-client-parse-url",
                url: config.url.clone(),
                details: source.to_string(),
            }
            .build()
        })?;
        ensure!(
            matches!(url.scheme(), "http" | "https"),
            InvalidUrlSnafu {
                stage: "webhook-client-url-scheme",
                url: config.url.clone(),
                details: format!("unsupported scheme '{}'", url.scheme()),
            }
        );

        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().context(BuildClientSnafu {
            stage: "webhook-client-build",
        })?;

        Ok(Self { http, url })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// POSTs one user message. Any 2xx status counts as delivered; nothing is retried.
    pub async fn send(&self, session_id: SessionId, message: &str) -> WebhookResult<()> {
        let payload = WebhookPayload::new(session_id, message, Utc::now());

        let response = self
            .http
            .post(self.url.clone())
            .json(&payload)
            .send()
            .await
            .context(TransportSnafu {
                stage: "webhook-send-request",
            })?;

        let status = response.status();
        if !status.is_success() {
            return StatusSnafu {
                stage: "webhook-http-status",
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("unknown status"),
            }
            .fail();
        }

        tracing::debug!("delivered message for session {} to webhook", session_id);
        Ok(())
    }
}

impl ReplyDispatcher for WebhookClient {
    fn dispatch(&self, session_id: SessionId, message: String) -> BoxFuture<'_, WebhookResult<()>> {
        Box::pin(async move { self.send(session_id, &message).await })
    }
}

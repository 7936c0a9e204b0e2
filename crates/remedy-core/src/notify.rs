//! Webhook notification of terminal results

use crate::collaborators::Notifier;
use crate::types::RemediationResult;
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

/// Event name carried by every webhook payload
pub const COMPLETED_EVENT: &str = "remediation.completed";

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize)]
struct Payload<'a> {
    event: &'static str,
    result: &'a RemediationResult,
}

/// POSTs each result as JSON to a fixed URL
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    http: reqwest::Client,
    url: reqwest::Url,
}

impl WebhookNotifier {
    /// Notifier for `url`
    ///
    /// # Errors
    /// Fails if the HTTP client cannot be built
    pub fn new(url: reqwest::Url) -> reqwest::Result<Self> {
        let http = reqwest::Client::builder().timeout(WEBHOOK_TIMEOUT).build()?;
        Ok(Self { http, url })
    }

    /// Target URL
    #[inline]
    #[must_use]
    pub fn url(&self) -> &reqwest::Url {
        &self.url
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, result: &RemediationResult) -> anyhow::Result<()> {
        self.http
            .post(self.url.clone())
            .json(&Payload {
                event: COMPLETED_EVENT,
                result,
            })
            .send()
            .await?
            .error_for_status()?;
        tracing::debug!(error_id = %result.error_id, url = %self.url, "webhook delivered");
        Ok(())
    }
}

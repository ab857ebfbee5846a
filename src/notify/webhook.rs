//! A `Notifier` that POSTs the event as JSON to a configured webhook URL
//! (Slack incoming-webhooks, Discord webhooks, or any endpoint that
//! accepts a JSON body — spec §3 names Slack/Discord explicitly as the
//! out-of-scope senders this interface exists to support).

use async_trait::async_trait;

use super::{NotifyError, NotifyEvent, Notifier};

pub struct WebhookNotifier {
    name: String,
    url: String,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &str {
        &self.name
    }

    async fn notify(&self, event: &NotifyEvent) -> Result<(), NotifyError> {
        self.client
            .post(&self.url)
            .json(event)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map(|_| ())
            .map_err(|source| NotifyError::Delivery {
                name: self.name.clone(),
                source,
            })
    }
}

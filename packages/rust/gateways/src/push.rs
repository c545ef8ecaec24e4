//! Push delivery over an FCM v1 style `messages:send` endpoint.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use shopally_shared::{NotificationSender, PushConfig, Result, ShopAllyError};
use tracing::{debug, instrument};
use url::Url;

use crate::http::{build_client, check_status, transport_error};

const SERVICE: &str = "push";
const PUSH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Deserialize)]
struct SendResponse {
    name: String,
}

/// [`NotificationSender`] posting high-priority messages to the `alerts` channel.
pub struct HttpPushSender {
    client: Client,
    endpoint: Url,
    auth_token: Option<String>,
}

impl HttpPushSender {
    /// Build a sender from `[push]` config; the bearer token is read from the
    /// env var the config names.
    pub fn new(config: &PushConfig) -> Result<Self> {
        let token = std::env::var(&config.auth_token_env)
            .ok()
            .filter(|t| !t.trim().is_empty());
        Self::with_token(config, token)
    }

    pub fn with_token(config: &PushConfig, auth_token: Option<String>) -> Result<Self> {
        let endpoint = config
            .endpoint
            .as_deref()
            .ok_or_else(|| ShopAllyError::config("push.endpoint is not set"))?;
        let endpoint = Url::parse(endpoint)
            .map_err(|e| ShopAllyError::config(format!("push.endpoint '{endpoint}': {e}")))?;

        Ok(Self {
            client: build_client(PUSH_TIMEOUT)?,
            endpoint,
            auth_token,
        })
    }
}

#[async_trait]
impl NotificationSender for HttpPushSender {
    #[instrument(skip_all)]
    async fn send(
        &self,
        token: &str,
        title: &str,
        body: &str,
        data: &HashMap<String, String>,
    ) -> Result<String> {
        if token.trim().is_empty() {
            return Err(ShopAllyError::validation("push token is empty"));
        }

        let message = json!({
            "message": {
                "token": token,
                "notification": {"title": title, "body": body},
                "data": data,
                "android": {
                    "priority": "high",
                    "notification": {"channel_id": "alerts", "sound": "default"}
                },
                "apns": {
                    "headers": {"apns-priority": "10"},
                    "payload": {"aps": {"sound": "default"}}
                }
            }
        });

        let mut request = self.client.post(self.endpoint.clone()).json(&message);
        if let Some(auth) = &self.auth_token {
            request = request.bearer_auth(auth);
        }
        let response = request
            .send()
            .await
            .map_err(|e| ShopAllyError::Notification(transport_error(SERVICE, e).to_string()))?;
        let response = check_status(SERVICE, response)
            .await
            .map_err(|e| ShopAllyError::Notification(e.to_string()))?;

        let sent: SendResponse = response
            .json()
            .await
            .map_err(|e| ShopAllyError::Notification(format!("push response: {e}")))?;
        debug!(message_id = %sent.name, "push sent");
        Ok(sent.name)
    }
}

//! # Chat API Transport
//!
//! [`NotificationChannel`] over the chat service's `messages.send` HTTP
//! method.

use reqwest::Client;
use serde_json::Value;

use crate::config::NotifyConfig;
use crate::dispatch::{NotificationChannel, OutboundMessage};
use crate::error::{PipelineError, Result};

const SEND_METHOD: &str = "messages.send";

/// Posts reports to the chat HTTP API
#[derive(Debug, Clone)]
pub struct ChatApiChannel {
    client: Client,
    config: NotifyConfig,
}

impl ChatApiChannel {
    pub fn new(config: NotifyConfig) -> Result<Self> {
        if config.access_token.is_empty() {
            return Err(PipelineError::configuration("notify.access_token is empty"));
        }

        let client = Client::builder().timeout(config.timeout()).build()?;
        Ok(Self { client, config })
    }

    pub fn method_url(&self) -> String {
        format!("{}/method/{}", self.config.endpoint.trim_end_matches('/'), SEND_METHOD)
    }

    /// Sends one message and waits for the API's answer
    pub async fn deliver(&self, message: &OutboundMessage) -> Result<()> {
        let form = [
            ("peer_ids", message.peer_ids.clone()),
            ("message", message.message.clone()),
            ("random_id", message.random_id.to_string()),
            ("dont_parse_links", u8::from(message.dont_parse_links).to_string()),
            ("access_token", self.config.access_token.clone()),
            ("v", self.config.api_version.clone()),
        ];

        let response = self.client.post(self.method_url()).form(&form).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::transport(format!("{} returned HTTP {}", SEND_METHOD, status)));
        }

        let body: Value = response.json().await?;
        if let Some(error) = body.get("error") {
            let code = error.get("error_code").and_then(Value::as_i64).unwrap_or(0);
            let message = error
                .get("error_msg")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string();
            return Err(PipelineError::Delivery { code, message });
        }

        tracing::debug!(peer_ids = %message.peer_ids, "Report delivered");
        Ok(())
    }
}

impl NotificationChannel for ChatApiChannel {
    /// Inside a tokio runtime the request runs on a spawned task and failures
    /// are only logged. Outside one it blocks until the API answers.
    fn send(&self, message: &OutboundMessage) -> Result<()> {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let channel = self.clone();
                let message = message.clone();
                handle.spawn(async move {
                    if let Err(e) = channel.deliver(&message).await {
                        tracing::warn!(peer_ids = %message.peer_ids, error = %e, "Failed to deliver error report");
                    }
                });
                Ok(())
            }
            Err(_) => {
                let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
                runtime.block_on(self.deliver(message))
            }
        }
    }
}

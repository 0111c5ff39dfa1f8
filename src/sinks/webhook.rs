//! Chat delivery through a group-messaging webhook.
//!
//! The webhook accepts one JSON command per message and answers with a JSON
//! object whose `success` flag says whether the message went out.

use super::MessageSink;
use crate::error::SinkError;
use crate::models::FormattedMessage;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::{info, instrument};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub url: String,
    /// Group names every digest is sent to.
    #[serde(default)]
    pub targets: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct WebhookReply {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct WebhookSink {
    client: Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, SinkError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl MessageSink for WebhookSink {
    fn name(&self) -> &str {
        "webhook"
    }

    #[instrument(level = "info", skip_all, fields(target = %target))]
    async fn send(&self, target: &str, message: &FormattedMessage) -> Result<(), SinkError> {
        let payload = json!({
            "action": "send_group_message",
            "group_name": target,
            "message": {
                "type": "text",
                "content": message.render_text(),
            },
        });
        let reply: WebhookReply = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if !reply.success {
            let reason = reply
                .error
                .or(reply.message)
                .unwrap_or_else(|| "webhook reported failure".to_string());
            return Err(SinkError::Rejected(reason));
        }
        info!("Message delivered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::serve;
    use axum::{Json, Router, routing::post};
    use serde_json::Value;
    use std::sync::{Arc, Mutex};

    fn message() -> FormattedMessage {
        FormattedMessage::Rich {
            title: "AI Tech Daily - 2025-05-06".to_string(),
            summary: "Big day.".to_string(),
            bullets: vec!["Agents".to_string()],
        }
    }

    #[tokio::test]
    async fn test_sends_text_command_to_group() {
        let seen: Arc<Mutex<Vec<Value>>> = Arc::default();
        let log = seen.clone();
        let router = Router::new().route(
            "/webhook",
            post(move |Json(body): Json<Value>| {
                let log = log.clone();
                async move {
                    log.lock().unwrap().push(body);
                    Json(json!({"success": true}))
                }
            }),
        );
        let base = serve(router).await;
        let sink = WebhookSink::new(format!("{base}/webhook"), Duration::from_secs(5)).unwrap();

        sink.send("AI News", &message()).await.unwrap();

        let bodies = seen.lock().unwrap();
        assert_eq!(bodies.len(), 1);
        assert_eq!(bodies[0]["action"], "send_group_message");
        assert_eq!(bodies[0]["group_name"], "AI News");
        assert_eq!(bodies[0]["message"]["type"], "text");
        let content = bodies[0]["message"]["content"].as_str().unwrap();
        assert!(content.starts_with("AI Tech Daily - 2025-05-06"));
        assert!(content.contains("• Agents"));
    }

    #[tokio::test]
    async fn test_unsuccessful_reply_is_rejected() {
        let router = Router::new().route(
            "/webhook",
            post(|| async { Json(json!({"success": false, "error": "group not found"})) }),
        );
        let base = serve(router).await;
        let sink = WebhookSink::new(format!("{base}/webhook"), Duration::from_secs(5)).unwrap();

        let err = sink.send("Nobody", &message()).await.unwrap_err();
        assert!(matches!(err, SinkError::Rejected(ref m) if m == "group not found"));
    }

    #[tokio::test]
    async fn test_http_error_surfaces() {
        let base = serve(Router::new()).await;
        let sink = WebhookSink::new(format!("{base}/missing"), Duration::from_secs(5)).unwrap();
        let err = sink.send("AI News", &message()).await.unwrap_err();
        assert!(matches!(err, SinkError::Http(_)));
    }
}

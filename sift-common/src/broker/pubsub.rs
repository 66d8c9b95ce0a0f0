//! Google Pub/Sub v1 REST backend
//!
//! Talks plain JSON over HTTPS with `reqwest`, so the same client works
//! against the Pub/Sub emulator (`http://localhost:8085`, no token).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Broker, ReceivedMessage, SubscriptionConfig};
use crate::auth::TokenSource;
use crate::{Error, Result};

pub const DEFAULT_PUBSUB_ENDPOINT: &str = "https://pubsub.googleapis.com";
const USER_AGENT: &str = concat!("sift/", env!("CARGO_PKG_VERSION"));

/// Connection settings for [`PubSubBroker`]
#[derive(Debug, Clone)]
pub struct PubSubConfig {
    pub endpoint: String,
    pub project_id: String,
    /// Per-request timeout; must exceed the server's pull wait
    pub timeout: Duration,
}

impl PubSubConfig {
    pub fn new(endpoint: impl Into<String>, project_id: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            project_id: project_id.into(),
            timeout: Duration::from_secs(90),
        }
    }
}

pub struct PubSubBroker {
    http: reqwest::Client,
    endpoint: String,
    project_id: String,
    tokens: Arc<dyn TokenSource>,
}

#[derive(Debug, Serialize)]
struct PublishRequest {
    messages: Vec<OutgoingMessage>,
}

#[derive(Debug, Serialize)]
struct OutgoingMessage {
    data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublishResponse {
    #[serde(default)]
    message_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateSubscriptionRequest {
    topic: String,
    ack_deadline_seconds: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PullRequest {
    max_messages: usize,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PullResponse {
    #[serde(default)]
    received_messages: Vec<WireReceivedMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireReceivedMessage {
    ack_id: String,
    message: WireMessage,
    #[serde(default)]
    delivery_attempt: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMessage {
    #[serde(default)]
    data: String,
    message_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AcknowledgeRequest<'a> {
    ack_ids: &'a [String],
}

impl WireReceivedMessage {
    fn into_received(self) -> Result<ReceivedMessage> {
        let data = STANDARD
            .decode(self.message.data.as_bytes())
            .map_err(|e| Error::Broker(format!("invalid message data encoding: {}", e)))?;
        Ok(ReceivedMessage {
            message_id: self.message.message_id,
            ack_id: self.ack_id,
            data,
            // Only reported when a dead-letter policy is attached
            delivery_attempt: self.delivery_attempt.unwrap_or(1),
        })
    }
}

impl PubSubBroker {
    pub fn new(config: PubSubConfig, tokens: Arc<dyn TokenSource>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Broker(e.to_string()))?;

        Ok(Self {
            http,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            project_id: config.project_id,
            tokens,
        })
    }

    fn topic_path(&self, topic: &str) -> String {
        format!("projects/{}/topics/{}", self.project_id, topic)
    }

    fn subscription_path(&self, subscription: &str) -> String {
        format!("projects/{}/subscriptions/{}", self.project_id, subscription)
    }

    async fn request(&self, method: Method, path: &str) -> Result<reqwest::RequestBuilder> {
        let url = format!("{}/v1/{}", self.endpoint, path);
        let mut builder = self.http.request(method, url);
        if let Some(token) = self.tokens.token().await? {
            builder = builder.bearer_auth(token);
        }
        Ok(builder)
    }

    async fn send(&self, builder: reqwest::RequestBuilder, what: &str) -> Result<reqwest::Response> {
        let response = builder
            .send()
            .await
            .map_err(|e| Error::Broker(format!("{}: {}", what, e)))?;

        match response.status() {
            status if status.is_success() => Ok(response),
            StatusCode::NOT_FOUND => Err(Error::NotFound(what.to_string())),
            StatusCode::CONFLICT => Err(Error::AlreadyExists(what.to_string())),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(Error::Broker(format!("{}: HTTP {} {}", what, status.as_u16(), body)))
            }
        }
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let builder = self.request(Method::GET, path).await?;
        match self.send(builder, path).await {
            Ok(_) => Ok(true),
            Err(Error::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl Broker for PubSubBroker {
    async fn topic_exists(&self, topic: &str) -> Result<bool> {
        self.exists(&self.topic_path(topic)).await
    }

    async fn create_topic(&self, topic: &str) -> Result<()> {
        let path = self.topic_path(topic);
        let builder = self
            .request(Method::PUT, &path)
            .await?
            .json(&serde_json::json!({}));
        self.send(builder, &path).await?;
        Ok(())
    }

    async fn publish(&self, topic: &str, data: Vec<u8>) -> Result<String> {
        let path = format!("{}:publish", self.topic_path(topic));
        let body = PublishRequest {
            messages: vec![OutgoingMessage {
                data: STANDARD.encode(data),
            }],
        };
        let builder = self.request(Method::POST, &path).await?.json(&body);
        let response: PublishResponse = self
            .send(builder, &path)
            .await?
            .json()
            .await
            .map_err(|e| Error::Broker(format!("{}: {}", path, e)))?;

        response
            .message_ids
            .into_iter()
            .next()
            .ok_or_else(|| Error::Broker(format!("{}: no message id returned", path)))
    }

    async fn subscription_exists(&self, subscription: &str) -> Result<bool> {
        self.exists(&self.subscription_path(subscription)).await
    }

    async fn create_subscription(
        &self,
        subscription: &str,
        config: &SubscriptionConfig,
    ) -> Result<()> {
        let path = self.subscription_path(subscription);
        let body = CreateSubscriptionRequest {
            topic: self.topic_path(&config.topic),
            ack_deadline_seconds: config.ack_deadline.as_secs(),
        };
        let builder = self.request(Method::PUT, &path).await?.json(&body);
        self.send(builder, &path).await?;
        Ok(())
    }

    async fn delete_subscription(&self, subscription: &str) -> Result<()> {
        let path = self.subscription_path(subscription);
        let builder = self.request(Method::DELETE, &path).await?;
        self.send(builder, &path).await?;
        Ok(())
    }

    async fn pull(&self, subscription: &str, max_messages: usize) -> Result<Vec<ReceivedMessage>> {
        let path = format!("{}:pull", self.subscription_path(subscription));
        let builder = self
            .request(Method::POST, &path)
            .await?
            .json(&PullRequest { max_messages });
        let response: PullResponse = self
            .send(builder, &path)
            .await?
            .json()
            .await
            .map_err(|e| Error::Broker(format!("{}: {}", path, e)))?;

        debug!(
            subscription,
            count = response.received_messages.len(),
            "Pulled messages"
        );
        response
            .received_messages
            .into_iter()
            .map(WireReceivedMessage::into_received)
            .collect()
    }

    async fn acknowledge(&self, subscription: &str, ack_ids: &[String]) -> Result<()> {
        if ack_ids.is_empty() {
            return Ok(());
        }
        let path = format!("{}:acknowledge", self.subscription_path(subscription));
        let builder = self
            .request(Method::POST, &path)
            .await?
            .json(&AcknowledgeRequest { ack_ids });
        self.send(builder, &path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticTokenSource;

    fn broker() -> PubSubBroker {
        PubSubBroker::new(
            PubSubConfig::new("http://localhost:8085/", "demo-project"),
            Arc::new(StaticTokenSource::anonymous()),
        )
        .unwrap()
    }

    #[test]
    fn resource_paths() {
        let broker = broker();
        assert_eq!(broker.endpoint, "http://localhost:8085");
        assert_eq!(broker.topic_path("images"), "projects/demo-project/topics/images");
        assert_eq!(
            broker.subscription_path("pod-1+cat"),
            "projects/demo-project/subscriptions/pod-1+cat"
        );
    }

    #[test]
    fn create_subscription_body() {
        let body = CreateSubscriptionRequest {
            topic: "projects/p/topics/labeled".into(),
            ack_deadline_seconds: 60,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["topic"], "projects/p/topics/labeled");
        assert_eq!(json["ackDeadlineSeconds"], 60);
    }

    #[test]
    fn pull_response_decodes_base64_payloads() {
        let json = r#"{
            "receivedMessages": [
                {"ackId": "ack-1", "message": {"data": "YnVja2V0L2NhdDEuanBn", "messageId": "42"}},
                {"ackId": "ack-2", "message": {"data": "", "messageId": "43"}, "deliveryAttempt": 3}
            ]
        }"#;
        let response: PullResponse = serde_json::from_str(json).unwrap();
        let messages: Vec<ReceivedMessage> = response
            .received_messages
            .into_iter()
            .map(|m| m.into_received().unwrap())
            .collect();

        assert_eq!(messages[0].data, b"bucket/cat1.jpg");
        assert_eq!(messages[0].message_id, "42");
        assert_eq!(messages[0].delivery_attempt, 1);
        assert!(messages[1].data.is_empty());
        assert_eq!(messages[1].delivery_attempt, 3);
    }

    #[test]
    fn empty_pull_response() {
        let response: PullResponse = serde_json::from_str("{}").unwrap();
        assert!(response.received_messages.is_empty());
    }
}

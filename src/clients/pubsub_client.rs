use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::error::{ConferenceError, Result};

const SUBSCRIPTION_CAPACITY: usize = 256;
const PULL_MAX_MESSAGES: u32 = 10;
const PULL_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Message bus that routes payloads to named topics
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Ensure a topic exists and register it for publishing. Existing topics are reused.
    async fn create_topic(&self, topic: &str) -> Result<()>;

    /// Publish a payload to a registered topic
    async fn publish(&self, topic: &str, data: Vec<u8>) -> Result<()>;

    /// Stream payloads published to a topic until `abort` fires or its sender is dropped
    async fn subscribe(
        &self,
        topic: &str,
        abort: oneshot::Receiver<()>,
    ) -> Result<mpsc::Receiver<Vec<u8>>>;
}

fn lock_poisoned() -> ConferenceError {
    ConferenceError::internal("topic registry lock poisoned")
}

/// Publisher backed by the Google Cloud Pub/Sub REST API
#[derive(Debug)]
pub struct GooglePubSubPublisher {
    client: Client,
    project_url: String,
    project_id: String,
    access_token: Option<String>,
    topics: RwLock<HashSet<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PullResponse {
    #[serde(default)]
    received_messages: Vec<ReceivedMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReceivedMessage {
    ack_id: String,
    message: PubsubMessage,
}

#[derive(Debug, Deserialize)]
struct PubsubMessage {
    #[serde(default)]
    data: String,
}

impl GooglePubSubPublisher {
    pub fn new(base_url: &str, project_id: &str, access_token: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ConferenceError::Publish(format!("Failed to build http client: {}", e)))?;

        Ok(Self {
            client,
            project_url: format!("{}/projects/{}", base_url.trim_end_matches('/'), project_id),
            project_id: project_id.to_string(),
            access_token,
            topics: RwLock::new(HashSet::new()),
        })
    }

    fn topic_url(&self, topic: &str) -> String {
        format!("{}/topics/{}", self.project_url, topic)
    }

    fn subscription_url(&self, topic: &str) -> String {
        format!("{}/subscriptions/{}", self.project_url, topic)
    }

    fn is_registered(&self, topic: &str) -> Result<bool> {
        Ok(self.topics.read().map_err(|_| lock_poisoned())?.contains(topic))
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// PUT a resource, treating 409 (already exists) as success
    async fn put_resource(&self, url: &str, body: serde_json::Value) -> Result<()> {
        let response = self
            .authorize(self.client.put(url).json(&body))
            .send()
            .await
            .map_err(|e| ConferenceError::Publish(e.to_string()))?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::CONFLICT => {
                debug!("{} already exists", url);
                Ok(())
            }
            status => {
                let text = response.text().await.unwrap_or_default();
                error!("Pub/Sub request to {} failed with {}: {}", url, status, text);
                Err(ConferenceError::Publish(format!("Pub/Sub returned {}", status)))
            }
        }
    }
}

#[async_trait]
impl Publisher for GooglePubSubPublisher {
    async fn create_topic(&self, topic: &str) -> Result<()> {
        self.put_resource(&self.topic_url(topic), json!({})).await?;
        self.topics
            .write()
            .map_err(|_| lock_poisoned())?
            .insert(topic.to_string());
        info!("Topic {} ready", topic);
        Ok(())
    }

    async fn publish(&self, topic: &str, data: Vec<u8>) -> Result<()> {
        if !self.is_registered(topic)? {
            return Err(ConferenceError::TopicNotFound(topic.to_string()));
        }

        let url = format!("{}:publish", self.topic_url(topic));
        let body = json!({ "messages": [{ "data": general_purpose::STANDARD.encode(&data) }] });
        let response = self
            .authorize(self.client.post(&url).json(&body))
            .send()
            .await
            .map_err(|e| ConferenceError::Publish(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            error!("Publishing to {} failed with {}: {}", topic, status, text);
            return Err(ConferenceError::Publish(format!("Pub/Sub returned {}", status)));
        }

        debug!("Published {} bytes to {}", data.len(), topic);
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
        mut abort: oneshot::Receiver<()>,
    ) -> Result<mpsc::Receiver<Vec<u8>>> {
        if !self.is_registered(topic)? {
            return Err(ConferenceError::TopicNotFound(topic.to_string()));
        }

        let subscription_url = self.subscription_url(topic);
        self.put_resource(
            &subscription_url,
            json!({ "topic": format!("projects/{}/topics/{}", self.project_id, topic) }),
        )
        .await?;

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_CAPACITY);
        let client = self.client.clone();
        let access_token = self.access_token.clone();
        let topic = topic.to_string();

        tokio::spawn(async move {
            let pull_url = format!("{}:pull", subscription_url);
            let ack_url = format!("{}:acknowledge", subscription_url);
            let with_auth = |request: reqwest::RequestBuilder| match &access_token {
                Some(token) => request.bearer_auth(token),
                None => request,
            };

            loop {
                let pulled = tokio::select! {
                    biased;
                    _ = &mut abort => break,
                    pulled = with_auth(client.post(&pull_url).json(&json!({ "maxMessages": PULL_MAX_MESSAGES }))).send() => pulled,
                };

                let messages = match pulled {
                    Ok(response) if response.status().is_success() => {
                        match response.json::<PullResponse>().await {
                            Ok(pull) => pull.received_messages,
                            Err(e) => {
                                warn!("Failed to decode pull response for {}: {}", topic, e);
                                Vec::new()
                            }
                        }
                    }
                    Ok(response) => {
                        warn!("Pull on {} returned {}", topic, response.status());
                        tokio::time::sleep(PULL_RETRY_DELAY).await;
                        continue;
                    }
                    Err(e) => {
                        warn!("Pull on {} failed: {}", topic, e);
                        tokio::time::sleep(PULL_RETRY_DELAY).await;
                        continue;
                    }
                };

                if messages.is_empty() {
                    continue;
                }

                let mut ack_ids = Vec::with_capacity(messages.len());
                for received in messages {
                    ack_ids.push(received.ack_id);
                    match general_purpose::STANDARD.decode(received.message.data) {
                        Ok(data) => {
                            if tx.send(data).await.is_err() {
                                debug!("Subscriber for {} went away", topic);
                                return;
                            }
                        }
                        Err(e) => warn!("Dropping undecodable message on {}: {}", topic, e),
                    }
                }

                if let Err(e) = with_auth(client.post(&ack_url).json(&json!({ "ackIds": ack_ids })))
                    .send()
                    .await
                {
                    warn!("Failed to acknowledge messages on {}: {}", topic, e);
                }
            }
            debug!("Subscription to {} aborted", topic);
        });

        Ok(rx)
    }
}

/// Publisher kept in process memory, used when no Pub/Sub project is configured
#[derive(Debug, Default)]
pub struct MemoryPublisher {
    topics: RwLock<HashMap<String, broadcast::Sender<Vec<u8>>>>,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Publisher for MemoryPublisher {
    async fn create_topic(&self, topic: &str) -> Result<()> {
        self.topics
            .write()
            .map_err(|_| lock_poisoned())?
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(SUBSCRIPTION_CAPACITY).0);
        Ok(())
    }

    async fn publish(&self, topic: &str, data: Vec<u8>) -> Result<()> {
        let topics = self.topics.read().map_err(|_| lock_poisoned())?;
        let sender = topics
            .get(topic)
            .ok_or_else(|| ConferenceError::TopicNotFound(topic.to_string()))?;
        // No subscriber means nobody is listening yet; the message is dropped
        let _ = sender.send(data);
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
        mut abort: oneshot::Receiver<()>,
    ) -> Result<mpsc::Receiver<Vec<u8>>> {
        let mut source = self
            .topics
            .read()
            .map_err(|_| lock_poisoned())?
            .get(topic)
            .ok_or_else(|| ConferenceError::TopicNotFound(topic.to_string()))?
            .subscribe();

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_CAPACITY);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = &mut abort => break,
                    received = source.recv() => match received {
                        Ok(data) => {
                            if tx.send(data).await.is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Subscriber lagged, {} messages skipped", n);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        });

        Ok(rx)
    }
}

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::clients::Publisher;
use crate::config::Config;
use crate::error::{ConferenceError, Result};

pub const JAVASCRIPT: &str = "javascript";
pub const PYTHON: &str = "python";
pub const GO_LANG: &str = "golang";

/// Language to topic bindings
#[derive(Debug, Clone)]
pub struct TopicBindings {
    topics: HashMap<String, String>,
}

impl TopicBindings {
    pub fn new<L, T>(bindings: impl IntoIterator<Item = (L, T)>) -> Self
    where
        L: Into<String>,
        T: Into<String>,
    {
        Self {
            topics: bindings
                .into_iter()
                .map(|(language, topic)| (language.into(), topic.into()))
                .collect(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new([
            (JAVASCRIPT, config.javascript_topic.as_str()),
            (PYTHON, config.python_topic.as_str()),
            (GO_LANG, config.go_lang_topic.as_str()),
        ])
    }

    /// Topic for a language. Matching is exact.
    pub fn topic_for(&self, language: &str) -> Option<&str> {
        self.topics.get(language).map(String::as_str)
    }

    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.topics.values().map(String::as_str)
    }
}

/// Payload published for execution workers
#[derive(Debug, Serialize)]
pub struct PublishingCode<'a> {
    pub id: i32,
    #[serde(rename = "sessionId")]
    pub session_id: i32,
    pub code: &'a str,
}

/// Publishes code runs to the topic bound to their language
pub struct ConferencePublisher {
    publisher: Arc<dyn Publisher>,
    bindings: TopicBindings,
}

impl ConferencePublisher {
    pub fn new(publisher: Arc<dyn Publisher>, bindings: TopicBindings) -> Self {
        Self { publisher, bindings }
    }

    pub fn topic_for(&self, language: &str) -> Result<&str> {
        self.bindings
            .topic_for(language)
            .ok_or_else(|| ConferenceError::UnsupportedLanguage(language.to_string()))
    }

    /// Create every bound topic so publishing never hits an unknown topic
    pub async fn create_topics(&self) -> Result<()> {
        for topic in self.bindings.topics() {
            self.publisher.create_topic(topic).await?;
        }
        info!("Created {} code topics", self.bindings.topics.len());
        Ok(())
    }

    pub async fn publish_code(
        &self,
        session_id: i32,
        code_id: i32,
        raw_code: &str,
        language: &str,
    ) -> Result<()> {
        let topic = self.topic_for(language)?;
        let payload = serde_json::to_vec(&PublishingCode {
            id: code_id,
            session_id,
            code: raw_code,
        })?;
        self.publisher.publish(topic, payload).await
    }
}

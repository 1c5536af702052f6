use serde::{Deserialize, Deserializer, Serialize};

pub const SUBSCRIBE: &str = "subscribe";
pub const UNSUBSCRIBE: &str = "unsubscribe";
pub const PUBLISH: &str = "publish";

/// Kind of a signaling message exchanged between conference peers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Subscribe,
    Unsubscribe,
    Publish,
}

impl SignalKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            SUBSCRIBE => Some(SignalKind::Subscribe),
            UNSUBSCRIBE => Some(SignalKind::Unsubscribe),
            PUBLISH => Some(SignalKind::Publish),
            _ => None,
        }
    }
}

/// Signaling frame as sent by the browser peers.
///
/// Only `type` and `topics` are interpreted; the full frame text is relayed as is.
#[derive(Serialize, Deserialize, Debug)]
pub struct ReceivedSignal {
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub topics: Vec<String>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

impl ReceivedSignal {
    pub fn kind(&self) -> Option<SignalKind> {
        SignalKind::parse(&self.message_type)
    }
}

/// Sent to a socket right before it is closed for a rejected connection
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct WebsocketError {
    pub error: String,
}

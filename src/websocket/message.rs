use crate::common::{Result, WiredExchangeError};
use serde::Deserialize;
use serde::de::DeserializeOwned;

/// Routing fields shared by every KuCoin frame. Everything else stays in the raw text.
#[derive(Debug, Default, Clone, Deserialize)]
struct Envelope {
    #[serde(default)]
    id: Option<serde_json::Value>,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    topic: Option<String>,
    #[serde(default)]
    subject: Option<String>,
}

/// One inbound text frame as seen by the handler chain.
///
/// The frame is parsed once on arrival; handlers match on [`kind`](Self::kind),
/// [`id`](Self::id) or [`topic`](Self::topic) and deserialize the payload
/// themselves with [`parse`](Self::parse). A frame that is not a JSON object is
/// still dispatched (only the sink will claim it).
#[derive(Debug, Clone)]
pub struct InboundMessage {
    text: String,
    envelope: Option<Envelope>,
}

impl InboundMessage {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let envelope = serde_json::from_str::<Envelope>(&text).ok();
        Self { text, envelope }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_well_formed(&self) -> bool {
        self.envelope.is_some()
    }

    /// The `type` field (`welcome`, `pong`, `ack`, `message`, ...).
    pub fn kind(&self) -> Option<&str> {
        self.envelope.as_ref()?.kind.as_deref()
    }

    pub fn topic(&self) -> Option<&str> {
        self.envelope.as_ref()?.topic.as_deref()
    }

    pub fn subject(&self) -> Option<&str> {
        self.envelope.as_ref()?.subject.as_deref()
    }

    /// Correlation id; KuCoin echoes it back as a string, so numeric strings are accepted.
    pub fn id(&self) -> Option<u64> {
        match self.envelope.as_ref()?.id.as_ref()? {
            serde_json::Value::Number(n) => n.as_u64(),
            serde_json::Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn parse<T: DeserializeOwned>(&self) -> Result<T> {
        if !self.is_well_formed() {
            return Err(WiredExchangeError::MalformedMessage(self.text.clone()));
        }
        Ok(serde_json::from_str(&self.text)?)
    }
}

impl From<&str> for InboundMessage {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_routing_fields() {
        let msg = InboundMessage::new(r#"{"id":"123456789","type":"ack"}"#);
        assert!(msg.is_well_formed());
        assert_eq!(msg.kind(), Some("ack"));
        assert_eq!(msg.id(), Some(123_456_789));
        assert_eq!(msg.topic(), None);

        let msg = InboundMessage::new(r#"{"id":42,"type":"pong"}"#);
        assert_eq!(msg.id(), Some(42));
    }

    #[test]
    fn garbage_is_kept_but_not_well_formed() {
        let msg = InboundMessage::new("not json");
        assert!(!msg.is_well_formed());
        assert_eq!(msg.kind(), None);
        assert_eq!(msg.text(), "not json");
        assert!(matches!(
            msg.parse::<serde_json::Value>(),
            Err(WiredExchangeError::MalformedMessage(_))
        ));
    }
}

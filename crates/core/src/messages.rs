use crate::models::Quote;
use serde::{Deserialize, Serialize};

/// What a realtime message asks for or announces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamAction {
    /// Client -> server: start receiving updates for `symbol`.
    Subscribe,
    /// Server -> client: a fresh quote for `symbol`.
    Update,
    /// Anything else a client sends; ignored.
    #[serde(other)]
    Unknown,
}

/// The realtime message, in both directions:
/// `{ "action": "subscribe" | "update", "symbol"?: string, "payload"?: Quote }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamMessage {
    pub action: StreamAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Quote>,
}

impl StreamMessage {
    pub fn subscribe(symbol: &str) -> Self {
        Self {
            action: StreamAction::Subscribe,
            symbol: Some(symbol.to_string()),
            payload: None,
        }
    }

    /// An update addressed to the subscribers of `symbol`.
    pub fn update(symbol: &str, quote: Quote) -> Self {
        Self {
            action: StreamAction::Update,
            symbol: Some(symbol.to_string()),
            payload: Some(quote),
        }
    }

    /// The symbol of a subscribe request, if this is one and it names a symbol.
    pub fn subscription_symbol(&self) -> Option<&str> {
        match (self.action, self.symbol.as_deref()) {
            (StreamAction::Subscribe, Some(symbol)) if !symbol.trim().is_empty() => Some(symbol),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_subscribe() {
        let msg: StreamMessage =
            serde_json::from_str(r#"{"action":"subscribe","symbol":"aapl"}"#).unwrap();
        assert_eq!(msg.action, StreamAction::Subscribe);
        assert_eq!(msg.subscription_symbol(), Some("aapl"));
    }

    #[test]
    fn test_unknown_action_is_not_a_subscription() {
        let msg: StreamMessage =
            serde_json::from_str(r#"{"action":"unsubscribe","symbol":"AAPL"}"#).unwrap();
        assert_eq!(msg.action, StreamAction::Unknown);
        assert_eq!(msg.subscription_symbol(), None);
    }

    #[test]
    fn test_blank_symbol_is_ignored() {
        let msg: StreamMessage =
            serde_json::from_str(r#"{"action":"subscribe","symbol":"  "}"#).unwrap();
        assert_eq!(msg.subscription_symbol(), None);
    }

    #[test]
    fn test_symbol_less_message_omits_fields() {
        let msg = StreamMessage {
            action: StreamAction::Update,
            symbol: None,
            payload: None,
        };
        assert_eq!(serde_json::to_string(&msg).unwrap(), r#"{"action":"update"}"#);
    }
}

//! Messages pushed to connected clients.

use serde::{Deserialize, Serialize};

use crate::feed::ChangeEvent;

/// A message delivered to client connections.
///
/// Serialized with a `type` tag, e.g.
/// `{"type":"market_price_update","data":{...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RealtimeMessage {
    /// Text sent by a client, echoed to every connection under its key.
    Message { message: String },
    /// A row change on a subscribed table.
    TableChange { data: ChangeEvent },
    /// A market price row changed for a crop.
    MarketPriceUpdate { data: ChangeEvent },
    /// A weather row changed for a location.
    WeatherUpdate { data: ChangeEvent },
}

impl RealtimeMessage {
    /// The wire value of the `type` tag.
    pub fn event_type(&self) -> &'static str {
        match self {
            RealtimeMessage::Message { .. } => "message",
            RealtimeMessage::TableChange { .. } => "table_change",
            RealtimeMessage::MarketPriceUpdate { .. } => "market_price_update",
            RealtimeMessage::WeatherUpdate { .. } => "weather_update",
        }
    }

    /// Encode as a JSON text frame.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// How a change event is wrapped before fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    TableChange,
    MarketPriceUpdate,
    WeatherUpdate,
}

impl MessageKind {
    pub fn wrap(self, event: ChangeEvent) -> RealtimeMessage {
        match self {
            MessageKind::TableChange => RealtimeMessage::TableChange { data: event },
            MessageKind::MarketPriceUpdate => RealtimeMessage::MarketPriceUpdate { data: event },
            MessageKind::WeatherUpdate => RealtimeMessage::WeatherUpdate { data: event },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::ChangeType;
    use serde_json::{json, Value};

    #[test]
    fn test_echo_message_shape() {
        let msg = RealtimeMessage::Message {
            message: "hi".to_string(),
        };
        let value: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(value, json!({"type": "message", "message": "hi"}));
        assert_eq!(msg.event_type(), "message");
    }

    #[test]
    fn test_wrap_uses_kind_tag() {
        let event = ChangeEvent::new("market_prices", ChangeType::Update)
            .with_record(json!({"crop_name": "Onion", "modal_price": 1850.0}));

        let msg = MessageKind::MarketPriceUpdate.wrap(event.clone());
        assert_eq!(msg.event_type(), "market_price_update");

        let value: Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "market_price_update");
        assert_eq!(value["data"]["table"], "market_prices");
        assert_eq!(value["data"]["type"], "UPDATE");
        assert_eq!(value["data"]["record"]["crop_name"], "Onion");

        let decoded: RealtimeMessage = serde_json::from_value(value).unwrap();
        assert_eq!(decoded, RealtimeMessage::MarketPriceUpdate { data: event });
    }
}

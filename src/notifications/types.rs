use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

const ANONYMOUS_DONOR: &str = "Donante Anónimo";

/// A donation pushed by the backend over the notification socket
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NotificationEvent {
    pub id: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub read: bool,
    #[serde(default, deserialize_with = "lenient_id")]
    pub transaction_id: Option<u64>,
    #[serde(rename = "monto", default)]
    pub amount: f64,
    #[serde(rename = "nombre_pagador", default)]
    pub payer_name: Option<String>,
}

impl NotificationEvent {
    /// Payer name, else everything after the first "de " in the message
    /// that is followed by a name.
    pub fn display_name(&self) -> String {
        if let Some(name) = self.payer_name.as_deref().map(str::trim) {
            if !name.is_empty() {
                return name.to_owned();
            }
        }
        self.message
            .match_indices("de ")
            .map(|(at, _)| self.message[at + 3..].trim())
            .find(|tail| !tail.is_empty())
            .map(str::to_owned)
            .unwrap_or_else(|| ANONYMOUS_DONOR.to_owned())
    }
}

// ids arrive as numbers or numeric strings
fn lenient_id<'de, D: Deserializer<'de>>(de: D) -> Result<Option<u64>, D::Error> {
    Ok(match Option::<Value>::deserialize(de)? {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

#[derive(Debug, PartialEq)]
pub(crate) enum Inbound {
    Transaction(NotificationEvent),
    Ignored(String),
}

/// Parses one socket frame. Only `type == "transaction"` carries an event.
pub(crate) fn parse_frame(text: &str) -> Result<Inbound, serde_json::Error> {
    let value: Value = serde_json::from_str(text)?;
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned();
    if kind != "transaction" {
        return Ok(Inbound::Ignored(kind));
    }
    serde_json::from_value(value).map(Inbound::Transaction)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(message: &str, payer: Option<&str>) -> NotificationEvent {
        NotificationEvent {
            id: 1,
            title: "Nueva donación".into(),
            message: message.into(),
            timestamp: "2025-01-01T10:00:00".into(),
            read: false,
            transaction_id: None,
            amount: 5.0,
            payer_name: payer.map(str::to_owned),
        }
    }

    #[test]
    fn transaction_frames_become_events() {
        let text = json!({
            "type": "transaction",
            "id": 17,
            "title": "Nueva donación",
            "message": "Recibiste S/ 10.00 de Ana",
            "timestamp": "2025-01-01T10:00:00",
            "read": false,
            "transaction_id": "991",
            "monto": 10.0,
            "nombre_pagador": null
        })
        .to_string();

        match parse_frame(&text).unwrap() {
            Inbound::Transaction(ev) => {
                assert_eq!(ev.id, 17);
                assert_eq!(ev.amount, 10.0);
                assert_eq!(ev.transaction_id, Some(991));
                assert_eq!(ev.display_name(), "Ana");
            }
            other => panic!("expected transaction, got {other:?}"),
        }
    }

    #[test]
    fn other_types_and_garbage() {
        assert_eq!(
            parse_frame(r#"{"type":"ping"}"#).unwrap(),
            Inbound::Ignored("ping".into())
        );
        assert!(parse_frame("not json").is_err());
        assert!(parse_frame(r#"{"type":"transaction"}"#).is_err());
    }

    #[test]
    fn display_name_fallbacks() {
        assert_eq!(event("x de Ana", Some(" Luis ")).display_name(), "Luis");
        assert_eq!(event("Yape de Carla Pérez", None).display_name(), "Carla Pérez");
        assert_eq!(event("Nueva donación", Some("")).display_name(), ANONYMOUS_DONOR);
        assert_eq!(event("Donación de ", None).display_name(), ANONYMOUS_DONOR);
    }

    #[test]
    fn display_name_keeps_names_containing_de() {
        let ev = event("Recibiste S/ 5.00 de Ana de la Cruz", None);
        assert_eq!(ev.display_name(), "Ana de la Cruz");
    }
}

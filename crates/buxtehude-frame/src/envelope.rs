use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The payload encoding used on the wire.
///
/// The numeric codes are part of the wire protocol (the first framed
/// byte of every message).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageFormat {
    Json,
    MsgPack,
}

impl MessageFormat {
    /// The wire code of this format.
    pub const fn code(self) -> u8 {
        match self {
            MessageFormat::Json => 0,
            MessageFormat::MsgPack => 1,
        }
    }

    /// Parse a wire code. Unknown codes are rejected.
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(MessageFormat::Json),
            1 => Some(MessageFormat::MsgPack),
            _ => None,
        }
    }
}

impl Serialize for MessageFormat {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

impl<'de> Deserialize<'de> for MessageFormat {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = u8::deserialize(deserializer)?;
        MessageFormat::from_code(code)
            .ok_or_else(|| de::Error::custom(format!("unknown message format {code}")))
    }
}

/// The routable message unit.
///
/// `msg_type` is the dispatch key (serialised as `type`); `src` and
/// `dest` are team names; `content` carries an arbitrary structured
/// value. Unset optional fields are omitted from the encoded object and
/// default to empty on decode.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type", default)]
    pub msg_type: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub src: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub dest: String,

    #[serde(default)]
    pub only_first: bool,

    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub content: Value,
}

impl Envelope {
    /// An envelope of the given type with all other fields unset.
    pub fn of_type(msg_type: impl Into<String>) -> Self {
        Self {
            msg_type: msg_type.into(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unset_fields_are_omitted() {
        let envelope = Envelope::of_type("hello");
        let encoded = serde_json::to_string(&envelope).unwrap();

        assert!(encoded.contains("\"type\":\"hello\""));
        assert!(encoded.contains("\"only_first\":false"));
        assert!(!encoded.contains("src"));
        assert!(!encoded.contains("dest"));
        assert!(!encoded.contains("content"));
    }

    #[test]
    fn absent_fields_default_on_decode() {
        let envelope: Envelope = serde_json::from_str("{\"type\":\"hello\"}").unwrap();
        assert_eq!(envelope.msg_type, "hello");
        assert!(envelope.src.is_empty());
        assert!(envelope.dest.is_empty());
        assert!(!envelope.only_first);
        assert!(envelope.content.is_null());
    }

    #[test]
    fn typeless_object_decodes_with_empty_type() {
        let envelope: Envelope = serde_json::from_str("{\"only_first\":true}").unwrap();
        assert!(envelope.msg_type.is_empty());
        assert!(envelope.only_first);
    }

    #[test]
    fn full_envelope_roundtrips() {
        let envelope = Envelope {
            msg_type: "job".into(),
            src: "alpha".into(),
            dest: "beta".into(),
            only_first: true,
            content: json!({ "priority": 3, "tags": ["a", "b"] }),
        };

        let encoded = serde_json::to_vec(&envelope).unwrap();
        let decoded: Envelope = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn format_codes_are_stable() {
        assert_eq!(MessageFormat::Json.code(), 0);
        assert_eq!(MessageFormat::MsgPack.code(), 1);
        assert_eq!(MessageFormat::from_code(0), Some(MessageFormat::Json));
        assert_eq!(MessageFormat::from_code(1), Some(MessageFormat::MsgPack));
        assert_eq!(MessageFormat::from_code(2), None);
    }

    #[test]
    fn format_serialises_as_number() {
        let value = serde_json::to_value(MessageFormat::MsgPack).unwrap();
        assert_eq!(value, json!(1));
        let parsed: MessageFormat = serde_json::from_value(json!(0)).unwrap();
        assert_eq!(parsed, MessageFormat::Json);
    }
}

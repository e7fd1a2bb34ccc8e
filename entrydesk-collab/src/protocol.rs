//! Shout protocol carried over a collaborative document's event channel.
//!
//! Wire format (JSON):
//! ```text
//! { "name": "shout", "data": [ kind, senderId, payload? ] }
//!
//!   kind     "open" | "ping" | "focus" | "close"
//!   senderId user id string (sys.id)
//!   payload  only for "focus": "fields.<fieldId>.<localeId>"
//! ```
//!
//! Tuples are decoded into the closed [`Shout`] sum type at the hub
//! boundary. Unknown kinds are reported as [`ShoutError::UnknownKind`] so
//! callers can drop them without treating them as corruption.

use serde::de::Error as _;
use serde::ser::SerializeSeq;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Event name that carries presence shouts.
pub const SHOUT_EVENT: &str = "shout";

/// Remote or local user identifier (the user record's `sys.id`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for UserId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A field/locale pair inside an entry, rendered as `fields.<field>.<locale>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldPath {
    pub field_id: String,
    pub locale_id: String,
}

impl FieldPath {
    pub fn new(field_id: impl Into<String>, locale_id: impl Into<String>) -> Self {
        Self {
            field_id: field_id.into(),
            locale_id: locale_id.into(),
        }
    }

    /// Parse a `fields.<field>.<locale>` path. Returns `None` for anything else.
    pub fn parse(path: &str) -> Option<Self> {
        let mut parts = path.splitn(3, '.');
        match (parts.next(), parts.next(), parts.next()) {
            (Some("fields"), Some(field), Some(locale)) if !field.is_empty() && !locale.is_empty() => {
                Some(Self::new(field, locale))
            }
            _ => None,
        }
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fields.{}.{}", self.field_id, self.locale_id)
    }
}

/// Message kinds of the shout protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShoutKind {
    /// A client connected and wants everybody to report back
    Open,
    /// Heartbeat without field focus
    Ping,
    /// Heartbeat with the sender's focused field path
    Focus,
    /// Sender is leaving the document
    Close,
}

impl ShoutKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Ping => "ping",
            Self::Focus => "focus",
            Self::Close => "close",
        }
    }

    pub fn parse(kind: &str) -> Option<Self> {
        match kind {
            "open" => Some(Self::Open),
            "ping" => Some(Self::Ping),
            "focus" => Some(Self::Focus),
            "close" => Some(Self::Close),
            _ => None,
        }
    }
}

/// A decoded presence message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shout {
    Open { from: UserId },
    Ping { from: UserId },
    Focus { from: UserId, path: String },
    Close { from: UserId },
}

impl Shout {
    pub fn open(from: impl Into<UserId>) -> Self {
        Self::Open { from: from.into() }
    }

    pub fn ping(from: impl Into<UserId>) -> Self {
        Self::Ping { from: from.into() }
    }

    pub fn focus(from: impl Into<UserId>, path: &FieldPath) -> Self {
        Self::Focus {
            from: from.into(),
            path: path.to_string(),
        }
    }

    pub fn close(from: impl Into<UserId>) -> Self {
        Self::Close { from: from.into() }
    }

    pub fn kind(&self) -> ShoutKind {
        match self {
            Self::Open { .. } => ShoutKind::Open,
            Self::Ping { .. } => ShoutKind::Ping,
            Self::Focus { .. } => ShoutKind::Focus,
            Self::Close { .. } => ShoutKind::Close,
        }
    }

    /// Get the sender from any variant.
    pub fn sender(&self) -> &UserId {
        match self {
            Self::Open { from } | Self::Ping { from } | Self::Close { from } => from,
            Self::Focus { from, .. } => from,
        }
    }

    /// Build the wire tuple `[kind, sender, payload?]`.
    pub fn to_value(&self) -> Value {
        let mut tuple = vec![
            Value::from(self.kind().as_str()),
            Value::from(self.sender().as_str()),
        ];
        if let Self::Focus { path, .. } = self {
            tuple.push(Value::from(path.as_str()));
        }
        Value::Array(tuple)
    }

    /// Decode a wire tuple. Trailing elements beyond the payload are ignored.
    pub fn from_value(value: &Value) -> Result<Self, ShoutError> {
        let tuple = value.as_array().ok_or(ShoutError::NotAnArray)?;
        let kind = tuple
            .first()
            .and_then(Value::as_str)
            .ok_or(ShoutError::MissingKind)?;
        let kind = ShoutKind::parse(kind).ok_or_else(|| ShoutError::UnknownKind(kind.to_string()))?;
        let from = tuple
            .get(1)
            .and_then(Value::as_str)
            .map(UserId::from)
            .ok_or(ShoutError::MissingSender)?;

        Ok(match kind {
            ShoutKind::Open => Self::Open { from },
            ShoutKind::Ping => Self::Ping { from },
            ShoutKind::Close => Self::Close { from },
            ShoutKind::Focus => {
                let path = tuple
                    .get(2)
                    .and_then(Value::as_str)
                    .ok_or(ShoutError::MissingPayload)?;
                Self::Focus {
                    from,
                    path: path.to_string(),
                }
            }
        })
    }
}

impl Serialize for Shout {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let len = if matches!(self, Self::Focus { .. }) { 3 } else { 2 };
        let mut seq = serializer.serialize_seq(Some(len))?;
        seq.serialize_element(self.kind().as_str())?;
        seq.serialize_element(self.sender().as_str())?;
        if let Self::Focus { path, .. } = self {
            seq.serialize_element(path)?;
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for Shout {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Shout::from_value(&value).map_err(D::Error::custom)
    }
}

/// An event delivered by the collaborative document session.
///
/// Only events named [`SHOUT_EVENT`] are interesting to presence; the rest
/// (operation acks, remote ops, ...) pass through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocEvent {
    pub name: String,
    #[serde(default)]
    pub data: Value,
}

impl DocEvent {
    pub fn new(name: impl Into<String>, data: Value) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }

    /// Wrap a shout in its document event.
    pub fn shout(shout: &Shout) -> Self {
        Self::new(SHOUT_EVENT, shout.to_value())
    }

    /// Decode the shout carried by this event.
    ///
    /// Returns `None` for events that are not shouts.
    pub fn as_shout(&self) -> Option<Result<Shout, ShoutError>> {
        (self.name == SHOUT_EVENT).then(|| Shout::from_value(&self.data))
    }

    /// Serialize to the JSON wire format.
    pub fn encode(&self) -> Result<Vec<u8>, ShoutError> {
        serde_json::to_vec(self).map_err(|e| ShoutError::Json(e.to_string()))
    }

    /// Deserialize from the JSON wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, ShoutError> {
        serde_json::from_slice(bytes).map_err(|e| ShoutError::Json(e.to_string()))
    }
}

/// Shout decoding errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShoutError {
    #[error("JSON error: {0}")]
    Json(String),
    #[error("Shout data is not an array")]
    NotAnArray,
    #[error("Shout has no kind")]
    MissingKind,
    #[error("Unknown shout kind: {0}")]
    UnknownKind(String),
    #[error("Shout has no sender")]
    MissingSender,
    #[error("Focus shout has no field path")]
    MissingPayload,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_all_kinds() {
        assert_eq!(Shout::from_value(&json!(["open", "u1"])).unwrap(), Shout::open("u1"));
        assert_eq!(Shout::from_value(&json!(["ping", "u1"])).unwrap(), Shout::ping("u1"));
        assert_eq!(Shout::from_value(&json!(["close", "u1"])).unwrap(), Shout::close("u1"));

        let focus = Shout::from_value(&json!(["focus", "u2", "fields.title.en-US"])).unwrap();
        assert_eq!(focus, Shout::focus("u2", &FieldPath::new("title", "en-US")));
        assert_eq!(focus.sender().as_str(), "u2");
        assert_eq!(focus.kind(), ShoutKind::Focus);
    }

    #[test]
    fn test_encode_tuple_shape() {
        let focus = Shout::focus("u1", &FieldPath::new("F", "L"));
        assert_eq!(focus.to_value(), json!(["focus", "u1", "fields.F.L"]));
        assert_eq!(serde_json::to_value(&focus).unwrap(), json!(["focus", "u1", "fields.F.L"]));

        // Close carries no payload.
        assert_eq!(Shout::close("u1").to_value(), json!(["close", "u1"]));
    }

    #[test]
    fn test_unknown_kind_is_reported() {
        let err = Shout::from_value(&json!(["typing", "u1"])).unwrap_err();
        assert_eq!(err, ShoutError::UnknownKind("typing".into()));
    }

    #[test]
    fn test_malformed_tuples() {
        assert_eq!(Shout::from_value(&json!({"kind": "ping"})).unwrap_err(), ShoutError::NotAnArray);
        assert_eq!(Shout::from_value(&json!([])).unwrap_err(), ShoutError::MissingKind);
        assert_eq!(Shout::from_value(&json!([7, "u1"])).unwrap_err(), ShoutError::MissingKind);
        assert_eq!(Shout::from_value(&json!(["ping"])).unwrap_err(), ShoutError::MissingSender);
        assert_eq!(
            Shout::from_value(&json!(["focus", "u1"])).unwrap_err(),
            ShoutError::MissingPayload
        );
    }

    #[test]
    fn test_trailing_elements_ignored() {
        let shout = Shout::from_value(&json!(["ping", "u1", null, {"future": true}])).unwrap();
        assert_eq!(shout, Shout::ping("u1"));
    }

    #[test]
    fn test_doc_event_wire_format() {
        let event = DocEvent::shout(&Shout::ping("u9"));
        let bytes = event.encode().unwrap();
        let text = String::from_utf8(bytes.clone()).unwrap();
        assert_eq!(text, r#"{"name":"shout","data":["ping","u9"]}"#);

        let decoded = DocEvent::decode(&bytes).unwrap();
        assert_eq!(decoded.as_shout().unwrap().unwrap(), Shout::ping("u9"));
    }

    #[test]
    fn test_non_shout_event_is_skipped() {
        let event = DocEvent::new("acknowledge", json!({"v": 12}));
        assert!(event.as_shout().is_none());

        let no_data = DocEvent::decode(br#"{"name":"remoteop"}"#).unwrap();
        assert_eq!(no_data.data, Value::Null);
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            ShoutError::UnknownKind("typing".into()).to_string(),
            "Unknown shout kind: typing"
        );
    }

    #[test]
    fn test_decode_invalid_bytes() {
        assert!(matches!(DocEvent::decode(b"\xFF\xFE"), Err(ShoutError::Json(_))));
    }

    #[test]
    fn test_field_path_parse() {
        let path = FieldPath::parse("fields.body.de-DE").unwrap();
        assert_eq!(path.field_id, "body");
        assert_eq!(path.locale_id, "de-DE");
        assert_eq!(path.to_string(), "fields.body.de-DE");

        assert!(FieldPath::parse("sys.id").is_none());
        assert!(FieldPath::parse("fields.body").is_none());
        assert!(FieldPath::parse("fields..en").is_none());
    }
}

// bridge-protocol: WebSocket wire types for the device-link bridge.
//
// Clients send one JSON command envelope per text frame. The server answers
// with plain text frames (no JSON wrapper) and reports errors only through the
// close reason of the WebSocket.

use serde::{Deserialize, Serialize};
use serde_json::ser::Formatter;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::io;

// ---------------------------------------------------------------------------
// Frame and close-reason constants
// ---------------------------------------------------------------------------

/// First text frame sent to the peer after the device link accepted the login.
pub const LOGIN_SUCCESS: &str = "login success";

/// Close reasons that are part of the observable contract. Any other close
/// reason is the display text of the error that ended the session.
pub mod close_reasons {
    pub const UNKNOWN_CLIENT_IDENTIFY: &str = "unknown client identify";
    pub const CLIENT_EXIT: &str = "client exit";
}

/// Query parameters read from the upgrade request.
pub mod query_params {
    pub const PRODUCT_SN: &str = "product_sn";
    pub const DEVICE_SN: &str = "device_sn";
}

/// A close frame payload is capped at 125 bytes, two of which hold the code.
pub const MAX_CLOSE_REASON_BYTES: usize = 123;

/// Cut `reason` down to what fits in a close frame, on a char boundary.
pub fn truncate_close_reason(reason: &str) -> &str {
    if reason.len() <= MAX_CLOSE_REASON_BYTES {
        return reason;
    }
    let mut end = MAX_CLOSE_REASON_BYTES;
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    &reason[..end]
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// The sub-device identity a WebSocket connection speaks for.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub product_sn: String,
    pub device_sn: String,
}

impl Identity {
    pub fn new(product_sn: impl Into<String>, device_sn: impl Into<String>) -> Self {
        Self {
            product_sn: product_sn.into(),
            device_sn: device_sn.into(),
        }
    }

    /// Read both identity parameters from a parsed query string.
    ///
    /// Values are trimmed; a missing or blank parameter is rejected.
    pub fn from_query(params: &HashMap<String, String>) -> Result<Self, IdentityError> {
        let product_sn = required_param(params, query_params::PRODUCT_SN)?;
        let device_sn = required_param(params, query_params::DEVICE_SN)?;
        Ok(Self::new(product_sn, device_sn))
    }

    /// `product_sn.device_sn`; used as a log key only.
    pub fn client_id(&self) -> String {
        format!("{}.{}", self.product_sn, self.device_sn)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.product_sn, self.device_sn)
    }
}

fn required_param(
    params: &HashMap<String, String>,
    name: &'static str,
) -> Result<String, IdentityError> {
    let value = params.get(name).ok_or(IdentityError::Missing(name))?;
    let value = value.trim();
    if value.is_empty() {
        return Err(IdentityError::Invalid(name));
    }
    Ok(value.to_owned())
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    #[error("missing argument {0}")]
    Missing(&'static str),
    #[error("invalid argument {0}")]
    Invalid(&'static str),
}

// ---------------------------------------------------------------------------
// Command envelope
// ---------------------------------------------------------------------------

/// Value of the `action` key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    AddTopo,
    DeleteTopo,
    GetTopo,
    Logout,
    /// Anything else, including non-string values. Ignored by the router.
    Other(String),
}

impl Action {
    fn from_value(value: &Value) -> Self {
        match value {
            Value::String(s) => match s.as_str() {
                "add_topo" => Action::AddTopo,
                "delete_topo" => Action::DeleteTopo,
                "get_topo" => Action::GetTopo,
                "logout" => Action::Logout,
                other => Action::Other(other.to_owned()),
            },
            other => Action::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Action::AddTopo => "add_topo",
            Action::DeleteTopo => "delete_topo",
            Action::GetTopo => "get_topo",
            Action::Logout => "logout",
            Action::Other(s) => s,
        }
    }
}

/// Publish payload.
///
/// Objects are re-serialized in key order with `", "` / `": "` separators
/// and non-ASCII escaped as `\uXXXX`; strings are published as their raw
/// UTF-8 bytes, even when they look like JSON.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Object(Map<String, Value>),
    Text(String),
}

impl Payload {
    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Payload::Object(map)),
            Value::String(s) => Some(Payload::Text(s)),
            _ => None,
        }
    }

    /// Bytes handed to the device link.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Payload::Object(map) => {
                let mut out = Vec::new();
                let mut ser = serde_json::Serializer::with_formatter(&mut out, SpacedAsciiFormatter);
                // Writing a Map<String, Value> into a Vec cannot fail.
                let _ = map.serialize(&mut ser);
                out
            }
            Payload::Text(s) => s.as_bytes().to_vec(),
        }
    }
}

/// JSON layout device-side consumers expect: `{"a": 1, "b": [1, 2]}`, with
/// every character outside printable ASCII written as a `\uXXXX` escape.
struct SpacedAsciiFormatter;

impl Formatter for SpacedAsciiFormatter {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first { Ok(()) } else { writer.write_all(b", ") }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first { Ok(()) } else { writer.write_all(b", ") }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b": ")
    }

    fn write_string_fragment<W>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        let mut start = 0;
        for (i, ch) in fragment.char_indices() {
            if ch.is_ascii() && ch != '\x7f' {
                continue;
            }
            writer.write_all(&fragment.as_bytes()[start..i])?;
            let mut units = [0u16; 2];
            for unit in ch.encode_utf16(&mut units) {
                write!(writer, "\\u{unit:04x}")?;
            }
            start = i + ch.len_utf8();
        }
        writer.write_all(&fragment.as_bytes()[start..])
    }
}

/// One inbound frame, classified by key presence.
///
/// `action` wins over `topic`/`payload`; anything else is unrecognized.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Action(Action),
    Publish { topic: String, payload: Payload },
    Unrecognized,
}

impl Command {
    /// Parse a text frame. Only malformed JSON is an error; a well-formed
    /// frame of an unknown shape is `Command::Unrecognized`.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(text)?;
        Ok(Self::from_value(value))
    }

    pub fn from_value(value: Value) -> Self {
        let Value::Object(mut obj) = value else {
            return Command::Unrecognized;
        };
        if let Some(action) = obj.get("action") {
            return Command::Action(Action::from_value(action));
        }
        match (obj.remove("topic"), obj.remove("payload")) {
            (Some(Value::String(topic)), Some(payload)) => match Payload::from_value(payload) {
                Some(payload) => Command::Publish { topic, payload },
                None => Command::Unrecognized,
            },
            _ => Command::Unrecognized,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[test]
    fn identity_from_query_trims_and_builds_client_id() {
        let id = Identity::from_query(&params(&[("product_sn", " P1 "), ("device_sn", "D1")]))
            .unwrap();
        assert_eq!(id, Identity::new("P1", "D1"));
        assert_eq!(id.client_id(), "P1.D1");
        assert_eq!(id.to_string(), "P1.D1");
    }

    #[test]
    fn identity_from_query_rejects_missing_and_blank() {
        let err = Identity::from_query(&params(&[("device_sn", "D1")])).unwrap_err();
        assert_eq!(err, IdentityError::Missing("product_sn"));
        assert_eq!(err.to_string(), "missing argument product_sn");

        let err = Identity::from_query(&params(&[("product_sn", "P1")])).unwrap_err();
        assert_eq!(err.to_string(), "missing argument device_sn");

        let err =
            Identity::from_query(&params(&[("product_sn", "P1"), ("device_sn", "  ")])).unwrap_err();
        assert_eq!(err, IdentityError::Invalid("device_sn"));
    }

    #[test]
    fn action_key_wins_over_publish_keys() {
        let cmd =
            Command::parse(r#"{"action":"logout","topic":"t","payload":"x"}"#).unwrap();
        assert_eq!(cmd, Command::Action(Action::Logout));
    }

    #[test]
    fn non_string_action_is_other() {
        let cmd = Command::parse(r#"{"action":7}"#).unwrap();
        assert_eq!(cmd, Command::Action(Action::Other("7".to_owned())));
    }

    #[test]
    fn publish_requires_string_topic_and_object_or_string_payload() {
        assert_eq!(
            Command::parse(r#"{"topic":1,"payload":"x"}"#).unwrap(),
            Command::Unrecognized
        );
        assert_eq!(
            Command::parse(r#"{"topic":"t","payload":[1,2]}"#).unwrap(),
            Command::Unrecognized
        );
        assert_eq!(
            Command::parse(r#"{"topic":"t"}"#).unwrap(),
            Command::Unrecognized
        );
    }

    #[test]
    fn non_object_json_is_unrecognized() {
        assert_eq!(Command::parse("[1,2,3]").unwrap(), Command::Unrecognized);
        assert_eq!(Command::parse(r#""action""#).unwrap(), Command::Unrecognized);
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(Command::parse("{not-json").is_err());
    }

    #[test]
    fn object_and_text_payloads_differ_on_the_wire() {
        let object = Command::parse(r#"{"topic":"t","payload":{"a":1}}"#).unwrap();
        let text = Command::parse(r#"{"topic":"t","payload":"{\"a\":1}"}"#).unwrap();
        let (Command::Publish { payload: object, .. }, Command::Publish { payload: text, .. }) =
            (object, text)
        else {
            panic!("expected two publish commands");
        };
        assert_eq!(object.to_bytes(), br#"{"a": 1}"#.to_vec());
        assert_eq!(text.to_bytes(), br#"{"a":1}"#.to_vec());
        assert_ne!(object.to_bytes(), text.to_bytes());
    }

    #[test]
    fn object_payload_keeps_key_order_and_escapes_non_ascii() {
        let cmd = Command::parse(r#"{"topic":"t","payload":{"b":1,"a":"é","c":[1,{"d":null}]}}"#)
            .unwrap();
        let Command::Publish { payload, .. } = cmd else {
            panic!("expected publish command");
        };
        assert_eq!(
            String::from_utf8(payload.to_bytes()).unwrap(),
            r#"{"b": 1, "a": "\u00e9", "c": [1, {"d": null}]}"#
        );
    }

    #[test]
    fn astral_chars_escape_as_surrogate_pairs() {
        let cmd = Command::parse(r#"{"topic":"t","payload":{"k":"a😀\n","e":{}}}"#).unwrap();
        let Command::Publish { payload, .. } = cmd else {
            panic!("expected publish command");
        };
        assert_eq!(
            String::from_utf8(payload.to_bytes()).unwrap(),
            r#"{"k": "a\ud83d\ude00\n", "e": {}}"#
        );
    }

    #[test]
    fn truncate_close_reason_respects_char_boundaries() {
        assert_eq!(truncate_close_reason("client exit"), "client exit");
        let long = "é".repeat(100);
        let cut = truncate_close_reason(&long);
        assert!(cut.len() <= MAX_CLOSE_REASON_BYTES);
        assert_eq!(cut.len(), 122);
    }
}

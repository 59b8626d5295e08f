//! Line-delimited JSON-RPC framing.
//!
//! # Wire format
//!
//! ```text
//! → {"jsonrpc":"2.0","id":"<uuid>","method":"send","params":{...,"account":"+1..."}}\n
//! ← {"jsonrpc":"2.0","id":"<uuid>","result":{...}}\n            Response
//! ← {"jsonrpc":"2.0","id":"<uuid>","error":{"code":-1,...}}\n    Response
//! ← {"jsonrpc":"2.0","method":"receive","params":{...}}\n       Notification
//! ```
//!
//! Outbound frames are compact and ASCII only: every non-ASCII character is
//! written as a `\uXXXX` escape (two escapes for characters outside the
//! basic multilingual plane). Inbound lines are classified by membership: an
//! object carrying `result` or `error` is a [`Frame::Response`], anything
//! else a [`Frame::Notification`].

use std::io;

use serde::{Deserialize, Serialize};
use serde_json::ser::Formatter;
use serde_json::{Map, Value};

use crate::error::{CodecError, CodecResult};

/// Protocol version tag written on every request.
pub const JSONRPC_VERSION: &str = "2.0";

// =============================================================================
// Frames
// =============================================================================

/// Outbound request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestFrame {
    pub jsonrpc: String,
    pub id: String,
    pub method: String,
    pub params: Map<String, Value>,
}

impl RequestFrame {
    /// Creates a request frame.
    pub fn new(id: impl Into<String>, method: impl Into<String>, params: Map<String, Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

/// `error` member of a failed response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Reply to an earlier request.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseFrame {
    /// Request id echoed by the relay; numbers are rendered as strings.
    pub id: Option<String>,
    /// `result` on success, the error object and its raw body on failure.
    pub outcome: Result<Value, (ErrorObject, Value)>,
}

impl ResponseFrame {
    /// Whether this response answers the request with id `id`.
    pub fn answers(&self, id: &str) -> bool {
        self.id.as_deref() == Some(id)
    }
}

/// Unsolicited message from the relay.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationFrame {
    pub method: String,
    pub params: Value,
}

/// A decoded inbound line.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Response(ResponseFrame),
    Notification(NotificationFrame),
}

// =============================================================================
// Codec
// =============================================================================

/// Stateless encoder/decoder for the line protocol.
pub struct WireCodec;

impl WireCodec {
    /// Serializes `frame` as compact ASCII JSON followed by a newline.
    pub fn encode<T: Serialize>(frame: &T) -> CodecResult<Vec<u8>> {
        let mut buf = Vec::with_capacity(128);
        let mut serializer = serde_json::Serializer::with_formatter(&mut buf, AsciiFormatter);
        frame
            .serialize(&mut serializer)
            .map_err(|e| CodecError::Encode(e.to_string()))?;
        buf.push(b'\n');
        Ok(buf)
    }

    /// Decodes one line into a [`Frame`].
    pub fn decode(line: &str) -> CodecResult<Frame> {
        let line = line.trim();
        if line.is_empty() {
            return Err(CodecError::Empty);
        }

        let value: Value =
            serde_json::from_str(line).map_err(|e| CodecError::Malformed(e.to_string()))?;
        let Value::Object(mut object) = value else {
            return Err(CodecError::NotAnObject);
        };

        if object.contains_key("result") || object.contains_key("error") {
            let id = object.remove("id").and_then(id_to_string);
            let outcome = match object.remove("error") {
                Some(body) if !body.is_null() => {
                    let error = ErrorObject::deserialize(&body).unwrap_or_else(|_| ErrorObject {
                        message: body.to_string(),
                        ..Default::default()
                    });
                    Err((error, body))
                }
                _ => Ok(object.remove("result").unwrap_or(Value::Null)),
            };
            return Ok(Frame::Response(ResponseFrame { id, outcome }));
        }

        let method = match object.remove("method") {
            Some(Value::String(method)) => method,
            _ => return Err(CodecError::MissingMethod),
        };
        let params = object.remove("params").unwrap_or(Value::Null);
        Ok(Frame::Notification(NotificationFrame { method, params }))
    }
}

fn id_to_string(id: Value) -> Option<String> {
    match id {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Compact formatter that escapes every non-ASCII character.
struct AsciiFormatter;

impl Formatter for AsciiFormatter {
    fn write_string_fragment<W>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        let mut start = 0;
        for (index, ch) in fragment.char_indices() {
            if ch.is_ascii() {
                continue;
            }
            writer.write_all(&fragment.as_bytes()[start..index])?;
            let mut units = [0u16; 2];
            for unit in ch.encode_utf16(&mut units) {
                write!(writer, "\\u{unit:04x}")?;
            }
            start = index + ch.len_utf8();
        }
        writer.write_all(&fragment.as_bytes()[start..])
    }
}

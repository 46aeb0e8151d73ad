//! Canonical message encoding
//!
//! Messages are encoded the way the reference JavaScript implementation
//! produces them with `JSON.stringify(msg, null, 2)`: fixed field order,
//! two-space indentation, `": "` separators, no trailing newline. Content
//! objects keep their key order as given. The signature covers the encoding
//! without the `signature` field; the message key hashes the full encoding.

use std::io;

use serde::Serialize;
use serde_json::ser::{Formatter, PrettyFormatter};
use serde_json::Value as JsonValue;

use super::message::{Message, MessageFields, MessageKey, WireMessage};
use crate::crypto;
use crate::error::DecodeError;

/// Largest magnitude JavaScript still prints as a plain integer
const JS_INTEGER_LIMIT: f64 = 1e21;
/// 2^53, past which not every integer has an exact f64
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_992.0;

/// Two-space pretty printing with JavaScript's number output
///
/// A float with no fractional part prints as an integer (`1`, not `1.0`)
/// and negative zero prints as `0`.
struct JsFormatter(PrettyFormatter<'static>);

impl Formatter for JsFormatter {
    fn write_f64<W: ?Sized + io::Write>(&mut self, writer: &mut W, value: f64) -> io::Result<()> {
        if value.fract() == 0.0 && value.abs() < JS_INTEGER_LIMIT {
            write!(writer, "{}", value as i128)
        } else {
            self.0.write_f64(writer, value)
        }
    }

    fn begin_array<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.0.begin_array(writer)
    }

    fn end_array<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.0.end_array(writer)
    }

    fn begin_array_value<W: ?Sized + io::Write>(
        &mut self,
        writer: &mut W,
        first: bool,
    ) -> io::Result<()> {
        self.0.begin_array_value(writer, first)
    }

    fn end_array_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.0.end_array_value(writer)
    }

    fn begin_object<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.0.begin_object(writer)
    }

    fn end_object<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.0.end_object(writer)
    }

    fn begin_object_key<W: ?Sized + io::Write>(
        &mut self,
        writer: &mut W,
        first: bool,
    ) -> io::Result<()> {
        self.0.begin_object_key(writer, first)
    }

    fn begin_object_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.0.begin_object_value(writer)
    }

    fn end_object_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.0.end_object_value(writer)
    }
}

fn to_js_json<T: Serialize + ?Sized>(value: &T) -> serde_json::Result<Vec<u8>> {
    let mut out = Vec::with_capacity(512);
    value.serialize(&mut serde_json::Serializer::with_formatter(
        &mut out,
        JsFormatter(PrettyFormatter::new()),
    ))?;
    Ok(out)
}

/// Deterministic encoding of the signable fields
pub fn canonicalize(fields: &MessageFields<'_>) -> Vec<u8> {
    to_js_json(fields).expect("message fields serialize to JSON")
}

/// Wire encoding of a signed message
pub fn encode(message: &Message) -> Vec<u8> {
    to_js_json(message).expect("messages serialize to JSON")
}

/// Store whole-valued floats in `value` as integers
///
/// Keeps content equal to what decoding its own encoding gives back. Floats
/// beyond 2^53 are left alone.
pub fn normalize_numbers(value: &mut JsonValue) {
    match value {
        JsonValue::Number(number) if number.is_f64() => {
            if let Some(float) = number.as_f64() {
                if float.fract() == 0.0 && float.abs() < MAX_SAFE_INTEGER {
                    *number = (float as i64).into();
                }
            }
        }
        JsonValue::Array(items) => items.iter_mut().for_each(normalize_numbers),
        JsonValue::Object(map) => map.values_mut().for_each(normalize_numbers),
        _ => {}
    }
}

/// Content address of an encoded message
pub fn hash(encoded: &[u8]) -> MessageKey {
    MessageKey::from_bytes(crypto::sha256(&[encoded]))
}

/// Parse a signed message from JSON
///
/// Whitespace is not significant here; the canonical form is recomputed from
/// the parsed fields when verifying.
pub fn decode(bytes: &[u8]) -> Result<Message, DecodeError> {
    let wire: WireMessage =
        serde_json::from_slice(bytes).map_err(|e| DecodeError::Json(e.to_string()))?;
    wire.try_into()
}

/// Parse a signed message that is already a JSON value (e.g. a packet body)
pub fn decode_value(value: JsonValue) -> Result<Message, DecodeError> {
    let wire: WireMessage =
        serde_json::from_value(value).map_err(|e| DecodeError::Json(e.to_string()))?;
    wire.try_into()
}

//! The encoded-value shape and helpers for building it.
//!
//! Encoded values are plain [`serde_json::Value`]s. The crate enables
//! serde_json's `preserve_order`, so objects keep insertion order, and
//! serde_json numbers cannot hold NaN or infinities, so a non-finite
//! float can never leak into the output as a raw literal.

use serde_json::{Map, Number, Value};

/// A boxed value of any type, for heterogeneous collections of log fields.
///
/// `Vec<AnyValue>` and maps with `AnyValue` values are registered by
/// default; each element is dispatched on its own concrete type.
pub type AnyValue = Box<dyn std::any::Any + Send + Sync>;

/// Sentinel for NaN.
pub const NAN: &str = "NaN";
/// Sentinel for positive infinity.
pub const INFINITY: &str = "Infinity";
/// Sentinel for negative infinity.
pub const NEG_INFINITY: &str = "-Infinity";

/// Encoding used when a nested value exceeds the configured depth.
pub const MAX_DEPTH_EXCEEDED: &str = "<max depth exceeded>";

/// Failure kind recorded when a handler returns an error.
pub const HANDLER_ERROR: &str = "HandlerError";
/// Failure kind recorded when a handler panics.
pub const HANDLER_PANIC: &str = "HandlerPanic";

/// Encode a float, mapping non-finite values to their sentinel strings.
pub fn float(value: f64) -> Value {
    match Number::from_f64(value) {
        Some(n) => Value::Number(n),
        None if value.is_nan() => Value::String(NAN.to_owned()),
        None if value > 0.0 => Value::String(INFINITY.to_owned()),
        None => Value::String(NEG_INFINITY.to_owned()),
    }
}

/// Encode a 128-bit signed integer; values outside `i64` become decimal strings.
pub fn wide_int(value: i128) -> Value {
    match i64::try_from(value) {
        Ok(n) => Value::from(n),
        Err(_) => Value::String(value.to_string()),
    }
}

/// Encode a 128-bit unsigned integer; values outside `u64` become decimal strings.
pub fn wide_uint(value: u128) -> Value {
    match u64::try_from(value) {
        Ok(n) => Value::from(n),
        Err(_) => Value::String(value.to_string()),
    }
}

/// Coerce an encoded mapping key to an object key.
///
/// Strings pass through; numbers, booleans and null use their JSON
/// spelling (`3` becomes `"3"`); arrays and objects use compact JSON text.
pub fn coerce_key(key: Value) -> String {
    match key {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_owned(),
        other => other.to_string(),
    }
}

/// Structured shape for an error value: kind name plus message.
///
/// When the error has a `source()` chain, the messages of the chain are
/// listed under `"causes"`, outermost first. Backtraces are never included.
pub fn error_shape(kind: &str, error: &(dyn std::error::Error + 'static)) -> Value {
    let mut shape = Map::new();
    shape.insert("kind".to_owned(), Value::String(kind.to_owned()));
    shape.insert("message".to_owned(), Value::String(error.to_string()));

    let mut causes = Vec::new();
    let mut source = error.source();
    while let Some(cause) = source {
        causes.push(Value::String(cause.to_string()));
        source = cause.source();
    }
    if !causes.is_empty() {
        shape.insert("causes".to_owned(), Value::Array(causes));
    }
    Value::Object(shape)
}

/// Fallback shape recorded when a handler fails for a value of `type_name`.
pub fn failure(kind: &str, message: impl Into<String>, type_name: &str) -> Value {
    let mut shape = Map::new();
    shape.insert("kind".to_owned(), Value::String(kind.to_owned()));
    shape.insert("message".to_owned(), Value::String(message.into()));
    shape.insert("type".to_owned(), Value::String(type_name.to_owned()));
    Value::Object(shape)
}

//! Handlers and the context they encode nested values through.

use std::any::Any;
use std::fmt::Display;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::config::EncoderConfig;
use crate::encoder::Encoder;
use crate::error::HandlerError;
use crate::lineage::short_type_name;
use crate::value;

/// Encodes one runtime value into its encoded-value representation.
///
/// Implementations receive the value type-erased; most callers never
/// implement this directly and register a typed closure with
/// [`Encoder::register`] instead, which downcasts for them.
pub trait Handler: Send + Sync {
    /// Encode `value`. Nested values go through `cx` so depth is tracked.
    fn encode(&self, value: &dyn Any, cx: &EncodeContext<'_>) -> Result<Value, HandlerError>;
}

/// State threaded through one `encode` call tree.
pub struct EncodeContext<'a> {
    encoder: &'a Encoder,
    depth: usize,
    type_name: &'static str,
}

impl<'a> EncodeContext<'a> {
    pub(crate) fn new(encoder: &'a Encoder, depth: usize, type_name: &'static str) -> Self {
        Self {
            encoder,
            depth,
            type_name,
        }
    }

    /// Encode a nested value one level deeper.
    pub fn encode<T: Any>(&self, value: &T) -> Value {
        self.encoder
            .encode_at(value, Some(std::any::type_name::<T>()), self.depth + 1)
    }

    /// Encode a nested type-erased value one level deeper.
    pub fn encode_dyn(&self, value: &dyn Any) -> Value {
        self.encoder.encode_at(value, None, self.depth + 1)
    }

    /// Encode a mapping key and coerce it to an object key.
    pub fn encode_key<K: Any>(&self, key: &K) -> String {
        value::coerce_key(self.encode(key))
    }

    /// Nesting depth of the value being encoded; the top-level value is 0.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Name of the concrete type being encoded, or `"unknown"` when the
    /// value arrived type-erased and its type was never registered.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Configuration of the owning encoder.
    pub fn config(&self) -> &EncoderConfig {
        self.encoder.config()
    }

    /// The owning encoder.
    pub fn encoder(&self) -> &Encoder {
        self.encoder
    }
}

/// Adapter from a typed closure to [`Handler`].
struct TypedHandler<T, F> {
    f: F,
    _marker: PhantomData<fn(&T)>,
}

impl<T, F> Handler for TypedHandler<T, F>
where
    T: Any,
    F: Fn(&T, &EncodeContext<'_>) -> Result<Value, HandlerError> + Send + Sync,
{
    fn encode(&self, value: &dyn Any, cx: &EncodeContext<'_>) -> Result<Value, HandlerError> {
        match value.downcast_ref::<T>() {
            Some(v) => (self.f)(v, cx),
            None => Err(HandlerError::TypeMismatch {
                expected: std::any::type_name::<T>(),
            }),
        }
    }
}

/// Adapter from a type-erased closure to [`Handler`].
struct ErasedHandler<F> {
    f: F,
}

impl<F> Handler for ErasedHandler<F>
where
    F: Fn(&dyn Any, &EncodeContext<'_>) -> Result<Value, HandlerError> + Send + Sync,
{
    fn encode(&self, value: &dyn Any, cx: &EncodeContext<'_>) -> Result<Value, HandlerError> {
        (self.f)(value, cx)
    }
}

/// Wrap a typed closure as a shareable [`Handler`].
pub fn handler_fn<T, F>(f: F) -> Arc<dyn Handler>
where
    T: Any,
    F: Fn(&T, &EncodeContext<'_>) -> Result<Value, HandlerError> + Send + Sync + 'static,
{
    Arc::new(TypedHandler {
        f,
        _marker: PhantomData,
    })
}

/// Wrap a closure over type-erased values as a shareable [`Handler`].
pub fn erased_handler_fn<F>(f: F) -> Arc<dyn Handler>
where
    F: Fn(&dyn Any, &EncodeContext<'_>) -> Result<Value, HandlerError> + Send + Sync + 'static,
{
    Arc::new(ErasedHandler { f })
}

/// The default handler: `"<type name>"`.
pub(crate) fn unknown_handler() -> Arc<dyn Handler> {
    erased_handler_fn(|_, cx| Ok(Value::String(format!("<{}>", cx.type_name()))))
}

/// Encodes any `C` whose shared reference iterates over `&T` as an array.
pub fn sequence_handler<C, T>() -> Arc<dyn Handler>
where
    C: Any,
    T: Any,
    for<'a> &'a C: IntoIterator<Item = &'a T>,
{
    handler_fn::<C, _>(|items: &C, cx| {
        let encoded = IntoIterator::into_iter(items)
            .map(|item| cx.encode(item))
            .collect();
        Ok(Value::Array(encoded))
    })
}

/// Encodes any `C` whose shared reference iterates over `(&K, &V)` as an
/// object, in iteration order, with keys coerced to strings.
pub fn mapping_handler<C, K, V>() -> Arc<dyn Handler>
where
    C: Any,
    K: Any,
    V: Any,
    for<'a> &'a C: IntoIterator<Item = (&'a K, &'a V)>,
{
    handler_fn::<C, _>(|entries: &C, cx| {
        let mut object = Map::new();
        for (k, v) in entries {
            object.insert(cx.encode_key(k), cx.encode(v));
        }
        Ok(Value::Object(object))
    })
}

/// A tuple whose elements are encoded one by one, in position order.
///
/// Implemented for tuples of arity 2 to 4 over any `'static` element types.
pub trait EncodeTuple: Any {
    /// Encode every element through `cx`.
    fn encode_elements(&self, cx: &EncodeContext<'_>) -> Vec<Value>;
}

macro_rules! encode_tuple {
    ($(($($name:ident $idx:tt),+))+) => {$(
        impl<$($name: Any),+> EncodeTuple for ($($name,)+) {
            fn encode_elements(&self, cx: &EncodeContext<'_>) -> Vec<Value> {
                vec![$(cx.encode(&self.$idx)),+]
            }
        }
    )+};
}

encode_tuple! {
    (A 0, B 1)
    (A 0, B 1, C 2)
    (A 0, B 1, C 2, D 3)
}

/// Encodes a tuple as an array of its elements.
pub fn tuple_handler<T: EncodeTuple>() -> Arc<dyn Handler> {
    handler_fn::<T, _>(|tuple: &T, cx| Ok(Value::Array(tuple.encode_elements(cx))))
}

/// Encodes `Option<T>`: `None` as null, `Some(v)` as `v`'s encoding.
pub fn optional_handler<T: Any>() -> Arc<dyn Handler> {
    handler_fn::<Option<T>, _>(|opt: &Option<T>, cx| {
        Ok(match opt {
            Some(v) => cx.encode(v),
            None => Value::Null,
        })
    })
}

/// Encodes a value as its `Display` string.
pub fn display_handler<T: Any + Display>() -> Arc<dyn Handler> {
    handler_fn::<T, _>(|v: &T, _| Ok(Value::String(v.to_string())))
}

/// Encodes a value through its `serde::Serialize` impl.
///
/// This is the struct-shaped encoding: a `#[derive(Serialize)]` struct
/// becomes an object of its fields. Non-finite floats inside the struct
/// serialize as null (serde_json's behaviour), never as raw literals.
pub fn serialize_handler<T: Any + Serialize>() -> Arc<dyn Handler> {
    handler_fn::<T, _>(|v: &T, _| Ok(serde_json::to_value(v)?))
}

/// Encodes an error value as `{"kind": <short type name>, "message": ...}`.
pub fn error_handler<E: std::error::Error + 'static>() -> Arc<dyn Handler> {
    let kind = short_type_name(std::any::type_name::<E>());
    handler_fn::<E, _>(move |e: &E, _| Ok(value::error_shape(kind, e)))
}

#![deny(missing_docs)]
//! # arclog: type-dispatched encoding of structured log fields
//!
//! Structured logs carry fields of arbitrary types: IDs, timestamps,
//! durations, errors, maps of counters. Before a JSON serializer can
//! touch them they have to be reduced to a closed set of safe shapes.
//! This crate does that reduction, choosing how to encode a value by its
//! concrete runtime type.
//!
//! ## Pieces
//!
//! | Piece | Type | What it does |
//! |-------|------|-------------|
//! | Dispatch | [`Encoder`] | Registry of handlers, ancestor resolution, per-type cache |
//! | Handlers | [`Handler`], [`EncodeContext`] | Encode one value, recursing through the context |
//! | Identity | [`TypeKey`] | Runtime type id plus name |
//! | Output | [`serde_json::Value`] | Strings, numbers, booleans, null, arrays, ordered objects |
//! | Config | [`EncoderConfig`] | Depth limit, panic recovery, byte encoding |
//!
//! ## Guarantees
//!
//! - [`Encoder::encode`] never fails and never panics out of a handler
//!   (unless panic recovery is disabled). Unknown types become a string.
//! - Output never contains NaN or infinities; they are encoded as the
//!   strings `"NaN"`, `"Infinity"` and `"-Infinity"`.
//! - Objects preserve insertion order; non-string keys are coerced.
//! - Encoding an already-encoded [`serde_json::Value`] returns it unchanged.
//!
//! ## Example
//!
//! ```
//! use arclog::Encoder;
//! use indexmap::IndexMap;
//! use serde_json::json;
//!
//! let encoder = Encoder::new();
//!
//! let mut counts: IndexMap<i64, String> = IndexMap::new();
//! counts.insert(3, "x".into());
//! counts.insert(1, "y".into());
//!
//! let encoded = encoder.encode(&counts);
//! let keys: Vec<_> = encoded.as_object().unwrap().keys().cloned().collect();
//! assert_eq!(keys, ["3", "1"]);
//! assert_eq!(encoded, json!({"3": "x", "1": "y"}));
//! ```

mod builtin;
pub mod config;
pub mod encoder;
pub mod error;
pub mod handler;
pub mod lineage;
pub mod value;

pub use config::{BytesEncoding, EncoderConfig};
pub use encoder::Encoder;
pub use error::{ConflictError, HandlerError};
pub use handler::{
    EncodeContext, EncodeTuple, Handler, display_handler, erased_handler_fn, error_handler,
    handler_fn, mapping_handler, optional_handler, sequence_handler, serialize_handler,
    tuple_handler,
};
pub use lineage::TypeKey;
pub use value::AnyValue;

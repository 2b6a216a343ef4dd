//! Encoder configuration.

use serde::{Deserialize, Serialize};

/// How byte buffers (`Vec<u8>`, `&'static [u8]`) are encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BytesEncoding {
    /// URL-safe base64 with padding.
    #[default]
    Base64Url,
    /// Standard base64 with padding.
    Base64,
    /// Array of integers, one per byte.
    Array,
}

/// Tunables for an [`Encoder`](crate::Encoder).
///
/// Every field has a default, so a partial JSON document deserializes:
///
/// ```
/// use arclog::EncoderConfig;
///
/// let config: EncoderConfig = serde_json::from_str(r#"{"max_depth": 8}"#).unwrap();
/// assert_eq!(config.max_depth, 8);
/// assert!(config.catch_panics);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// Nesting depth beyond which values are not descended into.
    pub max_depth: usize,
    /// Recover from panicking handlers instead of unwinding through `encode`.
    pub catch_panics: bool,
    /// Representation of byte buffers.
    pub bytes: BytesEncoding,
}

impl EncoderConfig {
    /// Default nesting limit.
    pub const DEFAULT_MAX_DEPTH: usize = 64;
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            max_depth: Self::DEFAULT_MAX_DEPTH,
            catch_panics: true,
            bytes: BytesEncoding::default(),
        }
    }
}

//! Wire codec for classification payloads.
//!
//! JSON is the default because it is what the worker speaks out of the box.
//! `MsgPack` (named-field encoding via `rmp_serde::to_vec_named`) is
//! available for deployments where the worker negotiates it through the
//! AMQP `content_type` property.

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Content type for JSON bodies.
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Content type for `MsgPack` bodies.
pub const CONTENT_TYPE_MSGPACK: &str = "application/msgpack";

/// Errors produced while encoding or decoding a wire body.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("json encode failed: {0}")]
    JsonEncode(#[source] serde_json::Error),
    #[error("json decode failed: {0}")]
    JsonDecode(#[source] serde_json::Error),
    #[error("msgpack encode failed: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),
    #[error("msgpack decode failed: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),
}

/// Body encoding used on the broker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WireFormat {
    #[default]
    Json,
    MsgPack,
}

impl WireFormat {
    /// Returns the AMQP `content_type` advertised for this format.
    #[must_use]
    pub fn content_type(self) -> &'static str {
        match self {
            Self::Json => CONTENT_TYPE_JSON,
            Self::MsgPack => CONTENT_TYPE_MSGPACK,
        }
    }

    /// Picks the format for an inbound body from its `content_type`.
    ///
    /// Anything that is not recognisably `MsgPack` is treated as JSON; the
    /// original worker labels its JSON replies `text/plain`.
    #[must_use]
    pub fn from_content_type(content_type: Option<&str>) -> Self {
        match content_type {
            Some(ct) if ct.contains("msgpack") => Self::MsgPack,
            _ => Self::Json,
        }
    }

    /// Parses a format name as used on the command line.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "json" => Some(Self::Json),
            "msgpack" | "messagepack" => Some(Self::MsgPack),
            _ => None,
        }
    }

    /// Encodes `value` in this format.
    ///
    /// # Errors
    ///
    /// Returns a [`CodecError`] if the value cannot be serialized.
    pub fn encode<T: Serialize>(self, value: &T) -> Result<Vec<u8>, CodecError> {
        match self {
            Self::Json => serde_json::to_vec(value).map_err(CodecError::JsonEncode),
            Self::MsgPack => Ok(rmp_serde::to_vec_named(value)?),
        }
    }

    /// Decodes a body in this format.
    ///
    /// # Errors
    ///
    /// Returns a [`CodecError`] if the body is not a valid `T`.
    pub fn decode<T: DeserializeOwned>(self, body: &[u8]) -> Result<T, CodecError> {
        match self {
            Self::Json => serde_json::from_slice(body).map_err(CodecError::JsonDecode),
            Self::MsgPack => Ok(rmp_serde::from_slice(body)?),
        }
    }
}

//! Correlation tokens threaded through the reply-to exchange.
//!
//! A token is 122 bits of OS randomness (UUID v4) rendered as 32 lowercase
//! hex characters. Tokens only need to be unique while a call can still be
//! outstanding, which this comfortably exceeds.

use std::borrow::Borrow;
use std::fmt;

use uuid::Uuid;

/// Opaque per-call identifier echoed back by the worker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CorrelationToken(String);

impl CorrelationToken {
    /// Generates a fresh random token.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Wraps a token received in transport metadata.
    ///
    /// Returns `None` for an empty string, which can never match a
    /// registered call.
    #[must_use]
    pub fn from_wire(raw: &str) -> Option<Self> {
        if raw.is_empty() {
            None
        } else {
            Some(Self(raw.to_string()))
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CorrelationToken {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for CorrelationToken {
    fn borrow(&self) -> &str {
        &self.0
    }
}

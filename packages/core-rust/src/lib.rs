//! `SiteLens` Core: classification wire model, correlation tokens, and codecs.
//!
//! This crate has no async runtime dependency. It defines what travels over
//! the broker between the server and the external classification worker.

pub mod codec;
pub mod site;
pub mod token;
pub mod types;

pub use codec::{CodecError, WireFormat};
pub use token::CorrelationToken;
pub use types::{ClassificationRequest, ClassificationResponse, Stats, SubjectKind};

//! Implementations of [`crate::ClassificationStore`].

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::{MemoryStore, StoredClassification};
#[cfg(feature = "postgres")]
pub use postgres::PgStore;

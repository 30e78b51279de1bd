//! Request/reply correlation over a message broker.
//!
//! Many callers publish through [`RpcClient`]; exactly one [`Dispatcher`]
//! reads the shared reply queue and resolves calls through the
//! [`CorrelationRegistry`]. Successful resolutions flow into the
//! [`ResultSink`].

pub mod client;
pub mod completion;
pub mod dispatcher;
pub mod error;
pub mod registry;
pub mod sink;

pub use client::{PendingCall, RpcClient};
pub use completion::{CompletionHandle, CompletionSlot, Outcome};
pub use dispatcher::{DispatchStats, Dispatcher};
pub use error::RpcError;
pub use registry::{CorrelationRegistry, PendingRequest, ResolvedCall};
pub use sink::ResultSink;

//! `SiteLens` Server: classification requests over a message broker with
//! reply correlation, result persistence, and a live result feed.

pub mod broker;
pub mod hub;
pub mod network;
pub mod rpc;
pub mod service;
pub mod storage;
pub mod traits;

pub use broker::{AmqpBroker, BrokerConfig, BrokerTransport, MemoryBroker, MemoryWorker};
pub use hub::{BroadcastHub, Subscription};
pub use rpc::{PendingCall, RpcClient, RpcError};
pub use service::{ClassificationService, ServiceConfig};
pub use traits::ClassificationStore;

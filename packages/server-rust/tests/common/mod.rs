//! Shared harness for integration tests.
//!
//! Runs a [`ClassificationService`] over the in-memory broker. Tests drive
//! the worker side directly: read published envelopes, reply in any order,
//! send garbage, or stay silent.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sitelens_core::{ClassificationRequest, ClassificationResponse, Stats, SubjectKind};
use sitelens_server::broker::OutboundEnvelope;
use sitelens_server::storage::MemoryStore;
use sitelens_server::{
    ClassificationService, ClassificationStore, MemoryBroker, MemoryWorker, ServiceConfig,
};

pub struct Harness {
    pub service: Arc<ClassificationService>,
    pub broker: Arc<MemoryBroker>,
    pub worker: MemoryWorker,
    pub store: Arc<MemoryStore>,
}

impl Harness {
    pub fn start() -> Self {
        Self::with_config(ServiceConfig::default())
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_config(ServiceConfig {
            call_timeout: timeout,
            ..ServiceConfig::default()
        })
    }

    pub fn with_config(config: ServiceConfig) -> Self {
        Self::build(config, Duration::ZERO)
    }

    /// Every store write sleeps `delay` before landing in `store`.
    pub fn with_slow_store(delay: Duration) -> Self {
        Self::build(ServiceConfig::default(), delay)
    }

    fn build(config: ServiceConfig, write_delay: Duration) -> Self {
        init_tracing();
        let (broker, worker) = MemoryBroker::new();
        let broker = Arc::new(broker);
        let store = Arc::new(MemoryStore::new());
        let persisted: Arc<dyn ClassificationStore> = if write_delay.is_zero() {
            Arc::clone(&store) as Arc<dyn ClassificationStore>
        } else {
            Arc::new(SlowStore {
                inner: Arc::clone(&store),
                delay: write_delay,
            })
        };
        let service = ClassificationService::start(broker.clone(), persisted, config)
            .expect("service starts on a fresh broker");
        Self {
            service: Arc::new(service),
            broker,
            worker,
            store,
        }
    }

    /// Next envelope published by the service, with its decoded request.
    pub async fn next_request(&mut self) -> (OutboundEnvelope, ClassificationRequest) {
        let envelope = tokio::time::timeout(Duration::from_secs(5), self.worker.next_request())
            .await
            .expect("a request is published in time")
            .expect("broker still open");
        let request = MemoryWorker::decode_request(&envelope).expect("request decodes");
        (envelope, request)
    }

    /// Answers `envelope` with `response`.
    pub fn reply(&self, envelope: &OutboundEnvelope, response: &ClassificationResponse) {
        assert!(self.worker.replier().reply(envelope, response));
    }
}

struct SlowStore {
    inner: Arc<MemoryStore>,
    delay: Duration,
}

#[async_trait]
impl ClassificationStore for SlowStore {
    async fn update(
        &self,
        kind: SubjectKind,
        subject_id: u64,
        category: &str,
        theme: &str,
        stats: Option<&Stats>,
    ) -> anyhow::Result<()> {
        tokio::time::sleep(self.delay).await;
        self.inner
            .update(kind, subject_id, category, theme, stats)
            .await
    }
}

pub fn response(id: u64, url: &str, category: &str, theme: &str) -> ClassificationResponse {
    ClassificationResponse {
        id,
        url: url.to_string(),
        category: category.to_string(),
        theme: theme.to_string(),
        stats: None,
    }
}

pub fn stats(pairs: &[(&str, serde_json::Value)]) -> Stats {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), v.clone()))
        .collect()
}

/// Polls `condition` until it holds, failing the test after two seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition reached in time");
}

/// Respects `RUST_LOG`. Run with `RUST_LOG=debug cargo test -- --nocapture`.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

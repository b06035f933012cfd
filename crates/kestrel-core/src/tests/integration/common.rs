//! Shared fixtures for the integration tests: a producer bundle that
//! registers an echo service and a consumer bundle that tracks it.

use std::sync::Arc;

use async_trait::async_trait;

use crate::framework::bundle::BundleActivator;
use crate::framework::context::BundleContext;
use crate::framework::error::Result;
use crate::framework::framework::Framework;
use crate::framework::loader::StaticBundleLoader;
use crate::registry::properties::Properties;
use crate::tracker::{NoopCustomizer, ServiceTracker};

pub const ECHO_CAPABILITY: &str = "kestrel.test.echo";

/// The service object the producer registers.
pub struct EchoService {
    pub greeting: String,
}

impl EchoService {
    pub fn echo(&self, input: &str) -> String {
        format!("{} {}", self.greeting, input)
    }
}

pub struct ProducerActivator;

#[async_trait]
impl BundleActivator for ProducerActivator {
    async fn start(&self, context: &BundleContext) -> Result<()> {
        context
            .register_service(
                &[ECHO_CAPABILITY],
                Arc::new(EchoService {
                    greeting: "hello".to_string(),
                }),
                Properties::new(),
            )
            .await?;
        Ok(())
    }
}

/// Cell the consumer publishes its tracker into, so tests can observe it.
pub type TrackerCell = Arc<std::sync::Mutex<Option<ServiceTracker>>>;

/// Tracks the echo service for the lifetime of the consumer bundle.
pub struct ConsumerActivator {
    pub tracker: TrackerCell,
}

#[async_trait]
impl BundleActivator for ConsumerActivator {
    async fn start(&self, context: &BundleContext) -> Result<()> {
        let tracker = ServiceTracker::new(
            context.clone(),
            Some(ECHO_CAPABILITY),
            None,
            Arc::new(NoopCustomizer),
        );
        tracker.open().await;
        *self.tracker.lock().expect("tracker lock poisoned") = Some(tracker);
        Ok(())
    }

    async fn stop(&self, _context: &BundleContext) -> Result<()> {
        let tracker = self
            .tracker
            .lock()
            .expect("tracker lock poisoned")
            .take();
        if let Some(tracker) = tracker {
            tracker.close().await;
        }
        Ok(())
    }
}

/// A framework with producer and consumer bundles registered statically.
/// Returns the cell the consumer's tracker appears in once it starts.
pub fn producer_consumer_framework() -> (Framework, TrackerCell) {
    let loader = StaticBundleLoader::new();
    loader.register("producer", || ProducerActivator);
    let cell: TrackerCell = Arc::new(std::sync::Mutex::new(None));
    let cell_clone = Arc::clone(&cell);
    loader.register("consumer", move || ConsumerActivator {
        tracker: Arc::clone(&cell_clone),
    });
    (Framework::new(Arc::new(loader)), cell)
}

//! Example bundle: publishes an uptime service and logs a periodic pulse.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use kestrel_core::framework::bundle::BundleActivator;
use kestrel_core::framework::context::BundleContext;
use kestrel_core::framework::error::Result;
use kestrel_core::registry::properties::Properties;
use tokio::task::JoinHandle;

pub const HEARTBEAT_CAPABILITY: &str = "kestrel.heartbeat";

const PULSE_INTERVAL: Duration = Duration::from_secs(10);

/// Reports how long the bundle has been running.
pub struct UptimeService {
    started: Instant,
}

impl UptimeService {
    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }
}

#[derive(Default)]
pub struct HeartbeatActivator {
    pulse: Mutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl BundleActivator for HeartbeatActivator {
    async fn start(&self, context: &BundleContext) -> Result<()> {
        context
            .register_service(
                &[HEARTBEAT_CAPABILITY],
                Arc::new(UptimeService {
                    started: Instant::now(),
                }),
                Properties::new(),
            )
            .await?;

        let started = Instant::now();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(PULSE_INTERVAL);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                log::debug!("Heartbeat: up for {:?}", started.elapsed());
            }
        });
        *self.pulse.lock().expect("pulse lock poisoned") = Some(handle);

        log::info!("Heartbeat service registered");
        Ok(())
    }

    async fn stop(&self, _context: &BundleContext) -> Result<()> {
        if let Some(handle) = self.pulse.lock().expect("pulse lock poisoned").take() {
            handle.abort();
        }
        log::info!("Heartbeat stopped");
        Ok(())
    }
}

kestrel_core::export_bundle!(HeartbeatActivator::default());

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use kestrel_core::framework::framework::Framework;
    use kestrel_core::framework::loader::StaticBundleLoader;

    use super::*;

    #[tokio::test]
    async fn test_heartbeat_registers_and_unregisters_its_service() {
        let loader = StaticBundleLoader::new();
        loader.register("heartbeat", HeartbeatActivator::default);
        let framework = Framework::new(Arc::new(loader));

        let bundle = framework.install("heartbeat").await.unwrap();
        framework.start_bundle(&bundle).await.unwrap();

        let reference = framework
            .registry()
            .first_service_reference(Some(HEARTBEAT_CAPABILITY), None)
            .await
            .unwrap();
        let service = framework.registry().get_service(0, &reference).await.unwrap();
        let uptime = service.downcast_ref::<UptimeService>().unwrap();
        assert!(uptime.uptime() < Duration::from_secs(5));
        framework.registry().unget_service(0, &reference).await;

        framework.stop_bundle(&bundle).await.unwrap();
        assert!(framework
            .registry()
            .first_service_reference(Some(HEARTBEAT_CAPABILITY), None)
            .await
            .is_none());
    }
}

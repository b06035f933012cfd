//! The framework: bundle install/start/stop/uninstall, start-level walks,
//! ownership of the registry and the event dispatcher.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::timeout;

use crate::event::{
    BundleEvent, BundleEventKind, EventDispatcher, FrameworkEvent, FrameworkEventKind,
};
use crate::framework::bundle::{Bundle, BundleActivator, BundleId, BundleState};
use crate::framework::constants::{
    ACTIVATOR_TIMEOUT, DEFAULT_START_LEVEL, FRAMEWORK_BUNDLE_ID, FRAMEWORK_NAME, START_LEVEL_PROP,
};
use crate::framework::context::BundleContext;
use crate::framework::error::{FrameworkError, Result};
use crate::framework::loader::{BundleCode, BundleLoader};
use crate::registry::properties::Properties;
use crate::registry::registry::ServiceRegistry;

struct BundleStore {
    next_id: BundleId,
    by_id: BTreeMap<BundleId, Arc<Bundle>>,
    by_name: HashMap<String, BundleId>,
}

struct FrameworkInner {
    dispatcher: EventDispatcher,
    registry: ServiceRegistry,
    loader: Arc<dyn BundleLoader>,
    properties: Properties,
    bundles: Mutex<BundleStore>,
    codes: Mutex<HashMap<BundleId, Arc<dyn BundleCode>>>,
    /// Activator cache, resolved lazily on first start, keyed by bundle id.
    activators: Mutex<HashMap<BundleId, Arc<dyn BundleActivator>>>,
    contexts: Mutex<HashMap<BundleId, BundleContext>>,
    /// Set while the framework is stopping; cancels a level walk in progress.
    stopping: AtomicBool,
}

/// Cloneable handle to the framework.
#[derive(Clone)]
pub struct Framework {
    inner: Arc<FrameworkInner>,
}

impl fmt::Debug for Framework {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Framework").finish_non_exhaustive()
    }
}

impl Framework {
    pub fn new(loader: Arc<dyn BundleLoader>) -> Self {
        Self::with_properties(loader, Properties::new())
    }

    /// Create a framework with the given properties (typically the
    /// `properties` object of the bundle directory file). The framework
    /// bundle (id 0) starts out RESOLVED.
    pub fn with_properties(loader: Arc<dyn BundleLoader>, properties: Properties) -> Self {
        let framework_bundle = Arc::new(Bundle::new(
            FRAMEWORK_BUNDLE_ID,
            FRAMEWORK_NAME,
            BundleState::Resolved,
        ));
        let mut by_id = BTreeMap::new();
        by_id.insert(FRAMEWORK_BUNDLE_ID, framework_bundle);
        let mut by_name = HashMap::new();
        by_name.insert(FRAMEWORK_NAME.to_string(), FRAMEWORK_BUNDLE_ID);

        let dispatcher = EventDispatcher::new();
        let registry = ServiceRegistry::new(dispatcher.clone());
        Framework {
            inner: Arc::new(FrameworkInner {
                dispatcher,
                registry,
                loader,
                properties,
                bundles: Mutex::new(BundleStore {
                    next_id: FRAMEWORK_BUNDLE_ID,
                    by_id,
                    by_name,
                }),
                codes: Mutex::new(HashMap::new()),
                activators: Mutex::new(HashMap::new()),
                contexts: Mutex::new(HashMap::new()),
                stopping: AtomicBool::new(false),
            }),
        }
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.inner.registry
    }

    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.inner.dispatcher
    }

    pub fn property(&self, key: &str) -> Option<Value> {
        self.inner.properties.get(key).cloned()
    }

    /// Context for the framework bundle itself, created on first use. Hosts
    /// use it to register listeners and trackers outside any bundle.
    pub async fn bundle_context(&self) -> BundleContext {
        let mut contexts = self.inner.contexts.lock().await;
        if let Some(context) = contexts.get(&FRAMEWORK_BUNDLE_ID) {
            return context.clone();
        }
        let bundle = self
            .get_bundle(FRAMEWORK_BUNDLE_ID)
            .await
            .expect("framework bundle always installed");
        let context = BundleContext::new(bundle, self.clone());
        contexts.insert(FRAMEWORK_BUNDLE_ID, context.clone());
        context
    }

    pub async fn get_bundle(&self, id: BundleId) -> Option<Arc<Bundle>> {
        self.inner.bundles.lock().await.by_id.get(&id).cloned()
    }

    pub async fn get_bundle_by_name(&self, name: &str) -> Option<Arc<Bundle>> {
        let store = self.inner.bundles.lock().await;
        store
            .by_name
            .get(name)
            .and_then(|id| store.by_id.get(id))
            .cloned()
    }

    pub async fn bundles(&self) -> Vec<Arc<Bundle>> {
        self.inner.bundles.lock().await.by_id.values().cloned().collect()
    }

    /// Install a bundle by name. Idempotent: re-installing an installed name
    /// returns the existing bundle. Manifest `requirements` are installed
    /// first. Fires INSTALLED; the new bundle is RESOLVED.
    pub fn install<'a>(
        &'a self,
        name: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Arc<Bundle>>> + Send + 'a>> {
        Box::pin(async move {
            if let Some(existing) = self.get_bundle_by_name(name).await {
                return Ok(existing);
            }

            let code = self.inner.loader.load(name).await?;
            if let Some(manifest) = code.manifest() {
                for requirement in manifest.requirements.clone() {
                    if self.get_bundle_by_name(&requirement).await.is_none() {
                        self.install(&requirement).await?;
                    }
                }
            }

            let bundle = {
                let mut store = self.inner.bundles.lock().await;
                // A concurrent install of the same name may have finished
                // while the loader ran.
                if let Some(id) = store.by_name.get(name) {
                    return Ok(store.by_id[id].clone());
                }
                store.next_id += 1;
                let id = store.next_id;
                let bundle = Arc::new(Bundle::new(id, name, BundleState::Resolved));
                store.by_id.insert(id, bundle.clone());
                store.by_name.insert(name.to_string(), id);
                bundle
            };
            self.inner.codes.lock().await.insert(bundle.id(), code);

            self.fire_bundle_event(BundleEventKind::Installed, &bundle).await;
            log::info!("Installed bundle '{}' (id {})", name, bundle.id());
            Ok(bundle)
        })
    }

    /// Assign an explicit start level, e.g. from the directory file.
    pub async fn set_bundle_start_level(&self, bundle: &Arc<Bundle>, level: u32) {
        bundle.set_start_level(Some(level));
    }

    /// Start a bundle. Only legal from RESOLVED; STARTING/ACTIVE is a no-op
    /// returning `Ok(false)`. On activator failure or timeout the state is
    /// rolled back to RESOLVED and the error propagates.
    pub async fn start_bundle(&self, bundle: &Arc<Bundle>) -> Result<bool> {
        match bundle.state() {
            BundleState::Starting | BundleState::Active => return Ok(false),
            BundleState::Resolved => {}
            state => {
                return Err(FrameworkError::IllegalState {
                    bundle: bundle.name().to_string(),
                    state,
                    operation: "start",
                }
                .into())
            }
        }

        bundle.set_state(BundleState::Starting);
        self.fire_bundle_event(BundleEventKind::Starting, bundle).await;

        let context = BundleContext::new(bundle.clone(), self.clone());
        self.inner
            .contexts
            .lock()
            .await
            .insert(bundle.id(), context.clone());

        if let Some(activator) = self.resolve_activator(bundle).await {
            match timeout(ACTIVATOR_TIMEOUT, activator.start(&context)).await {
                Err(_) => {
                    self.rollback_start(bundle, &context).await;
                    return Err(FrameworkError::ActivatorTimeout {
                        bundle: bundle.name().to_string(),
                        operation: "start",
                        seconds: ACTIVATOR_TIMEOUT.as_secs(),
                    }
                    .into());
                }
                Ok(Err(err)) => {
                    self.rollback_start(bundle, &context).await;
                    return Err(err);
                }
                Ok(Ok(())) => {}
            }
        }

        bundle.set_state(BundleState::Active);
        self.fire_bundle_event(BundleEventKind::Started, bundle).await;
        log::info!("Started bundle '{}'", bundle.name());
        Ok(true)
    }

    /// Stop a bundle. Only legal from ACTIVE; RESOLVED is a no-op returning
    /// `Ok(false)`. On activator failure or timeout the bundle stays ACTIVE
    /// and the error propagates. On success, remaining services are
    /// force-unregistered and the context is discarded.
    pub async fn stop_bundle(&self, bundle: &Arc<Bundle>) -> Result<bool> {
        match bundle.state() {
            BundleState::Resolved | BundleState::Installed => return Ok(false),
            BundleState::Active => {}
            state => {
                return Err(FrameworkError::IllegalState {
                    bundle: bundle.name().to_string(),
                    state,
                    operation: "stop",
                }
                .into())
            }
        }

        bundle.set_state(BundleState::Stopping);
        self.fire_bundle_event(BundleEventKind::Stopping, bundle).await;

        let context = self.inner.contexts.lock().await.get(&bundle.id()).cloned();
        let activator = {
            let activators = self.inner.activators.lock().await;
            activators.get(&bundle.id()).cloned()
        };
        if let (Some(activator), Some(context)) = (activator, context.as_ref()) {
            match timeout(ACTIVATOR_TIMEOUT, activator.stop(context)).await {
                Err(_) => {
                    bundle.set_state(BundleState::Active);
                    return Err(FrameworkError::ActivatorTimeout {
                        bundle: bundle.name().to_string(),
                        operation: "stop",
                        seconds: ACTIVATOR_TIMEOUT.as_secs(),
                    }
                    .into());
                }
                Ok(Err(err)) => {
                    bundle.set_state(BundleState::Active);
                    return Err(err);
                }
                Ok(Ok(())) => {}
            }
        }

        self.cleanup_bundle(bundle).await;
        bundle.set_state(BundleState::Resolved);
        self.fire_bundle_event(BundleEventKind::Stopped, bundle).await;
        log::info!("Stopped bundle '{}'", bundle.name());
        Ok(true)
    }

    /// Uninstall a bundle, forcing it through stop first. A failed stop is
    /// logged and the bundle is cleaned up anyway.
    pub async fn uninstall_bundle(&self, bundle: &Arc<Bundle>) -> Result<()> {
        if bundle.id() == FRAMEWORK_BUNDLE_ID {
            return Err(FrameworkError::IllegalState {
                bundle: bundle.name().to_string(),
                state: bundle.state(),
                operation: "uninstall",
            }
            .into());
        }

        if let Err(err) = self.stop_bundle(bundle).await {
            log::error!(
                "Forcing uninstall of bundle '{}' after failed stop: {}",
                bundle.name(),
                err
            );
            self.cleanup_bundle(bundle).await;
            bundle.set_state(BundleState::Resolved);
        }

        bundle.set_state(BundleState::Uninstalled);
        self.fire_bundle_event(BundleEventKind::Uninstalled, bundle).await;

        {
            let mut store = self.inner.bundles.lock().await;
            store.by_id.remove(&bundle.id());
            store.by_name.remove(bundle.name());
        }
        self.inner.codes.lock().await.remove(&bundle.id());
        self.inner.activators.lock().await.remove(&bundle.id());
        if let Err(err) = self.inner.loader.unload(bundle.name()).await {
            log::warn!("Loader failed to unload '{}': {}", bundle.name(), err);
        }
        log::info!("Uninstalled bundle '{}'", bundle.name());
        Ok(())
    }

    /// Start the framework: fire STARTING, walk installed bundles level by
    /// level ascending and start each, fire STARTED. A bundle failing to
    /// start during the walk is reported as a framework error event and the
    /// walk continues.
    pub async fn start(&self) -> Result<()> {
        let framework_bundle = self
            .get_bundle(FRAMEWORK_BUNDLE_ID)
            .await
            .expect("framework bundle always installed");
        if framework_bundle.state() == BundleState::Active {
            return Ok(());
        }
        self.inner.stopping.store(false, Ordering::SeqCst);

        framework_bundle.set_state(BundleState::Starting);
        self.inner
            .dispatcher
            .fire_framework_event(&FrameworkEvent::new(FrameworkEventKind::Starting))
            .await;

        for level in self.levels_of(BundleState::Resolved, true).await {
            if self.inner.stopping.load(Ordering::SeqCst) {
                log::warn!("Framework stop requested; aborting start-level walk");
                break;
            }
            for bundle in self.bundles_at_level(level, BundleState::Resolved).await {
                if let Err(err) = self.start_bundle(&bundle).await {
                    log::error!("Bundle '{}' failed to start: {}", bundle.name(), err);
                    self.inner
                        .dispatcher
                        .post_framework_event(FrameworkEvent::error(format!(
                            "bundle '{}' failed to start: {}",
                            bundle.name(),
                            err
                        )))
                        .await;
                }
            }
        }

        framework_bundle.set_state(BundleState::Active);
        self.inner
            .dispatcher
            .fire_framework_event(&FrameworkEvent::new(FrameworkEventKind::Started))
            .await;
        log::info!("Framework started");
        Ok(())
    }

    /// Stop the framework: fire STOPPING, stop active bundles level by level
    /// descending, drain the event worker pool, fire STOPPED.
    pub async fn stop(&self) -> Result<()> {
        let framework_bundle = self
            .get_bundle(FRAMEWORK_BUNDLE_ID)
            .await
            .expect("framework bundle always installed");
        if framework_bundle.state() != BundleState::Active {
            return Ok(());
        }

        self.inner.stopping.store(true, Ordering::SeqCst);
        framework_bundle.set_state(BundleState::Stopping);
        self.inner
            .dispatcher
            .fire_framework_event(&FrameworkEvent::new(FrameworkEventKind::Stopping))
            .await;

        for level in self.levels_of(BundleState::Active, false).await {
            for bundle in self.bundles_at_level(level, BundleState::Active).await {
                if let Err(err) = self.stop_bundle(&bundle).await {
                    log::error!("Bundle '{}' failed to stop: {}", bundle.name(), err);
                }
            }
        }

        framework_bundle.set_state(BundleState::Resolved);
        self.inner
            .dispatcher
            .fire_framework_event(&FrameworkEvent::new(FrameworkEventKind::Stopped))
            .await;
        self.inner.dispatcher.shutdown().await;
        log::info!("Framework stopped");
        Ok(())
    }

    /// Effective start level of a bundle: its explicit level, else the
    /// configured default.
    pub fn effective_start_level(&self, bundle: &Bundle) -> u32 {
        bundle.start_level().unwrap_or_else(|| {
            self.property(START_LEVEL_PROP)
                .and_then(|v| v.as_u64())
                .map(|v| v as u32)
                .unwrap_or(DEFAULT_START_LEVEL)
        })
    }

    async fn levels_of(&self, state: BundleState, ascending: bool) -> Vec<u32> {
        let mut levels: Vec<u32> = self
            .bundles()
            .await
            .into_iter()
            .filter(|b| b.id() != FRAMEWORK_BUNDLE_ID && b.state() == state)
            .map(|b| self.effective_start_level(&b))
            .collect();
        levels.sort_unstable();
        levels.dedup();
        if !ascending {
            levels.reverse();
        }
        levels
    }

    async fn bundles_at_level(&self, level: u32, state: BundleState) -> Vec<Arc<Bundle>> {
        self.bundles()
            .await
            .into_iter()
            .filter(|b| {
                b.id() != FRAMEWORK_BUNDLE_ID
                    && b.state() == state
                    && self.effective_start_level(b) == level
            })
            .collect()
    }

    async fn resolve_activator(&self, bundle: &Arc<Bundle>) -> Option<Arc<dyn BundleActivator>> {
        {
            let activators = self.inner.activators.lock().await;
            if let Some(activator) = activators.get(&bundle.id()) {
                return Some(activator.clone());
            }
        }
        let code = self.inner.codes.lock().await.get(&bundle.id()).cloned()?;
        let activator = code.activator()?;
        self.inner
            .activators
            .lock()
            .await
            .insert(bundle.id(), activator.clone());
        Some(activator)
    }

    /// Undo the visible effects of a failed start: discard the fresh context
    /// (and any listeners it registered) and return the state to RESOLVED.
    async fn rollback_start(&self, bundle: &Arc<Bundle>, context: &BundleContext) {
        context.close().await;
        self.inner.contexts.lock().await.remove(&bundle.id());
        self.inner
            .registry
            .unregister_bundle_services(bundle.id())
            .await;
        self.inner.registry.release_bundle(bundle.id()).await;
        bundle.set_state(BundleState::Resolved);
    }

    /// Shared teardown between stop and forced uninstall: listeners removed,
    /// remaining services force-unregistered, usage released, context gone.
    async fn cleanup_bundle(&self, bundle: &Arc<Bundle>) {
        if let Some(context) = self.inner.contexts.lock().await.remove(&bundle.id()) {
            context.close().await;
        }
        self.inner
            .registry
            .unregister_bundle_services(bundle.id())
            .await;
        self.inner.registry.release_bundle(bundle.id()).await;
    }

    async fn fire_bundle_event(&self, kind: BundleEventKind, bundle: &Arc<Bundle>) {
        self.inner
            .dispatcher
            .fire_bundle_event(&BundleEvent {
                kind,
                bundle_id: bundle.id(),
                bundle_name: bundle.name().to_string(),
            })
            .await;
    }
}

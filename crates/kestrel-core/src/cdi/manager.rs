//! Component lifecycle management.
//!
//! A component is created from a registered factory, wired with handlers and
//! driven between INVALID and VALID as its required services come and go.
//! Removal is terminal: a STOPPED component never revalidates.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, OnceLock};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::cdi::error::CdiError;
use crate::cdi::factory::{
    Blueprint, ComponentInstance, Constructor, FactoryContext, LifecycleFn,
};
use crate::cdi::handlers::{BindHandler, ComponentHandler, ProvidesHandler, RequiresHandler};
use crate::event::{BundleEvent, BundleEventKind, BundleListener};
use crate::framework::bundle::BundleId;
use crate::framework::context::BundleContext;
use crate::registry::properties::Properties;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentState {
    Invalid,
    Valid,
    Stopped,
}

impl fmt::Display for ComponentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ComponentState::Invalid => "INVALID",
            ComponentState::Valid => "VALID",
            ComponentState::Stopped => "STOPPED",
        };
        f.write_str(name)
    }
}

/// One live component: its state word, its instance while valid, and the
/// handlers driving it.
pub struct ComponentCore {
    name: String,
    factory: String,
    properties: Properties,
    state: StdMutex<ComponentState>,
    instance: StdMutex<Option<ComponentInstance>>,
    handlers: OnceLock<Vec<Arc<dyn ComponentHandler>>>,
    constructor: Option<Constructor>,
    on_validate: Option<LifecycleFn>,
    on_invalidate: Option<LifecycleFn>,
    /// Serializes lifecycle evaluation. Re-entrant requests (a handler
    /// firing during a transition) set `pending` instead of blocking.
    lifecycle: Mutex<()>,
    pending: AtomicBool,
}

impl ComponentCore {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn factory(&self) -> &str {
        &self.factory
    }

    /// Per-instance properties, overlaid onto every provided registration.
    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    pub fn state(&self) -> ComponentState {
        *self.state.lock().expect("component state lock poisoned")
    }

    /// The live instance, while the component is valid.
    pub fn instance(&self) -> Option<ComponentInstance> {
        self.instance
            .lock()
            .expect("component instance lock poisoned")
            .clone()
    }

    fn handlers(&self) -> &[Arc<dyn ComponentHandler>] {
        self.handlers.get().map(Vec::as_slice).unwrap_or(&[])
    }

    fn set_state(&self, state: ComponentState) {
        *self.state.lock().expect("component state lock poisoned") = state;
    }

    /// Re-evaluate validity and transition if needed. Safe to call from
    /// handler callbacks fired during a transition in progress: the extra
    /// request is folded into the running evaluation.
    pub async fn update_lifecycle(self: &Arc<Self>) {
        let Ok(_guard) = self.lifecycle.try_lock() else {
            self.pending.store(true, Ordering::SeqCst);
            return;
        };
        loop {
            self.pending.store(false, Ordering::SeqCst);
            self.evaluate_once().await;
            if !self.pending.load(Ordering::SeqCst) {
                break;
            }
        }
    }

    async fn evaluate_once(&self) {
        if self.state() == ComponentState::Stopped {
            return;
        }
        let mut valid = true;
        for handler in self.handlers() {
            if !handler.is_valid().await {
                valid = false;
                break;
            }
        }
        match (valid, self.state()) {
            (true, ComponentState::Invalid) => self.become_valid().await,
            (false, ComponentState::Valid) => self.become_invalid().await,
            _ => {}
        }
    }

    async fn become_valid(&self) {
        for handler in self.handlers() {
            handler.pre_validate().await;
        }
        // Instantiate only after every handler has prepared.
        let mut arguments = Vec::new();
        for handler in self.handlers() {
            arguments.extend(handler.constructor_arguments().await);
        }
        let instance: ComponentInstance = match &self.constructor {
            Some(constructor) => constructor(arguments),
            None => Arc::new(()),
        };
        *self
            .instance
            .lock()
            .expect("component instance lock poisoned") = Some(instance.clone());
        self.set_state(ComponentState::Valid);
        if let Some(callback) = &self.on_validate {
            callback(&instance);
        }
        for handler in self.handlers() {
            handler.post_validate(&instance).await;
        }
        log::debug!("Component '{}' is now VALID", self.name);
    }

    async fn become_invalid(&self) {
        let instance = self
            .instance
            .lock()
            .expect("component instance lock poisoned")
            .take();

        for handler in self.handlers() {
            handler.pre_invalidate().await;
        }
        if let (Some(callback), Some(instance)) = (&self.on_invalidate, instance.as_ref()) {
            callback(instance);
        }
        self.set_state(ComponentState::Invalid);
        for handler in self.handlers() {
            handler.post_invalidate().await;
        }
        log::debug!("Component '{}' is now INVALID", self.name);
    }

    async fn start(self: &Arc<Self>) {
        for handler in self.handlers() {
            handler.start().await;
        }
        self.update_lifecycle().await;
    }

    /// Terminal teardown: invalidate if valid, stop the handlers, STOPPED.
    async fn stop(self: &Arc<Self>) {
        let _guard = self.lifecycle.lock().await;
        if self.state() == ComponentState::Valid {
            self.become_invalid().await;
        }
        for handler in self.handlers() {
            handler.stop().await;
        }
        self.set_state(ComponentState::Stopped);
        log::debug!("Component '{}' is now STOPPED", self.name);
    }
}

impl fmt::Debug for ComponentCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentCore")
            .field("name", &self.name)
            .field("factory", &self.factory)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

struct RuntimeInner {
    factories: Mutex<HashMap<String, Arc<Blueprint>>>,
    components: Mutex<HashMap<String, Arc<ComponentCore>>>,
    /// Component names per owning bundle, torn down when the bundle stops.
    owners: Mutex<HashMap<BundleId, Vec<String>>>,
}

/// The component runtime: factory registry plus live component table.
///
/// Register it as a bundle listener so components owned by a stopping bundle
/// are torn down before the bundle's services disappear.
#[derive(Clone)]
pub struct CdiRuntime {
    inner: Arc<RuntimeInner>,
}

impl Default for CdiRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl CdiRuntime {
    pub fn new() -> Self {
        CdiRuntime {
            inner: Arc::new(RuntimeInner {
                factories: Mutex::new(HashMap::new()),
                components: Mutex::new(HashMap::new()),
                owners: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Register a completed factory description. Auto-instances are created
    /// immediately, owned by the context's bundle.
    pub async fn register_factory(
        &self,
        context: &BundleContext,
        factory: FactoryContext,
    ) -> Result<(), CdiError> {
        let (name, blueprint) = factory.into_blueprint()?;
        {
            let mut factories = self.inner.factories.lock().await;
            if factories.contains_key(&name) {
                return Err(CdiError::DuplicateFactory(name));
            }
            factories.insert(name.clone(), blueprint.clone());
        }
        log::info!("Registered component factory '{}'", name);

        for (instance, properties) in blueprint.auto_instances.clone() {
            self.create_component(context, &name, &instance, properties)
                .await?;
        }
        Ok(())
    }

    /// Remove a factory and stop every component created from it.
    pub async fn unregister_factory(&self, name: &str) -> Result<(), CdiError> {
        if self.inner.factories.lock().await.remove(name).is_none() {
            return Err(CdiError::UnknownFactory(name.to_string()));
        }
        let doomed: Vec<String> = {
            let components = self.inner.components.lock().await;
            components
                .values()
                .filter(|core| core.factory() == name)
                .map(|core| core.name().to_string())
                .collect()
        };
        for instance in doomed {
            if let Err(err) = self.remove_component(&instance).await {
                log::warn!("Failed to remove component '{}': {}", instance, err);
            }
        }
        log::info!("Unregistered component factory '{}'", name);
        Ok(())
    }

    /// Instantiate a component from a factory, owned by the context's
    /// bundle. The component starts INVALID and validates as soon as its
    /// requirements are satisfied. `properties` travel with the instance and
    /// overlay the properties of every service it provides.
    pub async fn create_component(
        &self,
        context: &BundleContext,
        factory: &str,
        instance: &str,
        properties: Properties,
    ) -> Result<Arc<ComponentCore>, CdiError> {
        let blueprint = self
            .inner
            .factories
            .lock()
            .await
            .get(factory)
            .cloned()
            .ok_or_else(|| CdiError::UnknownFactory(factory.to_string()))?;

        let core = Arc::new(ComponentCore {
            name: instance.to_string(),
            factory: factory.to_string(),
            properties: properties.clone(),
            state: StdMutex::new(ComponentState::Invalid),
            instance: StdMutex::new(None),
            handlers: OnceLock::new(),
            constructor: blueprint.constructor.clone(),
            on_validate: blueprint.on_validate.clone(),
            on_invalidate: blueprint.on_invalidate.clone(),
            lifecycle: Mutex::new(()),
            pending: AtomicBool::new(false),
        });

        // Requires first: constructor arguments follow declaration order.
        // Factory-supplied handlers run after the built-ins.
        let mut handlers: Vec<Arc<dyn ComponentHandler>> = vec![
            Arc::new(RequiresHandler::new(
                context,
                &blueprint.requirements,
                Arc::downgrade(&core),
            )),
            Arc::new(BindHandler::new(context, &blueprint.binds)),
            Arc::new(ProvidesHandler::new(
                context.clone(),
                blueprint.provisions.clone(),
                properties,
            )),
        ];
        handlers.extend(blueprint.handlers.iter().map(|build| build()));
        core.handlers
            .set(handlers)
            .unwrap_or_else(|_| unreachable!("handlers set once"));

        {
            let mut components = self.inner.components.lock().await;
            if components.contains_key(instance) {
                return Err(CdiError::DuplicateInstance(instance.to_string()));
            }
            components.insert(instance.to_string(), core.clone());
        }
        self.inner
            .owners
            .lock()
            .await
            .entry(context.bundle_id())
            .or_default()
            .push(instance.to_string());

        core.start().await;
        log::info!(
            "Created component '{}' from factory '{}'",
            instance,
            factory
        );
        Ok(core)
    }

    /// Stop and discard a component. Terminal for that instance.
    pub async fn remove_component(&self, instance: &str) -> Result<(), CdiError> {
        let core = self
            .inner
            .components
            .lock()
            .await
            .remove(instance)
            .ok_or_else(|| CdiError::UnknownInstance(instance.to_string()))?;
        {
            let mut owners = self.inner.owners.lock().await;
            for names in owners.values_mut() {
                names.retain(|name| name != instance);
            }
            owners.retain(|_, names| !names.is_empty());
        }
        core.stop().await;
        log::info!("Removed component '{}'", instance);
        Ok(())
    }

    pub async fn component(&self, instance: &str) -> Option<Arc<ComponentCore>> {
        self.inner.components.lock().await.get(instance).cloned()
    }

    pub async fn component_state(&self, instance: &str) -> Option<ComponentState> {
        self.component(instance).await.map(|core| core.state())
    }

    pub async fn component_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.components.lock().await.keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl BundleListener for CdiRuntime {
    async fn bundle_changed(&self, event: &BundleEvent) {
        if event.kind != BundleEventKind::Stopping {
            return;
        }
        let doomed = self
            .inner
            .owners
            .lock()
            .await
            .remove(&event.bundle_id)
            .unwrap_or_default();
        for instance in doomed {
            if let Err(err) = self.remove_component(&instance).await {
                log::warn!(
                    "Failed to tear down component '{}' of stopping bundle '{}': {}",
                    instance,
                    event.bundle_name,
                    err
                );
            }
        }
    }
}

//! Component handlers.
//!
//! Each concern of a component blueprint is driven by a handler: required
//! dependencies, bind callbacks and provided services are the built-ins, and
//! factories can attach their own through [`FactoryContext::handler`]. The
//! manager calls the handlers in order around every lifecycle transition.
//!
//! [`FactoryContext::handler`]: crate::cdi::factory::FactoryContext::handler

use std::sync::{Arc, Mutex as StdMutex, Weak};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::cdi::factory::{BindFn, BindSpec, ComponentInstance, Provision, Requirement};
use crate::cdi::manager::ComponentCore;
use crate::framework::context::BundleContext;
use crate::registry::properties::Properties;
use crate::registry::reference::ServiceRef;
use crate::registry::registration::ServiceRegistration;
use crate::registry::ServiceObject;
use crate::tracker::{ServiceTracker, TrackerCustomizer};

/// One lifecycle concern of a component. Hooks default to no-ops so a
/// handler only overrides the phases it participates in.
///
/// A handler whose validity verdict changes outside a transition should call
/// [`ComponentCore::update_lifecycle`] to request re-evaluation.
#[async_trait]
pub trait ComponentHandler: Send + Sync {
    /// Begin watching; called once when the component is created.
    async fn start(&self) {}

    /// Stop watching and release resources; called once on removal.
    async fn stop(&self) {}

    /// Whether this handler's precondition for validity holds.
    async fn is_valid(&self) -> bool {
        true
    }

    /// Service objects this handler contributes to the constructor.
    async fn constructor_arguments(&self) -> Vec<ServiceObject> {
        Vec::new()
    }

    async fn pre_validate(&self) {}

    async fn post_validate(&self, instance: &ComponentInstance) {
        let _ = instance;
    }

    async fn pre_invalidate(&self) {}

    async fn post_invalidate(&self) {}
}

// --- Required dependencies ---

struct RequirementWatch {
    core: Weak<ComponentCore>,
}

#[async_trait]
impl TrackerCustomizer for RequirementWatch {
    async fn adding(&self, _reference: &ServiceRef, _service: &ServiceObject) {
        if let Some(core) = self.core.upgrade() {
            core.update_lifecycle().await;
        }
    }

    async fn removed(&self, _reference: &ServiceRef, _service: &ServiceObject) {
        if let Some(core) = self.core.upgrade() {
            core.update_lifecycle().await;
        }
    }
}

/// Gates validity on every required capability having at least one matching
/// service, and supplies the best match of each to the constructor.
pub(crate) struct RequiresHandler {
    trackers: Vec<ServiceTracker>,
}

impl RequiresHandler {
    pub(crate) fn new(
        context: &BundleContext,
        requirements: &[Requirement],
        core: Weak<ComponentCore>,
    ) -> Self {
        let trackers = requirements
            .iter()
            .map(|requirement| {
                ServiceTracker::new(
                    context.clone(),
                    Some(&requirement.capability),
                    requirement.filter.clone(),
                    Arc::new(RequirementWatch { core: core.clone() }),
                )
            })
            .collect();
        RequiresHandler { trackers }
    }
}

#[async_trait]
impl ComponentHandler for RequiresHandler {
    async fn start(&self) {
        for tracker in &self.trackers {
            tracker.open().await;
        }
    }

    async fn stop(&self) {
        for tracker in &self.trackers {
            tracker.close().await;
        }
    }

    async fn is_valid(&self) -> bool {
        for tracker in &self.trackers {
            if tracker.size().await == 0 {
                return false;
            }
        }
        true
    }

    async fn constructor_arguments(&self) -> Vec<ServiceObject> {
        let mut arguments = Vec::with_capacity(self.trackers.len());
        for tracker in &self.trackers {
            if let Some(service) = tracker.get_service().await {
                arguments.push(service);
            }
        }
        arguments
    }
}

// --- Bind callbacks ---

type InstanceCell = Arc<StdMutex<Option<ComponentInstance>>>;

struct BindWatch {
    instance: InstanceCell,
    bind: BindFn,
    unbind: BindFn,
}

impl BindWatch {
    fn current(&self) -> Option<ComponentInstance> {
        self.instance.lock().expect("instance lock poisoned").clone()
    }
}

#[async_trait]
impl TrackerCustomizer for BindWatch {
    async fn adding(&self, reference: &ServiceRef, service: &ServiceObject) {
        if let Some(instance) = self.current() {
            (self.bind)(&instance, reference, service);
        }
    }

    async fn removed(&self, reference: &ServiceRef, service: &ServiceObject) {
        if let Some(instance) = self.current() {
            (self.unbind)(&instance, reference, service);
        }
    }
}

/// Injects optional dependencies through bind/unbind callbacks. Bound
/// services never gate validity; services tracked before the component
/// became valid are replayed at post-validate.
pub(crate) struct BindHandler {
    entries: Vec<(ServiceTracker, BindSpec)>,
    instance: InstanceCell,
}

impl BindHandler {
    pub(crate) fn new(context: &BundleContext, binds: &[BindSpec]) -> Self {
        let instance: InstanceCell = Arc::new(StdMutex::new(None));
        let entries = binds
            .iter()
            .map(|spec| {
                let tracker = ServiceTracker::new(
                    context.clone(),
                    Some(&spec.capability),
                    spec.filter.clone(),
                    Arc::new(BindWatch {
                        instance: instance.clone(),
                        bind: spec.bind.clone(),
                        unbind: spec.unbind.clone(),
                    }),
                );
                (tracker, spec.clone())
            })
            .collect();
        BindHandler { entries, instance }
    }

    fn set_instance(&self, instance: Option<ComponentInstance>) {
        *self.instance.lock().expect("instance lock poisoned") = instance;
    }
}

#[async_trait]
impl ComponentHandler for BindHandler {
    async fn start(&self) {
        for (tracker, _) in &self.entries {
            tracker.open().await;
        }
    }

    async fn stop(&self) {
        self.set_instance(None);
        for (tracker, _) in &self.entries {
            tracker.close().await;
        }
    }

    async fn post_validate(&self, instance: &ComponentInstance) {
        self.set_instance(Some(instance.clone()));
        for (tracker, spec) in &self.entries {
            for (reference, service) in tracker.tracked().await {
                (spec.bind)(instance, &reference, &service);
            }
        }
    }

    async fn pre_invalidate(&self) {
        let instance = {
            let mut cell = self.instance.lock().expect("instance lock poisoned");
            cell.take()
        };
        let Some(instance) = instance else {
            return;
        };
        for (tracker, spec) in &self.entries {
            for (reference, service) in tracker.tracked().await {
                (spec.unbind)(&instance, &reference, &service);
            }
        }
    }
}

// --- Provided services ---

/// Registers the component instance under its provisions while valid.
/// Per-instance properties overlay the provision's own.
pub(crate) struct ProvidesHandler {
    context: BundleContext,
    provisions: Vec<Provision>,
    instance_properties: Properties,
    registrations: Mutex<Vec<ServiceRegistration>>,
}

impl ProvidesHandler {
    pub(crate) fn new(
        context: BundleContext,
        provisions: Vec<Provision>,
        instance_properties: Properties,
    ) -> Self {
        ProvidesHandler {
            context,
            provisions,
            instance_properties,
            registrations: Mutex::new(Vec::new()),
        }
    }

    async fn unregister_all(&self) {
        let drained: Vec<ServiceRegistration> =
            std::mem::take(&mut *self.registrations.lock().await);
        for registration in drained {
            if let Err(err) = registration.unregister().await {
                log::warn!("Failed to unregister a provided service: {}", err);
            }
        }
    }
}

#[async_trait]
impl ComponentHandler for ProvidesHandler {
    async fn stop(&self) {
        self.unregister_all().await;
    }

    async fn post_validate(&self, instance: &ComponentInstance) {
        for provision in &self.provisions {
            let capabilities: Vec<&str> =
                provision.capabilities.iter().map(String::as_str).collect();
            let mut properties = provision.properties.clone();
            properties.extend(self.instance_properties.clone());
            match self
                .context
                .register_service(&capabilities, instance.clone(), properties)
                .await
            {
                Ok(registration) => self.registrations.lock().await.push(registration),
                Err(err) => {
                    log::warn!("Failed to register a provided service: {}", err);
                }
            }
        }
    }

    async fn pre_invalidate(&self) {
        self.unregister_all().await;
    }
}

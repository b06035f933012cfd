//! Component factory descriptions.
//!
//! A [`FactoryContext`] is an explicit builder for a component blueprint:
//! constructor, required capabilities, provided services, bind callbacks and
//! lifecycle callbacks. It must be completed with [`FactoryContext::complete`]
//! before registration, and is immutable afterwards.

use std::sync::Arc;

use crate::cdi::error::CdiError;
use crate::cdi::handlers::ComponentHandler;
use crate::filter::Filter;
use crate::registry::properties::Properties;
use crate::registry::reference::ServiceRef;
use crate::registry::ServiceObject;

/// A constructed component instance. The same shape as a service object, so
/// provided components register directly.
pub type ComponentInstance = ServiceObject;

/// Builds the instance from the best service of each requirement, in
/// declaration order.
pub type Constructor = Arc<dyn Fn(Vec<ServiceObject>) -> ComponentInstance + Send + Sync>;

/// Injection callback for one bound service.
pub type BindFn = Arc<dyn Fn(&ComponentInstance, &ServiceRef, &ServiceObject) + Send + Sync>;

/// Lifecycle callback invoked with the live instance.
pub type LifecycleFn = Arc<dyn Fn(&ComponentInstance) + Send + Sync>;

/// Builds one handler per component created from the factory.
pub type HandlerFactory = Arc<dyn Fn() -> Arc<dyn ComponentHandler> + Send + Sync>;

/// A capability the component cannot be valid without.
#[derive(Clone)]
pub struct Requirement {
    pub capability: String,
    pub filter: Option<Filter>,
}

/// Services the component registers while valid.
#[derive(Clone)]
pub struct Provision {
    pub capabilities: Vec<String>,
    pub properties: Properties,
}

/// An optional dependency injected through callbacks rather than the
/// constructor. Bound services do not gate validity.
#[derive(Clone)]
pub struct BindSpec {
    pub capability: String,
    pub filter: Option<Filter>,
    pub bind: BindFn,
    pub unbind: BindFn,
}

pub(crate) struct Blueprint {
    pub(crate) constructor: Option<Constructor>,
    pub(crate) requirements: Vec<Requirement>,
    pub(crate) provisions: Vec<Provision>,
    pub(crate) binds: Vec<BindSpec>,
    pub(crate) on_validate: Option<LifecycleFn>,
    pub(crate) on_invalidate: Option<LifecycleFn>,
    pub(crate) handlers: Vec<HandlerFactory>,
    pub(crate) auto_instances: Vec<(String, Properties)>,
}

/// Mutable description of a component factory. Once [`complete`]d, further
/// mutation is an error.
///
/// [`complete`]: FactoryContext::complete
pub struct FactoryContext {
    name: String,
    blueprint: Blueprint,
    completed: bool,
}

impl FactoryContext {
    pub fn new(name: impl Into<String>) -> Self {
        FactoryContext {
            name: name.into(),
            blueprint: Blueprint {
                constructor: None,
                requirements: Vec::new(),
                provisions: Vec::new(),
                binds: Vec::new(),
                on_validate: None,
                on_invalidate: None,
                handlers: Vec::new(),
                auto_instances: Vec::new(),
            },
            completed: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// Set the instance constructor. Components without one get a unit
    /// placeholder instance.
    pub fn constructor<F>(&mut self, constructor: F) -> Result<&mut Self, CdiError>
    where
        F: Fn(Vec<ServiceObject>) -> ComponentInstance + Send + Sync + 'static,
    {
        self.mutate()?.constructor = Some(Arc::new(constructor));
        Ok(self)
    }

    /// Add a required capability. The component only becomes valid while at
    /// least one matching service is registered.
    pub fn require(
        &mut self,
        capability: impl Into<String>,
        filter: Option<Filter>,
    ) -> Result<&mut Self, CdiError> {
        self.mutate()?.requirements.push(Requirement {
            capability: capability.into(),
            filter,
        });
        Ok(self)
    }

    /// Add a service provision: while valid, the instance is registered under
    /// these capabilities.
    pub fn provide(
        &mut self,
        capabilities: &[&str],
        properties: Properties,
    ) -> Result<&mut Self, CdiError> {
        self.mutate()?.provisions.push(Provision {
            capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
            properties,
        });
        Ok(self)
    }

    /// Add a bind dependency with injection callbacks.
    pub fn bind<B, U>(
        &mut self,
        capability: impl Into<String>,
        filter: Option<Filter>,
        bind: B,
        unbind: U,
    ) -> Result<&mut Self, CdiError>
    where
        B: Fn(&ComponentInstance, &ServiceRef, &ServiceObject) + Send + Sync + 'static,
        U: Fn(&ComponentInstance, &ServiceRef, &ServiceObject) + Send + Sync + 'static,
    {
        self.mutate()?.binds.push(BindSpec {
            capability: capability.into(),
            filter,
            bind: Arc::new(bind),
            unbind: Arc::new(unbind),
        });
        Ok(self)
    }

    /// Callback invoked each time the component becomes valid.
    pub fn on_validate<F>(&mut self, callback: F) -> Result<&mut Self, CdiError>
    where
        F: Fn(&ComponentInstance) + Send + Sync + 'static,
    {
        self.mutate()?.on_validate = Some(Arc::new(callback));
        Ok(self)
    }

    /// Callback invoked each time the component becomes invalid.
    pub fn on_invalidate<F>(&mut self, callback: F) -> Result<&mut Self, CdiError>
    where
        F: Fn(&ComponentInstance) + Send + Sync + 'static,
    {
        self.mutate()?.on_invalidate = Some(Arc::new(callback));
        Ok(self)
    }

    /// Attach a custom handler alongside the built-in requirement, bind and
    /// provision handlers. The constructor runs once per component instance.
    pub fn handler<F, H>(&mut self, handler: F) -> Result<&mut Self, CdiError>
    where
        F: Fn() -> H + Send + Sync + 'static,
        H: ComponentHandler + 'static,
    {
        self.mutate()?
            .handlers
            .push(Arc::new(move || Arc::new(handler())));
        Ok(self)
    }

    /// Name an instance created automatically when the factory registers,
    /// with its per-instance properties.
    pub fn auto_instance(
        &mut self,
        instance: impl Into<String>,
        properties: Properties,
    ) -> Result<&mut Self, CdiError> {
        let name = instance.into();
        self.mutate()?.auto_instances.push((name, properties));
        Ok(self)
    }

    /// Freeze the description. A second call is an error.
    pub fn complete(&mut self) -> Result<(), CdiError> {
        if self.completed {
            return Err(CdiError::AlreadyCompleted);
        }
        self.completed = true;
        Ok(())
    }

    pub(crate) fn into_blueprint(self) -> Result<(String, Arc<Blueprint>), CdiError> {
        if !self.completed {
            return Err(CdiError::NotCompleted(self.name));
        }
        Ok((self.name, Arc::new(self.blueprint)))
    }

    fn mutate(&mut self) -> Result<&mut Blueprint, CdiError> {
        if self.completed {
            return Err(CdiError::AlreadyCompleted);
        }
        Ok(&mut self.blueprint)
    }
}

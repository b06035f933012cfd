pub mod cdi;
pub mod event;
pub mod filter;
pub mod framework;
pub mod registry;
pub mod tracker;

// Re-export the types hosts and bundles touch most.
pub use cdi::{CdiRuntime, ComponentHandler, ComponentState, FactoryContext};
pub use event::{
    BundleEvent, BundleListener, EventDispatcher, FrameworkEvent, FrameworkListener, ServiceEvent,
    ServiceListener,
};
pub use filter::Filter;
pub use framework::{
    Bundle, BundleActivator, BundleContext, BundleDirectory, BundleId, BundleState,
    DynamicBundleLoader, Error, Framework, Result, StaticBundleLoader,
};
pub use registry::{ServiceObject, ServiceRef, ServiceRegistration, ServiceRegistry};
pub use tracker::{ServiceTracker, TrackerCustomizer};

#[cfg(test)]
mod tests;

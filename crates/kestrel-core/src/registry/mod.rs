//! Service registry: registration, indexed lookup and usage tracking.
//!
//! Services are arbitrary objects registered under one or more capability
//! names with a property map. The registry keeps a global index and one index
//! per capability, both maintained in sort order (descending priority,
//! ascending service id) by insertion rather than re-sorting, and fires
//! service events synchronously with each mutation.

pub mod error;
pub mod properties;
pub mod reference;
pub mod registration;
pub mod registry;

use std::any::Any;
use std::sync::Arc;

/// The registered service object itself. Consumers downcast to the concrete
/// type they expect.
pub type ServiceObject = Arc<dyn Any + Send + Sync>;

pub use error::RegistryError;
pub use properties::{Properties, DEFAULT_PRIORITY, OBJECT_CLASS, OWNING_BUNDLE_ID, SERVICE_ID, SERVICE_PRIORITY};
pub use reference::{ServiceId, ServiceRef, SortKey};
pub use registration::ServiceRegistration;
pub use registry::ServiceRegistry;

#[cfg(test)]
mod tests;

//! Registration handle returned to the registering bundle.

use std::fmt;

use crate::registry::error::RegistryError;
use crate::registry::properties::Properties;
use crate::registry::reference::ServiceRef;
use crate::registry::registry::ServiceRegistry;

/// Capability handle over one registered service: the only way to update its
/// properties or unregister it. Held by the registering bundle.
pub struct ServiceRegistration {
    registry: ServiceRegistry,
    reference: ServiceRef,
}

impl ServiceRegistration {
    pub(crate) fn new(registry: ServiceRegistry, reference: ServiceRef) -> Self {
        ServiceRegistration { registry, reference }
    }

    pub fn reference(&self) -> &ServiceRef {
        &self.reference
    }

    /// Merge a property update into the underlying reference. Framework-
    /// managed keys in the patch are ignored; MODIFIED is fired with the
    /// previous snapshot attached.
    pub async fn set_properties(&self, patch: Properties) -> Result<(), RegistryError> {
        self.registry.update_properties(&self.reference, patch).await
    }

    /// Unregister the underlying service. Fails with `NotFound` if it was
    /// already removed (e.g. force-unregistered when the bundle stopped).
    pub async fn unregister(&self) -> Result<(), RegistryError> {
        self.registry.unregister(&self.reference).await
    }
}

impl fmt::Debug for ServiceRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRegistration")
            .field("reference", &self.reference)
            .finish()
    }
}

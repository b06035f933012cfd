use thiserror::Error;

use crate::registry::reference::ServiceId;

/// Registry contract violations. These propagate synchronously to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Bad arguments at registration time (empty capability list, missing
    /// service object, ...).
    #[error("invalid service registration: {0}")]
    InvalidRegistration(String),

    /// The reference is not (or no longer) known to the registry.
    #[error("unknown service reference (service id {service_id})")]
    NotFound { service_id: ServiceId },
}

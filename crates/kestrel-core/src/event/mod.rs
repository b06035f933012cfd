//! Event model: framework, bundle and service events plus their listener
//! traits.
//!
//! The three listener categories are independent. Framework and bundle
//! listeners are a flat list; service listeners are indexed by capability
//! name (plus a wildcard bucket) and may carry a [`Filter`] that is
//! re-evaluated on every property change, synthesizing
//! [`ServiceEventKind::ModifiedEndmatch`] when a service stops matching.

pub mod dispatcher;
pub mod error;
pub mod workers;

use async_trait::async_trait;

use crate::framework::bundle::BundleId;
use crate::registry::properties::Properties;
use crate::registry::reference::ServiceRef;

pub use dispatcher::EventDispatcher;
pub use error::EventError;
pub use workers::EventWorkers;

/// Identifier handed out per registered listener, used to unregister it.
pub type ListenerId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameworkEventKind {
    Starting,
    Started,
    Stopping,
    Stopped,
    /// A non-fatal framework-level failure, e.g. a bundle failing to start
    /// during a start-level walk.
    Error,
}

#[derive(Debug, Clone)]
pub struct FrameworkEvent {
    pub kind: FrameworkEventKind,
    pub message: Option<String>,
}

impl FrameworkEvent {
    pub fn new(kind: FrameworkEventKind) -> Self {
        FrameworkEvent { kind, message: None }
    }

    pub fn error(message: impl Into<String>) -> Self {
        FrameworkEvent {
            kind: FrameworkEventKind::Error,
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleEventKind {
    Installed,
    Starting,
    Started,
    Stopping,
    Stopped,
    Uninstalled,
}

#[derive(Debug, Clone)]
pub struct BundleEvent {
    pub kind: BundleEventKind,
    pub bundle_id: BundleId,
    pub bundle_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceEventKind {
    Registered,
    Modified,
    /// Synthesized for listeners whose filter matched a service's previous
    /// properties but no longer matches after a MODIFIED; carries the
    /// previous snapshot so the listener can unwind.
    ModifiedEndmatch,
    Unregistering,
}

#[derive(Debug, Clone)]
pub struct ServiceEvent {
    pub kind: ServiceEventKind,
    pub reference: ServiceRef,
    /// Property snapshot from before the mutation; present on
    /// `Modified` and `ModifiedEndmatch`.
    pub previous: Option<Properties>,
}

#[async_trait]
pub trait FrameworkListener: Send + Sync {
    async fn framework_changed(&self, event: &FrameworkEvent);
}

#[async_trait]
pub trait BundleListener: Send + Sync {
    async fn bundle_changed(&self, event: &BundleEvent);
}

#[async_trait]
pub trait ServiceListener: Send + Sync {
    async fn service_changed(&self, event: &ServiceEvent);
}

//! Service tracking: a live, sorted view of the services matching a
//! capability and an optional filter.
//!
//! A [`ServiceTracker`] registers a service listener and mirrors matching
//! registrations into a local table, fetching each service object (one usage
//! count against the owning bundle) and notifying a [`TrackerCustomizer`] as
//! services come and go. Opening is listener-first, so registrations racing
//! the initial seed are never missed.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::event::{ListenerId, ServiceEvent, ServiceEventKind, ServiceListener};
use crate::filter::Filter;
use crate::framework::context::BundleContext;
use crate::registry::reference::ServiceRef;
use crate::registry::ServiceObject;

/// Hooks invoked as tracked services appear, change and disappear. All
/// default to no-ops.
#[async_trait]
pub trait TrackerCustomizer: Send + Sync {
    /// A matching service entered the tracked set.
    async fn adding(&self, reference: &ServiceRef, service: &ServiceObject) {
        let _ = (reference, service);
    }

    /// A tracked service's properties changed and it still matches.
    async fn modified(&self, reference: &ServiceRef, service: &ServiceObject) {
        let _ = (reference, service);
    }

    /// A tracked service left the tracked set (unregistered or stopped
    /// matching the filter).
    async fn removed(&self, reference: &ServiceRef, service: &ServiceObject) {
        let _ = (reference, service);
    }
}

/// Customizer with no behavior, for trackers used purely as a lookup table.
#[derive(Default)]
pub struct NoopCustomizer;

impl TrackerCustomizer for NoopCustomizer {}

struct TrackerInner {
    context: BundleContext,
    capability: Option<String>,
    filter: Option<Filter>,
    customizer: Arc<dyn TrackerCustomizer>,
    /// Tracked pairs, kept sorted by (priority desc, service id asc).
    tracked: Mutex<Vec<(ServiceRef, ServiceObject)>>,
    listener: Mutex<Option<ListenerId>>,
}

/// Tracks the services matching a capability/filter pair for one bundle.
#[derive(Clone)]
pub struct ServiceTracker {
    inner: Arc<TrackerInner>,
}

struct TrackerListener {
    inner: Weak<TrackerInner>,
}

#[async_trait]
impl ServiceListener for TrackerListener {
    async fn service_changed(&self, event: &ServiceEvent) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        match event.kind {
            ServiceEventKind::Registered => {
                ServiceTracker::track(&inner, &event.reference, false).await;
            }
            ServiceEventKind::Modified => {
                // A modification can also bring a previously non-matching
                // service into range.
                ServiceTracker::track(&inner, &event.reference, true).await;
            }
            ServiceEventKind::ModifiedEndmatch | ServiceEventKind::Unregistering => {
                ServiceTracker::untrack(&inner, &event.reference).await;
            }
        }
    }
}

impl ServiceTracker {
    pub fn new(
        context: BundleContext,
        capability: Option<&str>,
        filter: Option<Filter>,
        customizer: Arc<dyn TrackerCustomizer>,
    ) -> Self {
        ServiceTracker {
            inner: Arc::new(TrackerInner {
                context,
                capability: capability.map(str::to_string),
                filter,
                customizer,
                tracked: Mutex::new(Vec::new()),
                listener: Mutex::new(None),
            }),
        }
    }

    /// Start tracking: register the listener, then seed from the services
    /// already registered. Idempotent.
    pub async fn open(&self) {
        {
            let mut listener = self.inner.listener.lock().await;
            if listener.is_some() {
                return;
            }
            let id = self
                .inner
                .context
                .add_service_listener(
                    Arc::new(TrackerListener {
                        inner: Arc::downgrade(&self.inner),
                    }),
                    self.inner.capability.clone().map(|c| vec![c]),
                    self.inner.filter.clone(),
                )
                .await;
            *listener = Some(id);
        }

        let existing = self
            .inner
            .context
            .get_service_references(self.inner.capability.as_deref(), self.inner.filter.as_ref())
            .await;
        for reference in existing {
            Self::track(&self.inner, &reference, false).await;
        }
    }

    /// Stop tracking: remove the listener and release every tracked service.
    /// The customizer's `removed` hook is not called; close is teardown, not
    /// a departure of the services themselves.
    pub async fn close(&self) {
        let id = self.inner.listener.lock().await.take();
        if let Some(id) = id {
            self.inner.context.remove_listener(id).await;
        }
        let drained: Vec<(ServiceRef, ServiceObject)> =
            std::mem::take(&mut *self.inner.tracked.lock().await);
        for (reference, _service) in drained {
            self.inner.context.unget_service(&reference).await;
        }
    }

    /// References of the tracked services, best first.
    pub async fn get_service_references(&self) -> Vec<ServiceRef> {
        self.inner
            .tracked
            .lock()
            .await
            .iter()
            .map(|(reference, _)| reference.clone())
            .collect()
    }

    /// The best tracked service, if any.
    pub async fn get_service(&self) -> Option<ServiceObject> {
        self.inner
            .tracked
            .lock()
            .await
            .first()
            .map(|(_, service)| service.clone())
    }

    /// All tracked services, best first.
    pub async fn get_services(&self) -> Vec<ServiceObject> {
        self.inner
            .tracked
            .lock()
            .await
            .iter()
            .map(|(_, service)| service.clone())
            .collect()
    }

    /// The tracked service for a specific reference.
    pub async fn get_service_for(&self, reference: &ServiceRef) -> Option<ServiceObject> {
        self.inner
            .tracked
            .lock()
            .await
            .iter()
            .find(|(tracked, _)| tracked == reference)
            .map(|(_, service)| service.clone())
    }

    /// Tracked (reference, service) pairs, best first.
    pub async fn tracked(&self) -> Vec<(ServiceRef, ServiceObject)> {
        self.inner.tracked.lock().await.clone()
    }

    pub async fn size(&self) -> usize {
        self.inner.tracked.lock().await.len()
    }

    async fn track(inner: &Arc<TrackerInner>, reference: &ServiceRef, modified: bool) {
        let already = {
            let tracked = inner.tracked.lock().await;
            tracked
                .iter()
                .find(|(tracked, _)| tracked == reference)
                .map(|(_, service)| service.clone())
        };
        if let Some(service) = already {
            if modified {
                inner.customizer.modified(reference, &service).await;
            }
            return;
        }

        let Some(service) = inner.context.get_service(reference).await else {
            // Unregistered between the event and the fetch.
            return;
        };

        {
            let mut tracked = inner.tracked.lock().await;
            // Seeding can race the listener; keep the first entry.
            if tracked.iter().any(|(existing, _)| existing == reference) {
                drop(tracked);
                inner.context.unget_service(reference).await;
                return;
            }
            let key = reference.sort_key();
            let at = tracked
                .partition_point(|(existing, _)| existing.sort_key() < key);
            tracked.insert(at, (reference.clone(), service.clone()));
        }
        inner.customizer.adding(reference, &service).await;
    }

    async fn untrack(inner: &Arc<TrackerInner>, reference: &ServiceRef) {
        let removed = {
            let mut tracked = inner.tracked.lock().await;
            let at = tracked.iter().position(|(tracked, _)| tracked == reference);
            at.map(|at| tracked.remove(at))
        };
        if let Some((reference, service)) = removed {
            inner.customizer.removed(&reference, &service).await;
            inner.context.unget_service(&reference).await;
        }
    }
}

impl std::fmt::Debug for ServiceTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceTracker")
            .field("capability", &self.inner.capability)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests;

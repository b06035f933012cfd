//! Listener tables and event fan-out.
//!
//! Internal state lives in [`ListenerTables`]; the public [`EventDispatcher`]
//! is a cloneable wrapper around it behind a tokio mutex. Firing snapshots
//! the matching listeners under the lock, releases it, then runs every
//! callback as its own task: a panicking listener is logged and never blocks
//! delivery to its siblings, and a callback that stays blocked past
//! [`LISTENER_BLOCK_WARN`] produces a periodic warning instead of an abort.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio::time::{timeout, Instant};

use crate::event::workers::EventWorkers;
use crate::event::{
    BundleEvent, BundleListener, FrameworkEvent, FrameworkListener, ListenerId, ServiceEvent,
    ServiceEventKind, ServiceListener,
};
use crate::filter::Filter;
use crate::framework::constants::LISTENER_BLOCK_WARN;
use crate::registry::properties::Properties;
use crate::registry::reference::ServiceRef;

struct ServiceEntry {
    listener: Arc<dyn ServiceListener>,
    filter: Option<Filter>,
}

#[derive(Default)]
struct ListenerTables {
    next_id: ListenerId,
    framework: Vec<(ListenerId, Arc<dyn FrameworkListener>)>,
    bundle: Vec<(ListenerId, Arc<dyn BundleListener>)>,
    service: HashMap<ListenerId, ServiceEntry>,
    /// Capability name -> listener ids interested in it.
    by_capability: HashMap<String, Vec<ListenerId>>,
    /// Listeners registered without a capability list ("all capabilities").
    all_capabilities: Vec<ListenerId>,
}

/// Thread-safe shared event dispatcher.
#[derive(Clone)]
pub struct EventDispatcher {
    tables: Arc<Mutex<ListenerTables>>,
    workers: EventWorkers,
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDispatcher").finish_non_exhaustive()
    }
}

impl EventDispatcher {
    pub fn new() -> Self {
        EventDispatcher {
            tables: Arc::new(Mutex::new(ListenerTables::default())),
            workers: EventWorkers::new(),
        }
    }

    pub async fn add_framework_listener(
        &self,
        listener: Arc<dyn FrameworkListener>,
    ) -> ListenerId {
        let mut tables = self.tables.lock().await;
        let id = tables.allocate_id();
        tables.framework.push((id, listener));
        id
    }

    pub async fn add_bundle_listener(&self, listener: Arc<dyn BundleListener>) -> ListenerId {
        let mut tables = self.tables.lock().await;
        let id = tables.allocate_id();
        tables.bundle.push((id, listener));
        id
    }

    /// Register a service listener. `capabilities` of `None` subscribes to
    /// every capability; otherwise only events for services carrying one of
    /// the named capabilities are delivered. The optional filter narrows
    /// delivery further and drives end-match synthesis.
    pub async fn add_service_listener(
        &self,
        listener: Arc<dyn ServiceListener>,
        capabilities: Option<Vec<String>>,
        filter: Option<Filter>,
    ) -> ListenerId {
        let mut tables = self.tables.lock().await;
        let id = tables.allocate_id();
        tables.service.insert(id, ServiceEntry { listener, filter });
        match capabilities {
            Some(names) => {
                for name in names {
                    tables.by_capability.entry(name).or_default().push(id);
                }
            }
            None => tables.all_capabilities.push(id),
        }
        id
    }

    /// Remove a listener from whichever category it belongs to.
    pub async fn remove_listener(&self, id: ListenerId) -> bool {
        let mut tables = self.tables.lock().await;
        let mut found = false;

        let before = tables.framework.len();
        tables.framework.retain(|(lid, _)| *lid != id);
        found |= tables.framework.len() < before;

        let before = tables.bundle.len();
        tables.bundle.retain(|(lid, _)| *lid != id);
        found |= tables.bundle.len() < before;

        if tables.service.remove(&id).is_some() {
            found = true;
            tables.all_capabilities.retain(|lid| *lid != id);
            tables.by_capability.retain(|_, ids| {
                ids.retain(|lid| *lid != id);
                !ids.is_empty()
            });
        }
        found
    }

    pub async fn fire_framework_event(&self, event: &FrameworkEvent) {
        let listeners: Vec<_> = {
            let tables = self.tables.lock().await;
            tables.framework.iter().map(|(_, l)| Arc::clone(l)).collect()
        };
        let mut set = JoinSet::new();
        for listener in listeners {
            let event = event.clone();
            set.spawn(async move { listener.framework_changed(&event).await });
        }
        await_all(set, "framework").await;
    }

    /// Queue a framework event for fire-and-forget delivery on the worker
    /// pool. Delivery order relative to synchronous fires is not guaranteed.
    pub async fn post_framework_event(&self, event: FrameworkEvent) {
        let dispatcher = self.clone();
        if let Err(err) = self
            .workers
            .submit(async move { dispatcher.fire_framework_event(&event).await })
            .await
        {
            log::warn!("Dropping framework event posted after shutdown: {}", err);
        }
    }

    pub async fn fire_bundle_event(&self, event: &BundleEvent) {
        let listeners: Vec<_> = {
            let tables = self.tables.lock().await;
            tables.bundle.iter().map(|(_, l)| Arc::clone(l)).collect()
        };
        let mut set = JoinSet::new();
        for listener in listeners {
            let event = event.clone();
            set.spawn(async move { listener.bundle_changed(&event).await });
        }
        await_all(set, "bundle").await;
    }

    /// Deliver a service event to every listener whose capability subscription
    /// and filter match. On MODIFIED, a listener whose filter matched the
    /// previous properties but not the current ones receives a synthesized
    /// MODIFIED_ENDMATCH carrying the previous snapshot instead.
    pub async fn fire_service_event(
        &self,
        kind: ServiceEventKind,
        reference: &ServiceRef,
        previous: Option<&Properties>,
    ) {
        let deliveries = self.select_service_deliveries(kind, reference, previous).await;
        let mut set = JoinSet::new();
        for (listener, event) in deliveries {
            set.spawn(async move { listener.service_changed(&event).await });
        }
        await_all(set, "service").await;
    }

    /// Fire-and-forget variant of [`fire_service_event`]: matching is done
    /// now (against the current properties), delivery happens on the pool.
    pub async fn post_service_event(
        &self,
        kind: ServiceEventKind,
        reference: &ServiceRef,
        previous: Option<&Properties>,
    ) {
        let deliveries = self.select_service_deliveries(kind, reference, previous).await;
        for (listener, event) in deliveries {
            if let Err(err) = self
                .workers
                .submit(async move { listener.service_changed(&event).await })
                .await
            {
                log::warn!("Dropping service event posted after shutdown: {}", err);
                return;
            }
        }
    }

    async fn select_service_deliveries(
        &self,
        kind: ServiceEventKind,
        reference: &ServiceRef,
        previous: Option<&Properties>,
    ) -> Vec<(Arc<dyn ServiceListener>, ServiceEvent)> {
        let tables = self.tables.lock().await;

        let mut ids = tables.all_capabilities.clone();
        for capability in reference.capabilities() {
            if let Some(more) = tables.by_capability.get(&capability) {
                ids.extend(more.iter().copied());
            }
        }
        ids.sort_unstable();
        ids.dedup();

        let current = reference.properties();
        let mut deliveries = Vec::new();
        for id in ids {
            let Some(entry) = tables.service.get(&id) else {
                continue;
            };
            let matches_now = entry.filter.as_ref().map_or(true, |f| f.matches(&current));
            if matches_now {
                deliveries.push((
                    Arc::clone(&entry.listener),
                    ServiceEvent {
                        kind,
                        reference: reference.clone(),
                        previous: previous.cloned(),
                    },
                ));
            } else if kind == ServiceEventKind::Modified {
                let matched_before = match (entry.filter.as_ref(), previous) {
                    (Some(filter), Some(prev)) => filter.matches(prev),
                    _ => false,
                };
                if matched_before {
                    deliveries.push((
                        Arc::clone(&entry.listener),
                        ServiceEvent {
                            kind: ServiceEventKind::ModifiedEndmatch,
                            reference: reference.clone(),
                            previous: previous.cloned(),
                        },
                    ));
                }
            }
        }
        deliveries
    }

    /// Drain the fire-and-forget pool; called once on framework shutdown.
    pub async fn shutdown(&self) {
        self.workers.shutdown().await;
    }

    #[cfg(test)]
    pub(crate) fn workers(&self) -> &EventWorkers {
        &self.workers
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl ListenerTables {
    fn allocate_id(&mut self) -> ListenerId {
        self.next_id += 1;
        self.next_id
    }
}

/// Wait for every spawned callback, logging panics per listener and warning
/// periodically while any callback stays blocked.
async fn await_all(mut set: JoinSet<()>, category: &str) {
    let started = Instant::now();
    loop {
        match timeout(LISTENER_BLOCK_WARN, set.join_next()).await {
            Ok(Some(Ok(()))) => {}
            Ok(Some(Err(err))) => {
                log::error!("A {} listener failed during dispatch: {}", category, err);
            }
            Ok(None) => break,
            Err(_) => {
                log::warn!(
                    "{} listener(s) in category '{}' still running after {:?}",
                    set.len(),
                    category,
                    started.elapsed()
                );
            }
        }
    }
}

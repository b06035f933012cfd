//! The registry proper: indices, registration, lookup, usage counting.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::json;
use tokio::sync::Mutex;

use crate::event::{EventDispatcher, ServiceEventKind};
use crate::filter::Filter;
use crate::framework::bundle::BundleId;
use crate::registry::error::RegistryError;
use crate::registry::properties::{
    Properties, DEFAULT_PRIORITY, FORBIDDEN_KEYS, OBJECT_CLASS, OWNING_BUNDLE_ID, SERVICE_ID,
    SERVICE_PRIORITY,
};
use crate::registry::reference::{ServiceId, ServiceRef};
use crate::registry::registration::ServiceRegistration;
use crate::registry::ServiceObject;

#[derive(Default)]
struct RegistryState {
    next_id: ServiceId,
    services: HashMap<ServiceId, ServiceObject>,
    refs: HashMap<ServiceId, ServiceRef>,
    /// All references, sorted by sort key.
    all: Vec<ServiceRef>,
    /// Per-capability sorted indices. A bucket with no entries is removed.
    by_capability: HashMap<String, Vec<ServiceRef>>,
    /// Owning bundle -> references it registered.
    by_owner: HashMap<BundleId, Vec<ServiceRef>>,
    /// Using bundle -> references it currently holds uses of.
    uses: HashMap<BundleId, Vec<ServiceRef>>,
}

/// Thread-safe shared service registry.
#[derive(Clone)]
pub struct ServiceRegistry {
    state: Arc<Mutex<RegistryState>>,
    dispatcher: EventDispatcher,
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRegistry").finish_non_exhaustive()
    }
}

impl ServiceRegistry {
    pub fn new(dispatcher: EventDispatcher) -> Self {
        ServiceRegistry {
            state: Arc::new(Mutex::new(RegistryState::default())),
            dispatcher,
        }
    }

    /// Register `service` under `capabilities` on behalf of `bundle_id`.
    ///
    /// Injects the framework-managed properties (`object_class`,
    /// `service_id`, `owning_bundle_id`, default `priority`), inserts the new
    /// reference into the sorted indices and fires REGISTERED before
    /// returning. The returned [`ServiceRegistration`] is the only way to
    /// update or unregister the service.
    pub async fn register(
        &self,
        bundle_id: BundleId,
        capabilities: &[&str],
        service: ServiceObject,
        properties: Properties,
    ) -> Result<ServiceRegistration, RegistryError> {
        let capabilities: Vec<String> = capabilities
            .iter()
            .map(|c| c.trim())
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect();
        if capabilities.is_empty() {
            return Err(RegistryError::InvalidRegistration(
                "at least one capability name is required".to_string(),
            ));
        }

        let reference = {
            let mut state = self.state.lock().await;
            state.next_id += 1;
            let service_id = state.next_id;

            let mut props = properties;
            props.insert(
                OBJECT_CLASS.to_string(),
                json!(capabilities),
            );
            props.insert(SERVICE_ID.to_string(), json!(service_id));
            props.insert(OWNING_BUNDLE_ID.to_string(), json!(bundle_id));
            props
                .entry(SERVICE_PRIORITY.to_string())
                .or_insert_with(|| json!(DEFAULT_PRIORITY));

            let reference = ServiceRef::new(service_id, bundle_id, props);
            state.services.insert(service_id, service);
            state.refs.insert(service_id, reference.clone());
            insert_sorted(&mut state.all, &reference);
            for capability in &capabilities {
                insert_sorted(
                    state.by_capability.entry(capability.clone()).or_default(),
                    &reference,
                );
            }
            insert_sorted(state.by_owner.entry(bundle_id).or_default(), &reference);
            reference
        };

        self.dispatcher
            .fire_service_event(ServiceEventKind::Registered, &reference, None)
            .await;

        Ok(ServiceRegistration::new(self.clone(), reference))
    }

    /// Unregister a service. UNREGISTERING is fired while the reference is
    /// still visible in the registry; removal happens afterwards.
    pub async fn unregister(&self, reference: &ServiceRef) -> Result<(), RegistryError> {
        {
            let state = self.state.lock().await;
            if !state.refs.contains_key(&reference.service_id()) {
                return Err(RegistryError::NotFound {
                    service_id: reference.service_id(),
                });
            }
        }

        self.dispatcher
            .fire_service_event(ServiceEventKind::Unregistering, reference, None)
            .await;

        let mut state = self.state.lock().await;
        let id = reference.service_id();
        // A concurrent unregister may have won between the event and here.
        if state.refs.remove(&id).is_none() {
            return Ok(());
        }
        state.all.retain(|r| r.service_id() != id);
        state.by_capability.retain(|_, bucket| {
            bucket.retain(|r| r.service_id() != id);
            !bucket.is_empty()
        });
        state.by_owner.retain(|_, owned| {
            owned.retain(|r| r.service_id() != id);
            !owned.is_empty()
        });
        state.uses.retain(|_, held| {
            held.retain(|r| r.service_id() != id);
            !held.is_empty()
        });
        state.services.remove(&id);
        reference.clear_usage();
        Ok(())
    }

    /// Look up references, optionally restricted to one capability and
    /// narrowed by a filter. Results are sorted by descending priority then
    /// ascending service id.
    pub async fn find_service_references(
        &self,
        capability: Option<&str>,
        filter: Option<&Filter>,
    ) -> Vec<ServiceRef> {
        let state = self.state.lock().await;
        let base: Vec<ServiceRef> = match capability {
            Some(name) => state.by_capability.get(name).cloned().unwrap_or_default(),
            None => state.all.clone(),
        };
        match filter {
            Some(f) => base
                .into_iter()
                .filter(|r| f.matches(&r.properties()))
                .collect(),
            None => base,
        }
    }

    /// Highest-ranked matching reference, if any.
    pub async fn first_service_reference(
        &self,
        capability: Option<&str>,
        filter: Option<&Filter>,
    ) -> Option<ServiceRef> {
        self.find_service_references(capability, filter)
            .await
            .into_iter()
            .next()
    }

    /// Fetch the service object for `reference`, counting one use for
    /// `bundle_id`. Returns `None` if the service is already gone.
    pub async fn get_service(
        &self,
        bundle_id: BundleId,
        reference: &ServiceRef,
    ) -> Option<ServiceObject> {
        let mut state = self.state.lock().await;
        let service = state.services.get(&reference.service_id()).cloned()?;
        reference.acquire(bundle_id);
        let held = state.uses.entry(bundle_id).or_default();
        if !held.iter().any(|r| r == reference) {
            insert_sorted(held, reference);
        }
        Some(service)
    }

    /// Release one use of `reference` by `bundle_id`. Releasing an unknown
    /// pair is a no-op.
    pub async fn unget_service(&self, bundle_id: BundleId, reference: &ServiceRef) {
        let mut state = self.state.lock().await;
        if reference.release(bundle_id) {
            if let Some(held) = state.uses.get_mut(&bundle_id) {
                held.retain(|r| r != reference);
                if held.is_empty() {
                    state.uses.remove(&bundle_id);
                }
            }
        }
    }

    /// References registered by `bundle_id`, sorted.
    pub async fn get_bundle_references(&self, bundle_id: BundleId) -> Vec<ServiceRef> {
        let state = self.state.lock().await;
        state.by_owner.get(&bundle_id).cloned().unwrap_or_default()
    }

    /// References `bundle_id` currently holds uses of, sorted.
    pub async fn get_bundle_using_services(&self, bundle_id: BundleId) -> Vec<ServiceRef> {
        let state = self.state.lock().await;
        state.uses.get(&bundle_id).cloned().unwrap_or_default()
    }

    /// Merge a property update into `reference`. Framework-managed keys are
    /// stripped from the patch; the sort key is recomputed and MODIFIED is
    /// fired carrying the previous snapshot.
    pub(crate) async fn update_properties(
        &self,
        reference: &ServiceRef,
        mut patch: Properties,
    ) -> Result<(), RegistryError> {
        let previous = {
            let mut state = self.state.lock().await;
            if !state.refs.contains_key(&reference.service_id()) {
                return Err(RegistryError::NotFound {
                    service_id: reference.service_id(),
                });
            }
            for key in FORBIDDEN_KEYS {
                patch.remove(key);
            }

            let mut merged = reference.properties();
            for (key, value) in patch {
                merged.insert(key, value);
            }
            let previous = reference.replace_properties(merged);

            let id = reference.service_id();
            resort(&mut state.all, id, reference);
            for bucket in state.by_capability.values_mut() {
                resort(bucket, id, reference);
            }
            for owned in state.by_owner.values_mut() {
                resort(owned, id, reference);
            }
            previous
        };

        self.dispatcher
            .fire_service_event(ServiceEventKind::Modified, reference, Some(&previous))
            .await;
        Ok(())
    }

    /// Force-unregister everything `bundle_id` still has registered; used
    /// when the bundle stops. Fires UNREGISTERING for each service.
    pub(crate) async fn unregister_bundle_services(&self, bundle_id: BundleId) {
        let owned = self.get_bundle_references(bundle_id).await;
        for reference in owned {
            if let Err(err) = self.unregister(&reference).await {
                log::warn!(
                    "Failed to unregister service {} while stopping bundle {}: {}",
                    reference.service_id(),
                    bundle_id,
                    err
                );
            }
        }
    }

    /// Drop every usage record held by `bundle_id`; used when the bundle
    /// stops so other bundles' counts are untouched.
    pub(crate) async fn release_bundle(&self, bundle_id: BundleId) {
        let mut state = self.state.lock().await;
        if let Some(held) = state.uses.remove(&bundle_id) {
            for reference in held {
                reference.release_all(bundle_id);
            }
        }
    }
}

/// Insert keeping sort order; the index is never re-sorted from scratch.
fn insert_sorted(bucket: &mut Vec<ServiceRef>, reference: &ServiceRef) {
    let key = reference.sort_key();
    let position = match bucket.binary_search_by(|probe| probe.sort_key().cmp(&key)) {
        Ok(pos) | Err(pos) => pos,
    };
    bucket.insert(position, reference.clone());
}

/// Re-position `reference` inside `bucket` after a sort-key change, if the
/// bucket contains it.
fn resort(bucket: &mut Vec<ServiceRef>, id: ServiceId, reference: &ServiceRef) {
    let before = bucket.len();
    bucket.retain(|r| r.service_id() != id);
    if bucket.len() < before {
        insert_sorted(bucket, reference);
    }
}

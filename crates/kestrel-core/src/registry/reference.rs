//! Service reference: the registry's handle to one registered service.

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, RwLock};

use serde_json::Value;

use crate::framework::bundle::BundleId;
use crate::registry::properties::{Properties, DEFAULT_PRIORITY, OBJECT_CLASS, SERVICE_PRIORITY};

/// Process-wide unique service identifier, assigned monotonically.
pub type ServiceId = u64;

/// Ordering key for service references: descending priority, then ascending
/// service id. Stable across repeated sorts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortKey {
    pub priority: i64,
    pub service_id: ServiceId,
}

impl Ord for SortKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then(self.service_id.cmp(&other.service_id))
    }
}

impl PartialOrd for SortKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Immutable identity of a registered service plus its live property map and
/// usage bookkeeping. Cheap to clone; equality is by service id.
#[derive(Clone)]
pub struct ServiceRef {
    inner: Arc<RefInner>,
}

struct RefInner {
    service_id: ServiceId,
    bundle_id: BundleId,
    properties: RwLock<Properties>,
    /// Using bundle -> usage count. Counts never go negative; releasing an
    /// absent pair is a no-op.
    usage: Mutex<HashMap<BundleId, u64>>,
}

impl ServiceRef {
    pub(crate) fn new(service_id: ServiceId, bundle_id: BundleId, properties: Properties) -> Self {
        ServiceRef {
            inner: Arc::new(RefInner {
                service_id,
                bundle_id,
                properties: RwLock::new(properties),
                usage: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn service_id(&self) -> ServiceId {
        self.inner.service_id
    }

    /// Id of the bundle that registered this service.
    pub fn bundle_id(&self) -> BundleId {
        self.inner.bundle_id
    }

    /// Snapshot of the current property map.
    pub fn properties(&self) -> Properties {
        self.inner.properties.read().expect("property lock poisoned").clone()
    }

    /// A single property value, if present.
    pub fn property(&self, key: &str) -> Option<Value> {
        self.inner
            .properties
            .read()
            .expect("property lock poisoned")
            .get(key)
            .cloned()
    }

    /// The capability names this service was registered under. Always
    /// non-empty for a reference produced by the registry.
    pub fn capabilities(&self) -> Vec<String> {
        match self.property(OBJECT_CLASS) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            Some(Value::String(s)) => vec![s],
            _ => Vec::new(),
        }
    }

    pub fn priority(&self) -> i64 {
        self.property(SERVICE_PRIORITY)
            .and_then(|v| v.as_i64())
            .unwrap_or(DEFAULT_PRIORITY)
    }

    pub fn sort_key(&self) -> SortKey {
        SortKey {
            priority: self.priority(),
            service_id: self.service_id(),
        }
    }

    /// Bundles currently holding at least one use of this service.
    pub fn using_bundles(&self) -> Vec<BundleId> {
        let mut ids: Vec<BundleId> = self
            .inner
            .usage
            .lock()
            .expect("usage lock poisoned")
            .keys()
            .copied()
            .collect();
        ids.sort_unstable();
        ids
    }

    pub(crate) fn acquire(&self, bundle_id: BundleId) {
        let mut usage = self.inner.usage.lock().expect("usage lock poisoned");
        *usage.entry(bundle_id).or_insert(0) += 1;
    }

    /// Decrement the usage count for `bundle_id`. Returns true when the
    /// bundle no longer uses this service at all.
    pub(crate) fn release(&self, bundle_id: BundleId) -> bool {
        let mut usage = self.inner.usage.lock().expect("usage lock poisoned");
        match usage.get_mut(&bundle_id) {
            Some(count) if *count > 1 => {
                *count -= 1;
                false
            }
            Some(_) => {
                usage.remove(&bundle_id);
                true
            }
            None => false,
        }
    }

    /// Drop every use `bundle_id` holds, whatever the count.
    pub(crate) fn release_all(&self, bundle_id: BundleId) {
        self.inner
            .usage
            .lock()
            .expect("usage lock poisoned")
            .remove(&bundle_id);
    }

    pub(crate) fn clear_usage(&self) {
        self.inner.usage.lock().expect("usage lock poisoned").clear();
    }

    /// Swap in a new property map, returning the previous snapshot.
    pub(crate) fn replace_properties(&self, properties: Properties) -> Properties {
        let mut guard = self.inner.properties.write().expect("property lock poisoned");
        std::mem::replace(&mut *guard, properties)
    }
}

impl PartialEq for ServiceRef {
    fn eq(&self, other: &Self) -> bool {
        self.service_id() == other.service_id()
    }
}

impl Eq for ServiceRef {}

impl Hash for ServiceRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.service_id().hash(state);
    }
}

impl fmt::Debug for ServiceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRef")
            .field("service_id", &self.service_id())
            .field("bundle_id", &self.bundle_id())
            .field("capabilities", &self.capabilities())
            .field("priority", &self.priority())
            .finish()
    }
}

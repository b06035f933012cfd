//! Per-bundle execution context.
//!
//! A [`BundleContext`] is created when its bundle starts and discarded when
//! it stops. Registry and dispatcher operations made through it are
//! attributed to the bundle (usage counting), and listeners registered
//! through it are removed automatically on stop.

use std::fmt;
use std::sync::{Arc, Mutex as StdMutex};

use serde_json::Value;

use crate::event::{BundleListener, FrameworkListener, ListenerId, ServiceListener};
use crate::filter::Filter;
use crate::framework::bundle::{Bundle, BundleId};
use crate::framework::error::Result;
use crate::framework::framework::Framework;
use crate::registry::properties::Properties;
use crate::registry::reference::ServiceRef;
use crate::registry::registration::ServiceRegistration;
use crate::registry::ServiceObject;

#[derive(Clone)]
pub struct BundleContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    bundle: Arc<Bundle>,
    framework: Framework,
    /// Listener ids registered through this context, removed on close.
    listeners: StdMutex<Vec<ListenerId>>,
}

impl BundleContext {
    pub(crate) fn new(bundle: Arc<Bundle>, framework: Framework) -> Self {
        BundleContext {
            inner: Arc::new(ContextInner {
                bundle,
                framework,
                listeners: StdMutex::new(Vec::new()),
            }),
        }
    }

    pub fn bundle(&self) -> &Arc<Bundle> {
        &self.inner.bundle
    }

    pub fn bundle_id(&self) -> BundleId {
        self.inner.bundle.id()
    }

    pub fn framework(&self) -> &Framework {
        &self.inner.framework
    }

    /// A framework property, e.g. one loaded from the bundle directory file.
    pub fn property(&self, key: &str) -> Option<Value> {
        self.inner.framework.property(key)
    }

    /// Register a service on behalf of this bundle.
    pub async fn register_service(
        &self,
        capabilities: &[&str],
        service: ServiceObject,
        properties: Properties,
    ) -> Result<ServiceRegistration> {
        Ok(self
            .inner
            .framework
            .registry()
            .register(self.bundle_id(), capabilities, service, properties)
            .await?)
    }

    pub async fn get_service_references(
        &self,
        capability: Option<&str>,
        filter: Option<&Filter>,
    ) -> Vec<ServiceRef> {
        self.inner
            .framework
            .registry()
            .find_service_references(capability, filter)
            .await
    }

    pub async fn get_first_reference(
        &self,
        capability: Option<&str>,
        filter: Option<&Filter>,
    ) -> Option<ServiceRef> {
        self.inner
            .framework
            .registry()
            .first_service_reference(capability, filter)
            .await
    }

    /// Fetch the service object, counting one use for this bundle.
    pub async fn get_service(&self, reference: &ServiceRef) -> Option<ServiceObject> {
        self.inner
            .framework
            .registry()
            .get_service(self.bundle_id(), reference)
            .await
    }

    /// Release one use of the service by this bundle.
    pub async fn unget_service(&self, reference: &ServiceRef) {
        self.inner
            .framework
            .registry()
            .unget_service(self.bundle_id(), reference)
            .await
    }

    pub async fn add_framework_listener(
        &self,
        listener: Arc<dyn FrameworkListener>,
    ) -> ListenerId {
        let id = self
            .inner
            .framework
            .dispatcher()
            .add_framework_listener(listener)
            .await;
        self.record(id);
        id
    }

    pub async fn add_bundle_listener(&self, listener: Arc<dyn BundleListener>) -> ListenerId {
        let id = self
            .inner
            .framework
            .dispatcher()
            .add_bundle_listener(listener)
            .await;
        self.record(id);
        id
    }

    pub async fn add_service_listener(
        &self,
        listener: Arc<dyn ServiceListener>,
        capabilities: Option<Vec<String>>,
        filter: Option<Filter>,
    ) -> ListenerId {
        let id = self
            .inner
            .framework
            .dispatcher()
            .add_service_listener(listener, capabilities, filter)
            .await;
        self.record(id);
        id
    }

    pub async fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner
            .listeners
            .lock()
            .expect("listener lock poisoned")
            .retain(|lid| *lid != id);
        self.inner.framework.dispatcher().remove_listener(id).await
    }

    /// Install another bundle, attributed to nobody in particular: install
    /// is framework-global.
    pub async fn install_bundle(&self, name: &str) -> Result<Arc<Bundle>> {
        self.inner.framework.install(name).await
    }

    fn record(&self, id: ListenerId) {
        self.inner
            .listeners
            .lock()
            .expect("listener lock poisoned")
            .push(id);
    }

    /// Remove every listener registered through this context; called by the
    /// framework when the bundle stops.
    pub(crate) async fn close(&self) {
        let ids: Vec<ListenerId> = {
            let mut listeners = self
                .inner
                .listeners
                .lock()
                .expect("listener lock poisoned");
            std::mem::take(&mut *listeners)
        };
        for id in ids {
            self.inner.framework.dispatcher().remove_listener(id).await;
        }
    }
}

impl fmt::Debug for BundleContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BundleContext")
            .field("bundle", &self.inner.bundle)
            .finish()
    }
}

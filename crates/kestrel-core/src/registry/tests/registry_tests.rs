use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;

use crate::event::{EventDispatcher, ServiceEvent, ServiceEventKind, ServiceListener};
use crate::filter::Filter;
use crate::registry::properties::{
    Properties, DEFAULT_PRIORITY, OBJECT_CLASS, OWNING_BUNDLE_ID, SERVICE_ID, SERVICE_PRIORITY,
};
use crate::registry::registry::ServiceRegistry;
use crate::registry::{RegistryError, ServiceObject};

fn new_registry() -> ServiceRegistry {
    ServiceRegistry::new(EventDispatcher::new())
}

fn dummy_service() -> ServiceObject {
    Arc::new("service".to_string())
}

fn priority(value: i64) -> Properties {
    Properties::from([(SERVICE_PRIORITY.to_string(), json!(value))])
}

struct RecordingListener {
    events: Mutex<Vec<(ServiceEventKind, Option<Properties>)>>,
}

impl RecordingListener {
    fn new() -> Arc<Self> {
        Arc::new(RecordingListener {
            events: Mutex::new(Vec::new()),
        })
    }

    fn kinds(&self) -> Vec<ServiceEventKind> {
        self.events.lock().unwrap().iter().map(|(k, _)| *k).collect()
    }
}

#[async_trait]
impl ServiceListener for RecordingListener {
    async fn service_changed(&self, event: &ServiceEvent) {
        self.events
            .lock()
            .unwrap()
            .push((event.kind, event.previous.clone()));
    }
}

#[tokio::test]
async fn test_register_injects_managed_properties() {
    let registry = new_registry();
    let registration = registry
        .register(7, &["kestrel.echo", "kestrel.demo"], dummy_service(), Properties::new())
        .await
        .unwrap();

    let props = registration.reference().properties();
    assert_eq!(props[OBJECT_CLASS], json!(["kestrel.echo", "kestrel.demo"]));
    assert_eq!(props[SERVICE_ID], json!(registration.reference().service_id()));
    assert_eq!(props[OWNING_BUNDLE_ID], json!(7));
    assert_eq!(props[SERVICE_PRIORITY], json!(DEFAULT_PRIORITY));
    assert_eq!(
        registration.reference().capabilities(),
        vec!["kestrel.echo".to_string(), "kestrel.demo".to_string()]
    );
}

#[tokio::test]
async fn test_register_requires_a_capability() {
    let registry = new_registry();
    let result = registry
        .register(1, &["", "   "], dummy_service(), Properties::new())
        .await;
    assert!(matches!(result, Err(RegistryError::InvalidRegistration(_))));
}

#[tokio::test]
async fn test_lookup_sorted_by_priority_then_id() {
    let registry = new_registry();
    let low = registry
        .register(1, &["cap"], dummy_service(), priority(10))
        .await
        .unwrap();
    let high = registry
        .register(1, &["cap"], dummy_service(), priority(90))
        .await
        .unwrap();
    let also_high = registry
        .register(1, &["cap"], dummy_service(), priority(90))
        .await
        .unwrap();

    let refs = registry.find_service_references(Some("cap"), None).await;
    let ids: Vec<_> = refs.iter().map(|r| r.service_id()).collect();
    // Highest priority first; equal priority breaks ties by lower id.
    assert_eq!(
        ids,
        vec![
            high.reference().service_id(),
            also_high.reference().service_id(),
            low.reference().service_id(),
        ]
    );
    assert_eq!(
        registry
            .first_service_reference(Some("cap"), None)
            .await
            .unwrap()
            .service_id(),
        high.reference().service_id()
    );
}

#[tokio::test]
async fn test_lookup_with_filter() {
    let registry = new_registry();
    registry
        .register(
            1,
            &["cap"],
            dummy_service(),
            Properties::from([("zone".to_string(), json!("a"))]),
        )
        .await
        .unwrap();
    let in_b = registry
        .register(
            1,
            &["cap"],
            dummy_service(),
            Properties::from([("zone".to_string(), json!("b"))]),
        )
        .await
        .unwrap();

    let filter = Filter::parse("(zone=b)").unwrap();
    let refs = registry
        .find_service_references(Some("cap"), Some(&filter))
        .await;
    assert_eq!(refs.len(), 1);
    assert_eq!(refs[0].service_id(), in_b.reference().service_id());

    // Capability restriction applies even without a filter match.
    assert!(registry
        .find_service_references(Some("other"), Some(&filter))
        .await
        .is_empty());
}

#[tokio::test]
async fn test_unregister_removes_and_empties_capability_lookup() {
    let registry = new_registry();
    let registration = registry
        .register(1, &["solo"], dummy_service(), Properties::new())
        .await
        .unwrap();

    registration.unregister().await.unwrap();
    assert!(registry.find_service_references(Some("solo"), None).await.is_empty());
    assert!(registry.find_service_references(None, None).await.is_empty());
    assert!(registry.get_bundle_references(1).await.is_empty());

    // A second unregister of the same service is an error.
    assert!(matches!(
        registration.unregister().await,
        Err(RegistryError::NotFound { .. })
    ));
}

struct VisibilityProbe {
    registry: ServiceRegistry,
    visible_during_unregistering: AtomicBool,
}

#[async_trait]
impl ServiceListener for VisibilityProbe {
    async fn service_changed(&self, event: &ServiceEvent) {
        if event.kind == ServiceEventKind::Unregistering {
            let still_there = self
                .registry
                .find_service_references(Some("probe"), None)
                .await
                .iter()
                .any(|r| r.service_id() == event.reference.service_id());
            self.visible_during_unregistering.store(still_there, Ordering::SeqCst);
        }
    }
}

#[tokio::test]
async fn test_unregistering_fires_while_service_is_still_visible() {
    let dispatcher = EventDispatcher::new();
    let registry = ServiceRegistry::new(dispatcher.clone());
    let probe = Arc::new(VisibilityProbe {
        registry: registry.clone(),
        visible_during_unregistering: AtomicBool::new(false),
    });
    dispatcher
        .add_service_listener(probe.clone(), Some(vec!["probe".to_string()]), None)
        .await;

    let registration = registry
        .register(1, &["probe"], dummy_service(), Properties::new())
        .await
        .unwrap();
    registration.unregister().await.unwrap();

    assert!(probe.visible_during_unregistering.load(Ordering::SeqCst));
    assert!(registry.find_service_references(Some("probe"), None).await.is_empty());
}

#[tokio::test]
async fn test_set_properties_merges_and_protects_managed_keys() {
    let dispatcher = EventDispatcher::new();
    let registry = ServiceRegistry::new(dispatcher.clone());
    let listener = RecordingListener::new();
    dispatcher
        .add_service_listener(listener.clone(), Some(vec!["cap".to_string()]), None)
        .await;

    let registration = registry
        .register(
            3,
            &["cap"],
            dummy_service(),
            Properties::from([("zone".to_string(), json!("a"))]),
        )
        .await
        .unwrap();

    let mut patch = Properties::new();
    patch.insert("zone".to_string(), json!("b"));
    patch.insert("extra".to_string(), json!(1));
    patch.insert(SERVICE_ID.to_string(), json!(999));
    patch.insert(OWNING_BUNDLE_ID.to_string(), json!(999));
    patch.insert(OBJECT_CLASS.to_string(), json!(["hijacked"]));
    registration.set_properties(patch).await.unwrap();

    let props = registration.reference().properties();
    assert_eq!(props["zone"], json!("b"));
    assert_eq!(props["extra"], json!(1));
    assert_eq!(props[OWNING_BUNDLE_ID], json!(3));
    assert_eq!(props[OBJECT_CLASS], json!(["cap"]));

    // MODIFIED carries the pre-update snapshot.
    let events = listener.events.lock().unwrap();
    let (kind, previous) = events.last().unwrap();
    assert_eq!(*kind, ServiceEventKind::Modified);
    assert_eq!(previous.as_ref().unwrap()["zone"], json!("a"));
    assert!(!previous.as_ref().unwrap().contains_key("extra"));
}

#[tokio::test]
async fn test_priority_update_reorders_lookup() {
    let registry = new_registry();
    let first = registry
        .register(1, &["cap"], dummy_service(), priority(50))
        .await
        .unwrap();
    let second = registry
        .register(1, &["cap"], dummy_service(), priority(50))
        .await
        .unwrap();

    // Tie broken by id: first wins initially.
    let best = registry.first_service_reference(Some("cap"), None).await.unwrap();
    assert_eq!(best.service_id(), first.reference().service_id());

    second.set_properties(priority(80)).await.unwrap();
    let best = registry.first_service_reference(Some("cap"), None).await.unwrap();
    assert_eq!(best.service_id(), second.reference().service_id());
}

#[tokio::test]
async fn test_concurrent_registrations_get_unique_ids() {
    let registry = new_registry();
    let registrations = futures::future::join_all((0..16).map(|n| {
        let registry = registry.clone();
        async move {
            registry
                .register(n, &["cap"], dummy_service(), Properties::new())
                .await
                .unwrap()
        }
    }))
    .await;

    let mut ids: Vec<_> = registrations
        .iter()
        .map(|r| r.reference().service_id())
        .collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 16);
    assert_eq!(registry.find_service_references(Some("cap"), None).await.len(), 16);
}

#[tokio::test]
async fn test_registered_event_order() {
    let dispatcher = EventDispatcher::new();
    let registry = ServiceRegistry::new(dispatcher.clone());
    let listener = RecordingListener::new();
    dispatcher.add_service_listener(listener.clone(), None, None).await;

    let registration = registry
        .register(1, &["cap"], dummy_service(), Properties::new())
        .await
        .unwrap();
    registration.set_properties(priority(60)).await.unwrap();
    registration.unregister().await.unwrap();

    assert_eq!(
        listener.kinds(),
        vec![
            ServiceEventKind::Registered,
            ServiceEventKind::Modified,
            ServiceEventKind::Unregistering,
        ]
    );
}

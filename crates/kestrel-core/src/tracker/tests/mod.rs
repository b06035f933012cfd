use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;

use crate::event::ServiceEventKind;
use crate::filter::Filter;
use crate::framework::context::BundleContext;
use crate::framework::framework::Framework;
use crate::framework::loader::StaticBundleLoader;
use crate::registry::properties::{Properties, SERVICE_PRIORITY};
use crate::registry::reference::ServiceRef;
use crate::registry::ServiceObject;
use crate::tracker::{NoopCustomizer, ServiceTracker, TrackerCustomizer};

/// The framework's own context, used to attribute tracker usage.
async fn test_context() -> (Framework, BundleContext) {
    let framework = Framework::new(Arc::new(StaticBundleLoader::new()));
    let context = framework.bundle_context().await;
    (framework, context)
}

fn service(text: &str) -> ServiceObject {
    Arc::new(text.to_string())
}

struct Journal {
    entries: Mutex<Vec<String>>,
}

impl Journal {
    fn new() -> Arc<Self> {
        Arc::new(Journal {
            entries: Mutex::new(Vec::new()),
        })
    }

    fn record(&self, what: &str, reference: &ServiceRef) {
        self.entries
            .lock()
            .unwrap()
            .push(format!("{}:{}", what, reference.service_id()));
    }

    fn entries(&self) -> Vec<String> {
        self.entries.lock().unwrap().clone()
    }
}

struct JournalCustomizer {
    journal: Arc<Journal>,
}

#[async_trait]
impl TrackerCustomizer for JournalCustomizer {
    async fn adding(&self, reference: &ServiceRef, _service: &ServiceObject) {
        self.journal.record("add", reference);
    }

    async fn modified(&self, reference: &ServiceRef, _service: &ServiceObject) {
        self.journal.record("mod", reference);
    }

    async fn removed(&self, reference: &ServiceRef, _service: &ServiceObject) {
        self.journal.record("del", reference);
    }
}

#[tokio::test]
async fn test_open_seeds_existing_services_in_order() {
    let (framework, context) = test_context().await;
    let low = framework
        .registry()
        .register(
            1,
            &["cap"],
            service("low"),
            Properties::from([(SERVICE_PRIORITY.to_string(), json!(10))]),
        )
        .await
        .unwrap();
    let high = framework
        .registry()
        .register(
            1,
            &["cap"],
            service("high"),
            Properties::from([(SERVICE_PRIORITY.to_string(), json!(90))]),
        )
        .await
        .unwrap();

    let tracker = ServiceTracker::new(context, Some("cap"), None, Arc::new(NoopCustomizer));
    tracker.open().await;

    assert_eq!(tracker.size().await, 2);
    let refs = tracker.get_service_references().await;
    assert_eq!(refs[0].service_id(), high.reference().service_id());
    assert_eq!(refs[1].service_id(), low.reference().service_id());

    let best = tracker.get_service().await.unwrap();
    assert_eq!(best.downcast_ref::<String>().unwrap(), "high");
    tracker.close().await;
}

#[tokio::test]
async fn test_tracks_registrations_after_open() {
    let (framework, context) = test_context().await;
    let journal = Journal::new();
    let tracker = ServiceTracker::new(
        context,
        Some("cap"),
        None,
        Arc::new(JournalCustomizer {
            journal: Arc::clone(&journal),
        }),
    );
    tracker.open().await;
    assert_eq!(tracker.size().await, 0);

    let registration = framework
        .registry()
        .register(1, &["cap"], service("a"), Properties::new())
        .await
        .unwrap();
    let id = registration.reference().service_id();
    assert_eq!(tracker.size().await, 1);

    registration.unregister().await.unwrap();
    assert_eq!(tracker.size().await, 0);

    assert_eq!(journal.entries(), vec![format!("add:{}", id), format!("del:{}", id)]);
    tracker.close().await;
}

#[tokio::test]
async fn test_modified_services_stay_tracked() {
    let (framework, context) = test_context().await;
    let journal = Journal::new();
    let tracker = ServiceTracker::new(
        context,
        Some("cap"),
        None,
        Arc::new(JournalCustomizer {
            journal: Arc::clone(&journal),
        }),
    );
    tracker.open().await;

    let registration = framework
        .registry()
        .register(1, &["cap"], service("a"), Properties::new())
        .await
        .unwrap();
    registration
        .set_properties(Properties::from([("zone".to_string(), json!("a"))]))
        .await
        .unwrap();

    let id = registration.reference().service_id();
    assert_eq!(tracker.size().await, 1);
    assert_eq!(journal.entries(), vec![format!("add:{}", id), format!("mod:{}", id)]);
    tracker.close().await;
}

#[tokio::test]
async fn test_filtered_tracker_follows_property_changes() {
    let (framework, context) = test_context().await;
    let journal = Journal::new();
    let tracker = ServiceTracker::new(
        context,
        Some("cap"),
        Some(Filter::parse("(zone=a)").unwrap()),
        Arc::new(JournalCustomizer {
            journal: Arc::clone(&journal),
        }),
    );
    tracker.open().await;

    let registration = framework
        .registry()
        .register(
            1,
            &["cap"],
            service("a"),
            Properties::from([("zone".to_string(), json!("a"))]),
        )
        .await
        .unwrap();
    let id = registration.reference().service_id();
    assert_eq!(tracker.size().await, 1);

    // Moving out of the filter untracks via the end-match event.
    registration
        .set_properties(Properties::from([("zone".to_string(), json!("b"))]))
        .await
        .unwrap();
    assert_eq!(tracker.size().await, 0);

    // Moving back in tracks again through MODIFIED.
    registration
        .set_properties(Properties::from([("zone".to_string(), json!("a"))]))
        .await
        .unwrap();
    assert_eq!(tracker.size().await, 1);

    assert_eq!(
        journal.entries(),
        vec![
            format!("add:{}", id),
            format!("del:{}", id),
            format!("add:{}", id),
        ]
    );
    tracker.close().await;
}

#[tokio::test]
async fn test_close_releases_usage_without_removed_callbacks() {
    let (framework, context) = test_context().await;
    let journal = Journal::new();
    let bundle_id = context.bundle_id();
    let tracker = ServiceTracker::new(
        context,
        Some("cap"),
        None,
        Arc::new(JournalCustomizer {
            journal: Arc::clone(&journal),
        }),
    );
    tracker.open().await;

    let registration = framework
        .registry()
        .register(1, &["cap"], service("a"), Properties::new())
        .await
        .unwrap();
    let reference = registration.reference().clone();
    let id = reference.service_id();
    assert_eq!(reference.using_bundles(), vec![bundle_id]);

    tracker.close().await;
    assert_eq!(tracker.size().await, 0);
    assert!(reference.using_bundles().is_empty());
    // Teardown is silent: only the original add was reported.
    assert_eq!(journal.entries(), vec![format!("add:{}", id)]);

    // Closing twice is harmless.
    tracker.close().await;
}

#[tokio::test]
async fn test_duplicate_registered_event_keeps_first_entry() {
    let (framework, context) = test_context().await;
    let journal = Journal::new();
    let bundle_id = context.bundle_id();
    let registration = framework
        .registry()
        .register(1, &["cap"], service("a"), Properties::new())
        .await
        .unwrap();
    let reference = registration.reference().clone();
    let id = reference.service_id();

    let tracker = ServiceTracker::new(
        context,
        Some("cap"),
        None,
        Arc::new(JournalCustomizer {
            journal: Arc::clone(&journal),
        }),
    );
    tracker.open().await;
    assert_eq!(tracker.size().await, 1);

    // A REGISTERED event for a reference the seed already tracked must not
    // add a second entry or leak a usage count.
    framework
        .dispatcher()
        .fire_service_event(ServiceEventKind::Registered, &reference, None)
        .await;
    assert_eq!(tracker.size().await, 1);
    assert_eq!(journal.entries(), vec![format!("add:{}", id)]);
    assert_eq!(reference.using_bundles(), vec![bundle_id]);

    tracker.close().await;
    assert!(reference.using_bundles().is_empty());
}

#[tokio::test]
async fn test_registration_racing_open_is_tracked_once() {
    let (framework, context) = test_context().await;
    let journal = Journal::new();
    framework
        .registry()
        .register(1, &["cap"], service("seed"), Properties::new())
        .await
        .unwrap();

    let tracker = ServiceTracker::new(
        context,
        Some("cap"),
        None,
        Arc::new(JournalCustomizer {
            journal: Arc::clone(&journal),
        }),
    );
    // The second registration interleaves with open(): depending on timing
    // it reaches the tracker through the seed loop, the listener, or both.
    let (_, racer) = futures::future::join(
        tracker.open(),
        framework
            .registry()
            .register(1, &["cap"], service("racer"), Properties::new()),
    )
    .await;
    let racer = racer.unwrap();

    assert_eq!(tracker.size().await, 2);
    assert_eq!(
        journal.entries().len(),
        2,
        "each service must be added exactly once"
    );

    // Exactly one usage count per tracked service: close balances them all.
    let references = tracker.get_service_references().await;
    tracker.close().await;
    for reference in references {
        assert!(
            reference.using_bundles().is_empty(),
            "service {} still in use after close",
            reference.service_id()
        );
    }
    assert!(racer.reference().using_bundles().is_empty());
}

#[tokio::test]
async fn test_open_is_idempotent() {
    let (framework, context) = test_context().await;
    let tracker = ServiceTracker::new(context, Some("cap"), None, Arc::new(NoopCustomizer));
    tracker.open().await;
    tracker.open().await;

    framework
        .registry()
        .register(1, &["cap"], service("a"), Properties::new())
        .await
        .unwrap();
    assert_eq!(tracker.size().await, 1, "double open must not double-track");
    tracker.close().await;
}

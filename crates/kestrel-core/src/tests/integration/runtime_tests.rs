use std::sync::Arc;

use crate::framework::bundle::BundleState;
use crate::framework::directory::BundleDirectory;
use crate::framework::framework::Framework;
use crate::framework::loader::StaticBundleLoader;
use crate::tests::integration::common::{
    producer_consumer_framework, EchoService, ProducerActivator, ECHO_CAPABILITY,
};

#[tokio::test]
async fn test_boot_from_directory_file() {
    let text = r#"{
        "properties": {"kestrel.startlevel.default": 30},
        "bundles": [
            {"name": "producer", "startlevel": 10},
            "consumer"
        ]
    }"#;
    let directory = BundleDirectory::from_json(text).unwrap();

    let loader = StaticBundleLoader::new();
    loader.register("producer", || ProducerActivator);
    loader.register_inert("consumer", None);
    let framework = Framework::with_properties(Arc::new(loader), directory.properties.clone());

    for entry in &directory.entries {
        let bundle = framework.install(&entry.name).await.unwrap();
        if let Some(level) = entry.start_level {
            framework.set_bundle_start_level(&bundle, level).await;
        }
    }
    framework.start().await.unwrap();

    let producer = framework.get_bundle_by_name("producer").await.unwrap();
    let consumer = framework.get_bundle_by_name("consumer").await.unwrap();
    assert_eq!(producer.state(), BundleState::Active);
    assert_eq!(consumer.state(), BundleState::Active);
    // The consumer had no explicit level and inherited the directory default.
    assert_eq!(framework.effective_start_level(&consumer), 30);

    let reference = framework
        .registry()
        .first_service_reference(Some(ECHO_CAPABILITY), None)
        .await
        .unwrap();
    let service = framework
        .registry()
        .get_service(consumer.id(), &reference)
        .await
        .unwrap();
    let echo = service.downcast_ref::<EchoService>().unwrap();
    assert_eq!(echo.echo("world"), "hello world");
    framework.registry().unget_service(consumer.id(), &reference).await;

    framework.stop().await.unwrap();
    assert_eq!(producer.state(), BundleState::Resolved);
    assert!(framework
        .registry()
        .first_service_reference(Some(ECHO_CAPABILITY), None)
        .await
        .is_none());
}

#[tokio::test]
async fn test_consumer_follows_producer_restarts() {
    let (framework, cell) = producer_consumer_framework();
    let producer = framework.install("producer").await.unwrap();
    let consumer = framework.install("consumer").await.unwrap();
    framework.start_bundle(&consumer).await.unwrap();

    let tracker = cell.lock().unwrap().clone().unwrap();
    assert_eq!(tracker.size().await, 0);

    framework.start_bundle(&producer).await.unwrap();
    assert_eq!(tracker.size().await, 1);

    // The producer's service vanishes with it and returns on restart.
    framework.stop_bundle(&producer).await.unwrap();
    assert_eq!(tracker.size().await, 0);
    framework.start_bundle(&producer).await.unwrap();
    assert_eq!(tracker.size().await, 1);

    // Stopping the consumer closes its tracker and releases its usage.
    let reference = framework
        .registry()
        .first_service_reference(Some(ECHO_CAPABILITY), None)
        .await
        .unwrap();
    assert_eq!(reference.using_bundles(), vec![consumer.id()]);
    framework.stop_bundle(&consumer).await.unwrap();
    assert!(reference.using_bundles().is_empty());
}

#[tokio::test]
async fn test_framework_stop_is_idempotent() {
    let (framework, _cell) = producer_consumer_framework();
    framework.install("producer").await.unwrap();
    framework.start().await.unwrap();
    framework.stop().await.unwrap();
    // A second stop must be a quiet no-op.
    framework.stop().await.unwrap();
}

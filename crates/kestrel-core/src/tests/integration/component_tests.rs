use std::sync::Arc;

use crate::cdi::factory::FactoryContext;
use crate::cdi::manager::{CdiRuntime, ComponentState};
use crate::registry::properties::Properties;
use crate::tests::integration::common::{
    producer_consumer_framework, EchoService, ECHO_CAPABILITY,
};

const REPORT_CAPABILITY: &str = "kestrel.test.report";

/// A component built on top of the echo service.
struct Reporter {
    line: String,
}

#[tokio::test]
async fn test_component_follows_a_bundle_service() {
    let (framework, _cell) = producer_consumer_framework();
    let context = framework.bundle_context().await;
    let runtime = CdiRuntime::new();
    framework
        .dispatcher()
        .add_bundle_listener(Arc::new(runtime.clone()))
        .await;

    let mut factory = FactoryContext::new("reporter");
    factory.require(ECHO_CAPABILITY, None).unwrap();
    factory
        .constructor(|arguments| {
            let echo = arguments[0]
                .downcast_ref::<EchoService>()
                .expect("echo service argument");
            Arc::new(Reporter {
                line: echo.echo("from the reporter"),
            })
        })
        .unwrap();
    factory.provide(&[REPORT_CAPABILITY], Properties::new()).unwrap();
    factory.auto_instance("reporter.0", Properties::new()).unwrap();
    factory.complete().unwrap();
    runtime.register_factory(&context, factory).await.unwrap();

    // The producer is not running yet: no echo service, no report.
    assert_eq!(
        runtime.component_state("reporter.0").await,
        Some(ComponentState::Invalid)
    );
    assert!(framework
        .registry()
        .first_service_reference(Some(REPORT_CAPABILITY), None)
        .await
        .is_none());

    let producer = framework.install("producer").await.unwrap();
    framework.start_bundle(&producer).await.unwrap();

    assert_eq!(
        runtime.component_state("reporter.0").await,
        Some(ComponentState::Valid)
    );
    let reference = framework
        .registry()
        .first_service_reference(Some(REPORT_CAPABILITY), None)
        .await
        .unwrap();
    let report = framework.registry().get_service(0, &reference).await.unwrap();
    assert_eq!(
        report.downcast_ref::<Reporter>().unwrap().line,
        "hello from the reporter"
    );
    framework.registry().unget_service(0, &reference).await;

    // The producer going away takes the component and its provision down.
    framework.stop_bundle(&producer).await.unwrap();
    assert_eq!(
        runtime.component_state("reporter.0").await,
        Some(ComponentState::Invalid)
    );
    assert!(framework
        .registry()
        .first_service_reference(Some(REPORT_CAPABILITY), None)
        .await
        .is_none());

    // And it revalidates when the producer comes back.
    framework.start_bundle(&producer).await.unwrap();
    assert_eq!(
        runtime.component_state("reporter.0").await,
        Some(ComponentState::Valid)
    );
}

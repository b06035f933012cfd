use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::framework::bundle::BundleActivator;
use crate::framework::context::BundleContext;
use crate::framework::error::{FrameworkError, Result};
use crate::framework::loader::{BundleLoader, BundleManifest, StaticBundleLoader};

struct NoopActivator;

#[async_trait]
impl BundleActivator for NoopActivator {}

struct CountingActivator {
    starts: Arc<AtomicU32>,
}

#[async_trait]
impl BundleActivator for CountingActivator {
    async fn start(&self, _context: &BundleContext) -> Result<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn test_static_loader_resolves_registered_bundles() {
    let loader = StaticBundleLoader::new();
    loader.register("demo", || NoopActivator);

    let code = loader.load("demo").await.unwrap();
    assert!(code.activator().is_some());
    assert!(code.manifest().is_none());
}

#[tokio::test]
async fn test_static_loader_unknown_name() {
    let loader = StaticBundleLoader::new();
    let err = loader.load("missing").await.unwrap_err();
    assert!(matches!(err, FrameworkError::LoadFailed { bundle, .. } if bundle == "missing"));
}

#[tokio::test]
async fn test_static_loader_factory_runs_per_load() {
    let starts = Arc::new(AtomicU32::new(0));
    let loader = StaticBundleLoader::new();
    let starts_clone = Arc::clone(&starts);
    loader.register("demo", move || CountingActivator {
        starts: Arc::clone(&starts_clone),
    });

    let code = loader.load("demo").await.unwrap();
    let activator = code.activator().unwrap();
    // The activator is fresh; nothing has started yet.
    assert_eq!(starts.load(Ordering::SeqCst), 0);
    drop(activator);

    // Unloading a static bundle keeps the registration.
    loader.unload("demo").await.unwrap();
    assert!(loader.load("demo").await.is_ok());
}

#[tokio::test]
async fn test_inert_bundle_has_no_activator() {
    let loader = StaticBundleLoader::new();
    loader.register_inert("data-only", Some(BundleManifest::new("data-only")));

    let code = loader.load("data-only").await.unwrap();
    assert!(code.activator().is_none());
    assert_eq!(code.manifest().unwrap().name, "data-only");
}

#[test]
fn test_manifest_from_json_defaults() {
    let manifest = BundleManifest::from_json("fallback", "{}").unwrap();
    assert_eq!(manifest.name, "fallback");
    assert!(manifest.version.is_none());
    assert!(manifest.requirements.is_empty());
    assert!(manifest.framework.is_none());
}

#[test]
fn test_manifest_from_json_full() {
    let text = r#"{
        "name": "demo",
        "version": "1.2.3",
        "requirements": ["base"],
        "references": ["kestrel.echo"],
        "framework": "^0.1"
    }"#;
    let manifest = BundleManifest::from_json("demo", text).unwrap();
    assert_eq!(manifest.name, "demo");
    assert_eq!(manifest.version.as_deref(), Some("1.2.3"));
    assert_eq!(manifest.requirements, vec!["base".to_string()]);
    assert!(manifest.framework.is_some());
}

#[test]
fn test_manifest_rejects_bad_json_and_bad_requirement() {
    assert!(matches!(
        BundleManifest::from_json("demo", "not json"),
        Err(FrameworkError::InvalidManifest { .. })
    ));
    assert!(matches!(
        BundleManifest::from_json("demo", r#"{"framework": "not-a-req"}"#),
        Err(FrameworkError::InvalidManifest { .. })
    ));
}

#[test]
fn test_manifest_api_check() {
    let text = r#"{"framework": "^0.1"}"#;
    let manifest = BundleManifest::from_json("demo", text).unwrap();
    assert!(manifest.check_api("demo").is_ok());

    let text = r#"{"framework": "^99"}"#;
    let manifest = BundleManifest::from_json("demo", text).unwrap();
    assert!(matches!(
        manifest.check_api("demo"),
        Err(FrameworkError::IncompatibleApi { .. })
    ));
}

#[tokio::test]
async fn test_loader_rejects_incompatible_manifest() {
    let loader = StaticBundleLoader::new();
    let text = r#"{"framework": "^99"}"#;
    let manifest = BundleManifest::from_json("demo", text).unwrap();
    loader.register_with_manifest("demo", manifest, || NoopActivator);

    assert!(matches!(
        loader.load("demo").await,
        Err(FrameworkError::IncompatibleApi { .. })
    ));
}

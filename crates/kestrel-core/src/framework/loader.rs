//! Bundle loading: the loader contract, the static bundle registry, and a
//! `libloading`-based dynamic library loader.
//!
//! A loader resolves a bundle name to [`BundleCode`]: lazily-constructed
//! activator plus an optional manifest. The manifest may declare
//! `requirements` (bundle names installed before this one) and a `framework`
//! semver requirement validated against [`FRAMEWORK_VERSION`].

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use libloading::Library;
use semver::{Version, VersionReq};
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::framework::bundle::BundleActivator;
use crate::framework::constants::FRAMEWORK_VERSION;
use crate::framework::error::FrameworkError;

/// Symbol exported by dynamically loaded bundles; see [`export_bundle!`].
pub const ACTIVATOR_SYMBOL: &[u8] = b"kestrel_bundle_activator\0";

// --- Manifest ---

#[derive(Deserialize, Debug)]
struct RawBundleManifest {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    requirements: Vec<String>,
    #[serde(default)]
    references: Vec<String>,
    #[serde(default)]
    framework: Option<String>,
}

/// Co-located metadata describing a bundle.
#[derive(Debug, Clone)]
pub struct BundleManifest {
    pub name: String,
    pub version: Option<String>,
    /// Bundle names that must be installed before this bundle.
    pub requirements: Vec<String>,
    /// Capability names this bundle is known to reference.
    pub references: Vec<String>,
    /// Framework API requirement, e.g. `"^0.1"`.
    pub framework: Option<VersionReq>,
}

impl BundleManifest {
    pub fn new(name: impl Into<String>) -> Self {
        BundleManifest {
            name: name.into(),
            version: None,
            requirements: Vec::new(),
            references: Vec::new(),
            framework: None,
        }
    }

    pub fn with_requirements(mut self, requirements: Vec<String>) -> Self {
        self.requirements = requirements;
        self
    }

    /// Parse a manifest from JSON. `bundle` names the bundle being loaded
    /// and is used both for error reporting and as the default name.
    pub fn from_json(bundle: &str, text: &str) -> Result<Self, FrameworkError> {
        let raw: RawBundleManifest =
            serde_json::from_str(text).map_err(|err| FrameworkError::InvalidManifest {
                bundle: bundle.to_string(),
                message: err.to_string(),
            })?;
        let framework = match raw.framework {
            Some(req) => Some(VersionReq::parse(&req).map_err(|err| {
                FrameworkError::InvalidManifest {
                    bundle: bundle.to_string(),
                    message: format!("bad framework requirement '{}': {}", req, err),
                }
            })?),
            None => None,
        };
        Ok(BundleManifest {
            name: raw.name.unwrap_or_else(|| bundle.to_string()),
            version: raw.version,
            requirements: raw.requirements,
            references: raw.references,
            framework,
        })
    }

    /// Validate the declared framework requirement against this framework.
    pub fn check_api(&self, bundle: &str) -> Result<(), FrameworkError> {
        let Some(required) = &self.framework else {
            return Ok(());
        };
        let actual = Version::parse(FRAMEWORK_VERSION).map_err(|err| {
            FrameworkError::InvalidManifest {
                bundle: bundle.to_string(),
                message: format!("framework version unparsable: {}", err),
            }
        })?;
        if !required.matches(&actual) {
            return Err(FrameworkError::IncompatibleApi {
                bundle: bundle.to_string(),
                required: required.to_string(),
                actual: actual.to_string(),
            });
        }
        Ok(())
    }
}

// --- Loader contract ---

/// Loaded bundle code. The activator is resolved lazily by the framework on
/// first start; `None` means the bundle has no start/stop behavior.
pub trait BundleCode: Send + Sync {
    fn activator(&self) -> Option<Arc<dyn BundleActivator>>;
    fn manifest(&self) -> Option<&BundleManifest>;
}

/// Resolves bundle names to loadable code and reverses the process on
/// uninstall.
#[async_trait]
pub trait BundleLoader: Send + Sync {
    async fn load(&self, name: &str) -> Result<Arc<dyn BundleCode>, FrameworkError>;
    async fn unload(&self, name: &str) -> Result<(), FrameworkError>;
}

impl std::fmt::Debug for dyn BundleCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BundleCode")
    }
}

// --- Static loader ---

type ActivatorFactory = Arc<dyn Fn() -> Arc<dyn BundleActivator> + Send + Sync>;

#[derive(Clone)]
struct StaticEntry {
    manifest: Option<Arc<BundleManifest>>,
    factory: Option<ActivatorFactory>,
}

struct StaticCode {
    entry: StaticEntry,
}

impl BundleCode for StaticCode {
    fn activator(&self) -> Option<Arc<dyn BundleActivator>> {
        self.entry.factory.as_ref().map(|f| f())
    }

    fn manifest(&self) -> Option<&BundleManifest> {
        self.entry.manifest.as_deref()
    }
}

/// Explicit name-to-constructor registry, populated at process startup.
/// "Unloading" a static bundle is a no-op: the registration stays so the
/// bundle can be installed again.
#[derive(Default)]
pub struct StaticBundleLoader {
    entries: RwLock<HashMap<String, StaticEntry>>,
}

impl StaticBundleLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a bundle with an activator constructor.
    pub fn register<F, A>(&self, name: &str, factory: F)
    where
        F: Fn() -> A + Send + Sync + 'static,
        A: BundleActivator + 'static,
    {
        self.insert(name, None, Some(Arc::new(move || Arc::new(factory()))));
    }

    /// Register a bundle with an activator constructor and a manifest.
    pub fn register_with_manifest<F, A>(&self, name: &str, manifest: BundleManifest, factory: F)
    where
        F: Fn() -> A + Send + Sync + 'static,
        A: BundleActivator + 'static,
    {
        self.insert(
            name,
            Some(Arc::new(manifest)),
            Some(Arc::new(move || Arc::new(factory()))),
        );
    }

    /// Register a bundle without an activator (legal: no-op start/stop).
    pub fn register_inert(&self, name: &str, manifest: Option<BundleManifest>) {
        self.insert(name, manifest.map(Arc::new), None);
    }

    fn insert(
        &self,
        name: &str,
        manifest: Option<Arc<BundleManifest>>,
        factory: Option<ActivatorFactory>,
    ) {
        self.entries
            .write()
            .expect("loader lock poisoned")
            .insert(name.to_string(), StaticEntry { manifest, factory });
    }
}

#[async_trait]
impl BundleLoader for StaticBundleLoader {
    async fn load(&self, name: &str) -> Result<Arc<dyn BundleCode>, FrameworkError> {
        let entry = self
            .entries
            .read()
            .expect("loader lock poisoned")
            .get(name)
            .cloned()
            .ok_or_else(|| FrameworkError::LoadFailed {
                bundle: name.to_string(),
                message: "not present in the static bundle registry".to_string(),
            })?;
        if let Some(manifest) = entry.manifest.as_deref() {
            manifest.check_api(name)?;
        }
        Ok(Arc::new(StaticCode { entry }))
    }

    async fn unload(&self, _name: &str) -> Result<(), FrameworkError> {
        Ok(())
    }
}

// --- Dynamic loader ---

struct DynamicCode {
    name: String,
    manifest: Option<BundleManifest>,
    library: Library,
}

impl BundleCode for DynamicCode {
    fn activator(&self) -> Option<Arc<dyn BundleActivator>> {
        // SAFETY: the symbol is produced by export_bundle!, which returns a
        // heap-allocated Box<Box<dyn BundleActivator>> exactly once per call.
        unsafe {
            let symbol = self
                .library
                .get::<unsafe extern "C" fn() -> *mut Box<dyn BundleActivator>>(ACTIVATOR_SYMBOL);
            match symbol {
                Ok(ctor) => {
                    let raw = ctor();
                    if raw.is_null() {
                        log::error!("Bundle '{}' activator constructor returned null", self.name);
                        return None;
                    }
                    let boxed: Box<Box<dyn BundleActivator>> = Box::from_raw(raw);
                    Some(Arc::from(*boxed))
                }
                Err(_) => None,
            }
        }
    }

    fn manifest(&self) -> Option<&BundleManifest> {
        self.manifest.as_ref()
    }
}

/// Loads bundles from platform dynamic libraries (`lib<name>.so` etc.) found
/// on a search path, reading an optional co-located `<name>.manifest.json`.
/// Unload drops the library handle.
pub struct DynamicBundleLoader {
    search_paths: Vec<PathBuf>,
    loaded: Mutex<HashMap<String, Arc<DynamicCode>>>,
}

impl DynamicBundleLoader {
    pub fn new(search_paths: Vec<PathBuf>) -> Self {
        DynamicBundleLoader {
            search_paths,
            loaded: Mutex::new(HashMap::new()),
        }
    }

    async fn locate(&self, name: &str) -> Option<(PathBuf, Option<String>)> {
        let file_name = libloading::library_filename(name);
        for dir in &self.search_paths {
            let candidate = dir.join(&file_name);
            if tokio::fs::metadata(&candidate).await.is_ok() {
                let manifest_path = dir.join(format!("{}.manifest.json", name));
                let manifest = tokio::fs::read_to_string(&manifest_path).await.ok();
                return Some((candidate, manifest));
            }
        }
        None
    }
}

#[async_trait]
impl BundleLoader for DynamicBundleLoader {
    async fn load(&self, name: &str) -> Result<Arc<dyn BundleCode>, FrameworkError> {
        {
            let loaded = self.loaded.lock().await;
            if let Some(code) = loaded.get(name) {
                return Ok(code.clone() as Arc<dyn BundleCode>);
            }
        }

        let (path, manifest_text) =
            self.locate(name)
                .await
                .ok_or_else(|| FrameworkError::LoadFailed {
                    bundle: name.to_string(),
                    message: "no library found on the search path".to_string(),
                })?;

        let manifest = match manifest_text {
            Some(text) => {
                let manifest = BundleManifest::from_json(name, &text)?;
                manifest.check_api(name)?;
                Some(manifest)
            }
            None => None,
        };

        // SAFETY: loading an arbitrary library runs its initializers; this is
        // the documented contract of the dynamic loader.
        let library = unsafe { Library::new(&path) }.map_err(|err| FrameworkError::LoadFailed {
            bundle: name.to_string(),
            message: format!("{}: {}", path.display(), err),
        })?;

        let code = Arc::new(DynamicCode {
            name: name.to_string(),
            manifest,
            library,
        });
        self.loaded.lock().await.insert(name.to_string(), code.clone());
        Ok(code as Arc<dyn BundleCode>)
    }

    async fn unload(&self, name: &str) -> Result<(), FrameworkError> {
        self.loaded.lock().await.remove(name);
        Ok(())
    }
}

/// Export an activator constructor from a cdylib bundle crate:
///
/// ```ignore
/// kestrel_core::export_bundle!(MyActivator::default());
/// ```
#[macro_export]
macro_rules! export_bundle {
    ($activator:expr) => {
        #[no_mangle]
        pub extern "C" fn kestrel_bundle_activator(
        ) -> *mut Box<dyn $crate::framework::bundle::BundleActivator> {
            Box::into_raw(Box::new(
                Box::new($activator) as Box<dyn $crate::framework::bundle::BundleActivator>
            ))
        }
    };
}

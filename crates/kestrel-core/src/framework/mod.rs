//! Framework core: bundles, their lifecycle, loading, contexts and the
//! bundle directory file.

pub mod bundle;
pub mod constants;
pub mod context;
pub mod directory;
pub mod error;
pub mod framework;
pub mod loader;

pub use bundle::{Bundle, BundleActivator, BundleId, BundleState};
pub use context::BundleContext;
pub use directory::{BundleDirectory, DirectoryEntry};
pub use error::{Error, FrameworkError, Result};
pub use framework::Framework;
pub use loader::{
    BundleCode, BundleLoader, BundleManifest, DynamicBundleLoader, StaticBundleLoader,
};

#[cfg(test)]
mod tests;

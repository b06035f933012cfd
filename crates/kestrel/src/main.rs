use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use clap::Parser;
use heartbeat::HeartbeatActivator;
use kestrel_core::framework::directory::BundleDirectory;
use kestrel_core::framework::error::FrameworkError;
use kestrel_core::framework::framework::Framework;
use kestrel_core::framework::loader::{
    BundleCode, BundleLoader, DynamicBundleLoader, StaticBundleLoader,
};
use log::{error, info};

/// Kestrel: a dynamic in-process module and service runtime
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    /// Bundle directory file naming the bundles to install at boot
    #[arg(long, short = 'd')]
    directory: Option<PathBuf>,

    /// Directory searched for dynamically loadable bundles (repeatable)
    #[arg(long = "bundle-path", short = 'p')]
    bundle_paths: Vec<PathBuf>,
}

/// Tries each loader in turn; the static registry wins over the search path.
struct ChainedLoader {
    loaders: Vec<Arc<dyn BundleLoader>>,
}

#[async_trait]
impl BundleLoader for ChainedLoader {
    async fn load(&self, name: &str) -> Result<Arc<dyn BundleCode>, FrameworkError> {
        let mut last_err = FrameworkError::LoadFailed {
            bundle: name.to_string(),
            message: "no loaders configured".to_string(),
        };
        for loader in &self.loaders {
            match loader.load(name).await {
                Ok(code) => return Ok(code),
                Err(err) => last_err = err,
            }
        }
        Err(last_err)
    }

    async fn unload(&self, name: &str) -> Result<(), FrameworkError> {
        for loader in &self.loaders {
            loader.unload(name).await?;
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let args = CliArgs::parse();

    // Bundles shipped with the binary are registered statically; anything
    // else comes from the dynamic search path.
    let static_loader = StaticBundleLoader::new();
    static_loader.register("heartbeat", HeartbeatActivator::default);

    let directory = match &args.directory {
        Some(path) => match BundleDirectory::load(path).await {
            Ok(directory) => directory,
            Err(err) => {
                error!("Cannot read bundle directory {}: {}", path.display(), err);
                std::process::exit(1);
            }
        },
        None => BundleDirectory::default(),
    };

    // Entry locations extend the dynamic search path.
    let mut search_paths = args.bundle_paths.clone();
    for entry in &directory.entries {
        if let Some(location) = &entry.location {
            let location = PathBuf::from(location);
            if !search_paths.contains(&location) {
                search_paths.push(location);
            }
        }
    }

    let mut loaders: Vec<Arc<dyn BundleLoader>> = vec![Arc::new(static_loader)];
    if !search_paths.is_empty() {
        loaders.push(Arc::new(DynamicBundleLoader::new(search_paths)));
    }
    let loader = Arc::new(ChainedLoader { loaders });

    let framework = Framework::with_properties(loader, directory.properties.clone());

    if directory.entries.is_empty() {
        if let Err(err) = framework.install("heartbeat").await {
            error!("Failed to install the heartbeat bundle: {}", err);
            std::process::exit(1);
        }
    } else {
        for entry in &directory.entries {
            match framework.install(&entry.name).await {
                Ok(bundle) => {
                    if let Some(level) = entry.start_level {
                        framework.set_bundle_start_level(&bundle, level).await;
                    }
                }
                Err(err) => {
                    error!("Failed to install bundle '{}': {}", entry.name, err);
                    std::process::exit(1);
                }
            }
        }
    }

    if let Err(err) = framework.start().await {
        error!("Framework failed to start: {}", err);
        std::process::exit(1);
    }
    info!("Kestrel is running; press Ctrl-C to stop");

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("Cannot listen for shutdown signal: {}", err);
    }

    info!("Shutting down");
    if let Err(err) = framework.stop().await {
        error!("Framework failed to stop cleanly: {}", err);
        std::process::exit(1);
    }
}

//! Framework-wide constants.

use std::time::Duration;

use crate::framework::bundle::BundleId;

/// Framework name, used for the framework bundle.
pub const FRAMEWORK_NAME: &str = "kestrel.framework";

/// Framework API version, checked against manifest requirements.
pub const FRAMEWORK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// The framework itself occupies bundle id 0.
pub const FRAMEWORK_BUNDLE_ID: BundleId = 0;

/// Upper bound on a single activator start/stop call.
pub const ACTIVATOR_TIMEOUT: Duration = Duration::from_secs(30);

/// Interval after which a still-running listener callback is warned about.
pub const LISTENER_BLOCK_WARN: Duration = Duration::from_secs(5);

/// Start level assigned to bundles without an explicit one when the
/// `kestrel.startlevel.default` framework property is absent.
pub const DEFAULT_START_LEVEL: u32 = 10;

/// Framework property overriding [`DEFAULT_START_LEVEL`].
pub const START_LEVEL_PROP: &str = "kestrel.startlevel.default";

/// Fire-and-forget event pool sizing.
pub const EVENT_POOL_WORKERS: usize = 4;
pub const EVENT_POOL_CAPACITY: usize = 64;

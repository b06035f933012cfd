//! Bundles and their lifecycle state machine.

use std::fmt;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::framework::context::BundleContext;
use crate::framework::error::Result;

/// Bundle identifier. 0 is reserved for the framework itself.
pub type BundleId = u64;

/// The six lifecycle states. Transitions are driven exclusively by the
/// [`Framework`](crate::framework::framework::Framework).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleState {
    Uninstalled,
    Installed,
    Resolved,
    Starting,
    Stopping,
    Active,
}

impl fmt::Display for BundleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BundleState::Uninstalled => "UNINSTALLED",
            BundleState::Installed => "INSTALLED",
            BundleState::Resolved => "RESOLVED",
            BundleState::Starting => "STARTING",
            BundleState::Stopping => "STOPPING",
            BundleState::Active => "ACTIVE",
        };
        f.write_str(name)
    }
}

/// An installable unit of code: identity, state word and optional start
/// level. The loaded code and the per-bundle context are owned by the
/// framework, not the bundle record.
pub struct Bundle {
    id: BundleId,
    name: String,
    state: RwLock<BundleState>,
    start_level: RwLock<Option<u32>>,
}

impl Bundle {
    pub(crate) fn new(id: BundleId, name: impl Into<String>, state: BundleState) -> Self {
        Bundle {
            id,
            name: name.into(),
            state: RwLock::new(state),
            start_level: RwLock::new(None),
        }
    }

    pub fn id(&self) -> BundleId {
        self.id
    }

    /// Unique name, used for idempotent re-install.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> BundleState {
        *self.state.read().expect("bundle state lock poisoned")
    }

    pub(crate) fn set_state(&self, state: BundleState) {
        *self.state.write().expect("bundle state lock poisoned") = state;
    }

    /// Explicit start level, if one was assigned; bundles without one inherit
    /// the framework default.
    pub fn start_level(&self) -> Option<u32> {
        *self.start_level.read().expect("start level lock poisoned")
    }

    pub(crate) fn set_start_level(&self, level: Option<u32>) {
        *self.start_level.write().expect("start level lock poisoned") = level;
    }
}

impl fmt::Debug for Bundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bundle")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state())
            .field("start_level", &self.start_level())
            .finish()
    }
}

/// A bundle's start/stop entry point. Both methods default to no-ops: a
/// bundle without behavior at start/stop is legal.
#[async_trait]
pub trait BundleActivator: Send + Sync {
    async fn start(&self, context: &BundleContext) -> Result<()> {
        let _ = context;
        Ok(())
    }

    async fn stop(&self, context: &BundleContext) -> Result<()> {
        let _ = context;
        Ok(())
    }
}

//! # Kestrel Core Errors
//!
//! [`Error`] is the top-level error type for the crate, aggregating the
//! typed per-subsystem errors. Subsystem code returns its own error enum;
//! `#[from]` conversions lift them at the API boundary.

use std::result::Result as StdResult;

use thiserror::Error as ThisError;

use crate::cdi::error::CdiError;
use crate::event::error::EventError;
use crate::filter::error::FilterError;
use crate::framework::bundle::BundleState;
use crate::registry::error::RegistryError;

/// Top-level error type for the Kestrel runtime.
#[derive(Debug, ThisError)]
pub enum Error {
    /// Bundle lifecycle / framework contract violation.
    #[error("framework error: {0}")]
    Framework(#[from] FrameworkError),

    /// Service registry contract violation.
    #[error("service registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Malformed filter expression.
    #[error("filter error: {0}")]
    Filter(#[from] FilterError),

    /// Event system misuse.
    #[error("event system error: {0}")]
    Event(#[from] EventError),

    /// Component (CDI) metadata or lifecycle misuse.
    #[error("component error: {0}")]
    Component(#[from] CdiError),

    /// Generic error with message.
    #[error("{0}")]
    Other(String),
}

/// Shorthand for Result with our Error type.
pub type Result<T> = StdResult<T, Error>;

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Other(msg.to_string())
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Other(msg)
    }
}

/// Errors raised by the bundle lifecycle, the loader and the directory file.
#[derive(Debug, ThisError)]
pub enum FrameworkError {
    #[error("bundle not found: {0}")]
    BundleNotFound(String),

    /// The requested transition is not legal from the bundle's current state.
    #[error("bundle '{bundle}' cannot {operation} from state {state}")]
    IllegalState {
        bundle: String,
        state: BundleState,
        operation: &'static str,
    },

    /// The activator call exceeded the block threshold. Fatal to this
    /// start/stop attempt; the bundle's state has been rolled back.
    #[error("activator {operation} for bundle '{bundle}' exceeded {seconds}s")]
    ActivatorTimeout {
        bundle: String,
        operation: &'static str,
        seconds: u64,
    },

    #[error("failed to load bundle '{bundle}': {message}")]
    LoadFailed { bundle: String, message: String },

    #[error("failed to unload bundle '{bundle}': {message}")]
    UnloadFailed { bundle: String, message: String },

    /// Manifest declared a framework version requirement this framework does
    /// not satisfy.
    #[error("bundle '{bundle}' requires framework {required}, but this framework is {actual}")]
    IncompatibleApi {
        bundle: String,
        required: String,
        actual: String,
    },

    #[error("invalid bundle manifest for '{bundle}': {message}")]
    InvalidManifest { bundle: String, message: String },

    #[error("invalid bundle directory file: {message}")]
    InvalidDirectory { message: String },
}

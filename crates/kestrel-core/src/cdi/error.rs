//! Component runtime errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CdiError {
    #[error("component factory '{0}' is already registered")]
    DuplicateFactory(String),

    #[error("component instance '{0}' already exists")]
    DuplicateInstance(String),

    #[error("factory context is already completed")]
    AlreadyCompleted,

    #[error("factory context for '{0}' has not been completed")]
    NotCompleted(String),

    #[error("no component factory named '{0}'")]
    UnknownFactory(String),

    #[error("no component instance named '{0}'")]
    UnknownInstance(String),

    #[error("component '{component}' cannot {operation} in state {state}")]
    IllegalState {
        component: String,
        state: &'static str,
        operation: &'static str,
    },
}

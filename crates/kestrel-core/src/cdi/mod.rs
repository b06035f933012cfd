//! Declarative components (CDI): factories describing a component's
//! dependencies and provisions, and a runtime that validates and invalidates
//! instances as the services they require come and go.

pub mod error;
pub mod factory;
pub mod handlers;
pub mod manager;

pub use error::CdiError;
pub use factory::{
    BindFn, BindSpec, ComponentInstance, Constructor, FactoryContext, HandlerFactory, LifecycleFn,
    Provision, Requirement,
};
pub use handlers::ComponentHandler;
pub use manager::{CdiRuntime, ComponentCore, ComponentState};

//! # Web Modules
//!
//! The contract HTTP functionality plugs into. A [`WebModule`] exposes a
//! [`HandlerMap`] of `(path, verb) -> callback` entries; the server keeps
//! registered modules in a [`ModuleRegistry`] and dispatches requests
//! through them in registration order.

mod contract;
mod error;
mod registry;

pub use contract::{HandlerCallback, HandlerEntry, HandlerMap, PathMatch, Verb, WebModule};
pub use error::{error_chain, HandlerError, HandlerPanic, HandlerResult};
pub use registry::ModuleRegistry;

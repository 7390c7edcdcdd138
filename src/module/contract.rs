//! The web module contract and its handler table.
//!
//! A module is a named, ordered list of `(path, verb) -> callback`
//! entries. The dispatcher walks modules in registration order and each
//! module's entries in insertion order; the first callback that reports
//! the request handled ends dispatch.

use super::error::HandlerResult;
use crate::server::{HttpContext, ServerContext};
use http::Method;
use std::fmt;
use std::sync::Arc;

/// Handler callback. Returns `Ok(true)` when it fully handled the request,
/// `Ok(false)` to let the next handler try.
pub type HandlerCallback =
    Arc<dyn Fn(&ServerContext, &mut HttpContext) -> HandlerResult<bool> + Send + Sync>;

/// Path side of a handler entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathMatch {
    /// Matches every path (`*`).
    Wildcard,
    /// Matches one path exactly.
    Exact(String),
}

impl PathMatch {
    /// Test a request path.
    #[must_use]
    pub fn matches(&self, path: &str) -> bool {
        match self {
            Self::Wildcard => true,
            Self::Exact(expected) => expected == path,
        }
    }
}

impl From<&str> for PathMatch {
    fn from(path: &str) -> Self {
        if path == "*" {
            Self::Wildcard
        } else {
            Self::Exact(path.to_string())
        }
    }
}

impl From<String> for PathMatch {
    fn from(path: String) -> Self {
        Self::from(path.as_str())
    }
}

/// Method side of a handler entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verb {
    /// Matches every method.
    Any,
    /// Matches one method.
    Method(Method),
}

impl Verb {
    /// Test a request method.
    #[must_use]
    pub fn matches(&self, method: &Method) -> bool {
        match self {
            Self::Any => true,
            Self::Method(expected) => expected == method,
        }
    }
}

impl From<Method> for Verb {
    fn from(method: Method) -> Self {
        Self::Method(method)
    }
}

/// One registered handler.
#[derive(Clone)]
pub struct HandlerEntry {
    /// Path to match.
    pub path: PathMatch,
    /// Method to match.
    pub verb: Verb,
    /// Callback to invoke.
    pub callback: HandlerCallback,
}

impl fmt::Debug for HandlerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerEntry")
            .field("path", &self.path)
            .field("verb", &self.verb)
            .finish_non_exhaustive()
    }
}

impl HandlerEntry {
    /// Whether this entry applies to a request.
    #[must_use]
    pub fn matches(&self, path: &str, method: &Method) -> bool {
        self.path.matches(path) && self.verb.matches(method)
    }
}

/// Ordered handler table of one module.
#[derive(Debug, Clone, Default)]
pub struct HandlerMap {
    entries: Vec<HandlerEntry>,
}

impl HandlerMap {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler. `"*"` as the path matches every path.
    pub fn add<F>(&mut self, path: impl Into<PathMatch>, verb: impl Into<Verb>, callback: F)
    where
        F: Fn(&ServerContext, &mut HttpContext) -> HandlerResult<bool> + Send + Sync + 'static,
    {
        self.entries.push(HandlerEntry {
            path: path.into(),
            verb: verb.into(),
            callback: Arc::new(callback),
        });
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &HandlerEntry> {
        self.entries.iter()
    }

    /// Entries matching a request, in insertion order.
    pub fn matching<'a>(
        &'a self,
        path: &'a str,
        method: &'a Method,
    ) -> impl Iterator<Item = &'a HandlerEntry> + 'a {
        self.entries
            .iter()
            .filter(move |entry| entry.matches(path, method))
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no handler is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A pluggable unit of HTTP handlers.
///
/// At most one instance of each concrete type can be registered on a
/// server.
///
/// # Example
///
/// ```ignore
/// use r0n_embed::module::*;
/// use http::Method;
///
/// struct Hello {
///     handlers: HandlerMap,
/// }
///
/// impl Hello {
///     fn new() -> Self {
///         let mut handlers = HandlerMap::new();
///         handlers.add("/hello", Method::GET, |_, http| {
///             http.respond_text(http::StatusCode::OK, "hello");
///             Ok(true)
///         });
///         Self { handlers }
///     }
/// }
///
/// impl WebModule for Hello {
///     fn name(&self) -> &str {
///         "hello"
///     }
///
///     fn handlers(&self) -> &HandlerMap {
///         &self.handlers
///     }
/// }
/// ```
pub trait WebModule: Send + Sync + 'static {
    /// Name shown in logs and in error pages.
    fn name(&self) -> &str;

    /// The module's handler table.
    fn handlers(&self) -> &HandlerMap;
}

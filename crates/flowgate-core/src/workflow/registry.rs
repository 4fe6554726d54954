//! Action registry: kind name -> executable unit.
//!
//! Follows the blanket-impl pattern used for other async ports:
//! 1. `Action` uses RPITIT for its async method
//! 2. object-safe `ActionDyn` with boxed futures, blanket-implemented for all `T: Action`
//! 3. `BoxAction` wraps `Box<dyn ActionDyn>` and delegates
//!
//! The registry is populated by an external discovery process and is only
//! read during pipeline runs.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use dashmap::DashMap;
use flowgate_types::workflow::ActionParams;

use crate::quota::AccessDenial;

// ---------------------------------------------------------------------------
// ActionError
// ---------------------------------------------------------------------------

/// Errors raised by a single action invocation. Any of these aborts the run.
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    /// A required parameter is absent or empty.
    #[error("{action} requires parameter '{param}'")]
    MissingParameter {
        action: &'static str,
        param: &'static str,
    },

    /// The current resource does not exist.
    #[error("resource not found: {}", .0.display())]
    ResourceNotFound(PathBuf),

    /// Filesystem failure while acting on a path.
    #[error("I/O error on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// `transform` named a tool that is not in the registry.
    #[error("tool '{0}' is not registered")]
    UnknownTool(String),

    /// A tool reported success without producing its artifact.
    #[error("tool '{tool}' produced no artifact at '{}'", path.display())]
    NoArtifact { tool: String, path: PathBuf },

    /// The notifier could not deliver.
    #[error("notification failed: {0}")]
    Notify(String),

    /// The access gate rejected the action.
    #[error("access denied: {0}")]
    AccessDenied(AccessDenial),

    /// The quota subsystem itself failed.
    #[error("quota error: {0}")]
    Quota(String),

    /// Free-form failure reported by a registry-supplied action.
    #[error("{0}")]
    Failed(String),
}

impl ActionError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            ActionError::ResourceNotFound(path.to_path_buf())
        } else {
            ActionError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Action trait (RPITIT)
// ---------------------------------------------------------------------------

/// A stateless unit of work invoked by kind name.
///
/// Returns the new current resource when the action produced one.
pub trait Action: Send + Sync {
    fn invoke(
        &self,
        resource: &Path,
        params: &ActionParams,
    ) -> impl Future<Output = Result<Option<PathBuf>, ActionError>> + Send;
}

/// Object-safe version of [`Action`] with boxed futures.
pub trait ActionDyn: Send + Sync {
    fn invoke_boxed<'a>(
        &'a self,
        resource: &'a Path,
        params: &'a ActionParams,
    ) -> Pin<Box<dyn Future<Output = Result<Option<PathBuf>, ActionError>> + Send + 'a>>;
}

impl<T: Action> ActionDyn for T {
    fn invoke_boxed<'a>(
        &'a self,
        resource: &'a Path,
        params: &'a ActionParams,
    ) -> Pin<Box<dyn Future<Output = Result<Option<PathBuf>, ActionError>> + Send + 'a>> {
        Box::pin(self.invoke(resource, params))
    }
}

/// Type-erased action for storage in the registry.
pub struct BoxAction {
    inner: Box<dyn ActionDyn>,
}

impl BoxAction {
    pub fn new<T: Action + 'static>(action: T) -> Self {
        Self {
            inner: Box::new(action),
        }
    }

    pub async fn invoke(
        &self,
        resource: &Path,
        params: &ActionParams,
    ) -> Result<Option<PathBuf>, ActionError> {
        self.inner.invoke_boxed(resource, params).await
    }
}

/// Adapts an async closure into an [`Action`].
///
/// The closure receives owned copies of the resource and parameters.
pub struct FnAction<F> {
    f: F,
}

impl<F, Fut> FnAction<F>
where
    F: Fn(PathBuf, ActionParams) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Option<PathBuf>, ActionError>> + Send + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F, Fut> Action for FnAction<F>
where
    F: Fn(PathBuf, ActionParams) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Option<PathBuf>, ActionError>> + Send + 'static,
{
    fn invoke(
        &self,
        resource: &Path,
        params: &ActionParams,
    ) -> impl Future<Output = Result<Option<PathBuf>, ActionError>> + Send {
        (self.f)(resource.to_path_buf(), params.clone())
    }
}

// ---------------------------------------------------------------------------
// ActionRegistry
// ---------------------------------------------------------------------------

/// Registry of available actions and tools, indexed by kind name.
#[derive(Default)]
pub struct ActionRegistry {
    actions: DashMap<String, Arc<BoxAction>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an implementation under `kind`.
    ///
    /// Returns `true` if an existing registration was replaced.
    pub fn register<T: Action + 'static>(&self, kind: impl Into<String>, action: T) -> bool {
        let kind = kind.into();
        let replaced = self
            .actions
            .insert(kind.clone(), Arc::new(BoxAction::new(action)))
            .is_some();
        tracing::debug!(kind = kind.as_str(), replaced, "action registered");
        replaced
    }

    /// Look up an implementation by kind name.
    pub fn lookup(&self, kind: &str) -> Option<Arc<BoxAction>> {
        self.actions.get(kind).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.actions.contains_key(kind)
    }

    /// All registered kind names, sorted.
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.actions.iter().map(|e| e.key().clone()).collect();
        kinds.sort();
        kinds
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

impl std::fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

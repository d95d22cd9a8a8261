//! Lifecycle extension points.
//!
//! Two hook flavors exist: fire-and-forget [`SyncHook`]s whose listener
//! return values are never observed, and awaitable [`AsyncHook`]s that run
//! every listener and wait for all of them to settle before resolving.
//! Listener invocation order is registration order; async listeners may
//! overlap in wall-clock time.

mod registry;

use std::sync::RwLock;

use futures::future::BoxFuture;
use futures::future::join_all;

use crate::sandbox::EnvSetup;

pub use registry::{HookExtension, HookKind, HookRegistry, HooksHandle, TypeTag};

type SyncListener<A> = Box<dyn Fn(&A) + Send + Sync>;
type AsyncListener<A> = Box<dyn Fn(A) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Fire-and-forget extension point.
pub struct SyncHook<A> {
    listeners: RwLock<Vec<SyncListener<A>>>,
}

impl<A> SyncHook<A> {
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn tap(&self, listener: impl Fn(&A) + Send + Sync + 'static) {
        self.listeners
            .write()
            .expect("hook listeners poisoned")
            .push(Box::new(listener));
    }

    /// Invoke every listener in registration order. Tapping the same hook
    /// from inside a listener is not supported.
    pub fn call(&self, payload: &A) {
        let listeners = self.listeners.read().expect("hook listeners poisoned");
        for listener in listeners.iter() {
            listener(payload);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.listeners
            .read()
            .expect("hook listeners poisoned")
            .is_empty()
    }
}

impl<A> Default for SyncHook<A> {
    fn default() -> Self {
        Self::new()
    }
}

/// Awaitable extension point.
pub struct AsyncHook<A> {
    listeners: RwLock<Vec<AsyncListener<A>>>,
}

impl<A: Clone> AsyncHook<A> {
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn tap(
        &self,
        listener: impl Fn(A) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync + 'static,
    ) {
        self.listeners
            .write()
            .expect("hook listeners poisoned")
            .push(Box::new(listener));
    }

    /// Invoke every listener with a clone of the payload and return the
    /// pending futures in registration order, without awaiting them.
    pub(crate) fn begin(&self, payload: A) -> Vec<BoxFuture<'static, anyhow::Result<()>>> {
        let listeners = self.listeners.read().expect("hook listeners poisoned");
        listeners
            .iter()
            .map(|listener| listener(payload.clone()))
            .collect()
    }

    /// Start every listener in registration order and wait for all of them
    /// to settle. The first listener failure becomes the hook's failure.
    pub async fn emit(&self, payload: A) -> anyhow::Result<()> {
        let results = join_all(self.begin(payload)).await;
        results.into_iter().collect::<anyhow::Result<Vec<_>>>()?;
        Ok(())
    }
}

impl<A: Clone> Default for AsyncHook<A> {
    fn default() -> Self {
        Self::new()
    }
}

/// The fixed, named hook set created once per Caviar instance and living for
/// the whole run.
#[derive(Default)]
pub struct Hooks {
    /// Fired after plugin application, right before the binder runs.
    pub start: SyncHook<()>,
    /// Fired once every eligible plugin has been applied.
    pub after_plugins: SyncHook<()>,
    /// Awaitable; gives environment-contributing plugins a chance to set or
    /// inherit child-process variables before the sandbox spawns.
    pub environment: AsyncHook<EnvSetup>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }
}

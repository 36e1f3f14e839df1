//! Teardown registry
//!
//! Resources acquired during session setup (child process groups, a
//! loopback alias, a mount directory, diagnostic spans) register a
//! cleanup action here. The registry is owned by the lifecycle
//! controller, is append-only during setup, and is drained exactly once,
//! in strict reverse registration order, on every exit path.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;

type TeardownAction = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// Ordered list of one-shot cleanup actions
#[derive(Default)]
pub struct TeardownRegistry {
    actions: Vec<(String, TeardownAction)>,
}

impl TeardownRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a synchronous cleanup action
    pub fn register<F>(&mut self, name: impl Into<String>, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        // The call must happen inside the future: run_all catches
        // panics only while awaiting it, not while constructing it.
        self.register_async(name, || async move { action() }.boxed());
    }

    /// Register a cleanup action that needs to await
    pub fn register_async<F>(&mut self, name: impl Into<String>, action: F)
    where
        F: FnOnce() -> BoxFuture<'static, ()> + Send + 'static,
    {
        let name = name.into();
        tracing::debug!("registered teardown action '{}'", name);
        self.actions.push((name, Box::new(action)));
    }

    /// Number of pending actions
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Run every registered action in reverse registration order.
    ///
    /// Consumes the registry so actions run at most once. A panicking
    /// action is caught and logged; the remaining actions still run.
    pub async fn run_all(mut self) {
        while let Some((name, action)) = self.actions.pop() {
            tracing::debug!("running teardown action '{}'", name);
            if AssertUnwindSafe(action()).catch_unwind().await.is_err() {
                tracing::error!("teardown action '{}' panicked", name);
            }
        }
    }
}

impl std::fmt::Debug for TeardownRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TeardownRegistry")
            .field("pending", &self.actions.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn test_actions_run_in_reverse_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut registry = TeardownRegistry::new();
        for i in 0..3 {
            let order = Arc::clone(&order);
            registry.register(format!("action-{}", i), move || {
                order.lock().unwrap().push(i);
            });
        }
        registry.run_all().await;
        assert_eq!(*order.lock().unwrap(), vec![2, 1, 0]);
    }

    #[tokio::test]
    async fn test_panicking_action_does_not_block_the_rest() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut registry = TeardownRegistry::new();

        let order_first = Arc::clone(&order);
        registry.register("first", move || {
            order_first.lock().unwrap().push("first");
        });
        registry.register("explodes", || panic!("boom"));
        let order_last = Arc::clone(&order);
        registry.register("last", move || {
            order_last.lock().unwrap().push("last");
        });

        registry.run_all().await;
        assert_eq!(*order.lock().unwrap(), vec!["last", "first"]);
    }

    #[tokio::test]
    async fn test_empty_registry_is_a_noop() {
        TeardownRegistry::new().run_all().await;
    }

    #[tokio::test]
    async fn test_async_action() {
        let ran = Arc::new(Mutex::new(false));
        let mut registry = TeardownRegistry::new();
        let ran_clone = Arc::clone(&ran);
        registry.register_async("async", move || {
            async move {
                tokio::task::yield_now().await;
                *ran_clone.lock().unwrap() = true;
            }
            .boxed()
        });
        registry.run_all().await;
        assert!(*ran.lock().unwrap());
    }
}

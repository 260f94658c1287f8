//! LIFO registry of teardown actions for resources acquired during a run.

use futures::future::BoxFuture;
use headless_test_core::Result;
use std::future::Future;
use tracing::{debug, warn};

type Teardown = Box<dyn FnOnce() -> BoxFuture<'static, Result<()>> + Send>;

/// Teardown actions run in reverse push order, each exactly once.
///
/// A failing action is logged and does not stop the ones below it.
#[derive(Default)]
pub struct CleanupStack {
    actions: Vec<(&'static str, Teardown)>,
}

impl CleanupStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<F, Fut>(&mut self, label: &'static str, action: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        debug!(resource = label, "Acquired");
        self.actions.push((label, Box::new(move || Box::pin(action()))));
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Run every pending action, newest first. Returns the labels in the order they ran.
    pub async fn unwind(&mut self) -> Vec<&'static str> {
        let mut released = Vec::with_capacity(self.actions.len());
        while let Some((label, action)) = self.actions.pop() {
            match action().await {
                Ok(()) => debug!(resource = label, "Released"),
                Err(e) => warn!(resource = label, "Teardown failed: {}", e),
            }
            released.push(label);
        }
        released
    }
}

impl Drop for CleanupStack {
    fn drop(&mut self) {
        if !self.actions.is_empty() {
            let pending: Vec<_> = self.actions.iter().map(|(label, _)| *label).collect();
            warn!(?pending, "Cleanup stack dropped without unwinding");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use headless_test_core::Error;
    use std::sync::{Arc, Mutex};

    fn recorder() -> Arc<Mutex<Vec<&'static str>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    #[tokio::test]
    async fn test_unwinds_in_reverse_order() {
        let log = recorder();
        let mut stack = CleanupStack::new();
        for label in ["server", "browser", "page"] {
            let log = log.clone();
            stack.push(label, move || async move {
                log.lock().unwrap().push(label);
                Ok::<_, Error>(())
            });
        }
        assert_eq!(stack.len(), 3);
        let released = stack.unwind().await;
        assert_eq!(released, vec!["page", "browser", "server"]);
        assert_eq!(*log.lock().unwrap(), vec!["page", "browser", "server"]);
        assert!(stack.is_empty());
    }

    #[tokio::test]
    async fn test_each_action_runs_once() {
        let log = recorder();
        let mut stack = CleanupStack::new();
        let inner = log.clone();
        stack.push("server", move || async move {
            inner.lock().unwrap().push("server");
            Ok::<_, Error>(())
        });
        stack.unwind().await;
        assert!(stack.unwind().await.is_empty());
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_unwinding() {
        let log = recorder();
        let mut stack = CleanupStack::new();
        let inner = log.clone();
        stack.push("browser", move || async move {
            inner.lock().unwrap().push("browser");
            Ok::<_, Error>(())
        });
        stack.push("page", || async { Err::<(), _>(Error::Cdp("target already gone".to_string())) });
        let released = stack.unwind().await;
        assert_eq!(released, vec!["page", "browser"]);
        assert_eq!(*log.lock().unwrap(), vec!["browser"]);
    }
}

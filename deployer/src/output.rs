//! Single-resolution values.
//!
//! An [`Output`] wraps a future that runs at most once. Every clone shares the
//! same underlying computation, so a stack reference fetched by several
//! consumers still hits its source exactly once.

use crate::reference::{ResolveError, ResolveResult};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::fmt;
use std::future::Future;

#[derive(Clone)]
pub struct Output<T: Clone> {
    inner: Shared<BoxFuture<'static, ResolveResult<T>>>,
}

impl<T> Output<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = ResolveResult<T>> + Send + 'static,
    {
        Self {
            inner: future.boxed().shared(),
        }
    }

    /// An output that is already known
    pub fn ready(value: T) -> Self {
        Self::new(futures::future::ready(Ok(value)))
    }

    pub fn failed(error: ResolveError) -> Self {
        Self::new(futures::future::ready(Err(error)))
    }

    /// Wait for the value. The first caller drives the computation; later
    /// callers get the cached result.
    pub async fn get(&self) -> ResolveResult<T> {
        self.inner.clone().await
    }

    /// Derive a new output from this one once it resolves
    pub fn apply<U, F>(&self, f: F) -> Output<U>
    where
        U: Clone + Send + Sync + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        let inner = self.inner.clone();
        Output::new(async move { inner.await.map(f) })
    }

    pub fn try_apply<U, F>(&self, f: F) -> Output<U>
    where
        U: Clone + Send + Sync + 'static,
        F: FnOnce(T) -> ResolveResult<U> + Send + 'static,
    {
        let inner = self.inner.clone();
        Output::new(async move { inner.await.and_then(f) })
    }
}

impl<T: Clone> fmt::Debug for Output<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = if self.inner.peek().is_some() {
            "resolved"
        } else {
            "pending"
        };
        f.debug_struct("Output").field("state", &state).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_resolves_once_for_many_readers() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let output = Output::new(async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok("vpc-123".to_string())
        });

        assert_eq!(format!("{:?}", output), "Output { state: \"pending\" }");
        let copy = output.clone();
        assert_eq!(output.get().await.unwrap(), "vpc-123");
        assert_eq!(copy.get().await.unwrap(), "vpc-123");
        assert_eq!(output.get().await.unwrap(), "vpc-123");
        assert_eq!(format!("{:?}", output), "Output { state: \"resolved\" }");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_lazy_until_awaited() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let output = Output::new(async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(1u32)
        });
        let derived = output.apply(|n| n + 1);

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(derived.get().await.unwrap(), 2);
        assert_eq!(output.get().await.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_errors_are_shared() {
        let output: Output<String> = Output::failed(ResolveError::StackNotFound {
            stack: "organization/infrastructure-vpc/dev".to_string(),
        });
        let derived = output.apply(|s| s.len());

        assert!(output.get().await.is_err());
        assert!(matches!(
            derived.get().await,
            Err(ResolveError::StackNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_try_apply() {
        let output = Output::ready(vec!["subnet-a".to_string()]);
        let first = output.try_apply(|ids| {
            ids.into_iter().next().ok_or(ResolveError::WrongShape {
                stack: "s".to_string(),
                key: "k".to_string(),
                expected: "a non-empty list",
            })
        });
        assert_eq!(first.get().await.unwrap(), "subnet-a");
        assert_eq!(format!("{:?}", first), "Output { state: \"resolved\" }");
    }
}

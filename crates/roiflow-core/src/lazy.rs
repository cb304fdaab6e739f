//! Deferred results returned by `get(roi)`.
//!
//! A [`LazyResult`] is a boxed future: nothing is forced until a caller
//! awaits it or calls [`LazyResult::wait`]. Results compose without forcing
//! ([`LazyResult::map`], [`LazyResult::join_all`]), so an operator can fan
//! out sub-requests to several upstream slots and await them together.
//!
//! Dropping a `LazyResult` abandons only that handle. Work spawned on the
//! worker pool keeps running and still completes for any other holder of a
//! [`SharedResult`].

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::channel::oneshot;
use futures::executor::{block_on, ThreadPool};
use futures::future::{self, BoxFuture, FutureExt, Shared};

use crate::error::{CoreError, CoreResult};
use crate::value::Array;

/// A cloneable handle to an in-flight computation.
pub type SharedResult<T = Array> = Shared<BoxFuture<'static, CoreResult<T>>>;

/// A deferred computation producing `T` (an array by default).
pub struct LazyResult<T = Array> {
    fut: BoxFuture<'static, CoreResult<T>>,
}

impl<T: Send + 'static> LazyResult<T> {
    /// An already-available value.
    pub fn ready(value: T) -> Self {
        LazyResult {
            fut: future::ready(Ok(value)).boxed(),
        }
    }

    /// An already-failed computation.
    pub fn failed(err: CoreError) -> Self {
        LazyResult {
            fut: future::ready(Err(err)).boxed(),
        }
    }

    /// Defers `f` until the result is awaited.
    pub fn deferred(f: impl FnOnce() -> CoreResult<T> + Send + 'static) -> Self {
        LazyResult {
            fut: async move { f() }.boxed(),
        }
    }

    pub fn from_future(fut: impl Future<Output = CoreResult<T>> + Send + 'static) -> Self {
        LazyResult { fut: fut.boxed() }
    }

    /// Transforms the eventual value without forcing it.
    pub fn map<U: Send + 'static>(
        self,
        f: impl FnOnce(T) -> CoreResult<U> + Send + 'static,
    ) -> LazyResult<U> {
        let fut = self.fut;
        LazyResult {
            fut: async move { f(fut.await?) }.boxed(),
        }
    }

    /// Awaits every part together; the first failure wins.
    pub fn join_all(parts: Vec<LazyResult<T>>) -> LazyResult<Vec<T>> {
        let futs: Vec<_> = parts.into_iter().map(|p| p.fut).collect();
        LazyResult {
            fut: future::try_join_all(futs).boxed(),
        }
    }

    /// Blocks the calling thread until the value is available.
    pub fn wait(self) -> CoreResult<T> {
        block_on(self.fut)
    }

    /// Starts the computation on `pool` right away.
    ///
    /// The returned handle only observes the result; dropping it does not
    /// stop the spawned work.
    pub fn spawn_on(self, pool: &ThreadPool) -> LazyResult<T> {
        let (tx, rx) = oneshot::channel();
        let fut = self.fut;
        pool.spawn_ok(async move {
            let _ = tx.send(fut.await);
        });
        LazyResult {
            fut: rx
                .map(|r| r.unwrap_or(Err(CoreError::Canceled)))
                .boxed(),
        }
    }

    pub fn into_future(self) -> BoxFuture<'static, CoreResult<T>> {
        self.fut
    }
}

impl<T: Clone + Send + Sync + 'static> LazyResult<T> {
    /// Converts into a cloneable handle several waiters can share.
    pub fn shared(self) -> SharedResult<T> {
        self.fut.shared()
    }
}

impl<T: Clone + Send + Sync + 'static> From<SharedResult<T>> for LazyResult<T> {
    fn from(shared: SharedResult<T>) -> Self {
        LazyResult {
            fut: shared.boxed(),
        }
    }
}

impl<T> Future for LazyResult<T> {
    type Output = CoreResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.fut.as_mut().poll(cx)
    }
}

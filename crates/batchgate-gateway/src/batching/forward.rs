use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;

use batchgate_core::error::Result;

/// Batch-forward collaborator: one backend call for a whole batch.
///
/// Implementations must return exactly one output per input, in input order.
/// Anything else is treated as a failure of the entire batch.
#[async_trait]
pub trait BatchForward<I, O>: Send + Sync
where
    I: Send + 'static,
    O: Send + 'static,
{
    async fn forward(&self, batch: Vec<I>) -> Result<Vec<O>>;
}

/// Adapter turning an async closure into a [`BatchForward`].
pub struct FnForward<F, I, O> {
    f: F,
    _io: PhantomData<fn(I) -> O>,
}

/// Wrap `f` so it can be handed to a batcher.
pub fn forward_fn<F, Fut, I, O>(f: F) -> FnForward<F, I, O>
where
    F: Fn(Vec<I>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<O>>> + Send + 'static,
{
    FnForward {
        f,
        _io: PhantomData,
    }
}

#[async_trait]
impl<F, Fut, I, O> BatchForward<I, O> for FnForward<F, I, O>
where
    F: Fn(Vec<I>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<O>>> + Send + 'static,
    I: Send + 'static,
    O: Send + 'static,
{
    async fn forward(&self, batch: Vec<I>) -> Result<Vec<O>> {
        (self.f)(batch).await
    }
}

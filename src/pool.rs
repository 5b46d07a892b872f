//! Bounded admission for store mutations.

use std::{future::Future, sync::Arc};

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

pub const MIN_POOL_SIZE: usize = 5;
pub const MAX_POOL_SIZE: usize = 100;

/// Caps the number of workers running at once.
///
/// Each [`run`](AdmissionPool::run) takes a permit, runs the worker on its
/// own task and waits for either the result or cancellation. Cancelling
/// only releases the caller: the worker keeps its permit until it returns,
/// so workers are expected to watch the token they are handed.
#[derive(Debug)]
pub struct AdmissionPool {
    num: usize,
    semaphore: Arc<Semaphore>,
}

impl AdmissionPool {
    /// Create a pool of `num` permits, clamped to `[5, 100]`.
    pub fn new(num: usize) -> Self {
        let num = num.clamp(MIN_POOL_SIZE, MAX_POOL_SIZE);
        Self {
            num,
            semaphore: Arc::new(Semaphore::new(num)),
        }
    }

    pub fn num(&self) -> usize {
        self.num
    }

    /// Permits not currently held by a worker.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub async fn run<F, Fut, T>(
        &self,
        cancel: &CancellationToken,
        worker: F,
    ) -> Result<T>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let permit = tokio::select! {
            biased;

            () = cancel.cancelled() => return Err(Error::Timeout),
            permit = self.semaphore.clone().acquire_owned() => {
                permit.map_err(|_| Error::PoolClosed)?
            }
        };

        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            // Held until the worker finishes, even if the caller gave up.
            let _permit = permit;
            worker(token).await
        });

        tokio::select! {
            biased;

            joined = handle => match joined {
                Ok(result) => result,
                Err(err) => Err(Error::Worker(err.to_string())),
            },
            () = cancel.cancelled() => {
                tracing::debug!("caller cancelled, worker left running");
                Err(Error::Timeout)
            }
        }
    }
}

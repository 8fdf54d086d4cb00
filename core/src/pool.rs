//! Bounded instance pool
//!
//! Programs that keep per-invocation state cannot be shared between
//! concurrent callers. A [`Pool`] hands each caller its own instance:
//!
//! - `acquire` takes a free instance, creates one while fewer than `max` are
//!   checked out, or waits in FIFO order
//! - releasing (dropping the [`PoolGuard`]) hands the instance straight to the
//!   longest waiter, or returns it to the free list
//!
//! Exhaustion is backpressure: callers wait, they never fail.

use serde_json::Value;
use std::collections::VecDeque;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::compiler::Instance;
use crate::error::{EngineError, Result};
use crate::interpreter::Evaluation;

pub struct PoolConfig<T> {
    /// Instances available before anything is created
    pub initial_free: Vec<T>,
    /// Upper bound on checked-out instances
    pub max: usize,
    pub create: Box<dyn Fn() -> T + Send + Sync>,
}

pub struct Pool<T> {
    shared: Arc<Shared<T>>,
}

struct Shared<T> {
    state: Mutex<PoolState<T>>,
    max: usize,
    create: Box<dyn Fn() -> T + Send + Sync>,
}

struct PoolState<T> {
    free: Vec<T>,
    checked_out: usize,
    waiters: VecDeque<oneshot::Sender<T>>,
}

impl<T> Clone for Pool<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T: Send + 'static> Pool<T> {
    pub fn new(config: PoolConfig<T>) -> Self {
        let max = if config.max == 0 {
            tracing::warn!("pool max of 0 would never admit a caller, using 1");
            1
        } else {
            config.max
        };

        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(PoolState {
                    free: config.initial_free,
                    checked_out: 0,
                    waiters: VecDeque::new(),
                }),
                max,
                create: config.create,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PoolState<T>> {
        self.shared.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Check out an instance, waiting if `max` are already out
    pub async fn acquire(&self) -> PoolGuard<T> {
        loop {
            let receiver = {
                let mut state = self.lock();
                if let Some(item) = state.free.pop() {
                    state.checked_out += 1;
                    return PoolGuard::new(item, self.clone());
                }

                if state.checked_out < self.shared.max {
                    state.checked_out += 1;
                    drop(state);
                    tracing::trace!(max = self.shared.max, "creating pool instance");
                    return PoolGuard::new((self.shared.create)(), self.clone());
                }

                let (sender, receiver) = oneshot::channel();
                state.waiters.push_back(sender);
                tracing::debug!(
                    checked_out = state.checked_out,
                    waiting = state.waiters.len(),
                    "pool exhausted, waiting for release"
                );
                receiver
            };

            let mut handoff = Handoff {
                receiver,
                pool: self,
                received: false,
            };
            if let Ok(item) = (&mut handoff.receiver).await {
                handoff.received = true;
                return PoolGuard::new(item, self.clone());
            }
        }
    }

    /// Like [`Pool::acquire`], giving up when `cancel` fires
    pub async fn acquire_with(&self, cancel: &CancellationToken) -> Result<PoolGuard<T>> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(EngineError::Cancelled),
            guard = self.acquire() => Ok(guard),
        }
    }

    /// Return an instance; the checked-out slot passes to a waiter if any
    fn release(&self, mut item: T) {
        let mut state = self.lock();
        while let Some(waiter) = state.waiters.pop_front() {
            match waiter.send(item) {
                Ok(()) => {
                    tracing::trace!("handed pool instance to waiter");
                    return;
                }
                // Waiter gave up
                Err(returned) => item = returned,
            }
        }
        state.checked_out = state.checked_out.saturating_sub(1);
        state.free.push(item);
    }

    pub fn max(&self) -> usize {
        self.shared.max
    }

    pub fn checked_out(&self) -> usize {
        self.lock().checked_out
    }

    pub fn idle(&self) -> usize {
        self.lock().free.len()
    }

    pub fn waiting(&self) -> usize {
        self.lock().waiters.iter().filter(|waiter| !waiter.is_closed()).count()
    }
}

impl Pool<Instance> {
    /// Acquire an instance, call it, and release it whatever the outcome
    pub async fn invoke(&self, data: Value, cancel: CancellationToken) -> Result<Evaluation> {
        let mut instance = self.acquire_with(&cancel).await?;
        instance.call(data, cancel).await
    }
}

impl<T> fmt::Debug for Pool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool").field("max", &self.shared.max).finish()
    }
}

/// Receiver side of a hand-off. If the waiter is dropped after an instance was
/// sent but before it was received, the instance goes back to the pool.
struct Handoff<'a, T: Send + 'static> {
    receiver: oneshot::Receiver<T>,
    pool: &'a Pool<T>,
    received: bool,
}

impl<T: Send + 'static> Drop for Handoff<'_, T> {
    fn drop(&mut self) {
        if self.received {
            return;
        }
        self.receiver.close();
        if let Ok(item) = self.receiver.try_recv() {
            self.pool.release(item);
        }
    }
}

/* ===================== Guard ===================== */

/// A checked-out instance, released on drop
pub struct PoolGuard<T: Send + 'static> {
    item: Option<T>,
    pool: Pool<T>,
}

impl<T: Send + 'static> PoolGuard<T> {
    fn new(item: T, pool: Pool<T>) -> Self {
        Self { item: Some(item), pool }
    }
}

impl<T: Send + 'static> Deref for PoolGuard<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.item.as_ref().expect("instance is held until the guard drops")
    }
}

impl<T: Send + 'static> DerefMut for PoolGuard<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.item.as_mut().expect("instance is held until the guard drops")
    }
}

impl<T: Send + 'static + fmt::Debug> fmt::Debug for PoolGuard<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolGuard")
            .field("item", &self.item)
            .field("pool", &self.pool)
            .finish()
    }
}

impl<T: Send + 'static> Drop for PoolGuard<T> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            self.pool.release(item);
        }
    }
}

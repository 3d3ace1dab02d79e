//! In-flight request coalescing
//!
//! The first caller for a cache key becomes the leader and does the work;
//! concurrent callers for the same key wait on a `oneshot` for the leader's
//! value. A leader dropped before completing closes its waiters' channels,
//! and they rejoin: the first becomes the new leader.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;
use tracing::debug;

use super::cache::CacheKey;

type Waiters<T> = HashMap<CacheKey, Vec<oneshot::Sender<T>>>;

pub struct InFlightRegistry<T> {
    inner: Arc<Mutex<Waiters<T>>>,
}

impl<T> Default for InFlightRegistry<T> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<T> Clone for InFlightRegistry<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

pub enum Join<T> {
    Leader(LeaderGuard<T>),
    Follower(oneshot::Receiver<T>),
}

/// Held by the caller doing the work for a key
pub struct LeaderGuard<T> {
    key: CacheKey,
    inner: Arc<Mutex<Waiters<T>>>,
    completed: bool,
}

fn lock<T>(inner: &Mutex<Waiters<T>>) -> MutexGuard<'_, Waiters<T>> {
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<T: Clone> LeaderGuard<T> {
    /// Hand the value to every waiter; returns how many received it
    pub fn complete(mut self, value: &T) -> usize {
        self.completed = true;
        let waiters = lock(&self.inner).remove(&self.key).unwrap_or_default();
        waiters
            .into_iter()
            .map(|tx| tx.send(value.clone()).is_ok())
            .filter(|delivered| *delivered)
            .count()
    }
}

impl<T> Drop for LeaderGuard<T> {
    fn drop(&mut self) {
        if !self.completed {
            let abandoned = lock(&self.inner).remove(&self.key);
            if let Some(waiters) = abandoned
                && !waiters.is_empty()
            {
                debug!(
                    key = %self.key.short(),
                    waiters = waiters.len(),
                    "In-flight leader dropped, waiters will rejoin"
                );
            }
        }
    }
}

impl<T: Clone> InFlightRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join(&self, key: &CacheKey) -> Join<T> {
        let mut map = lock(&self.inner);
        match map.get_mut(key) {
            Some(waiters) => {
                let (tx, rx) = oneshot::channel();
                waiters.push(tx);
                Join::Follower(rx)
            }
            None => {
                map.insert(key.clone(), Vec::new());
                Join::Leader(LeaderGuard {
                    key: key.clone(),
                    inner: Arc::clone(&self.inner),
                    completed: false,
                })
            }
        }
    }

    /// Run `work` unless an identical call is already running, in which case
    /// wait for its value. The flag is true when the value was shared.
    pub async fn run_or_join<F, Fut>(&self, key: &CacheKey, work: F) -> (T, bool)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let guard = loop {
            match self.join(key) {
                Join::Leader(guard) => break guard,
                Join::Follower(rx) => match rx.await {
                    Ok(value) => return (value, true),
                    Err(_) => debug!(key = %key.short(), "Rejoining after abandoned leader"),
                },
            }
        };

        let value = work().await;
        guard.complete(&value);
        (value, false)
    }

    pub fn in_flight(&self) -> usize {
        lock(&self.inner).len()
    }
}

//! A keyed, single-slot guard for in-flight operations.
//!
//! At most one operation runs per guard. A caller arriving with the same key
//! while it is pending attaches to it and receives the same output; a caller
//! with a different key supersedes the slot (the previous operation keeps
//! running for the callers already attached to it).

use futures::{
    future::{BoxFuture, Shared},
    FutureExt,
};
use std::{
    future::Future,
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex,
    },
};

struct Slot<K, T: Clone> {
    key: K,
    generation: u64,
    future: Shared<BoxFuture<'static, T>>,
}

pub struct SingleFlight<K, T: Clone> {
    slot: Mutex<Option<Slot<K, T>>>,
    generation: AtomicU64,
}

impl<K, T> SingleFlight<K, T>
where
    K: PartialEq + Clone,
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }

    /// Runs `start()` unless an operation with the same key is already in
    /// flight, in which case the pending one is awaited instead.
    pub async fn run<F, Fut>(&self, key: K, start: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let (generation, future) = {
            let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
            match slot.as_ref() {
                Some(pending) if pending.key == key => {
                    tracing::debug!("attaching to in-flight operation");
                    (pending.generation, pending.future.clone())
                }
                _ => {
                    let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
                    let future = start().boxed().shared();
                    *slot = Some(Slot {
                        key,
                        generation,
                        future: future.clone(),
                    });
                    (generation, future)
                }
            }
        };

        let output = future.await;

        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        if slot.as_ref().is_some_and(|s| s.generation == generation) {
            *slot = None;
        }
        output
    }

    pub fn is_pending(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Forgets the pending operation; callers already attached still get its output.
    pub fn clear(&self) {
        *self.slot.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

impl<K, T> Default for SingleFlight<K, T>
where
    K: PartialEq + Clone,
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

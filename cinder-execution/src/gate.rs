use std::{
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicBool, Ordering},
};

use tokio::sync::{Mutex, MutexGuard};

/// Serializes every state-mutating engine operation.
///
/// The guarded value holds everything a mutator may touch (the VM, the
/// cached hardfork, pending receipts). `running` is set inside the locked
/// region and cleared when the guard drops, so non-blocking callers can
/// observe an in-flight mutation without queueing on the lock.
pub struct ExecutionGate<T> {
    inner: Mutex<T>,
    running: AtomicBool,
}

impl<T> ExecutionGate<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
            running: AtomicBool::new(false),
        }
    }

    pub async fn acquire(&self) -> GateGuard<'_, T> {
        let guard = self.inner.lock().await;
        self.running.store(true, Ordering::SeqCst);
        GateGuard {
            guard,
            running: &self.running,
        }
    }

    /// Whether some caller currently holds the gate.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

pub struct GateGuard<'a, T> {
    guard: MutexGuard<'a, T>,
    running: &'a AtomicBool,
}

impl<T> Deref for GateGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for GateGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for GateGuard<'_, T> {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn running_flag_tracks_guard_lifetime() {
        let gate = ExecutionGate::new(0u64);
        assert!(!gate.is_running());

        let mut guard = gate.acquire().await;
        *guard += 1;
        assert!(gate.is_running());

        drop(guard);
        assert!(!gate.is_running());
    }

    #[tokio::test]
    async fn acquisitions_are_serialized() {
        let gate = Arc::new(ExecutionGate::new(Vec::<u32>::new()));
        let mut tasks = Vec::new();
        for i in 0..8u32 {
            let gate = Arc::clone(&gate);
            tasks.push(tokio::spawn(async move {
                let mut guard = gate.acquire().await;
                guard.push(i);
                tokio::task::yield_now().await;
                guard.push(i);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let guard = gate.acquire().await;
        // each task appended its pair without interleaving
        for pair in guard.chunks(2) {
            assert_eq!(pair[0], pair[1]);
        }
    }
}

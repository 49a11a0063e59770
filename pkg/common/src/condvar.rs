use std::borrow::{Borrow, BorrowMut};
use std::ops::{Deref, DerefMut};

use async_std::sync::{Mutex, MutexGuard};
use futures::channel::oneshot;

/// A futures based implementation of a conditional variable that owns the
/// condition value.
///
/// Unlike `std::sync::Condvar` this does not relock the mutex after the
/// wait is done: the guard is consumed by `wait()` and a fresh `lock()` is
/// needed afterwards. Used throughout the client and registry back-ends for
/// "block until some shared state changes" loops (e.g. waiting for the
/// selector to see at least one healthy node).
///
/// Waiters can stash a small value of type `T`; a notifier can read it to
/// wake only a subset of waiters via `notify_filter`.
pub struct Condvar<V, T = ()> {
    inner: Mutex<CondvarInner<V, T>>,
}

struct CondvarInner<V, T> {
    value: V,
    waiters: Vec<(oneshot::Sender<()>, T)>,
}

impl<V, T> CondvarInner<V, T> {
    /// Garbage collects all waiters which are no longer being waited on.
    fn collect(&mut self) {
        let mut i = 0;
        while i < self.waiters.len() {
            if self.waiters[i].0.is_canceled() {
                self.waiters.swap_remove(i);
            } else {
                i += 1;
            }
        }
    }
}

impl<V, T> Condvar<V, T> {
    pub fn new(initial_value: V) -> Self {
        Condvar {
            inner: Mutex::new(CondvarInner {
                value: initial_value,
                waiters: vec![],
            }),
        }
    }

    pub async fn lock<'a>(&'a self) -> CondvarGuard<'a, V, T> {
        CondvarGuard {
            guard: self.inner.lock().await,
        }
    }
}

pub struct CondvarGuard<'a, V, T> {
    guard: MutexGuard<'a, CondvarInner<V, T>>,
}

impl<'a, V, T> Borrow<V> for CondvarGuard<'a, V, T> {
    fn borrow(&self) -> &V {
        &self.guard.value
    }
}

impl<'a, V, T> BorrowMut<V> for CondvarGuard<'a, V, T> {
    fn borrow_mut(&mut self) -> &mut V {
        &mut self.guard.value
    }
}

impl<'a, V, T> Deref for CondvarGuard<'a, V, T> {
    type Target = V;
    fn deref(&self) -> &V {
        &self.guard.value
    }
}

impl<'a, V, T> DerefMut for CondvarGuard<'a, V, T> {
    fn deref_mut(&mut self) -> &mut V {
        &mut self.guard.value
    }
}

impl<'a, V, T> CondvarGuard<'a, V, T> {
    pub async fn wait(self, data: T) {
        let (tx, rx) = oneshot::channel();
        let mut guard = self.guard;

        guard.collect();
        guard.waiters.push((tx, data));
        drop(guard);

        let _ = rx.await;
    }

    pub fn notify_filter<F>(&mut self, f: F)
    where
        F: Fn(&T) -> bool,
    {
        let guard = &mut self.guard;

        let mut i = guard.waiters.len();
        while i > 0 {
            if f(&guard.waiters[i - 1].1) {
                let (tx, _) = guard.waiters.swap_remove(i - 1);
                let _ = tx.send(());
            }
            i -= 1;
        }
    }

    pub fn notify_all(&mut self) {
        self.notify_filter(|_| true);
    }
}

//! Duplicate-call suppression.
//!
//! A [`Singleflight`] runs at most one closure per key at a time. Callers that
//! arrive while a call for their key is in progress block until it finishes
//! and receive a clone of its result. Keys are forgotten as soon as the call
//! completes, so a later caller starts a fresh one.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Condvar, Mutex};

enum State<V> {
    Running,
    Done(V),
    /// The leader unwound without producing a value.
    Abandoned,
}

struct Call<V> {
    state: Mutex<State<V>>,
    done: Condvar,
}

impl<V: Clone> Call<V> {
    fn new() -> Self {
        Self {
            state: Mutex::new(State::Running),
            done: Condvar::new(),
        }
    }

    fn finish(&self, state: State<V>) {
        *self.state.lock().expect("lock poisoned") = state;
        self.done.notify_all();
    }

    /// Block until the leader finishes. `None` if it abandoned the call.
    fn wait(&self) -> Option<V> {
        let mut state = self.state.lock().expect("lock poisoned");
        loop {
            match &*state {
                State::Running => state = self.done.wait(state).expect("lock poisoned"),
                State::Done(v) => return Some(v.clone()),
                State::Abandoned => return None,
            }
        }
    }
}

/// Coalesces concurrent calls that share a key.
pub struct Singleflight<K, V> {
    calls: Mutex<HashMap<K, Arc<Call<V>>>>,
}

impl<K, V> Default for Singleflight<K, V> {
    fn default() -> Self {
        Self {
            calls: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, V> std::fmt::Debug for Singleflight<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Singleflight").finish_non_exhaustive()
    }
}

enum Role<V> {
    Leader(Arc<Call<V>>),
    Follower(Arc<Call<V>>),
}

/// Retires a leader's call, also when `f` panics.
struct Retire<'a, K: Eq + Hash, V: Clone> {
    flight: &'a Singleflight<K, V>,
    key: &'a K,
    call: &'a Arc<Call<V>>,
    result: Option<V>,
}

impl<K: Eq + Hash, V: Clone> Drop for Retire<'_, K, V> {
    fn drop(&mut self) {
        {
            let mut calls = self.flight.calls.lock().expect("lock poisoned");
            if calls.get(self.key).is_some_and(|c| Arc::ptr_eq(c, self.call)) {
                calls.remove(self.key);
            }
        }
        match self.result.take() {
            Some(v) => self.call.finish(State::Done(v)),
            None => self.call.finish(State::Abandoned),
        }
    }
}

impl<K, V> Singleflight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` unless a call for `key` is already in flight, in which case
    /// wait for that call and share its result.
    ///
    /// Returns the result and whether this caller ran `f`. If the leading
    /// call panics, waiting callers retry and one of them runs its own `f`.
    pub fn run<F>(&self, key: K, f: F) -> (V, bool)
    where
        F: FnOnce() -> V,
    {
        loop {
            match self.join(&key) {
                Role::Leader(call) => {
                    let mut retire = Retire {
                        flight: self,
                        key: &key,
                        call: &call,
                        result: None,
                    };
                    let value = f();
                    retire.result = Some(value.clone());
                    drop(retire);
                    return (value, true);
                }
                Role::Follower(call) => {
                    if let Some(value) = call.wait() {
                        return (value, false);
                    }
                }
            }
        }
    }

    /// Number of keys with a call currently in progress.
    pub fn in_flight(&self) -> usize {
        self.calls.lock().expect("lock poisoned").len()
    }

    fn join(&self, key: &K) -> Role<V> {
        let mut calls = self.calls.lock().expect("lock poisoned");
        match calls.get(key) {
            Some(call) => Role::Follower(Arc::clone(call)),
            None => {
                let call = Arc::new(Call::new());
                calls.insert(key.clone(), Arc::clone(&call));
                Role::Leader(call)
            }
        }
    }
}

//! Snapshot-change listeners.

use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};

type Callback = Arc<dyn Fn() + Send + Sync>;

/// Unique identifier for a registered listener.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub u64);

#[derive(Default)]
struct ListenerList {
    entries: Vec<(ListenerId, Callback)>,
    next_id: u64,
}

/// Ordered set of payload-free callbacks.
///
/// `notify` iterates over a copy of the list taken under the lock, so
/// callbacks may add or remove listeners (including themselves) while a
/// cycle is running. A listener removed mid-cycle may still receive that
/// cycle's call.
#[derive(Clone, Default)]
pub struct ListenerSet {
    inner: Arc<Mutex<ListenerList>>,
}

impl ListenerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<F>(&self, callback: F) -> ListenerId
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut list = self.inner.lock();
        list.next_id += 1;
        let id = ListenerId(list.next_id);
        list.entries.push((id, Arc::new(callback)));
        id
    }

    /// Returns false if the listener was already gone.
    pub fn remove(&self, id: ListenerId) -> bool {
        remove_from(&self.inner, id)
    }

    /// Run one callback outside the normal cycle (catch-up on subscribe).
    pub(crate) fn notify_one(&self, id: ListenerId) {
        let callback = self
            .inner
            .lock()
            .entries
            .iter()
            .find(|(entry_id, _)| *entry_id == id)
            .map(|(_, cb)| Arc::clone(cb));

        if let Some(cb) = callback {
            invoke(id, &cb);
        }
    }

    /// Invoke every listener in registration order. Returns how many ran
    /// without panicking.
    pub fn notify(&self) -> usize {
        let entries: Vec<(ListenerId, Callback)> = self.inner.lock().entries.clone();

        entries
            .iter()
            .filter(|(id, cb)| invoke(*id, cb))
            .count()
    }

    pub fn clear(&self) {
        self.inner.lock().entries.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deregistration token for `id`.
    pub fn token(&self, id: ListenerId) -> Unsubscribe {
        Unsubscribe {
            id,
            list: Arc::downgrade(&self.inner),
        }
    }
}

fn remove_from(list: &Mutex<ListenerList>, id: ListenerId) -> bool {
    let mut list = list.lock();
    let before = list.entries.len();
    list.entries.retain(|(entry_id, _)| *entry_id != id);
    list.entries.len() != before
}

/// A panicking listener is logged and skipped.
fn invoke(id: ListenerId, callback: &Callback) -> bool {
    match catch_unwind(AssertUnwindSafe(|| callback())) {
        Ok(()) => true,
        Err(_) => {
            tracing::error!(listener = id.0, "snapshot listener panicked");
            false
        }
    }
}

/// Token returned by `subscribe`. Calling it removes exactly one listener;
/// further calls are no-ops. Dropping it does not unsubscribe.
#[derive(Clone, Debug)]
pub struct Unsubscribe {
    id: ListenerId,
    list: Weak<Mutex<ListenerList>>,
}

impl Unsubscribe {
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Returns false if the listener (or its collection) was already gone.
    pub fn unsubscribe(&self) -> bool {
        match self.list.upgrade() {
            Some(list) => remove_from(&list, self.id),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_notify_in_registration_order() {
        let set = ListenerSet::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        for n in 0..3 {
            let log = Arc::clone(&log);
            set.add(move || log.lock().push(n));
        }

        assert_eq!(set.notify(), 3);
        assert_eq!(*log.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn test_panicking_listener_does_not_stop_others() {
        let set = ListenerSet::new();
        let hits = Arc::new(AtomicUsize::new(0));

        set.add(|| panic!("boom"));
        let h = Arc::clone(&hits);
        set.add(move || {
            h.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(set.notify(), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let set = ListenerSet::new();
        let id = set.add(|| {});
        let token = set.token(id);

        assert!(token.unsubscribe());
        assert!(!token.unsubscribe());
        assert!(set.is_empty());
    }

    #[test]
    fn test_unsubscribe_self_during_notify() {
        let set = ListenerSet::new();
        let slot: Arc<Mutex<Option<Unsubscribe>>> = Arc::new(Mutex::new(None));
        let first_hits = Arc::new(AtomicUsize::new(0));
        let second_hits = Arc::new(AtomicUsize::new(0));

        let s = Arc::clone(&slot);
        let h = Arc::clone(&first_hits);
        let id = set.add(move || {
            h.fetch_add(1, Ordering::SeqCst);
            if let Some(token) = s.lock().take() {
                token.unsubscribe();
            }
        });
        *slot.lock() = Some(set.token(id));

        let h = Arc::clone(&second_hits);
        set.add(move || {
            h.fetch_add(1, Ordering::SeqCst);
        });

        set.notify();
        set.notify();

        assert_eq!(first_hits.load(Ordering::SeqCst), 1);
        assert_eq!(second_hits.load(Ordering::SeqCst), 2);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_subscribe_during_notify_does_not_deadlock() {
        let set = ListenerSet::new();
        let inner = set.clone();
        set.add(move || {
            inner.add(|| {});
        });

        set.notify();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_token_outliving_set() {
        let set = ListenerSet::new();
        let token = set.token(set.add(|| {}));
        drop(set);
        assert!(!token.unsubscribe());
    }
}

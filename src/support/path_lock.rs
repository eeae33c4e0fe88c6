//-
// Copyright (c) 2023, Jason Lingle
//
// This file is part of Pigeonhole.
//
// Pigeonhole is free software: you can  redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, either version  3 of the License, or (at  your option) any later
// version.
//
// Pigeonhole is distributed in the hope that it will be useful, but WITHOUT ANY
// WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or FITNESS
// FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License for  more
// details.
//
// You should have received a copy of the GNU General Public License along with
// Pigeonhole. If not, see <http://www.gnu.org/licenses/>.

//! Named, path-scoped mutual exclusion.
//!
//! Backends without a native serialisation point (the file system, mostly)
//! take one of these locks around every check-then-act sequence on a mailbox,
//! e.g. "does `users/bob/Work` exist? if not, create it". The lock is held by
//! a guard value, so it is released on every exit path including `?`.
//!
//! Only holders of the *same* key contend. The table only ever contains keys
//! that are currently held, so it does not grow with the number of mailboxes
//! ever touched.

use std::collections::HashSet;
use std::sync::{Arc, Condvar, Mutex};

use crate::name::MailboxName;

/// A process-wide table of held path locks.
///
/// Clones share the same table.
#[derive(Clone, Default)]
pub struct MailboxPathLocker {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    held: Mutex<HashSet<LockKey>>,
    released: Condvar,
}

/// Mailbox paths are keyed by their segments, so no two distinct paths and no
/// path and named key ever share a lock.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum LockKey {
    Path(MailboxName),
    Named(String),
}

/// Proof that a path lock is held. The lock is released when this is dropped.
#[must_use]
pub struct PathLock {
    inner: Arc<Inner>,
    key: LockKey,
}

impl MailboxPathLocker {
    pub fn new() -> Self {
        Self::default()
    }

    fn acquire(&self, key: LockKey) -> PathLock {
        let mut held = self.inner.held.lock().unwrap();
        while held.contains(&key) {
            held = self.inner.released.wait(held).unwrap();
        }
        held.insert(key.clone());

        PathLock {
            inner: Arc::clone(&self.inner),
            key,
        }
    }

    /// Block until the lock named `key` is available, then take it.
    pub fn lock_key(&self, key: &str) -> PathLock {
        self.acquire(LockKey::Named(key.to_owned()))
    }

    /// Take the lock for the given mailbox path.
    pub fn lock(&self, path: &MailboxName) -> PathLock {
        self.acquire(LockKey::Path(path.clone()))
    }

    /// Run `f` while holding the lock for `path`.
    pub fn execute_with_lock<R>(
        &self,
        path: &MailboxName,
        f: impl FnOnce() -> R,
    ) -> R {
        let _lock = self.lock(path);
        f()
    }

    /// Whether the lock named `key` is currently held.
    pub fn is_locked(&self, key: &str) -> bool {
        self.is_held(&LockKey::Named(key.to_owned()))
    }

    /// Whether the lock for `path` is currently held.
    pub fn is_path_locked(&self, path: &MailboxName) -> bool {
        self.is_held(&LockKey::Path(path.clone()))
    }

    fn is_held(&self, key: &LockKey) -> bool {
        self.inner.held.lock().unwrap().contains(key)
    }
}

impl Drop for PathLock {
    fn drop(&mut self) {
        // Don't double-panic if the table got poisoned while unwinding
        let mut held = match self.inner.held.lock() {
            Ok(held) => held,
            Err(poisoned) => poisoned.into_inner(),
        };
        held.remove(&self.key);
        self.inner.released.notify_all();
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    use super::*;
    use crate::support::error::Error;

    #[test]
    fn released_on_error_path() {
        let locker = MailboxPathLocker::new();
        let path = MailboxName::rooted(vec!["users".to_owned()]);

        let result: Result<(), Error> = locker.execute_with_lock(&path, || {
            assert!(locker.is_path_locked(&path));
            Err(Error::NxMailbox(path.to_string()))
        });
        assert!(result.is_err());
        assert!(!locker.is_path_locked(&path));
    }

    #[test]
    fn same_key_is_exclusive() {
        let locker = MailboxPathLocker::new();
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let threads = (0..8)
            .map(|_| {
                let locker = locker.clone();
                let inside = Arc::clone(&inside);
                let max_inside = Arc::clone(&max_inside);
                thread::spawn(move || {
                    for _ in 0..20 {
                        let _lock = locker.lock_key("users.bob");
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        max_inside.fetch_max(now, Ordering::SeqCst);
                        thread::sleep(Duration::from_micros(50));
                        inside.fetch_sub(1, Ordering::SeqCst);
                    }
                })
            })
            .collect::<Vec<_>>();
        for t in threads {
            t.join().unwrap();
        }

        assert_eq!(1, max_inside.load(Ordering::SeqCst));
        assert!(!locker.is_locked("users.bob"));
    }

    #[test]
    fn different_keys_do_not_contend() {
        let locker = MailboxPathLocker::new();
        let _a = locker.lock_key("users.alice");
        // Would deadlock if keys were not independent
        let _b = locker.lock_key("users.bob");
        assert!(locker.is_locked("users.alice"));
        assert!(locker.is_locked("users.bob"));
    }

    #[test]
    fn paths_are_keyed_by_segments() {
        let locker = MailboxPathLocker::new();
        let joined = MailboxName::rooted(["users", "a/b"]);
        let split = MailboxName::rooted(["users", "a", "b"]);
        let relative = MailboxName::relative(["users", "a", "b"]);

        let _joined = locker.lock(&joined);
        // Would deadlock if these shared a key with `joined`
        let _split = locker.lock(&split);
        let _relative = locker.lock(&relative);
        let _named = locker.lock_key(&joined.to_string());

        assert!(locker.is_path_locked(&joined));
        assert!(locker.is_path_locked(&split));
        assert!(locker.is_path_locked(&relative));
        assert!(locker.is_locked(&joined.to_string()));
    }
}

//! Poison recovery for the std locks guarding the index maps.
//!
//! A panicking guard holder poisons its lock. The maps only ever hold
//! pointer splices, so the data stays coherent and the guard is handed
//! out anyway after a warning.

use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::warn;

fn note_poisoned(kind: &'static str, module: &'static str, op: &'static str) {
    warn!(
        target = "vetrina::cache",
        kind,
        module,
        op,
        "Lock was poisoned, continuing with the recovered guard"
    );
}

pub(crate) fn rw_read<'a, T>(
    lock: &'a RwLock<T>,
    module: &'static str,
    op: &'static str,
) -> RwLockReadGuard<'a, T> {
    lock.read().unwrap_or_else(|poisoned| {
        note_poisoned("rwlock.read", module, op);
        poisoned.into_inner()
    })
}

pub(crate) fn rw_write<'a, T>(
    lock: &'a RwLock<T>,
    module: &'static str,
    op: &'static str,
) -> RwLockWriteGuard<'a, T> {
    lock.write().unwrap_or_else(|poisoned| {
        note_poisoned("rwlock.write", module, op);
        poisoned.into_inner()
    })
}

pub(crate) fn mutex_lock<'a, T>(
    lock: &'a Mutex<T>,
    module: &'static str,
    op: &'static str,
) -> MutexGuard<'a, T> {
    lock.lock().unwrap_or_else(|poisoned| {
        note_poisoned("mutex.lock", module, op);
        poisoned.into_inner()
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn poisoned_rwlock_still_hands_out_guards() {
        let lock = Arc::new(RwLock::new(7u32));
        let poisoner = lock.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.write().unwrap();
            panic!("poison the lock");
        })
        .join();
        assert!(lock.is_poisoned());

        assert_eq!(*rw_read(&lock, "cache::lock", "test"), 7);
        *rw_write(&lock, "cache::lock", "test") = 8;
        assert_eq!(*rw_read(&lock, "cache::lock", "test"), 8);
    }

    #[test]
    fn poisoned_mutex_still_hands_out_guards() {
        let lock = Arc::new(Mutex::new(vec![1]));
        let poisoner = lock.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.lock().unwrap();
            panic!("poison the lock");
        })
        .join();
        assert!(lock.is_poisoned());

        mutex_lock(&lock, "cache::lock", "test").push(2);
        assert_eq!(*mutex_lock(&lock, "cache::lock", "test"), vec![1, 2]);
    }
}

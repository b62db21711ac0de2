//! Shared synchronization utilities.
//!
//! - [`WaitGroup`]: a counted completion latch for fan-out tests and
//!   background work.
//! - [`LockTable`]: a keyed advisory lock table used by the centralized and
//!   decentralized transaction lock modes.

use std::collections::HashMap;

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};

use crate::error::{EmberError, EmberResult};
use crate::types::TxnTs;

/// A counted completion latch.
///
/// `add` registers pending work, `done` retires one unit, and `wait` blocks
/// until the count drops to zero.
///
/// # Example
///
/// ```rust
/// use ember_common::sync::WaitGroup;
///
/// let wg = WaitGroup::new(1);
/// wg.done();
/// wg.wait();
/// ```
pub struct WaitGroup {
    count: Mutex<usize>,
    cv: Condvar,
}

impl WaitGroup {
    /// Creates a wait group with `count` outstanding units.
    #[must_use]
    pub fn new(count: usize) -> Self {
        Self {
            count: Mutex::new(count),
            cv: Condvar::new(),
        }
    }

    /// Registers `n` additional units of work.
    pub fn add(&self, n: usize) {
        *self.count.lock() += n;
    }

    /// Retires one unit of work, waking waiters when none remain.
    pub fn done(&self) {
        let mut count = self.count.lock();
        debug_assert!(*count > 0, "done() without matching add()");
        *count -= 1;
        if *count == 0 {
            self.cv.notify_all();
        }
    }

    /// Blocks until every registered unit has completed.
    pub fn wait(&self) {
        let mut count = self.count.lock();
        while *count > 0 {
            self.cv.wait(&mut count);
        }
    }
}

/// A keyed advisory lock table.
///
/// Locks are owned by a transaction timestamp and are re-entrant for the
/// same owner. `lock` blocks while another owner holds the key; `unlock`
/// releases only if the caller is the current holder, so a stale release
/// cannot break a later owner's lock.
pub struct LockTable {
    holders: Mutex<HashMap<Bytes, TxnTs>>,
    released: Condvar,
}

impl LockTable {
    /// Creates an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            holders: Mutex::new(HashMap::new()),
            released: Condvar::new(),
        }
    }

    /// Acquires the lock for `key` on behalf of `owner`, blocking while
    /// another owner holds it.
    pub fn lock(&self, key: Bytes, owner: TxnTs) -> EmberResult<()> {
        let mut holders = self.holders.lock();
        loop {
            match holders.get(&key) {
                None => {
                    holders.insert(key, owner);
                    return Ok(());
                }
                Some(&holder) if holder == owner => return Ok(()),
                Some(_) => self.released.wait(&mut holders),
            }
        }
    }

    /// Releases the lock for `key` if `owner` holds it.
    pub fn unlock(&self, key: &[u8], owner: TxnTs) -> EmberResult<()> {
        let mut holders = self.holders.lock();
        match holders.get(key) {
            Some(&holder) if holder == owner => {
                holders.remove(key);
                self.released.notify_all();
                Ok(())
            }
            Some(_) => Err(EmberError::internal("unlock by non-holder")),
            None => Err(EmberError::internal("unlock of unheld key")),
        }
    }

    /// Number of keys currently held.
    #[must_use]
    pub fn held_count(&self) -> usize {
        self.holders.lock().len()
    }
}

impl Default for LockTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_wait_group() {
        let wg = Arc::new(WaitGroup::new(4));
        for _ in 0..4 {
            let wg = Arc::clone(&wg);
            thread::spawn(move || wg.done());
        }
        wg.wait();
    }

    #[test]
    fn test_lock_reentrant() {
        let table = LockTable::new();
        let owner = TxnTs::new(1);
        table.lock(Bytes::from("k"), owner).unwrap();
        table.lock(Bytes::from("k"), owner).unwrap();
        assert_eq!(table.held_count(), 1);
        table.unlock(b"k", owner).unwrap();
        assert_eq!(table.held_count(), 0);
    }

    #[test]
    fn test_unlock_by_stranger_fails() {
        let table = LockTable::new();
        table.lock(Bytes::from("k"), TxnTs::new(1)).unwrap();
        assert!(table.unlock(b"k", TxnTs::new(2)).is_err());
        table.unlock(b"k", TxnTs::new(1)).unwrap();
    }

    #[test]
    fn test_contended_lock_blocks() {
        let table = Arc::new(LockTable::new());
        table.lock(Bytes::from("k"), TxnTs::new(1)).unwrap();

        let contender = {
            let table = Arc::clone(&table);
            thread::spawn(move || {
                table.lock(Bytes::from("k"), TxnTs::new(2)).unwrap();
                table.unlock(b"k", TxnTs::new(2)).unwrap();
            })
        };

        // Give the contender a moment to block, then release.
        thread::sleep(Duration::from_millis(20));
        table.unlock(b"k", TxnTs::new(1)).unwrap();
        contender.join().unwrap();
        assert_eq!(table.held_count(), 0);
    }
}

//! Resource locks: one FIFO lock per root resource.
//!
//! Every native call touching a dataset's object graph runs under the lock
//! of the root dataset, whether it comes from a synchronous wrapper method
//! on the main context or from a job on a worker. Descendants never get a
//! lock of their own; they resolve to their root's id.
//!
//! Locks are not re-entrant. A thread that asks again for a lock it holds
//! gets [`BindError::LockReentry`] instead of a deadlock.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::marker::PhantomData;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{trace, warn};

use crate::error::{BindError, Result};
use crate::store::ObjectId;

type Pump = Rc<dyn Fn()>;

/// Key of an installed pump, handed back to [`remove_pump`].
pub(crate) type PumpKey = u64;

struct Pumps {
    next: PumpKey,
    installed: Vec<(PumpKey, Pump, Duration)>,
}

thread_local! {
    static HELD: RefCell<HashSet<ObjectId>> = RefCell::new(HashSet::new());
    static PUMPS: RefCell<Pumps> = const {
        RefCell::new(Pumps {
            next: 0,
            installed: Vec::new(),
        })
    };
    static PUMPING: RefCell<bool> = const { RefCell::new(false) };
}

/// Install a routine a blocked lock waiter on this thread runs every
/// `interval` while it waits. Each main context on the thread installs one
/// that delivers its progress events, so a worker holding the lock and
/// waiting on progress backpressure can continue.
pub(crate) fn add_pump(pump: Pump, interval: Duration) -> PumpKey {
    PUMPS.with(|pumps| {
        let mut pumps = pumps.borrow_mut();
        pumps.next += 1;
        let key = pumps.next;
        pumps.installed.push((key, pump, interval));
        key
    })
}

/// Remove the pump installed under `key`; other pumps stay.
pub(crate) fn remove_pump(key: PumpKey) {
    PUMPS.with(|pumps| pumps.borrow_mut().installed.retain(|(k, _, _)| *k != key));
}

/// Pumps installed on this thread and the shortest of their intervals.
fn current_pumps() -> Option<(Vec<Pump>, Duration)> {
    if PUMPING.with(|p| *p.borrow()) {
        return None;
    }
    PUMPS.with(|pumps| {
        let pumps = pumps.borrow();
        let interval = pumps.installed.iter().map(|(_, _, i)| *i).min()?;
        let all = pumps.installed.iter().map(|(_, p, _)| p.clone()).collect();
        Some((all, interval))
    })
}

fn run_pumps(pumps: &[Pump]) {
    PUMPING.with(|p| *p.borrow_mut() = true);
    for pump in pumps {
        if catch_unwind(AssertUnwindSafe(|| pump())).is_err() {
            warn!("panic while delivering events during lock wait");
        }
    }
    PUMPING.with(|p| *p.borrow_mut() = false);
}

struct Tickets {
    next: u64,
    serving: u64,
}

/// FIFO ticket lock.
pub struct ResourceLock {
    tickets: Mutex<Tickets>,
    turn: Condvar,
}

impl Default for ResourceLock {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceLock {
    pub fn new() -> Self {
        Self {
            tickets: Mutex::new(Tickets { next: 0, serving: 0 }),
            turn: Condvar::new(),
        }
    }

    fn lock(&self) {
        let mut tickets = self.tickets.lock();
        let ticket = tickets.next;
        tickets.next += 1;
        let pumps = current_pumps();
        while tickets.serving != ticket {
            match &pumps {
                Some((pumps, interval)) => {
                    self.turn.wait_for(&mut tickets, *interval);
                    if tickets.serving != ticket {
                        MutexGuard::unlocked(&mut tickets, || run_pumps(pumps));
                    }
                }
                None => self.turn.wait(&mut tickets),
            }
        }
    }

    fn unlock(&self) {
        let mut tickets = self.tickets.lock();
        tickets.serving += 1;
        drop(tickets);
        self.turn.notify_all();
    }

    /// Holder plus waiters.
    pub fn queued(&self) -> u64 {
        let tickets = self.tickets.lock();
        tickets.next - tickets.serving
    }
}

/// Held resource locks, released in reverse order on drop.
///
/// Bound to the thread that acquired it.
pub struct ResourceGuard {
    held: Vec<(ObjectId, Arc<ResourceLock>)>,
    _not_send: PhantomData<*const ()>,
}

impl ResourceGuard {
    pub fn ids(&self) -> Vec<ObjectId> {
        self.held.iter().map(|(id, _)| *id).collect()
    }
}

impl Drop for ResourceGuard {
    fn drop(&mut self) {
        while let Some((id, lock)) = self.held.pop() {
            HELD.with(|held| held.borrow_mut().remove(&id));
            lock.unlock();
            trace!(id, "released");
        }
    }
}

/// Lazily created locks keyed by root resource id.
pub struct LockManager {
    locks: Mutex<HashMap<ObjectId, Arc<ResourceLock>>>,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LockManager {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn lock_for(&self, id: ObjectId) -> Arc<ResourceLock> {
        self.locks.lock().entry(id).or_default().clone()
    }

    /// Acquire the locks of `ids` in ascending order.
    ///
    /// Duplicates and the "no resource" id 0 are skipped.
    pub fn acquire(&self, ids: &[ObjectId]) -> Result<ResourceGuard> {
        let mut ids: Vec<ObjectId> = ids.iter().copied().filter(|id| *id != 0).collect();
        ids.sort_unstable();
        ids.dedup();
        if let Some(id) = HELD.with(|held| {
            let held = held.borrow();
            ids.iter().copied().find(|id| held.contains(id))
        }) {
            return Err(BindError::LockReentry(id));
        }
        let mut guard = ResourceGuard {
            held: Vec::with_capacity(ids.len()),
            _not_send: PhantomData,
        };
        for id in ids {
            let lock = self.lock_for(id);
            lock.lock();
            HELD.with(|held| held.borrow_mut().insert(id));
            trace!(id, "acquired");
            guard.held.push((id, lock));
        }
        Ok(guard)
    }

    /// Run `f` holding the lock of `id`.
    pub fn with_lock<T>(&self, id: ObjectId, f: impl FnOnce() -> T) -> Result<T> {
        self.with_locks(&[id], f)
    }

    /// Run `f` holding the locks of every id in `ids`.
    pub fn with_locks<T>(&self, ids: &[ObjectId], f: impl FnOnce() -> T) -> Result<T> {
        let _guard = self.acquire(ids)?;
        Ok(f())
    }

    /// Forget the lock of a disposed root resource. Current holders and
    /// waiters keep their reference and finish normally.
    pub fn remove(&self, id: ObjectId) {
        if self.locks.lock().remove(&id).is_some() {
            trace!(id, "lock removed");
        }
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.locks.lock().contains_key(&id)
    }

    /// Whether the calling thread holds the lock of `id`.
    pub fn held_by_current_thread(id: ObjectId) -> bool {
        HELD.with(|held| held.borrow().contains(&id))
    }
}

static LOCKS: Lazy<LockManager> = Lazy::new(LockManager::new);

/// Process-wide lock manager.
pub fn locks() -> &'static LockManager {
    &LOCKS
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::thread;
    use std::time::Instant;

    fn wait_for_queue(lock: &ResourceLock, n: u64) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while lock.queued() < n {
            assert!(Instant::now() < deadline, "waiter never queued");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn reentry_is_detected() {
        let manager = LockManager::new();
        let guard = manager.acquire(&[7]).unwrap();
        assert!(LockManager::held_by_current_thread(7));
        assert_eq!(
            manager.acquire(&[3, 7]).err(),
            Some(BindError::LockReentry(7))
        );
        assert!(manager.with_lock(8, || ()).is_ok());
        drop(guard);
        assert!(!LockManager::held_by_current_thread(7));
        assert!(manager.with_lock(7, || ()).is_ok());
    }

    #[test]
    fn ids_are_sorted_and_deduplicated() {
        let manager = LockManager::new();
        let guard = manager.acquire(&[9, 0, 4, 9]).unwrap();
        assert_eq!(guard.ids(), vec![4, 9]);
        assert!(!manager.contains(0));
    }

    #[test]
    fn release_on_panic() {
        let manager = Arc::new(LockManager::new());
        let m = manager.clone();
        let result = thread::spawn(move || {
            m.with_lock(11, || panic!("boom")).ok();
        })
        .join();
        assert!(result.is_err());
        assert!(manager.with_lock(11, || 1).is_ok());
    }

    #[test]
    fn waiters_are_served_in_fifo_order() {
        let manager = Arc::new(LockManager::new());
        let order = Arc::new(Mutex::new(Vec::new()));
        let guard = manager.acquire(&[21]).unwrap();
        let lock = manager.lock_for(21);

        let mut handles = Vec::new();
        for n in 0..4u64 {
            let manager = manager.clone();
            let order = order.clone();
            handles.push(thread::spawn(move || {
                manager.with_lock(21, || order.lock().push(n)).unwrap();
            }));
            wait_for_queue(&lock, n + 2);
        }
        drop(guard);
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*order.lock(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn waiting_thread_runs_its_pump() {
        let manager = Arc::new(LockManager::new());
        let (locked_tx, locked_rx) = std::sync::mpsc::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let m = manager.clone();
        let holder = thread::spawn(move || {
            let _guard = m.acquire(&[31]).unwrap();
            locked_tx.send(()).unwrap();
            release_rx.recv().ok();
        });
        locked_rx.recv().unwrap();

        let calls = Rc::new(Cell::new(0));
        let counter = calls.clone();
        let release = RefCell::new(Some(release_tx));
        let key = add_pump(
            Rc::new(move || {
                counter.set(counter.get() + 1);
                if counter.get() == 3 {
                    release.borrow_mut().take();
                }
            }),
            Duration::from_millis(1),
        );
        manager.with_lock(31, || ()).unwrap();
        remove_pump(key);
        holder.join().unwrap();
        assert!(calls.get() >= 3);
    }

    #[test]
    fn every_installed_pump_runs_until_removed() {
        let manager = Arc::new(LockManager::new());
        let (locked_tx, locked_rx) = std::sync::mpsc::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let m = manager.clone();
        let holder = thread::spawn(move || {
            let _guard = m.acquire(&[33]).unwrap();
            locked_tx.send(()).unwrap();
            release_rx.recv().ok();
        });
        locked_rx.recv().unwrap();

        let first = Rc::new(Cell::new(0));
        let f = first.clone();
        let kept = add_pump(Rc::new(move || f.set(f.get() + 1)), Duration::from_millis(1));
        let gone = add_pump(Rc::new(|| panic!("removed pump ran")), Duration::from_millis(1));
        let second = Rc::new(Cell::new(0));
        let s = second.clone();
        let release = RefCell::new(Some(release_tx));
        let last = add_pump(
            Rc::new(move || {
                s.set(s.get() + 1);
                if s.get() == 3 {
                    release.borrow_mut().take();
                }
            }),
            Duration::from_millis(1),
        );
        remove_pump(gone);

        manager.with_lock(33, || ()).unwrap();
        remove_pump(kept);
        remove_pump(last);
        holder.join().unwrap();
        assert!(first.get() >= 3);
        assert!(second.get() >= 3);
        assert!(current_pumps().is_none());
    }

    #[test]
    fn removed_lock_is_recreated() {
        let manager = LockManager::new();
        manager.with_lock(41, || ()).unwrap();
        assert!(manager.contains(41));
        manager.remove(41);
        assert!(!manager.contains(41));
        manager.with_lock(41, || ()).unwrap();
    }
}

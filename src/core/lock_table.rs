//! Purpose: Fan a library's `(mode, resource id)` locking callback out to independent slots.
//! Exports: `LockTable`, `LockProvider`, `SlotGuard`, `SlotStats`, `TeardownReport`, mode bits.
//! Role: Pure mutual exclusion; owns no business data.
//! Invariants: Slots are independent; no ordering exists between them.
//! Invariants: A slot has at most one holder; only the holder may release it.
//! Invariants: After `teardown`, every acquire fails with `ErrorKind::State`.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use crate::core::caller::CallerId;
use crate::core::error::{Error, ErrorKind};

pub const LOCK_MODE_LOCK: i32 = 1;
pub const LOCK_MODE_UNLOCK: i32 = 2;
pub const LOCK_MODE_READ: i32 = 4;
pub const LOCK_MODE_WRITE: i32 = 8;

/// Capability handed to code that needs per-resource exclusion.
pub trait LockProvider {
    fn slot_count(&self) -> usize;
    fn acquire(&self, resource: usize, caller: CallerId) -> Result<(), Error>;
    fn release(&self, resource: usize, caller: CallerId) -> Result<(), Error>;

    /// Adapter for the C-style callback: lock when `mode` carries `LOCK_MODE_LOCK`,
    /// unlock otherwise. Read and write bits are treated alike.
    fn callback(&self, mode: i32, resource: i32, caller: CallerId) -> Result<(), Error> {
        let resource = usize::try_from(resource).map_err(|_| {
            Error::new(ErrorKind::OutOfRange)
                .with_message(format!("negative resource id {resource}"))
                .with_caller(caller)
        })?;
        if mode & LOCK_MODE_LOCK != 0 {
            self.acquire(resource, caller)
        } else {
            self.release(resource, caller)
        }
    }
}

#[derive(Debug, Default)]
struct SlotState {
    holder: Option<CallerId>,
    waiters: usize,
    acquisitions: u64,
    contended: u64,
}

#[derive(Debug, Default)]
struct Slot {
    state: Mutex<SlotState>,
    released: Condvar,
}

impl Slot {
    fn guard(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SlotStats {
    pub acquisitions: u64,
    pub contended: u64,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TeardownReport {
    pub slots: usize,
    /// Slots still held when the table closed.
    pub held: Vec<usize>,
    /// Callers that were blocked in `acquire` and got woken with an error.
    pub waiting: usize,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.held.is_empty() && self.waiting == 0
    }
}

#[derive(Debug)]
pub struct LockTable {
    slots: Box<[Slot]>,
    closed: AtomicBool,
}

impl LockTable {
    pub fn new(slot_count: usize) -> Result<Self, Error> {
        if slot_count == 0 {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("lock table needs at least one slot"));
        }
        let mut slots = Vec::new();
        slots.try_reserve_exact(slot_count).map_err(|err| {
            Error::new(ErrorKind::Allocation)
                .with_message(format!("lock table with {slot_count} slots"))
                .with_source(err)
        })?;
        slots.extend((0..slot_count).map(|_| Slot::default()));
        Ok(Self {
            slots: slots.into_boxed_slice(),
            closed: AtomicBool::new(false),
        })
    }

    fn slot(&self, resource: usize, caller: CallerId) -> Result<&Slot, Error> {
        self.slots.get(resource).ok_or_else(|| {
            Error::new(ErrorKind::OutOfRange)
                .with_message(format!("resource id outside 0..{}", self.slots.len()))
                .with_caller(caller)
                .with_resource(resource)
        })
    }

    fn closed_error(&self, resource: usize, caller: CallerId) -> Error {
        Error::new(ErrorKind::State)
            .with_message("lock table torn down")
            .with_caller(caller)
            .with_resource(resource)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Non-blocking acquire; `Ok(false)` when another caller holds the slot.
    pub fn try_acquire(&self, resource: usize, caller: CallerId) -> Result<bool, Error> {
        let slot = self.slot(resource, caller)?;
        if self.is_closed() {
            return Err(self.closed_error(resource, caller));
        }
        let mut state = slot.guard();
        match state.holder {
            Some(holder) if holder == caller => Err(reentrant(resource, caller)),
            Some(_) => {
                state.contended += 1;
                Ok(false)
            }
            None => {
                state.holder = Some(caller);
                state.acquisitions += 1;
                Ok(true)
            }
        }
    }

    pub fn lock(&self, resource: usize, caller: CallerId) -> Result<SlotGuard<'_>, Error> {
        self.acquire(resource, caller)?;
        Ok(SlotGuard {
            table: self,
            resource,
            caller,
        })
    }

    pub fn holder(&self, resource: usize) -> Option<CallerId> {
        self.slots.get(resource).and_then(|slot| slot.guard().holder)
    }

    pub fn stats(&self, resource: usize) -> Option<SlotStats> {
        self.slots.get(resource).map(|slot| {
            let state = slot.guard();
            SlotStats {
                acquisitions: state.acquisitions,
                contended: state.contended,
            }
        })
    }

    /// Frees every slot `caller` still holds. Used when a caller is swept at unload.
    pub fn release_all_held_by(&self, caller: CallerId) -> usize {
        let mut released = 0;
        for (resource, slot) in self.slots.iter().enumerate() {
            let mut state = slot.guard();
            if state.holder == Some(caller) {
                state.holder = None;
                slot.released.notify_one();
                released += 1;
                tracing::warn!(caller = caller.as_raw(), resource, "force-released lock slot");
            }
        }
        released
    }

    pub fn teardown(&self) -> TeardownReport {
        self.closed.store(true, Ordering::SeqCst);
        let mut report = TeardownReport {
            slots: self.slots.len(),
            ..TeardownReport::default()
        };
        for (resource, slot) in self.slots.iter().enumerate() {
            let state = slot.guard();
            if state.holder.is_some() {
                report.held.push(resource);
            }
            report.waiting += state.waiters;
            slot.released.notify_all();
        }
        if report.waiting > 0 {
            tracing::error!(
                waiting = report.waiting,
                "lock table torn down with blocked callers"
            );
        }
        if !report.held.is_empty() {
            tracing::warn!(held = ?report.held, "lock table torn down with held slots");
        }
        report
    }
}

impl LockProvider for LockTable {
    fn slot_count(&self) -> usize {
        self.slots.len()
    }

    fn acquire(&self, resource: usize, caller: CallerId) -> Result<(), Error> {
        let slot = self.slot(resource, caller)?;
        let mut state = slot.guard();
        if state.holder == Some(caller) {
            return Err(reentrant(resource, caller));
        }
        if state.holder.is_some() {
            state.contended += 1;
        }
        while state.holder.is_some() {
            if self.is_closed() {
                return Err(self.closed_error(resource, caller));
            }
            state.waiters += 1;
            state = slot
                .released
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
            state.waiters -= 1;
        }
        if self.is_closed() {
            return Err(self.closed_error(resource, caller));
        }
        state.holder = Some(caller);
        state.acquisitions += 1;
        Ok(())
    }

    fn release(&self, resource: usize, caller: CallerId) -> Result<(), Error> {
        let slot = self.slot(resource, caller)?;
        let mut state = slot.guard();
        match state.holder {
            Some(holder) if holder == caller => {
                state.holder = None;
                slot.released.notify_one();
                Ok(())
            }
            Some(holder) => Err(Error::new(ErrorKind::NotHeld)
                .with_message(format!("slot held by caller {holder}"))
                .with_caller(caller)
                .with_resource(resource)),
            None => Err(Error::new(ErrorKind::NotHeld)
                .with_message("slot is not locked")
                .with_caller(caller)
                .with_resource(resource)),
        }
    }
}

fn reentrant(resource: usize, caller: CallerId) -> Error {
    Error::new(ErrorKind::Reentrant)
        .with_message("caller already holds this slot")
        .with_caller(caller)
        .with_resource(resource)
}

/// Holds a slot until dropped.
#[derive(Debug)]
pub struct SlotGuard<'a> {
    table: &'a LockTable,
    resource: usize,
    caller: CallerId,
}

impl SlotGuard<'_> {
    pub fn resource(&self) -> usize {
        self.resource
    }
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.table.release(self.resource, self.caller) {
            tracing::error!(error = %err, "slot guard release failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Arc, Barrier, mpsc};
    use std::thread;
    use std::time::Duration;

    fn id(raw: u64) -> CallerId {
        CallerId::from_raw(raw)
    }

    #[test]
    fn zero_slots_is_usage_error() {
        let err = LockTable::new(0).expect_err("zero");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn oversized_table_is_allocation_failure() {
        let err = LockTable::new(usize::MAX).expect_err("too large");
        assert_eq!(err.kind(), ErrorKind::Allocation);
    }

    #[test]
    fn callback_dispatches_on_mode() {
        let table = LockTable::new(4).expect("table");
        table
            .callback(LOCK_MODE_LOCK | LOCK_MODE_WRITE, 2, id(1))
            .expect("lock");
        assert_eq!(table.holder(2), Some(id(1)));
        table
            .callback(LOCK_MODE_UNLOCK | LOCK_MODE_WRITE, 2, id(1))
            .expect("unlock");
        assert_eq!(table.holder(2), None);
        table
            .callback(LOCK_MODE_LOCK | LOCK_MODE_READ, 2, id(2))
            .expect("relock by other caller");
        assert_eq!(table.holder(2), Some(id(2)));
    }

    #[test]
    fn out_of_range_ids_are_rejected() {
        let table = LockTable::new(4).expect("table");
        for resource in [4, -1, i32::MAX] {
            let err = table
                .callback(LOCK_MODE_LOCK, resource, id(1))
                .expect_err("out of range");
            assert_eq!(err.kind(), ErrorKind::OutOfRange);
        }
        let err = table.release(4, id(1)).expect_err("out of range");
        assert_eq!(err.kind(), ErrorKind::OutOfRange);
    }

    #[test]
    fn release_requires_holder() {
        let table = LockTable::new(2).expect("table");
        let err = table.release(0, id(1)).expect_err("not locked");
        assert_eq!(err.kind(), ErrorKind::NotHeld);
        table.acquire(0, id(1)).expect("acquire");
        let err = table.release(0, id(2)).expect_err("foreign release");
        assert_eq!(err.kind(), ErrorKind::NotHeld);
        assert_eq!(table.holder(0), Some(id(1)));
    }

    #[test]
    fn reacquire_by_holder_is_reentrant_error() {
        let table = LockTable::new(2).expect("table");
        table.acquire(1, id(1)).expect("acquire");
        let err = table.acquire(1, id(1)).expect_err("reentrant");
        assert_eq!(err.kind(), ErrorKind::Reentrant);
        let err = table.try_acquire(1, id(1)).expect_err("reentrant");
        assert_eq!(err.kind(), ErrorKind::Reentrant);
    }

    #[test]
    fn slots_are_independent() {
        let table = LockTable::new(3).expect("table");
        table.acquire(0, id(1)).expect("slot 0");
        assert!(table.try_acquire(1, id(2)).expect("slot 1"));
        assert!(!table.try_acquire(0, id(2)).expect("slot 0 busy"));
    }

    #[test]
    fn failed_try_acquire_counts_as_contention() {
        let table = LockTable::new(1).expect("table");
        assert!(table.try_acquire(0, id(1)).expect("free slot"));
        assert!(!table.try_acquire(0, id(2)).expect("busy"));
        assert!(!table.try_acquire(0, id(3)).expect("busy"));
        let stats = table.stats(0).expect("stats");
        assert_eq!(stats.acquisitions, 1);
        assert_eq!(stats.contended, 2);
    }

    #[test]
    fn guard_releases_on_drop() {
        let table = LockTable::new(1).expect("table");
        {
            let guard = table.lock(0, id(1)).expect("lock");
            assert_eq!(guard.resource(), 0);
            assert_eq!(table.holder(0), Some(id(1)));
        }
        assert_eq!(table.holder(0), None);
    }

    #[test]
    fn release_hands_slot_to_blocked_caller() {
        let table = Arc::new(LockTable::new(1).expect("table"));
        table.acquire(0, id(1)).expect("acquire");

        let (tx, rx) = mpsc::channel();
        let waiter = {
            let table = Arc::clone(&table);
            thread::spawn(move || {
                table.acquire(0, id(2)).expect("acquire after release");
                tx.send(()).expect("send");
                table.release(0, id(2)).expect("release");
            })
        };

        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        table.release(0, id(1)).expect("release");
        rx.recv_timeout(Duration::from_secs(5)).expect("waiter acquired");
        waiter.join().expect("join");
        assert_eq!(table.holder(0), None);
        let stats = table.stats(0).expect("stats");
        assert_eq!(stats.acquisitions, 2);
        assert_eq!(stats.contended, 1);
    }

    #[test]
    fn contended_slot_is_mutually_exclusive() {
        let table = Arc::new(LockTable::new(2).expect("table"));
        let inside = Arc::new(AtomicUsize::new(0));
        let threads = 8;
        let rounds = 200;
        let barrier = Arc::new(Barrier::new(threads));

        let handles: Vec<_> = (0..threads)
            .map(|i| {
                let table = Arc::clone(&table);
                let inside = Arc::clone(&inside);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let caller = id(100 + i as u64);
                    barrier.wait();
                    for _ in 0..rounds {
                        table.callback(LOCK_MODE_LOCK, 1, caller).expect("lock");
                        assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                        thread::yield_now();
                        assert_eq!(inside.fetch_sub(1, Ordering::SeqCst), 1);
                        table.callback(LOCK_MODE_UNLOCK, 1, caller).expect("unlock");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("join");
        }
        let stats = table.stats(1).expect("stats");
        assert_eq!(stats.acquisitions, (threads * rounds) as u64);
    }

    #[test]
    fn release_all_held_by_frees_only_that_caller() {
        let table = LockTable::new(4).expect("table");
        table.acquire(0, id(1)).expect("acquire");
        table.acquire(2, id(1)).expect("acquire");
        table.acquire(3, id(2)).expect("acquire");
        assert_eq!(table.release_all_held_by(id(1)), 2);
        assert_eq!(table.holder(0), None);
        assert_eq!(table.holder(2), None);
        assert_eq!(table.holder(3), Some(id(2)));
    }

    #[test]
    fn teardown_wakes_waiters_with_state_error() {
        let table = Arc::new(LockTable::new(1).expect("table"));
        table.acquire(0, id(1)).expect("acquire");

        let waiter = {
            let table = Arc::clone(&table);
            thread::spawn(move || table.acquire(0, id(2)))
        };
        while table.slots[0].guard().waiters == 0 {
            thread::sleep(Duration::from_millis(1));
        }

        let report = table.teardown();
        assert_eq!(report.slots, 1);
        assert_eq!(report.held, vec![0]);
        assert_eq!(report.waiting, 1);
        assert!(!report.is_clean());

        let err = waiter.join().expect("join").expect_err("closed");
        assert_eq!(err.kind(), ErrorKind::State);
        let err = table.acquire(0, id(3)).expect_err("closed");
        assert_eq!(err.kind(), ErrorKind::State);
    }

    #[test]
    fn clean_teardown_reports_nothing() {
        let table = LockTable::new(3).expect("table");
        table.acquire(1, id(1)).expect("acquire");
        table.release(1, id(1)).expect("release");
        assert!(table.teardown().is_clean());
        assert!(table.is_closed());
    }
}

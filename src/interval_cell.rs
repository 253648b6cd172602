//! One [left, right] cell of a route's interval grid.
//!
//! Free seats sit behind a reader-writer lock paired with a version stamp.
//! The stamp is odd while a writer is inside and even otherwise; readers that
//! only need the number of free seats read a mirrored length and validate the
//! stamp afterwards instead of locking. Upgrading such an optimistic read to a
//! write fails whenever the stamp moved in between.

use crate::records::{SaleRecord, SeatRef};
use ahash::AHashSet;
use dashmap::DashMap;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, TryLockError};

const SOLD_SHARDS: usize = 4;

/// Version observed by an optimistic read.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Stamp(u64);

pub struct IntervalCell {
    stamp: AtomicU64,
    free_len: AtomicUsize,
    free: RwLock<AHashSet<SeatRef>>,
    sold: DashMap<SaleRecord, (), ahash::RandomState>,
}

impl IntervalCell {
    pub fn new() -> Self {
        Self {
            stamp: AtomicU64::new(0),
            free_len: AtomicUsize::new(0),
            free: RwLock::new(AHashSet::new()),
            sold: DashMap::with_hasher_and_shard_amount(ahash::RandomState::new(), SOLD_SHARDS),
        }
    }

    /// Starts an optimistic read. `None` while a writer holds the cell.
    pub fn try_optimistic_read(&self) -> Option<Stamp> {
        let stamp = self.stamp.load(Ordering::Acquire);
        (stamp & 1 == 0).then_some(Stamp(stamp))
    }

    /// True when no write started since `stamp` was taken.
    pub fn validate(&self, stamp: Stamp) -> bool {
        std::sync::atomic::fence(Ordering::Acquire);
        self.stamp.load(Ordering::Relaxed) == stamp.0
    }

    /// Unsynchronized free-seat count; only meaningful once validated.
    pub fn free_len_hint(&self) -> usize {
        self.free_len.load(Ordering::Acquire)
    }

    /// Free-seat count, optimistic first and under the read lock when a
    /// writer got in the way.
    pub fn free_len(&self) -> usize {
        if let Some(stamp) = self.try_optimistic_read() {
            let len = self.free_len_hint();
            if self.validate(stamp) {
                return len;
            }
        }
        self.read().len()
    }

    /// Turns an optimistic read into exclusive access without waiting.
    ///
    /// Fails if the lock is taken or the cell changed since `stamp`.
    pub fn try_upgrade(&self, stamp: Stamp) -> Option<CellWriteGuard<'_>> {
        let seats = match self.free.try_write() {
            Ok(seats) => seats,
            Err(TryLockError::WouldBlock) => return None,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        };

        if self.stamp.load(Ordering::Acquire) != stamp.0 {
            return None;
        }
        Some(CellWriteGuard::enter(self, seats))
    }

    pub fn write(&self) -> CellWriteGuard<'_> {
        let seats = self.free.write().unwrap_or_else(PoisonError::into_inner);
        CellWriteGuard::enter(self, seats)
    }

    pub fn read(&self) -> RwLockReadGuard<'_, AHashSet<SeatRef>> {
        self.free.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record_sale(&self, sale: SaleRecord) {
        self.sold.insert(sale, ());
    }

    pub fn remove_sale(&self, sale: &SaleRecord) -> bool {
        self.sold.remove(sale).is_some()
    }

    #[cfg(test)]
    pub fn sold_len(&self) -> usize {
        self.sold.len()
    }

    pub fn for_each_sale(&self, mut f: impl FnMut(&SaleRecord)) {
        for entry in self.sold.iter() {
            f(entry.key());
        }
    }
}

impl Default for IntervalCell {
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive access to a cell's free seats.
///
/// Entering makes the stamp odd; dropping publishes the new length and makes
/// it even again, before the lock itself is released.
pub struct CellWriteGuard<'a> {
    cell: &'a IntervalCell,
    seats: RwLockWriteGuard<'a, AHashSet<SeatRef>>,
}

impl<'a> CellWriteGuard<'a> {
    fn enter(cell: &'a IntervalCell, seats: RwLockWriteGuard<'a, AHashSet<SeatRef>>) -> Self {
        cell.stamp.fetch_add(1, Ordering::AcqRel);
        Self { cell, seats }
    }

    /// Takes any free seat out of the cell.
    pub fn pop_any(&mut self) -> Option<SeatRef> {
        let seat = self.seats.iter().next().copied()?;
        self.seats.remove(&seat);
        Some(seat)
    }
}

impl Deref for CellWriteGuard<'_> {
    type Target = AHashSet<SeatRef>;

    fn deref(&self) -> &Self::Target {
        &self.seats
    }
}

impl DerefMut for CellWriteGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.seats
    }
}

impl Drop for CellWriteGuard<'_> {
    fn drop(&mut self) {
        self.cell.free_len.store(self.seats.len(), Ordering::Release);
        self.cell.stamp.fetch_add(1, Ordering::Release);
    }
}

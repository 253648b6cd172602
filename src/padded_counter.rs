// ===========================================================================
// Per-worker sale id generation
// ===========================================================================
use crossbeam_utils::CachePadded;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Hard cap on worker threads that may hold an index at the same time.
pub const MAX_WORKERS: usize = 512;

static NEXT_WORKER_INDEX: AtomicUsize = AtomicUsize::new(0);
static RETIRED_WORKER_INDICES: Mutex<Vec<usize>> = Mutex::new(Vec::new());

struct WorkerSlot {
    index: usize,
}

impl WorkerSlot {
    fn claim() -> Self {
        let retired = RETIRED_WORKER_INDICES
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();

        let index = retired.unwrap_or_else(|| NEXT_WORKER_INDEX.fetch_add(1, Ordering::Relaxed));
        Self { index }
    }
}

impl Drop for WorkerSlot {
    fn drop(&mut self) {
        RETIRED_WORKER_INDICES
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(self.index);
    }
}

thread_local! {
    static WORKER_SLOT: WorkerSlot = WorkerSlot::claim();
}

/// Stable index of the calling thread, claimed on first use and handed back
/// when the thread exits. At most one live thread owns a given index.
pub fn current_worker_index() -> usize {
    WORKER_SLOT.with(|slot| slot.index)
}

/// Pool of cache-line padded counters, one per worker index.
///
/// A cell is only ever touched by the thread currently owning its index, so
/// the increment is a plain load followed by a store.
pub struct SaleIdGenerator {
    cells: Box<[CachePadded<AtomicU64>]>,
}

impl SaleIdGenerator {
    pub fn new() -> Self {
        let cells = (0..MAX_WORKERS)
            .map(|_| CachePadded::new(AtomicU64::new(0)))
            .collect();

        Self { cells }
    }

    /// `local_counter * MAX_WORKERS + worker_index`
    ///
    /// # Panics
    ///
    /// When more than [`MAX_WORKERS`] threads are alive and calling in.
    pub fn next_id(&self) -> u64 {
        self.next_id_for(current_worker_index())
    }

    pub(crate) fn next_id_for(&self, worker: usize) -> u64 {
        assert!(
            worker < MAX_WORKERS,
            "worker index {} exceeds the limit of {} concurrent workers",
            worker,
            MAX_WORKERS
        );

        let cell = &self.cells[worker];
        let local = cell.load(Ordering::Relaxed);
        cell.store(local + 1, Ordering::Relaxed);

        local * MAX_WORKERS as u64 + worker as u64
    }
}

impl Default for SaleIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

use std::fmt;
use std::sync::atomic::{AtomicI32, Ordering};

use crossbeam_utils::CachePadded;
use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, trace};

use crate::table::Segmented;
use crate::{Error, MAX_READERS};

/// The index-arbitration core: decides which cell the writer may scribble on
/// and which cell each reader may look at, using nothing but atomic integers
/// on the fast path.
///
/// A `Manager` knows nothing about the data being exchanged. It hands out
/// indices into some external storage of `max_readers + 2` cells and
/// guarantees that the cell behind a [`WriteIndex`](crate::WriteIndex) is
/// touched by no one else, while the cell behind a latched
/// [`ReadIndex`](crate::ReadIndex) is touched by readers only. Use
/// [`Container`](crate::Container) instead if you want the storage managed
/// for you.
///
/// Every cell has an atomic reader count with three regimes: `-1` means the
/// cell is the writer's private draft, `0` means it holds a published (or
/// never-published) value with no readers, and `k > 0` means `k` readers are
/// currently latched onto it. A separate atomic, `latest`, names the most
/// recently published cell, or `-1` if nothing has been published yet.
pub struct Manager {
    n_writers: CachePadded<AtomicI32>,
    n_readers: CachePadded<AtomicI32>,

    // Owned by whichever thread holds the writer gate; everyone else only
    // reads it through a WriteIndex. Accessed relaxed throughout.
    writer_index: CachePadded<AtomicI32>,

    latest: CachePadded<AtomicI32>,

    // Guards growth of readers_of. Never touched on a fast path.
    size_lock: Mutex<()>,

    // readers_of[i] == -1 means cell i is being written to. In other words,
    // readers_of[writer_index] == -1, but readers never look at writer_index.
    readers_of: Segmented<CachePadded<AtomicI32>>,
}

impl Manager {
    /// Create a manager arbitrating `max_readers + 2` cells.
    ///
    /// Fails with [`Error::MaxReadersOutOfRange`] unless
    /// `1 <= max_readers <= `[`MAX_READERS`].
    pub fn new(max_readers: usize) -> Result<Self, Error> {
        if max_readers < 1 || max_readers > MAX_READERS {
            return Err(Error::MaxReadersOutOfRange {
                requested: max_readers,
            });
        }

        let mut readers_of = Segmented::new();
        for _ in 0..max_readers + 2 {
            readers_of.push_mut(CachePadded::new(AtomicI32::new(0)));
        }

        let manager = Manager {
            n_writers: CachePadded::new(AtomicI32::new(0)),
            n_readers: CachePadded::new(AtomicI32::new(0)),
            writer_index: CachePadded::new(AtomicI32::new(0)),
            latest: CachePadded::new(AtomicI32::new(-1)),
            size_lock: Mutex::new(()),
            readers_of,
        };

        let fresh = manager.reset();
        debug_assert!(fresh, "a manager with no handles must reset cleanly");

        Ok(manager)
    }

    /// How many readers may be checked out at once.
    pub fn max_readers(&self) -> usize {
        self.size() - 2
    }

    fn size(&self) -> usize {
        self.readers_of.len()
    }

    /// Return to the state where nothing has been published.
    ///
    /// Requires that no read or write handle exists; returns `false` (and
    /// changes nothing) if any do.
    pub fn reset(&self) -> bool {
        let lock = self.lockout();
        if !lock.is_valid() {
            trace!("reset refused: read or write handles outstanding");
            return false;
        }

        self.writer_index.store(0, Ordering::Relaxed);
        self.latest.store(-1, Ordering::Relaxed);

        let size = self.size();
        for i in 1..size {
            self.readers_of.get(i).store(0, Ordering::Relaxed);
        }
        self.readers_of.get(0).store(-1, Ordering::Release);

        debug!("reset to the no-publication state");
        true
    }

    /// Grow the cell table until it can serve `new_max` simultaneous
    /// readers. Does nothing if it already can. Values above
    /// [`MAX_READERS`] are clamped.
    ///
    /// Growth never blocks the writer or existing readers; the fresh cells
    /// sit idle until the publish scan discovers one.
    pub fn ensure_space_for_readers(&self, new_max: usize) {
        let new_max = new_max.min(MAX_READERS);
        let _guard = self.size_lock.lock();

        let current = self.max_readers();
        if current >= new_max {
            return;
        }

        debug!(from = current, to = new_max, "growing cell table");
        for _ in 0..new_max - current {
            // SAFETY: the resize lane is held for the whole loop; every push
            // anywhere in the crate happens under this lock.
            unsafe {
                self.readers_of.push(CachePadded::new(AtomicI32::new(0)));
            }
        }
    }

    /// Seize the writer gate and every reader slot at once, excluding all
    /// other participants (and table growth) until the lockout is dropped.
    ///
    /// Check [`Lockout::is_valid`] before relying on the exclusion.
    pub fn lockout(&self) -> Lockout<'_> {
        let all_readers = self.checkout_all_readers();
        let has_writer = self.checkout_writer();
        Lockout {
            manager: self,
            all_readers,
            has_writer,
        }
    }

    /// Check out the writer role, if no other write handle exists.
    pub fn write_index(&self) -> Option<crate::WriteIndex<'_>> {
        crate::WriteIndex::new(self)
    }

    /// Check out a reader role, if fewer than `max_readers` handles exist.
    pub fn read_index(&self) -> Option<crate::ReadIndex<'_>> {
        crate::ReadIndex::new(self)
    }

    pub(crate) fn checkout_writer(&self) -> bool {
        self.n_writers
            .compare_exchange(0, 1, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    pub(crate) fn return_writer(&self) {
        let prev = self.n_writers.swap(0, Ordering::Release);
        debug_assert_eq!(prev, 1, "writer gate released without being held");
    }

    pub(crate) fn checkout_reader(&self) -> bool {
        let mut current = 0;
        loop {
            if current >= self.max_readers() as i32 {
                return false;
            }
            match self.n_readers.compare_exchange_weak(
                current,
                current + 1,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }

    pub(crate) fn return_reader(&self) {
        let prev = self.n_readers.fetch_sub(1, Ordering::Release);
        debug_assert!(
            prev > 0 && prev <= self.max_readers() as i32,
            "reader slot released without being held"
        );
    }

    // On success the resize mutex stays locked, so max_readers cannot change
    // while all reader slots are held.
    fn checkout_all_readers(&self) -> Option<MutexGuard<'_, ()>> {
        let guard = self.size_lock.lock();
        let max_readers = self.max_readers() as i32;
        if self
            .n_readers
            .compare_exchange(0, max_readers, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            Some(guard)
        } else {
            None
        }
    }

    /// Publish the draft cell and claim a fresh one. Only ever called
    /// through a [`WriteIndex`](crate::WriteIndex), i.e. on the writer
    /// thread, and is not reentrant.
    pub(crate) fn push_write(&self) {
        let writer_index = self.writer_index.load(Ordering::Relaxed);
        // writer_index != -1 is an invariant everywhere but inside this call
        debug_assert!(writer_index != -1);

        self.readers_of
            .get(writer_index as usize)
            .store(0, Ordering::Relaxed);

        // see get_latest() for why this store is seq_cst
        self.latest.store(writer_index, Ordering::SeqCst);

        // At this point every entry of readers_of is >= 0 and their sum is at
        // most max_readers. The table has max_readers + 2 entries, so at
        // least 2 of them are 0. One of those may be the cell just published
        // (which the scan skips), leaving at least one claimable cell, so the
        // scan below cannot fall through.
        let size = self.size();
        let mut new_writer_index = -1;
        for i in 0..size {
            if i as i32 == writer_index {
                // don't overwrite what we just published
                continue;
            }
            // see get_latest() for why this CAS is seq_cst
            if self
                .readers_of
                .get(i)
                .compare_exchange(0, -1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                new_writer_index = i as i32;
                break;
            }
        }

        debug_assert!(new_writer_index != -1, "no free cell after a publish");
        self.writer_index.store(new_writer_index, Ordering::Relaxed);
    }

    /// Latch onto the current latest cell. Returns the latched index, or -1
    /// if nothing has been published yet.
    pub(crate) fn get_latest(&self) -> i32 {
        // A reader must never "occupy two cells" as far as the publish scan
        // is concerned, by decrementing one readers_of entry and incrementing
        // another that is no longer the actual latest while the writer is
        // searching for its next draft. To rule that out, this load, the
        // decrement in finish_read, and the writer's store of `latest` and
        // scan CASes all take part in the single seq_cst order.
        //
        // If that order places the store to `latest` after the decrement from
        // a preceding finish_read, this load may miss the new value, but the
        // writer is then guaranteed to observe the decrement by the time its
        // scan begins, so the cell we re-increment is not a scan candidate.
        // If instead the store is ordered before the decrement, this load is
        // guaranteed to see the updated `latest` and we increment the cell
        // the writer just published, which the scan skips.
        let mut index = self.latest.load(Ordering::SeqCst);
        if index == -1 {
            return -1;
        }

        let mut observed = 0;
        loop {
            match self.readers_of.get(index as usize).compare_exchange_weak(
                observed,
                observed + 1,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return index,
                Err(current) => {
                    if current == -1 {
                        // this cell just became the writer's draft; a newer
                        // latest must have been designated by now
                        index = self.latest.load(Ordering::Relaxed);
                        debug_assert!(index != -1, "latest regressed to none");
                        observed = 0;
                    } else {
                        observed = current;
                    }
                }
            }
        }
    }

    /// Drop the latch on cell `index`.
    pub(crate) fn finish_read(&self, index: i32) {
        debug_assert!(index != -1);
        // seq_cst for the reason laid out in get_latest()
        let prev = self
            .readers_of
            .get(index as usize)
            .fetch_sub(1, Ordering::SeqCst);
        debug_assert!(
            prev > 0 && prev <= self.max_readers() as i32,
            "latch released on a cell with no readers"
        );
    }

    pub(crate) fn latest_relaxed(&self) -> i32 {
        self.latest.load(Ordering::Relaxed)
    }

    pub(crate) fn writer_index(&self) -> i32 {
        self.writer_index.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for Manager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Manager")
            .field("max_readers", &self.max_readers())
            .field("n_writers", &self.n_writers.load(Ordering::Relaxed))
            .field("n_readers", &self.n_readers.load(Ordering::Relaxed))
            .field("latest", &self.latest.load(Ordering::Relaxed))
            .finish()
    }
}

/// An all-or-nothing claim of the writer gate plus every reader slot plus
/// the resize lane.
///
/// While a valid lockout is held, no read or write handle can be created and
/// the cell table cannot grow, so the holder may do wholesale things to the
/// underlying storage (bulk reconfiguration, [`Manager::reset`]) without any
/// per-cell coordination.
pub struct Lockout<'m> {
    manager: &'m Manager,
    all_readers: Option<MutexGuard<'m, ()>>,
    has_writer: bool,
}

impl Lockout<'_> {
    /// Whether every slot was seized. An invalid lockout excludes nothing;
    /// it only releases whatever it did manage to grab.
    pub fn is_valid(&self) -> bool {
        self.all_readers.is_some() && self.has_writer
    }
}

impl Drop for Lockout<'_> {
    fn drop(&mut self) {
        if self.has_writer {
            self.manager.return_writer();
        }
        if let Some(guard) = self.all_readers.take() {
            self.manager.n_readers.store(0, Ordering::Release);
            drop(guard);
        }
    }
}

impl fmt::Debug for Lockout<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lockout")
            .field("valid", &self.is_valid())
            .finish()
    }
}

use std::cell::UnsafeCell;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::manager::Manager;
use crate::read::{ReadHandle, ReadHandleFactory};
use crate::table::Segmented;
use crate::write::WriteHandle;
use crate::{Error, MAX_READERS};

/// One value cell. All cross-thread access goes through the manager's
/// index-arbitration protocol, which is what justifies the `Sync` impl: a
/// cell is either the writer's exclusive draft, a snapshot shared read-only
/// among latched readers, or unreachable.
pub(crate) struct DataCell<T>(UnsafeCell<T>);

// SAFETY: a DataCell is handed out either as `&mut T` to exactly one thread
// (the writer's draft, or everything under a valid lockout) or as `&T` to
// latched readers, never both at once. That makes sharing it as safe as
// sharing a `Mutex<T>` (T: Send) whose contents are also lent out as `&T`
// across threads (T: Sync).
unsafe impl<T: Send> Send for DataCell<T> {}
unsafe impl<T: Send + Sync> Sync for DataCell<T> {}

/// Storage for a set of exchangeable values of type `T`, plus the
/// [`Manager`] that arbitrates who may touch which one.
///
/// A container holds `max_readers + 2` cells: one being drafted by the
/// writer, one holding the latest published snapshot, and enough others
/// that a publish can always find a free cell no matter what every admitted
/// reader is doing. [`write`](Container::write) and
/// [`read`](Container::read) check out smart-pointer views;
/// exchanging a value is a matter of flipping indices, never of copying
/// `T`s around.
///
/// An *expandable* container additionally keeps an original copy of the
/// seed value and can grow its reader capacity on demand, seeding fresh
/// cells from that template.
pub struct Container<T> {
    manager: Manager,
    cells: Segmented<DataCell<T>>,
    // The template ("original copy") used to seed cells on grow; None for
    // fixed containers. Its mutex doubles as the grow lane for `cells` and
    // is always taken before the manager's resize lane.
    template: Mutex<Option<T>>,
    expandable: bool,
}

impl<T: Clone> Container<T> {
    /// A fixed-capacity container for `max_readers` simultaneous readers,
    /// every cell seeded with a clone of `value`.
    pub fn with_readers(max_readers: usize, value: T) -> Result<Self, Error> {
        Self::build(max_readers, value, false)
    }

    /// A growable container, initially sized for one reader. Keeps a copy
    /// of `value` around to seed cells created by later growth.
    pub fn expandable(value: T) -> Self {
        Self::build(1, value, true).expect("one reader is always in range")
    }

    fn build(max_readers: usize, value: T, expandable: bool) -> Result<Self, Error> {
        let manager = Manager::new(max_readers)?;
        let mut cells = Segmented::new();
        for _ in 0..max_readers + 1 {
            cells.push_mut(DataCell(UnsafeCell::new(value.clone())));
        }
        // the last cell can take the seed itself unless it's needed as the
        // grow template
        let template = if expandable {
            cells.push_mut(DataCell(UnsafeCell::new(value.clone())));
            Some(value)
        } else {
            cells.push_mut(DataCell(UnsafeCell::new(value)));
            None
        };
        Ok(Container {
            manager,
            cells,
            template: Mutex::new(template),
            expandable,
        })
    }
}

impl<T> Container<T> {
    /// A fixed-capacity container whose cells are produced by `init`, for
    /// value types that cannot be cloned.
    pub fn with(max_readers: usize, mut init: impl FnMut() -> T) -> Result<Self, Error> {
        let manager = Manager::new(max_readers)?;
        let mut cells = Segmented::new();
        for _ in 0..max_readers + 2 {
            cells.push_mut(DataCell(UnsafeCell::new(init())));
        }
        Ok(Container {
            manager,
            cells,
            template: Mutex::new(None),
            expandable: false,
        })
    }

    /// Check out the write view, unless a writer already exists.
    pub fn write(&self) -> Option<WriteHandle<'_, T>> {
        WriteHandle::new(self)
    }

    /// Check out a read view, unless `max_readers` of them already exist.
    pub fn read(&self) -> Option<ReadHandle<'_, T>> {
        ReadHandle::new(self)
    }

    /// Check out a read view, growing the container whenever every reader
    /// slot is taken.
    ///
    /// On an expandable container this always succeeds; it can only block
    /// on the grow lane, which no fast path ever holds. On a fixed
    /// container it is just [`read`](Container::read).
    pub fn read_guaranteed(&self) -> Option<ReadHandle<'_, T>>
    where
        T: Clone,
    {
        if !self.expandable {
            return self.read();
        }
        loop {
            if let Some(handle) = self.read() {
                return Some(handle);
            }
            self.ensure_readers(self.manager.max_readers() + 1);
        }
    }

    /// A factory of read views over a shared container, for handing to
    /// other threads.
    pub fn factory(self: &Arc<Self>) -> ReadHandleFactory<T> {
        ReadHandleFactory::new(Arc::clone(self))
    }

    /// Reader capacity as currently allocated.
    pub fn max_readers(&self) -> usize {
        self.manager.max_readers()
    }

    /// Whether [`ensure_readers`](Container::ensure_readers) can grow this
    /// container.
    pub fn is_expandable(&self) -> bool {
        self.expandable
    }

    /// Grow reader capacity to at least `new_max`, seeding fresh cells from
    /// the template. Already-sufficient capacity is left alone.
    ///
    /// Returns `false` (and does nothing) on a fixed container.
    pub fn ensure_readers(&self, new_max: usize) -> bool
    where
        T: Clone,
    {
        if !self.expandable {
            return false;
        }
        let new_max = new_max.min(MAX_READERS);
        let template = self.template.lock();

        let current = self.manager.max_readers();
        if current >= new_max {
            return true;
        }
        debug!(from = current, to = new_max, "growing container");

        let original = template
            .as_ref()
            .expect("an expandable container keeps its template");
        // data cells first, manager cells second: an index the manager hands
        // out always has a cell behind it
        for _ in 0..new_max - current {
            // SAFETY: the template lock is this container's grow lane; every
            // push to `cells` happens under it.
            unsafe {
                self.cells
                    .push(DataCell(UnsafeCell::new(original.clone())));
            }
        }
        self.manager.ensure_space_for_readers(new_max);
        true
    }

    /// Apply `f` to every cell, template included, with every reader and
    /// the writer locked out.
    ///
    /// Returns `false` (applying nothing) if any read or write handle
    /// exists. Use this for bulk reconfiguration that must hit copies of
    /// the value that are currently unreachable through the publish cycle.
    pub fn for_each(&self, mut f: impl FnMut(&mut T)) -> bool {
        // grow lane before lockout (which takes the resize lane): same
        // order as ensure_readers
        let mut template = self.template.lock();
        let lock = self.manager.lockout();
        if !lock.is_valid() {
            return false;
        }

        for i in 0..self.cells.len() {
            // SAFETY: the valid lockout holds the writer gate and every
            // reader slot, so no other access to any cell can exist until
            // `lock` drops at the end of this scope.
            f(unsafe { &mut *self.cells.get(i).0.get() });
        }
        if let Some(original) = template.as_mut() {
            f(original);
        }
        true
    }

    /// Forget every publication, returning to the fresh state where
    /// readers find nothing. Fails (returning `false`) while any handle
    /// exists. Cell contents are left as-is; they simply become
    /// unreachable until published over.
    pub fn reset(&self) -> bool {
        self.manager.reset()
    }

    pub(crate) fn manager(&self) -> &Manager {
        &self.manager
    }

    /// Raw pointer to cell `index`; the caller's claim on the index is what
    /// makes dereferencing it sound.
    pub(crate) fn cell(&self, index: usize) -> *mut T {
        self.cells.get(index).0.get()
    }

    /// Run `f` on the latest published value (or `None` if nothing was
    /// published) under a lockout; yields `None` if handles exist.
    #[cfg(feature = "serde")]
    pub(crate) fn with_latest<R>(&self, f: impl FnOnce(Option<&T>) -> R) -> Option<R> {
        let lock = self.manager.lockout();
        if !lock.is_valid() {
            return None;
        }
        let latest = self.manager.latest_relaxed();
        let value = if latest == -1 {
            None
        } else {
            // SAFETY: the valid lockout excludes every other accessor for
            // the duration of `f`.
            Some(unsafe { &*self.cell(latest as usize) })
        };
        Some(f(value))
    }
}

impl<T> fmt::Debug for Container<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("manager", &self.manager)
            .field("expandable", &self.expandable)
            .finish()
    }
}

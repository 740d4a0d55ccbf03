use std::fmt;

use crate::container::Container;
use crate::manager::Manager;

mod factory;
pub use factory::ReadHandleFactory;

/// A scoped claim of one reader slot on a [`Manager`].
///
/// Constructing one admits this reader (or yields `None` when `max_readers`
/// handles already exist) and immediately latches onto the most recently
/// published cell, if there is one. The latch pins that cell: the writer
/// will not reuse it as a draft while this handle points at it.
///
/// A handle constructed before the first publication is *empty*
/// ([`current`](ReadIndex::current) returns `None`) and becomes useful after
/// the first [`pull_update`](ReadIndex::pull_update) that observes a
/// publication.
pub struct ReadIndex<'m> {
    manager: &'m Manager,
    index: i32,
}

impl<'m> ReadIndex<'m> {
    pub(crate) fn new(manager: &'m Manager) -> Option<Self> {
        if !manager.checkout_reader() {
            return None;
        }
        let index = manager.get_latest();
        Some(ReadIndex { manager, index })
    }

    /// The cell this reader is latched onto, or `None` before the first
    /// observed publication.
    pub fn current(&self) -> Option<usize> {
        (self.index != -1).then(|| self.index as usize)
    }

    /// Whether a publication newer than the latched one is available.
    pub fn has_update(&self) -> bool {
        let newest = self.manager.latest_relaxed();
        // Even if the visible latest moves again before we pull, it can
        // never come back to the cell this reader currently holds.
        newest != -1 && newest != self.index
    }

    /// Re-latch onto the newest publication, if it differs from the held
    /// one. A no-op otherwise; this reader never holds two latches.
    pub fn pull_update(&mut self) {
        if !self.has_update() {
            return;
        }
        // the seq_cst decrement must precede the seq_cst load in
        // get_latest, see there
        self.unlatch();
        self.index = self.manager.get_latest();
    }

    fn unlatch(&mut self) {
        if self.index != -1 {
            self.manager.finish_read(self.index);
            self.index = -1;
        }
    }
}

impl Drop for ReadIndex<'_> {
    fn drop(&mut self) {
        self.unlatch();
        self.manager.return_reader();
    }
}

impl fmt::Debug for ReadIndex<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadIndex")
            .field("index", &self.current())
            .finish()
    }
}

/// The read view of a [`Container`]: read-only access to the snapshot this
/// reader is latched onto.
///
/// The snapshot does not change underneath you. Call
/// [`has_update`](ReadHandle::has_update) to learn whether the writer has
/// published something newer, and [`refresh`](ReadHandle::refresh) to move
/// to it; until then [`get`](ReadHandle::get) keeps returning the same
/// value.
///
/// ```
/// let container = ev_cell::Container::with_readers(1, 0u32)?;
/// let mut w = container.write().expect("no other writer exists");
/// *w = 7;
/// w.publish();
///
/// let mut r = container.read().expect("a reader slot is free");
/// assert_eq!(r.get(), Some(&7));
///
/// *w = 8;
/// w.publish();
/// assert_eq!(r.get(), Some(&7)); // unchanged until refreshed
/// r.refresh();
/// assert_eq!(r.get(), Some(&8));
/// # Ok::<(), ev_cell::Error>(())
/// ```
pub struct ReadHandle<'c, T> {
    container: &'c Container<T>,
    index: ReadIndex<'c>,
}

impl<'c, T> ReadHandle<'c, T> {
    pub(crate) fn new(container: &'c Container<T>) -> Option<Self> {
        let index = ReadIndex::new(container.manager())?;
        Some(ReadHandle { container, index })
    }

    /// The latched snapshot, or `None` if nothing had been published the
    /// last time this handle (re-)latched.
    pub fn get(&self) -> Option<&T> {
        let index = self.index.current()?;
        // SAFETY: this handle holds a latch on the cell (a positive
        // contribution to its reader count), so the writer cannot claim it
        // as a draft while the borrow lives; `refresh` takes `&mut self`,
        // which ends the borrow first. Other readers of the same cell only
        // take shared references.
        Some(unsafe { &*self.container.cell(index) })
    }

    /// The cell index backing [`get`](ReadHandle::get), if latched.
    pub fn index(&self) -> Option<usize> {
        self.index.current()
    }

    /// Whether the writer has published since this handle last latched.
    pub fn has_update(&self) -> bool {
        self.index.has_update()
    }

    /// Move the latch to the newest publication, if any. The value returned
    /// by [`get`](ReadHandle::get) only ever changes inside this call.
    pub fn refresh(&mut self) {
        self.index.pull_update();
    }
}

impl<T: fmt::Debug> fmt::Debug for ReadHandle<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadHandle")
            .field("index", &self.index())
            .field("value", &self.get())
            .finish()
    }
}

use std::fmt;
use std::ops::{Deref, DerefMut};

use crate::container::Container;
use crate::manager::Manager;

/// A scoped claim of the writer role on a [`Manager`].
///
/// At most one of these exists per manager at a time; constructing a second
/// one yields `None`. While it lives, [`index`](WriteIndex::index) names the
/// cell that is exclusively this writer's to mutate. The index is stable
/// across any number of mutations and only moves when
/// [`push_update`](WriteIndex::push_update) publishes the draft.
///
/// The writer role is released when the handle drops.
pub struct WriteIndex<'m> {
    manager: &'m Manager,
}

impl<'m> WriteIndex<'m> {
    pub(crate) fn new(manager: &'m Manager) -> Option<Self> {
        manager.checkout_writer().then(|| WriteIndex { manager })
    }

    /// The cell currently designated as this writer's draft.
    pub fn index(&self) -> usize {
        self.manager.writer_index() as usize
    }

    /// Publish the draft cell to readers and claim a fresh draft.
    ///
    /// After this returns, [`index`](WriteIndex::index) names a different
    /// cell, whose contents are whatever was left there by an earlier cycle.
    pub fn push_update(&mut self) {
        self.manager.push_write();
    }
}

impl Drop for WriteIndex<'_> {
    fn drop(&mut self) {
        self.manager.return_writer();
    }
}

impl fmt::Debug for WriteIndex<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteIndex")
            .field("index", &self.index())
            .finish()
    }
}

/// The write view of a [`Container`]: a smart pointer to the draft cell.
///
/// Dereferences (mutably or not) to the value being drafted. Mutate it as
/// many times as you like; nothing is visible to readers until
/// [`publish`](WriteHandle::publish), which atomically swaps the draft in as
/// the new latest value and re-targets this handle at a fresh cell.
///
/// ```
/// let container = ev_cell::Container::with_readers(1, 0u32)?;
/// let mut w = container.write().expect("no other writer exists");
/// *w = 7;
/// w.publish();
/// # Ok::<(), ev_cell::Error>(())
/// ```
pub struct WriteHandle<'c, T> {
    container: &'c Container<T>,
    index: WriteIndex<'c>,
}

impl<'c, T> WriteHandle<'c, T> {
    pub(crate) fn new(container: &'c Container<T>) -> Option<Self> {
        let index = WriteIndex::new(container.manager())?;
        Some(WriteHandle { container, index })
    }

    /// The cell this handle is drafting into.
    pub fn index(&self) -> usize {
        self.index.index()
    }

    /// Make the draft visible to readers and move on to a fresh cell.
    ///
    /// The fresh cell holds whatever a previous cycle left in it; overwrite
    /// it fully before the next publish if stale state matters.
    pub fn publish(&mut self) {
        self.index.push_update();
    }
}

impl<T> Deref for WriteHandle<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: while the writer gate is held the draft cell can be
        // latched by no reader and claimed by no lockout, so this handle has
        // exclusive access to it. A concurrent `publish` is impossible since
        // it needs `&mut self`.
        unsafe { &*self.container.cell(self.index.index()) }
    }
}

impl<T> DerefMut for WriteHandle<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: as in deref; `&mut self` additionally rules out any other
        // borrow through this handle.
        unsafe { &mut *self.container.cell(self.index.index()) }
    }
}

impl<T: fmt::Debug> fmt::Debug for WriteHandle<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteHandle")
            .field("index", &self.index())
            .field("draft", &**self)
            .finish()
    }
}

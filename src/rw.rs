use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::container::Container;
use crate::read::{ReadHandle, ReadHandleFactory};
use crate::write::WriteHandle;
use crate::Error;

/// A [`Container`] bundled with writer serialization: the one-stop wrapper
/// for the common case of "one value, one producer somewhere, consumers
/// everywhere".
///
/// The container itself admits only a single writer at a time;
/// `Synchronized` puts a mutex in front of that gate so that any thread may
/// call [`write`](Synchronized::write) and the calls simply queue up.
/// Readers are unaffected: hand out clones of
/// [`reader`](Synchronized::reader) and pull snapshots without ever
/// touching a lock.
///
/// ```
/// use std::sync::Arc;
///
/// let value = Arc::new(ev_cell::Synchronized::new(0u64));
///
/// value.write(|w| {
///     **w = 42;
///     w.publish();
/// });
///
/// let factory = value.reader();
/// let r = factory.read_guaranteed().expect("expandable containers always admit");
/// assert_eq!(r.get(), Some(&42));
/// ```
pub struct Synchronized<T> {
    container: Arc<Container<T>>,
    // Serializes write() callers; also held across reset/for_each so the
    // writer gate is always free when write() claims it.
    writer: Mutex<()>,
}

impl<T: Clone> Synchronized<T> {
    /// An expandable synchronized value seeded with `value`.
    pub fn new(value: T) -> Self {
        Self::from_container(Container::expandable(value))
    }

    /// A fixed-capacity synchronized value for `max_readers` readers.
    pub fn with_readers(max_readers: usize, value: T) -> Result<Self, Error> {
        Ok(Self::from_container(Container::with_readers(
            max_readers,
            value,
        )?))
    }
}

impl<T> Synchronized<T> {
    /// Wrap an existing container.
    pub fn from_container(container: Container<T>) -> Self {
        Synchronized {
            container: Arc::new(container),
            writer: Mutex::new(()),
        }
    }

    /// Run `f` with the write view, waiting for any other writer first.
    ///
    /// Publishing is still explicit: call
    /// [`publish`](WriteHandle::publish) inside `f` when the draft is
    /// ready, or don't, to keep drafting across several `write` calls (the
    /// draft cell is stable until published).
    pub fn write<R>(&self, f: impl FnOnce(&mut WriteHandle<'_, T>) -> R) -> R {
        let _writer = self.writer.lock();
        let mut handle = self
            .container
            .write()
            .expect("the writer gate is free while the writer lock is held");
        f(&mut handle)
    }

    /// A cloneable factory of read views, for distribution across threads.
    pub fn reader(&self) -> ReadHandleFactory<T> {
        self.container.factory()
    }

    /// Check out a read view directly. See [`Container::read`].
    pub fn read(&self) -> Option<ReadHandle<'_, T>> {
        self.container.read()
    }

    /// Reader capacity as currently allocated.
    pub fn max_readers(&self) -> usize {
        self.container.max_readers()
    }

    /// Grow reader capacity. See [`Container::ensure_readers`].
    pub fn ensure_readers(&self, new_max: usize) -> bool
    where
        T: Clone,
    {
        self.container.ensure_readers(new_max)
    }

    /// Apply `f` to every cell under a lockout. Fails with `false` while
    /// any handle exists. See [`Container::for_each`].
    pub fn for_each(&self, f: impl FnMut(&mut T)) -> bool {
        let _writer = self.writer.lock();
        self.container.for_each(f)
    }

    /// Forget every publication. Fails with `false` while any handle
    /// exists. See [`Container::reset`].
    pub fn reset(&self) -> bool {
        let _writer = self.writer.lock();
        self.container.reset()
    }

    // Not public: a caller holding the container could check out a writer
    // behind the writer lock's back, which write() relies on never seeing.
    pub(crate) fn container(&self) -> &Container<T> {
        &self.container
    }
}

impl<T> fmt::Debug for Synchronized<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Synchronized")
            .field("container", &self.container)
            .finish()
    }
}

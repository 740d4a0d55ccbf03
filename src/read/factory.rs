use std::fmt;
use std::sync::Arc;

use super::ReadHandle;
use crate::container::Container;

/// A `Sync + Send` type that produces [`ReadHandle`]s to a shared
/// [`Container`].
///
/// Handles borrow the container they read from, so they cannot leave the
/// thread that made them; the factory is the thing you clone and move
/// around. Each thread clones the factory, carries its clone along, and
/// checks out handles locally.
pub struct ReadHandleFactory<T> {
    container: Arc<Container<T>>,
}

impl<T> ReadHandleFactory<T> {
    pub(crate) fn new(container: Arc<Container<T>>) -> Self {
        ReadHandleFactory { container }
    }

    /// Check out a read handle, if a reader slot is free.
    pub fn read(&self) -> Option<ReadHandle<'_, T>> {
        self.container.read()
    }

    /// Check out a read handle, growing the container if every slot is
    /// taken. See [`Container::read_guaranteed`].
    pub fn read_guaranteed(&self) -> Option<ReadHandle<'_, T>>
    where
        T: Clone,
    {
        self.container.read_guaranteed()
    }
}

impl<T> Clone for ReadHandleFactory<T> {
    fn clone(&self) -> Self {
        ReadHandleFactory {
            container: Arc::clone(&self.container),
        }
    }
}

impl<T> fmt::Debug for ReadHandleFactory<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadHandleFactory").finish()
    }
}

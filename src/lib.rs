//! # ev_cell
//!
//! A lock-free, wait-free single-writer / multi-reader latest-value cell.
//!
//! One "writer" thread continually updates some arbitrary piece of
//! information, and up to N "reader" threads retrieve the latest version
//! that has been published, without any thread ever waiting on a mutex or
//! allocating on the way. For one reader and one writer this needs three
//! instances of the shared type to be allocated up front; for N readers it
//! needs N + 2. Publishing from the writer and pulling to a reader are
//! accomplished by exchanging atomic indices that say what each instance is
//! currently for, rather than by copying or moving the data itself.
//!
//! Readers poll: there is no notification, no history, and no guarantee
//! that a reader sees every update. The guarantee is that whatever a reader
//! sees is a complete, non-torn value that was, at the moment it latched
//! on, the most recent one published.
//!
//! There are two interfaces to choose from:
//!
//! - In most cases the index juggling can be bundled together with data
//!   allocation and lifetime management by using [`Container`] (or
//!   [`Synchronized`], which additionally serializes writers behind a
//!   mutex so any thread can produce).
//!
//!   * [`Container::write`] checks out a [`WriteHandle`]: a smart pointer
//!     to a private draft of the value. Mutate it freely, then call
//!     [`publish`](WriteHandle::publish) to atomically swap it in as the
//!     latest snapshot and acquire a fresh draft. A second simultaneous
//!     write handle comes back as `None`.
//!
//!   * [`Container::read`] checks out a [`ReadHandle`]: a stable view of
//!     the latest snapshot at checkout time. [`get`](ReadHandle::get)
//!     returns `None` until the writer has published at least once;
//!     [`refresh`](ReadHandle::refresh) re-latches onto the newest
//!     snapshot when [`has_update`](ReadHandle::has_update) says there is
//!     one. Handle number N + 1 comes back as `None`.
//!
//!   * [`Container::for_each`] applies a closure to every allocated
//!     instance (for bulk reconfiguration), and [`Container::reset`]
//!     forgets all publications; both refuse to run while any handle
//!     exists.
//!
//! - Using a [`Manager`] directly works the same way, except that you are
//!   responsible for allocating and indexing the data, and the manager
//!   only tells you which index to use as the writer or as a reader. Check
//!   out [`WriteIndex`] / [`ReadIndex`] handles and use them as indices
//!   into your own storage of `max_readers + 2` cells, reading only
//!   through a latched read index and writing only through the write
//!   index.
//!
//! ```
//! let container = ev_cell::Container::with_readers(2, String::new())?;
//!
//! // nothing published yet: readers are admitted but see no value
//! let mut early = container.read().expect("reader slot free");
//! assert_eq!(early.get(), None);
//!
//! let mut w = container.write().expect("no other writer");
//! w.push_str("hello");
//! w.publish();
//!
//! assert!(early.has_update());
//! early.refresh();
//! assert_eq!(early.get().map(String::as_str), Some("hello"));
//! # Ok::<(), ev_cell::Error>(())
//! ```

#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    rustdoc::broken_intra_doc_links
)]

use thiserror::Error as ThisError;

mod container;
mod manager;
mod read;
mod rw;
mod table;
mod write;

#[cfg(feature = "serde")]
mod impl_serde;

pub use crate::container::Container;
pub use crate::manager::{Lockout, Manager};
pub use crate::read::{ReadHandle, ReadHandleFactory, ReadIndex};
pub use crate::rw::Synchronized;
pub use crate::write::{WriteHandle, WriteIndex};

/// The largest admissible reader capacity. Cell bookkeeping is `i32`-based
/// and two cells are always spoken for (the draft and the latest), which is
/// where the `- 2` comes from.
pub const MAX_READERS: usize = (i32::MAX - 2) as usize;

/// Errors surfaced at construction time.
///
/// Everything that can go wrong after construction is contention, which is
/// reported through `bool` / `Option` returns instead: see
/// [`Container::reset`] and the handle constructors.
#[derive(Debug, ThisError)]
#[non_exhaustive]
pub enum Error {
    /// The requested reader capacity cannot be represented.
    #[error("max readers must be in range [1, {}], got {requested}", MAX_READERS)]
    MaxReadersOutOfRange {
        /// The capacity that was asked for.
        requested: usize,
    },
}

/// Create an expandable [`Synchronized`] value.
///
/// Equivalent to [`Synchronized::new`]; exists so the common case reads as
/// `ev_cell::new(value)`.
pub fn new<T: Clone>(value: T) -> Synchronized<T> {
    Synchronized::new(value)
}

/// Create a fixed-capacity [`Synchronized`] value for `max_readers`
/// simultaneous readers.
pub fn with_readers<T: Clone>(max_readers: usize, value: T) -> Result<Synchronized<T>, Error> {
    Synchronized::with_readers(max_readers, value)
}

use std::alloc::{self, Layout};
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

/// Cells in the first segment; segment `s` holds `8 << s` cells.
const BASE_SHIFT: u32 = 3;

/// Enough segments to address every index a slot counter can name.
const MAX_SEGMENTS: usize = 29;

/// Map a flat cell index to its (segment, offset) pair.
fn locate(index: usize) -> (usize, usize) {
    let shifted = index + (1 << BASE_SHIFT);
    let top = usize::BITS - 1 - shifted.leading_zeros();
    ((top - BASE_SHIFT) as usize, shifted - (1usize << top))
}

fn segment_len(segment: usize) -> usize {
    1 << (BASE_SHIFT as usize + segment)
}

fn segment_start(segment: usize) -> usize {
    segment_len(segment) - (1 << BASE_SHIFT)
}

/// A grow-only array of cells with stable addresses.
///
/// Cells live in power-of-two segments that are allocated as the array grows
/// and freed only on drop, so a `&T` handed out by [`get`](Segmented::get)
/// stays valid for the life of the structure no matter how much the array
/// grows in the meantime. `get` is wait-free: one atomic load of the length,
/// one of the segment pointer.
///
/// Appending is *not* internally synchronized; the owning structure
/// serializes every [`push`](Segmented::push) behind its grow lock.
pub(crate) struct Segmented<T> {
    segments: [AtomicPtr<T>; MAX_SEGMENTS],
    len: AtomicUsize,
}

// SAFETY: a Segmented is just a collection of T cells; moving it between
// threads moves the cells, and sharing it shares `&T` access plus the
// externally-serialized push. Same requirements as a plain slice of T.
unsafe impl<T: Send> Send for Segmented<T> {}
unsafe impl<T: Sync> Sync for Segmented<T> {}

impl<T> Segmented<T> {
    pub(crate) fn new() -> Self {
        Segmented {
            segments: std::array::from_fn(|_| AtomicPtr::new(ptr::null_mut())),
            len: AtomicUsize::new(0),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    /// Shared reference to the cell at `index`. Panics if out of bounds.
    pub(crate) fn get(&self, index: usize) -> &T {
        let len = self.len.load(Ordering::Acquire);
        assert!(index < len, "cell index {index} out of bounds (len {len})");
        let (segment, offset) = locate(index);
        let base = self.segments[segment].load(Ordering::Acquire);
        // SAFETY: `index < len`, and the release store of `len` in `push`
        // happens after both the segment-pointer store and the cell write,
        // so `base` is non-null and the cell is initialized. Segments are
        // never freed or moved before drop, which takes `&mut self`.
        unsafe { &*base.add(offset) }
    }

    /// Append one cell.
    ///
    /// # Safety
    ///
    /// The caller must hold the owning structure's grow lock (or otherwise
    /// have exclusive append rights): two concurrent pushes race on the
    /// length and the new cell.
    pub(crate) unsafe fn push(&self, value: T) {
        let index = self.len.load(Ordering::Relaxed);
        let (segment, offset) = locate(index);
        assert!(segment < MAX_SEGMENTS, "cell table capacity exhausted");
        let layout = Layout::array::<T>(segment_len(segment)).expect("segment layout overflow");
        let mut base = self.segments[segment].load(Ordering::Acquire);
        if base.is_null() {
            // SAFETY: layout is non-zero-sized for any T used here; a failed
            // allocation aborts via handle_alloc_error.
            base = unsafe { alloc::alloc(layout) as *mut T };
            if base.is_null() {
                alloc::handle_alloc_error(layout);
            }
            self.segments[segment].store(base, Ordering::Release);
        }
        // SAFETY: offset is within the segment by construction of locate(),
        // and the cell at `index` is unreachable by readers until the length
        // store below publishes it.
        unsafe { base.add(offset).write(value) };
        self.len.store(index + 1, Ordering::Release);
    }

    /// Append one cell through an exclusive reference (construction path).
    pub(crate) fn push_mut(&mut self, value: T) {
        // SAFETY: `&mut self` rules out any concurrent push or read.
        unsafe { self.push(value) };
    }
}

impl<T> Drop for Segmented<T> {
    fn drop(&mut self) {
        let len = *self.len.get_mut();
        for (segment, slot) in self.segments.iter_mut().enumerate() {
            let base = *slot.get_mut();
            if base.is_null() {
                // segments are allocated in order; the rest are null too
                break;
            }
            let capacity = segment_len(segment);
            let initialized = len.saturating_sub(segment_start(segment)).min(capacity);
            // SAFETY: exactly the first `initialized` cells of this segment
            // were written by push; the segment was allocated with this
            // layout and is dropped exactly once.
            unsafe {
                for i in 0..initialized {
                    ptr::drop_in_place(base.add(i));
                }
                let layout =
                    Layout::array::<T>(capacity).expect("segment layout overflow");
                alloc::dealloc(base as *mut u8, layout);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locate_maps_segment_boundaries() {
        assert_eq!(locate(0), (0, 0));
        assert_eq!(locate(7), (0, 7));
        assert_eq!(locate(8), (1, 0));
        assert_eq!(locate(23), (1, 15));
        assert_eq!(locate(24), (2, 0));
        for index in 0..10_000 {
            let (segment, offset) = locate(index);
            assert!(offset < segment_len(segment));
            assert_eq!(segment_start(segment) + offset, index);
        }
    }

    #[test]
    fn push_and_get_across_segments() {
        let mut table = Segmented::new();
        for i in 0..1_000usize {
            table.push_mut(i);
        }
        assert_eq!(table.len(), 1_000);
        for i in 0..1_000usize {
            assert_eq!(*table.get(i), i);
        }
    }

    #[test]
    fn drops_heap_values() {
        let mut table = Segmented::new();
        for i in 0..100 {
            table.push_mut(format!("cell {i}"));
        }
        assert_eq!(table.get(99), "cell 99");
        drop(table);
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn get_past_len_panics() {
        let mut table = Segmented::new();
        table.push_mut(1u32);
        table.get(1);
    }
}

use std::sync::{Arc, Mutex};

use ev_cell::{Container, Error, Manager, Synchronized};
use threadpool::ThreadPool;

macro_rules! assert_match {
    ($x:expr, $p:pat) => {
        if let $p = $x {
        } else {
            panic!("{}", concat!(stringify!($x), " did not match ", stringify!($p)));
        }
    };
}

#[test]
fn single_publisher_single_consumer() {
    let container = Container::with_readers(1, 0i32).unwrap();
    let mut w = container.write().unwrap();

    for value in [0, 1, 2] {
        *w = value;
        w.publish();

        // a fresh reader observes exactly the posted value
        let r = container.read().unwrap();
        assert_eq!(r.get(), Some(&value));
    }
}

#[test]
fn reader_admission_is_bounded() {
    let container = Container::with_readers(2, 0i32).unwrap();

    let first = container.read().unwrap();
    let second = container.read().unwrap();
    assert_match!(container.read(), None);

    // slots free up on drop
    drop(first);
    let third = container.read().unwrap();
    assert_match!(container.read(), None);
    drop((second, third));

    // and the writer gate admits exactly one
    let w = container.write().unwrap();
    assert_match!(container.write(), None);
    drop(w);
    assert_match!(container.write(), Some(_));
}

#[test]
fn guaranteed_read_grows_the_container() {
    let container = Container::expandable(7i32);
    {
        let mut w = container.write().unwrap();
        w.publish();
    }

    let held = container.read().unwrap();
    assert_eq!(container.max_readers(), 1);

    // every slot is taken, so the guaranteed checkout grows capacity
    let grown = container.read_guaranteed().unwrap();
    assert_eq!(container.max_readers(), 2);
    assert_eq!(held.get(), Some(&7));
    assert_eq!(grown.get(), Some(&7));
}

#[test]
fn fixed_container_read_guaranteed_does_not_grow() {
    let container = Container::with_readers(1, 0i32).unwrap();
    let held = container.read_guaranteed().unwrap();
    assert_match!(container.read_guaranteed(), None);
    assert_eq!(container.max_readers(), 1);
    drop(held);
}

#[test]
fn read_before_first_publish_is_empty() {
    let container = Container::with_readers(1, 5i32).unwrap();

    let mut r = container.read().unwrap();
    assert_eq!(r.get(), None);
    assert!(!r.has_update());
    assert_eq!(r.index(), None);

    let mut w = container.write().unwrap();
    *w = 6;
    w.publish();

    assert!(r.has_update());
    r.refresh();
    assert_eq!(r.get(), Some(&6));
    assert!(!r.has_update());
}

#[test]
fn refresh_skips_to_the_newest_value() {
    let container = Container::with_readers(1, 0u32).unwrap();
    let mut w = container.write().unwrap();
    let mut r = container.read().unwrap();

    for value in 1..=5 {
        *w = value;
        w.publish();
    }

    // intermediate publications are skipped, not replayed
    r.refresh();
    assert_eq!(r.get(), Some(&5));
}

#[test]
fn draft_is_stable_until_published() {
    let container = Container::with_readers(1, 0i32).unwrap();

    let mut w = container.write().unwrap();
    let draft_index = w.index();
    *w = 1;
    *w += 10;
    assert_eq!(w.index(), draft_index);
    assert_eq!(*w, 11);

    w.publish();
    assert_ne!(w.index(), draft_index);

    let r = container.read().unwrap();
    assert_eq!(r.index(), Some(draft_index));
    assert_eq!(r.get(), Some(&11));
}

#[test]
fn reset_fails_while_handles_exist() {
    let container = Container::with_readers(2, 0i32).unwrap();

    {
        let mut w = container.write().unwrap();
        *w = 3;
        w.publish();
        assert!(!container.reset());
    }
    {
        let r = container.read().unwrap();
        assert_eq!(r.get(), Some(&3));
        assert!(!container.reset());
        // the failed resets changed nothing
        assert_eq!(r.get(), Some(&3));
    }

    assert!(container.reset());
    let r = container.read().unwrap();
    assert_eq!(r.get(), None);
}

#[test]
fn grow_is_idempotent() {
    let container = Container::expandable(0i32);

    assert!(container.ensure_readers(5));
    assert_eq!(container.max_readers(), 5);
    assert!(container.ensure_readers(3));
    assert_eq!(container.max_readers(), 5);

    let fixed = Container::with_readers(1, 0i32).unwrap();
    assert!(!fixed.ensure_readers(5));
    assert_eq!(fixed.max_readers(), 1);
}

#[test]
fn for_each_touches_every_instance() {
    let container = Container::expandable(0i32);

    let mut visited = 0;
    assert!(container.for_each(|value| {
        visited += 1;
        *value += 1;
    }));
    // three cells plus the grow template
    assert_eq!(visited, 4);

    // the increment reached the (otherwise untouchable) draft cell
    let mut w = container.write().unwrap();
    w.publish();
    let r = container.read().unwrap();
    assert_eq!(r.get(), Some(&1));

    // contended while handles exist
    assert!(!container.for_each(|_| {}));
    drop((w, r));

    // cells appended by growth are seeded from the template, which the
    // earlier pass also incremented
    container.ensure_readers(2);
    let mut visited = 0;
    let mut total = 0;
    assert!(container.for_each(|value| {
        visited += 1;
        total += *value;
    }));
    assert_eq!(visited, 5);
    assert_eq!(total, 5);
}

#[test]
fn manager_indices_drive_external_storage() {
    assert_match!(Manager::new(0), Err(Error::MaxReadersOutOfRange { .. }));

    let manager = Manager::new(1).unwrap();
    let mut storage = vec![0u32; manager.max_readers() + 2];

    let mut w = manager.write_index().unwrap();
    storage[w.index()] = 10;
    w.push_update();

    let mut r = manager.read_index().unwrap();
    assert_eq!(storage[r.current().unwrap()], 10);

    storage[w.index()] = 20;
    w.push_update();
    assert!(r.has_update());
    r.pull_update();
    assert_eq!(storage[r.current().unwrap()], 20);
}

#[test]
fn synchronized_serializes_writers() {
    let value = Synchronized::new(0u64);

    // drafting persists across write() calls until published
    value.write(|w| **w = 5);
    value.write(|w| {
        assert_eq!(**w, 5);
        w.publish();
    });

    let r = value.read().unwrap();
    assert_eq!(r.get(), Some(&5));
    drop(r);

    assert!(value.reset());
    assert_eq!(value.read().unwrap().get(), None);
}

#[test]
fn stress_readers_observe_increasing_suffixes() {
    let writes: u64 = 10_000;
    let readers = 4;

    let value = Arc::new(Synchronized::new(0u64));
    let observed: Arc<Mutex<Vec<Vec<u64>>>> = Arc::new(Mutex::new(Vec::new()));

    let pool = ThreadPool::new(readers + 1);

    for _ in 0..readers {
        let value = Arc::clone(&value);
        let observed = Arc::clone(&observed);
        pool.execute(move || {
            let factory = value.reader();
            let mut handle = factory.read_guaranteed().unwrap();
            let mut seen = Vec::new();
            let mut last = 0;
            // the checkout itself latches; it may already hold a value
            if let Some(&first) = handle.get() {
                seen.push(first);
                last = first;
            }
            while last != writes {
                if handle.has_update() {
                    handle.refresh();
                    let current = *handle.get().unwrap();
                    assert!(current > last);
                    last = current;
                    seen.push(current);
                } else {
                    std::thread::yield_now();
                }
            }
            observed.lock().unwrap().push(seen);
        });
    }

    {
        let value = Arc::clone(&value);
        pool.execute(move || {
            for v in 1..=writes {
                value.write(|w| {
                    **w = v;
                    w.publish();
                });
            }
        });
    }

    pool.join();
    assert_eq!(pool.panic_count(), 0);

    let observed = observed.lock().unwrap();
    assert_eq!(observed.len(), readers);
    for seen in observed.iter() {
        // a strictly increasing subsequence of the writer's sequence,
        // ending at the final publication
        assert_eq!(seen.last(), Some(&writes));
        assert!(seen.windows(2).all(|pair| pair[0] < pair[1]));
        assert!(seen.iter().all(|&v| v >= 1 && v <= writes));
    }
}

#[cfg(feature = "serde")]
mod serde_support {
    use super::*;

    #[test]
    fn container_serializes_its_latest_value() {
        let container = Container::expandable(0i32);
        assert_eq!(serde_json::to_string(&container).unwrap(), "null");

        {
            let mut w = container.write().unwrap();
            *w = 42;
            w.publish();
        }
        assert_eq!(serde_json::to_string(&container).unwrap(), "42");

        let restored: Container<i32> = serde_json::from_str("42").unwrap();
        let r = restored.read().unwrap();
        assert_eq!(r.get(), Some(&42));
        drop(r);

        let empty: Container<i32> = serde_json::from_str("null").unwrap();
        assert_eq!(empty.read().unwrap().get(), None);
    }

    #[test]
    fn serialization_refuses_while_handles_exist() {
        let container = Container::expandable(1i32);
        let _held = container.read().unwrap();
        assert!(serde_json::to_string(&container).is_err());
    }
}

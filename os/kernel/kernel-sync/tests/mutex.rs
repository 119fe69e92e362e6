use kernel_sync::SpinMutex;
use std::panic;

#[test]
fn basic_lock_and_raii() {
    let m = SpinMutex::new(0_u32);

    // take the lock, mutate, and drop
    {
        let mut g = m.lock();
        *g = 41;
    }

    // lock again; previous drop must have unlocked
    {
        let mut g = m.lock();
        *g += 1;
        assert_eq!(*g, 42);
    }
}

#[test]
fn try_lock_fails_while_held() {
    let m = SpinMutex::new(1u8);

    let g1 = m.try_lock();
    assert!(g1.is_some());
    assert!(m.try_lock().is_none());

    drop(g1);
    assert!(m.try_lock().is_some());
}

#[test]
fn with_lock_returns_value_and_unlocks() {
    let m = SpinMutex::new(String::from("a"));
    let len = m.with_lock(|s| {
        s.push('b');
        s.len()
    });
    assert_eq!(len, 2);
    assert_eq!(m.with_lock(|s| s.clone()), "ab");
}

#[test]
fn const_construction_in_static() {
    static COUNTER: SpinMutex<usize> = SpinMutex::new(0);
    COUNTER.with_lock(|c| *c += 3);
    assert_eq!(COUNTER.with_lock(|c| *c), 3);
}

#[test]
fn get_mut_and_into_inner() {
    let mut m = SpinMutex::new(vec![1, 2, 3]);
    m.get_mut().push(4);
    assert_eq!(m.lock().as_slice(), &[1, 2, 3, 4]);
    assert_eq!(m.into_inner(), vec![1, 2, 3, 4]);
}

#[test]
fn contended_increments_are_exact_and_exclusive() {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;

    let threads = 8;
    let iters = 5_000;

    let m = Arc::new(SpinMutex::new(0usize));
    let in_cs = Arc::new(AtomicUsize::new(0));
    let start = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let m = Arc::clone(&m);
            let in_cs = Arc::clone(&in_cs);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                for _ in 0..iters {
                    m.with_lock_irq(|v| {
                        let prev = in_cs.fetch_add(1, Ordering::SeqCst);
                        assert_eq!(prev, 0, "mutual exclusion violated");
                        *v += 1;
                        in_cs.fetch_sub(1, Ordering::SeqCst);
                    });
                    thread::yield_now();
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(m.with_lock(|v| *v), threads * iters);
    assert_eq!(in_cs.load(Ordering::SeqCst), 0);
}

#[test]
fn lock_is_released_on_panic() {
    let m = SpinMutex::new(0u32);

    let res = panic::catch_unwind(panic::AssertUnwindSafe(|| {
        m.with_lock(|v| {
            *v = 123;
            panic!("boom");
        });
    }));
    assert!(res.is_err(), "expected panic");

    assert_eq!(m.with_lock(|v| *v), 123);
}

/// Spot-check a concrete instantiation compiles as Sync.
#[test]
fn spin_mutex_is_sync_for_send_t() {
    fn takes_sync<S: Sync>(_s: &S) {}
    let m = SpinMutex::new(0u8);
    takes_sync(&m);
}

//! Many submitters against one pool while its bounds move underneath them.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use adaptpool_core::{CallerRunsPolicy, WorkerPool};

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

#[test]
fn concurrent_submit_and_resize_keeps_invariants() {
    let pool = Arc::new(
        WorkerPool::builder("stress", 2, 4)
            .queue_capacity(16)
            .rejection_policy(Arc::new(CallerRunsPolicy))
            .build()
            .unwrap(),
    );
    let ran = Arc::new(AtomicUsize::new(0));

    let submitters: Vec<_> = (0..8)
        .map(|_| {
            let pool = pool.clone();
            let ran = ran.clone();
            thread::spawn(move || {
                for _ in 0..250 {
                    let ran = ran.clone();
                    pool.execute(move || {
                        ran.fetch_add(1, Ordering::SeqCst);
                    })
                    .unwrap();
                }
            })
        })
        .collect();

    let resizers: Vec<_> = (0..3)
        .map(|i| {
            let pool = pool.clone();
            thread::spawn(move || {
                for step in 0..100 {
                    let core = 1 + (step + i) % 6;
                    let max = core + (step % 3);
                    pool.resize(core, max).unwrap();
                    pool.set_queue_capacity(8 + (step % 16)).unwrap();
                    let m = pool.metrics();
                    assert!(m.core_pool_size <= m.max_pool_size);
                    assert!(m.queue_capacity > 0);
                }
            })
        })
        .collect();

    for handle in submitters.into_iter().chain(resizers) {
        handle.join().unwrap();
    }

    assert!(wait_until(|| ran.load(Ordering::SeqCst) == 2000));
    assert!(wait_until(|| pool.active_count() == 0));

    pool.shutdown();
    assert!(pool.await_termination(Duration::from_secs(10)));
    assert_eq!(pool.active_count(), 0);
}

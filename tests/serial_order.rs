//! Ordering and exclusion guarantees of a single queue.

#![allow(missing_docs)]

use dispatchq::test_utils::begin;
use dispatchq::{QueueFeatures, SerialQueue, ThreadPool, ThreadPoolConfig};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn pooled_queue(workers: usize) -> SerialQueue {
    let pool = ThreadPool::new(ThreadPoolConfig::with_workers(workers)).expect("pool");
    SerialQueue::with_pool(Arc::new(pool), QueueFeatures::default())
}

#[test]
fn sync_on_idle_queue_runs_inline() {
    begin("sync_on_idle_queue_runs_inline");
    let queue = pooled_queue(2);
    let hit = Arc::new(Mutex::new(Vec::new()));

    let caller = std::thread::current().id();
    let ran_on = {
        let hit = Arc::clone(&hit);
        queue
            .submit_sync(move || {
                hit.lock().unwrap().push(1);
                std::thread::current().id()
            })
            .expect("queue is live")
    };

    assert_eq!(*hit.lock().unwrap(), vec![1]);
    assert_eq!(ran_on, caller, "sync work must run on the caller's thread");
}

#[test]
fn async_items_drain_in_submission_order() {
    begin("async_items_drain_in_submission_order");
    let queue = pooled_queue(4);
    let hit = Arc::new(Mutex::new(Vec::new()));

    for i in 0..50 {
        let hit = Arc::clone(&hit);
        queue
            .submit_async(move || hit.lock().unwrap().push(i))
            .expect("queue is live");
    }
    // A sync submission is ordered after everything already queued.
    queue.submit_sync(|| ()).expect("queue is live");

    let order = hit.lock().unwrap().clone();
    let expected: Vec<i32> = (0..50).collect();
    assert_eq!(order, expected);
}

#[test]
fn work_items_never_overlap() {
    begin("work_items_never_overlap");
    let queue = pooled_queue(4);
    let active = Arc::new(AtomicUsize::new(0));
    let max_active = Arc::new(AtomicUsize::new(0));

    for _ in 0..20 {
        let active = Arc::clone(&active);
        let max_active = Arc::clone(&max_active);
        queue
            .submit_async(move || {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                max_active.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(1));
                active.fetch_sub(1, Ordering::SeqCst);
            })
            .expect("queue is live");
    }
    queue.submit_sync(|| ()).expect("queue is live");

    assert_eq!(
        max_active.load(Ordering::SeqCst),
        1,
        "two items of one queue ran concurrently"
    );
}

#[test]
fn sync_waits_for_inflight_async() {
    begin("sync_waits_for_inflight_async");
    let queue = pooled_queue(2);
    let hit = Arc::new(Mutex::new(Vec::new()));

    {
        let hit = Arc::clone(&hit);
        queue
            .submit_async(move || {
                hit.lock().unwrap().push(1);
                std::thread::sleep(Duration::from_millis(100));
                hit.lock().unwrap().push(2);
            })
            .expect("queue is live");
    }
    {
        let hit = Arc::clone(&hit);
        queue
            .submit_sync(move || hit.lock().unwrap().push(3))
            .expect("queue is live");
    }

    assert_eq!(*hit.lock().unwrap(), vec![1, 2, 3]);
}

#[test]
fn program_order_is_kept_per_submitting_thread() {
    begin("program_order_is_kept_per_submitting_thread");
    let queue = pooled_queue(4);
    let hit = Arc::new(Mutex::new(Vec::new()));

    let submitters: Vec<_> = (0..4)
        .map(|thread_tag: usize| {
            let queue = queue.clone();
            let hit = Arc::clone(&hit);
            std::thread::spawn(move || {
                for i in 0..25 {
                    let hit = Arc::clone(&hit);
                    queue
                        .submit_async(move || hit.lock().unwrap().push((thread_tag, i)))
                        .expect("queue is live");
                }
            })
        })
        .collect();
    for submitter in submitters {
        submitter.join().expect("submitter panicked");
    }
    queue.submit_sync(|| ()).expect("queue is live");

    let order = hit.lock().unwrap().clone();
    assert_eq!(order.len(), 100);
    for tag in 0..4 {
        let per_thread: Vec<usize> = order
            .iter()
            .filter(|(t, _)| *t == tag)
            .map(|&(_, i)| i)
            .collect();
        let expected: Vec<usize> = (0..25).collect();
        assert_eq!(per_thread, expected, "thread {tag} lost its program order");
    }
}

#[test]
fn distinct_queues_share_a_pool_without_coupling() {
    begin("distinct_queues_share_a_pool_without_coupling");
    let pool = Arc::new(ThreadPool::new(ThreadPoolConfig::with_workers(4)).expect("pool"));
    let first = SerialQueue::with_pool(pool.clone(), QueueFeatures::default());
    let second = SerialQueue::with_pool(pool, QueueFeatures::default());

    let first_log = Arc::new(Mutex::new(Vec::new()));
    let second_log = Arc::new(Mutex::new(Vec::new()));

    for i in 0..10 {
        let log = Arc::clone(&first_log);
        first
            .submit_async(move || log.lock().unwrap().push(i))
            .expect("queue is live");
        let log = Arc::clone(&second_log);
        second
            .submit_async(move || log.lock().unwrap().push(i))
            .expect("queue is live");
    }
    first.submit_sync(|| ()).expect("queue is live");
    second.submit_sync(|| ()).expect("queue is live");

    let expected: Vec<i32> = (0..10).collect();
    assert_eq!(*first_log.lock().unwrap(), expected);
    assert_eq!(*second_log.lock().unwrap(), expected);
}

//! Verification scenarios shared by the process and thread test suites
//!
//! Every scenario takes the harness it runs under, so the same checks prove
//! the runtime both across forked processes and across threads.

use shmrt_core::harness::SHORT_SLEEP;
use shmrt_core::storm::{
    DEFAULT_STORM_ITERATIONS, STORM_MUTEX_OFFSET, counter_offset, increment_storm, read_counter,
    storm_segment_size,
};
use shmrt_core::{ChildHarness, Segment, ShmErrorKind, ShmRuntime};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

/// Size of the default segment.
pub const DEFAULT_SEGMENT_SIZE: usize = 256;

/// Offset of the mutex embedded in the default segment.
pub const MUTEX_OFFSET: usize = 64;

/// Non page-multiple size used for the large-range scenario.
pub const LARGE_SIZE: usize = 0x1000 - 4;

/// Polls before a waiting child gives up (about ten seconds).
const MAX_POLLS: u32 = 10_000;

/// Runtime with default configuration, logging to the test output.
///
/// Set `RUST_LOG=shmrt_core=debug` to see segment and mutex events.
pub fn runtime() -> ShmRuntime {
    shmrt_core::init_tracing();
    ShmRuntime::default()
}

/// Name unique to this process and call, so suites can run in parallel.
pub fn unique_name(tag: &str) -> String {
    static COUNTER: AtomicU32 = AtomicU32::new(0);
    let id = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{tag}_{}_{id}", std::process::id())
}

fn large_pattern(i: usize) -> u8 {
    (i % 251) as u8
}

/// Parent writes, a child reads and answers, parent sees the answer.
///
/// With `reattach` the child maps the segment by name; otherwise it uses the
/// handle the parent created.
pub fn read_write<H: ChildHarness>(harness: &mut H, reattach: bool) {
    let runtime = runtime();
    let name = unique_name("read_write");
    let seg = Arc::new(runtime.create_segment(&name, DEFAULT_SEGMENT_SIZE).unwrap());
    assert!(seg.base().all_eq(0));
    seg.base().write_u8(0, b'p');

    let child_seg = Arc::clone(&seg);
    let child_runtime = runtime.clone();
    let child_name = name.clone();
    harness
        .spawn_child(move |ctx| {
            let attached;
            let seg: &Segment = if reattach {
                attached = child_runtime
                    .attach_segment(&child_name, DEFAULT_SEGMENT_SIZE)
                    .unwrap();
                &attached
            } else {
                child_seg.as_ref()
            };
            ctx.check(seg.base().read_u8(0) == b'p');
            seg.base().write_u8(1, b'c');
        })
        .unwrap();
    harness.wait_for_children().unwrap();

    assert_eq!(seg.base().read_u8(1), b'c');
    let again = runtime.attach_segment(&name, DEFAULT_SEGMENT_SIZE).unwrap();
    assert_eq!(again.base().to_vec(0, 2), b"pc");

    runtime.destroy_segment(&name).unwrap();
}

/// Whole-range pattern integrity for a size that is not a page multiple.
pub fn large<H: ChildHarness>(harness: &mut H) {
    let runtime = runtime();
    let name = unique_name("large");
    let seg = runtime.create_segment(&name, LARGE_SIZE).unwrap();
    assert!(seg.base().all_eq(0));

    for i in 0..LARGE_SIZE {
        seg.base().write_u8(i, large_pattern(i));
    }

    let child_runtime = runtime.clone();
    let child_name = name.clone();
    harness
        .spawn_child(move |ctx| {
            let seg = child_runtime
                .attach_segment(&child_name, LARGE_SIZE)
                .unwrap();
            let view = seg.base();
            ctx.check((0..LARGE_SIZE).all(|i| view.read_u8(i) == large_pattern(i)));
            for i in 0..LARGE_SIZE {
                view.write_u8(i, !large_pattern(i));
            }
        })
        .unwrap();
    harness.wait_for_children().unwrap();

    let view = seg.base();
    assert!((0..LARGE_SIZE).all(|i| view.read_u8(i) == !large_pattern(i)));

    runtime.destroy_segment(&name).unwrap();
}

/// Two names never share bytes, even with different sizes.
pub fn distinct<H: ChildHarness>(harness: &mut H) {
    let runtime = runtime();
    let default_name = unique_name("distinct_default");
    let other_name = unique_name("distinct_other");
    let default_seg = runtime
        .create_segment(&default_name, DEFAULT_SEGMENT_SIZE)
        .unwrap();
    let other_seg = runtime
        .create_segment(&other_name, DEFAULT_SEGMENT_SIZE * 2)
        .unwrap();

    for (name, size, marker) in [
        (default_name.clone(), DEFAULT_SEGMENT_SIZE, b'1'),
        (other_name.clone(), DEFAULT_SEGMENT_SIZE * 2, b'2'),
    ] {
        let child_runtime = runtime.clone();
        harness
            .spawn_child(move |_| {
                let seg = child_runtime.attach_segment(&name, size).unwrap();
                seg.base().write_u8(0, marker);
            })
            .unwrap();
    }
    harness.wait_for_children().unwrap();

    assert_eq!(default_seg.base().read_u8(0), b'1');
    assert_eq!(other_seg.base().read_u8(0), b'2');
    for (seg, size) in [(&default_seg, DEFAULT_SEGMENT_SIZE), (&other_seg, DEFAULT_SEGMENT_SIZE * 2)] {
        assert!(seg.base().to_vec(1, size - 1).iter().all(|&b| b == 0));
    }

    runtime.destroy_segment(&default_name).unwrap();
    runtime.destroy_segment(&other_name).unwrap();
}

/// After destroy nobody can attach, and a new create starts from zero.
pub fn destroy<H: ChildHarness>(harness: &mut H) {
    let runtime = runtime();
    let name = unique_name("destroy");
    let seg = runtime.create_segment(&name, DEFAULT_SEGMENT_SIZE).unwrap();
    seg.base().fill(0, DEFAULT_SEGMENT_SIZE, 0x5A);

    runtime.destroy_segment(&name).unwrap();
    let err = runtime
        .attach_segment(&name, DEFAULT_SEGMENT_SIZE)
        .unwrap_err();
    assert_eq!(err.kind(), ShmErrorKind::NotFound);

    let child_runtime = runtime.clone();
    let child_name = name.clone();
    harness
        .spawn_child(move |ctx| {
            let result = child_runtime.attach_segment(&child_name, 8);
            ctx.check(matches!(result, Err(e) if e.kind() == ShmErrorKind::NotFound));
        })
        .unwrap();
    harness.wait_for_children().unwrap();

    let fresh = runtime.create_segment(&name, DEFAULT_SEGMENT_SIZE).unwrap();
    assert!(fresh.base().all_eq(0));
    // The old handle still maps its own, now nameless, memory.
    assert!(seg.base().all_eq(0x5A));

    runtime.destroy_segment(&name).unwrap();
}

/// Re-creating without destroy yields an independent, zeroed segment.
pub fn create_twice<H: ChildHarness>(harness: &mut H) {
    let runtime = runtime();
    let name = unique_name("create_twice");
    let first = runtime.create_segment(&name, DEFAULT_SEGMENT_SIZE).unwrap();
    first.base().write_u32(0, 0x1111_1111);

    let second = runtime.create_segment(&name, DEFAULT_SEGMENT_SIZE).unwrap();
    assert!(second.base().all_eq(0));
    second.base().write_u32(4, 0x2222_2222);

    assert_eq!(first.base().read_u32(0), 0x1111_1111);
    assert_eq!(first.base().read_u32(4), 0);
    assert_eq!(second.base().read_u32(0), 0);

    let child_runtime = runtime.clone();
    let child_name = name.clone();
    harness
        .spawn_child(move |ctx| {
            let seg = child_runtime
                .attach_segment(&child_name, DEFAULT_SEGMENT_SIZE)
                .unwrap();
            ctx.check(seg.base().read_u32(0) == 0);
            ctx.check(seg.base().read_u32(4) == 0x2222_2222);
            seg.base().write_u32(8, 0x3333_3333);
        })
        .unwrap();
    harness.wait_for_children().unwrap();

    assert_eq!(second.base().read_u32(8), 0x3333_3333);
    assert_eq!(first.base().read_u32(8), 0);

    runtime.destroy_segment(&name).unwrap();
}

/// Both children see the parent's data; child 2 sees child 1's write
/// once it is published under the mutex.
pub fn two_kids<H: ChildHarness>(harness: &mut H) {
    const PARENT_VALUE: u32 = 0x00C0_FFEE;
    const KID_VALUE: u32 = 42;

    let runtime = runtime();
    let name = unique_name("two_kids");
    let seg = runtime.create_segment(&name, DEFAULT_SEGMENT_SIZE).unwrap();
    let _mutex = runtime.create_mutex(&seg, MUTEX_OFFSET).unwrap();
    seg.base().write_u32(0, PARENT_VALUE);

    let kid1_runtime = runtime.clone();
    let kid1_name = name.clone();
    harness
        .spawn_child(move |ctx| {
            let seg = kid1_runtime
                .attach_segment(&kid1_name, DEFAULT_SEGMENT_SIZE)
                .unwrap();
            let mutex = kid1_runtime.attach_mutex(&seg, MUTEX_OFFSET).unwrap();
            ctx.check(seg.base().read_u32(0) == PARENT_VALUE);

            let guard = mutex.lock().unwrap();
            seg.base().write_u32(4, KID_VALUE);
            guard.unlock().unwrap();
        })
        .unwrap();

    let kid2_runtime = runtime.clone();
    let kid2_name = name.clone();
    harness
        .spawn_child(move |ctx| {
            let seg = kid2_runtime
                .attach_segment(&kid2_name, DEFAULT_SEGMENT_SIZE)
                .unwrap();
            let mutex = kid2_runtime.attach_mutex(&seg, MUTEX_OFFSET).unwrap();
            ctx.check(seg.base().read_u32(0) == PARENT_VALUE);

            for _ in 0..MAX_POLLS {
                let guard = mutex.lock().unwrap();
                let seen = seg.base().read_u32(4);
                guard.unlock().unwrap();
                if seen == KID_VALUE {
                    return;
                }
                std::thread::sleep(SHORT_SLEEP);
            }
            ctx.signal_failed();
        })
        .unwrap();

    harness.wait_for_children().unwrap();
    assert_eq!(seg.base().read_u32(0), PARENT_VALUE);
    assert_eq!(seg.base().read_u32(4), KID_VALUE);

    runtime.destroy_segment(&name).unwrap();
}

/// A child that dies holding the mutex leaves it recoverable, and the next
/// locker is told so exactly once.
pub fn dead_holder<H: ChildHarness>(harness: &mut H) {
    let runtime = runtime();
    let name = unique_name("dead_holder");
    let seg = runtime.create_segment(&name, DEFAULT_SEGMENT_SIZE).unwrap();
    let mutex = runtime.create_mutex(&seg, MUTEX_OFFSET).unwrap();

    let child_runtime = runtime.clone();
    let child_name = name.clone();
    harness
        .spawn_child(move |ctx| {
            let seg = child_runtime
                .attach_segment(&child_name, DEFAULT_SEGMENT_SIZE)
                .unwrap();
            let mutex = child_runtime.attach_mutex(&seg, MUTEX_OFFSET).unwrap();
            let guard = mutex.lock().unwrap();
            ctx.check(!guard.owner_died());
            seg.base().write_u32(0, 1);
            std::mem::forget(guard);
            drop(mutex);
            // The kernel can only mark the lock owner-dead at exit while
            // the state is still mapped.
            std::mem::forget(seg);
        })
        .unwrap();
    harness.wait_for_children().unwrap();

    let guard = mutex.lock().unwrap();
    assert!(guard.owner_died());
    assert_eq!(seg.base().read_u32(0), 1);
    guard.unlock().unwrap();

    let guard = mutex.lock().unwrap();
    assert!(!guard.owner_died());
    guard.unlock().unwrap();

    runtime.destroy_segment(&name).unwrap();
}

/// Two children hammer one counter through the embedded mutex.
pub fn mutex_storm<H: ChildHarness>(harness: &mut H) {
    const CHILDREN: u32 = 2;

    let runtime = runtime();
    let name = unique_name("mutex_storm");
    let size = storm_segment_size(&runtime);
    let seg = runtime.create_segment(&name, size).unwrap();
    let mutex = runtime.create_mutex(&seg, STORM_MUTEX_OFFSET).unwrap();
    let counter = counter_offset(&runtime);

    for _ in 0..CHILDREN {
        let child_runtime = runtime.clone();
        let child_name = name.clone();
        harness
            .spawn_child(move |ctx| {
                let seg = child_runtime.attach_segment(&child_name, size).unwrap();
                let mutex = child_runtime
                    .attach_mutex(&seg, STORM_MUTEX_OFFSET)
                    .unwrap();
                let done = increment_storm(&seg, &mutex, counter, DEFAULT_STORM_ITERATIONS);
                ctx.check(done.is_ok());
            })
            .unwrap();
    }

    // The parent contends too, without changing the count.
    harness.short_sleep();
    let _ = read_counter(&seg, &mutex, counter).unwrap();

    harness.wait_for_children().unwrap();
    assert_eq!(
        read_counter(&seg, &mutex, counter).unwrap(),
        CHILDREN * DEFAULT_STORM_ITERATIONS
    );
    assert_eq!(CHILDREN * DEFAULT_STORM_ITERATIONS, 2_097_150);

    runtime.destroy_segment(&name).unwrap();
}

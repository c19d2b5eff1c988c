//! Allocation behavior of `rk_mem::Pool`.

use std::collections::HashSet;
use std::thread;

use rk_mem::{Pool, PoolError};

#[derive(Debug, Default)]
struct Frame {
    bytes: [u8; 16],
    len: usize,
}

#[test]
fn capacity_bounds_allocation() {
    let pool: Pool<Frame> = Pool::with_default("frames", 10);

    let blocks: Vec<_> = (0..10).map(|_| pool.alloc().unwrap()).collect();
    let indices: HashSet<u32> = blocks.iter().map(|b| b.index()).collect();
    assert_eq!(indices.len(), 10, "handles must be distinct");

    assert!(pool.alloc().is_none());
    assert_eq!(pool.stats().exhausted, 1);

    let mut blocks = blocks;
    let one = blocks.pop().unwrap();
    pool.free(one).unwrap();

    let again = pool.alloc();
    assert!(again.is_some());
    assert!(pool.alloc().is_none());
}

#[test]
fn dropping_a_handle_returns_the_block() {
    let pool: Pool<Frame> = Pool::with_default("frames", 2);
    {
        let _a = pool.alloc().unwrap();
        let _b = pool.alloc().unwrap();
        assert_eq!(pool.outstanding(), 2);
    }
    assert_eq!(pool.outstanding(), 0);
    assert_eq!(pool.stats().min_free, 0);
}

#[test]
fn block_contents_survive_a_round_trip() {
    let pool: Pool<Frame> = Pool::with_default("frames", 1);
    let mut block = pool.alloc().unwrap();
    block.bytes[..3].copy_from_slice(b"abc");
    block.len = 3;
    pool.free(block).unwrap();

    // Blocks are recycled as-is; callers reset what they use.
    let block = pool.alloc().unwrap();
    assert_eq!(&block.bytes[..block.len], b"abc");
}

#[test]
fn custom_initializer_fills_every_block() {
    let mut next = 0u32;
    let pool = Pool::new("ids", 3, || {
        next += 1;
        next
    });
    let mut seen: Vec<u32> = (0..3).map(|_| *pool.alloc().unwrap()).collect();
    seen.sort_unstable();
    // Each handle was dropped immediately, so the same slot may be reused.
    assert!(seen.iter().all(|v| (1..=3).contains(v)));
}

#[test]
fn foreign_block_is_refused() {
    let a: Pool<u8> = Pool::with_default("a", 1);
    let b: Pool<u8> = Pool::with_default("b", 1);
    let block = a.alloc().unwrap();
    assert_eq!(b.free(block), Err(PoolError::ForeignBlock));
    // The refused handle was dropped and went home to `a`.
    assert_eq!(a.outstanding(), 0);
    assert_eq!(b.outstanding(), 0);
}

#[test]
fn concurrent_alloc_free_never_over_allocates() {
    let pool: Pool<u64> = Pool::with_default("shared", 4);
    let workers: Vec<_> = (0..4)
        .map(|_| {
            let pool = pool.clone();
            thread::spawn(move || {
                for _ in 0..1_000 {
                    if let Some(mut block) = pool.alloc() {
                        *block += 1;
                        assert!(pool.outstanding() <= 4);
                        pool.free(block).unwrap();
                    }
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }

    let stats = pool.stats();
    assert_eq!(stats.in_use, 0);
    assert_eq!(stats.free, 4);
}

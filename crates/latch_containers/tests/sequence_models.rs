//! Array, Deque and RingBuffer checked against std reference models.

mod common;

use latch_containers::{Array, Deque, RingBuffer, Settings, TrackingAllocator, HEAP};
use proptest::prelude::*;
use std::collections::VecDeque;

#[derive(Debug, Clone)]
enum ArrayOp {
    Push(u32),
    Prepend(u32),
    Insert(usize, u32),
    Pop,
    Remove(usize, usize),
    SwapRemove(usize),
    Truncate(usize),
    Resize(usize),
}

fn arb_array_op() -> impl Strategy<Value = ArrayOp> {
    prop_oneof![
        any::<u32>().prop_map(ArrayOp::Push),
        any::<u32>().prop_map(ArrayOp::Prepend),
        (any::<usize>(), any::<u32>()).prop_map(|(i, v)| ArrayOp::Insert(i, v)),
        Just(ArrayOp::Pop),
        (any::<usize>(), 0usize..4).prop_map(|(i, n)| ArrayOp::Remove(i, n)),
        any::<usize>().prop_map(ArrayOp::SwapRemove),
        (0usize..64).prop_map(ArrayOp::Truncate),
        (0usize..64).prop_map(ArrayOp::Resize),
    ]
}

#[derive(Debug, Clone)]
enum DequeOp {
    PushBack(u32),
    PushFront(u32),
    PopBack,
    PopFront,
}

fn arb_deque_op() -> impl Strategy<Value = DequeOp> {
    prop_oneof![
        any::<u32>().prop_map(DequeOp::PushBack),
        any::<u32>().prop_map(DequeOp::PushFront),
        Just(DequeOp::PopBack),
        Just(DequeOp::PopFront),
    ]
}

proptest! {
    #[test]
    fn array_matches_vec(ops in prop::collection::vec(arb_array_op(), 0..200)) {
        let tracker = TrackingAllocator::new(&HEAP);
        {
            let mut array = Array::new_in(4, &tracker).unwrap();
            let mut model: Vec<u32> = Vec::new();
            for op in ops {
                match op {
                    ArrayOp::Push(v) => {
                        array.push(v).unwrap();
                        model.push(v);
                    }
                    ArrayOp::Prepend(v) => {
                        array.prepend(v).unwrap();
                        model.insert(0, v);
                    }
                    ArrayOp::Insert(i, v) => {
                        let i = i % (model.len() + 1);
                        array.insert(i, v).unwrap();
                        model.insert(i, v);
                    }
                    ArrayOp::Pop => {
                        prop_assert_eq!(array.pop(), model.pop());
                    }
                    ArrayOp::Remove(i, n) => {
                        if model.is_empty() {
                            continue;
                        }
                        let i = i % model.len();
                        let n = n.min(model.len() - i);
                        array.remove(i, n);
                        model.drain(i..i + n);
                    }
                    ArrayOp::SwapRemove(i) => {
                        if model.is_empty() {
                            continue;
                        }
                        let i = i % model.len();
                        prop_assert_eq!(array.swap_remove(i), model.swap_remove(i));
                    }
                    ArrayOp::Truncate(n) => {
                        array.truncate(n);
                        model.truncate(n);
                    }
                    ArrayOp::Resize(n) => {
                        array.resize(n, 7).unwrap();
                        model.resize(n, 7);
                    }
                }
                prop_assert_eq!(array.len(), model.len());
                prop_assert!(array.len() <= array.capacity());
                prop_assert_eq!(array.as_slice(), model.as_slice());
            }
        }
        prop_assert_eq!(tracker.live_bytes(), 0);
    }

    #[test]
    fn deque_matches_vec_deque(ops in prop::collection::vec(arb_deque_op(), 0..2000)) {
        let mut settings = Settings::default();
        settings.deque.block_bytes = Settings::MIN_BLOCK_BYTES;
        let tracker = TrackingAllocator::new(&HEAP);
        {
            let mut deque = Deque::with_settings_in(&tracker, &settings).unwrap();
            let mut model: VecDeque<u32> = VecDeque::new();
            for op in ops {
                match op {
                    DequeOp::PushBack(v) => {
                        deque.push_back(v).unwrap();
                        model.push_back(v);
                    }
                    DequeOp::PushFront(v) => {
                        deque.push_front(v).unwrap();
                        model.push_front(v);
                    }
                    DequeOp::PopBack => prop_assert_eq!(deque.pop_back(), model.pop_back()),
                    DequeOp::PopFront => prop_assert_eq!(deque.pop_front(), model.pop_front()),
                }
                prop_assert_eq!(deque.len(), model.len());
                prop_assert_eq!(deque.front(), model.front());
                prop_assert_eq!(deque.back(), model.back());
                // Live span plus at most one spare block at each end.
                let span = (model.len() + 2 * deque.block_len() - 1) / deque.block_len();
                prop_assert!(deque.block_count() <= span.max(1) + 2);
            }
            prop_assert!(deque.iter().eq(model.iter()));
        }
        prop_assert_eq!(tracker.live_bytes(), 0);
    }

    #[test]
    fn ring_buffer_fills_and_drains(capacity in 1usize..64, start in 0usize..64) {
        let mut ring = RingBuffer::new(capacity).unwrap();
        // Rotate the head so the fill wraps around the end of the block.
        for i in 0..start {
            ring.push_back(i).unwrap();
            prop_assert_eq!(ring.pop_front(), Some(i));
        }
        for i in 0..capacity {
            prop_assert!(!ring.is_full());
            ring.push_back(i).unwrap();
        }
        prop_assert!(ring.is_full());
        prop_assert_eq!(ring.push_back(usize::MAX), Err(usize::MAX));
        prop_assert_eq!(ring.push_front(usize::MAX), Err(usize::MAX));
        for i in 0..capacity {
            prop_assert_eq!(ring.pop_front(), Some(i));
        }
        prop_assert!(ring.is_empty());
        prop_assert_eq!(ring.pop_back(), None);
    }
}

#[test]
fn reserve_then_overflow_bounds_reallocations() {
    common::init_tracing();
    let tracker = TrackingAllocator::new(&HEAP);
    let mut array = Array::new_in(1, &tracker).unwrap();
    array.reserve(100).unwrap();
    let after_reserve = tracker.alloc_count();
    for i in 0..1000u32 {
        array.push(i).unwrap();
    }
    // 100 -> 200 -> 400 -> 800 -> 1600: ceil(log2(1000 / 100)) = 4.
    assert!(tracker.alloc_count() - after_reserve <= 4);
    assert_eq!(array.len(), 1000);
}

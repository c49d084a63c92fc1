//! Bounded lockfree ring queue.
//!
//! A fixed-capacity queue built on sequence-stamped slots: every slot
//! carries an atomic sequence number that encodes whether it is free to
//! write or holds a value to read. Producers and consumers claim slots by
//! bumping their position counter with a compare-exchange, then complete
//! the transfer with a release store on the slot's sequence.
//!
//! The algorithm supports multiple producers and consumers; the submission
//! pipeline uses one instance as a multi-producer/single-consumer submit
//! queue and another as a single-producer/single-consumer finish queue.
//!
//! `len_approx` is a racy size estimate, exact only while the queue is
//! quiescent; the pipeline uses it for its "observed empty" signals where a
//! stale value merely delays a wakeup.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};

struct Slot<T> {
    /// Encodes slot state relative to the position counters: `pos` means
    /// free for the producer claiming `pos`, `pos + 1` means readable for
    /// the consumer claiming `pos`.
    sequence: AtomicUsize,
    value: UnsafeCell<MaybeUninit<T>>,
}

/// Bounded lockfree MPMC queue with power-of-two capacity.
#[repr(C, align(64))]
pub struct RingQueue<T> {
    buffer: Box<[Slot<T>]>,
    mask: usize,
    _pad0: [u8; 64],
    enqueue_pos: AtomicUsize,
    _pad1: [u8; 64],
    dequeue_pos: AtomicUsize,
}

// SAFETY: values are handed between threads through slot claims; a slot's
// value is touched only by the thread that claimed it.
unsafe impl<T: Send> Send for RingQueue<T> {}
unsafe impl<T: Send> Sync for RingQueue<T> {}

impl<T> RingQueue<T> {
    /// Create a queue holding up to `capacity` values.
    ///
    /// `capacity` must be a power of two.
    pub fn new(capacity: usize) -> Self {
        assert!(
            capacity.is_power_of_two(),
            "ring capacity must be a power of two"
        );

        let buffer = (0..capacity)
            .map(|i| Slot {
                sequence: AtomicUsize::new(i),
                value: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            buffer,
            mask: capacity - 1,
            _pad0: [0; 64],
            enqueue_pos: AtomicUsize::new(0),
            _pad1: [0; 64],
            dequeue_pos: AtomicUsize::new(0),
        }
    }

    /// Capacity the queue was created with.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Enqueue a value, or hand it back if the queue is full.
    pub fn push(&self, value: T) -> Result<(), T> {
        let mut pos = self.enqueue_pos.load(Ordering::Relaxed);
        loop {
            let slot = &self.buffer[pos & self.mask];
            let sequence = slot.sequence.load(Ordering::Acquire);

            if sequence == pos {
                match self.enqueue_pos.compare_exchange_weak(
                    pos,
                    pos + 1,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        // SAFETY: claiming `pos` grants exclusive write
                        // access to this slot until the sequence store.
                        unsafe { (*slot.value.get()).write(value) };
                        slot.sequence.store(pos + 1, Ordering::Release);
                        return Ok(());
                    }
                    Err(current) => pos = current,
                }
            } else if sequence < pos {
                // The slot still holds a value a full lap behind us.
                return Err(value);
            } else {
                pos = self.enqueue_pos.load(Ordering::Relaxed);
            }
        }
    }

    /// Dequeue a value, or `None` if the queue is observed empty.
    pub fn pop(&self) -> Option<T> {
        let mut pos = self.dequeue_pos.load(Ordering::Relaxed);
        loop {
            let slot = &self.buffer[pos & self.mask];
            let sequence = slot.sequence.load(Ordering::Acquire);

            if sequence == pos + 1 {
                match self.dequeue_pos.compare_exchange_weak(
                    pos,
                    pos + 1,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        // SAFETY: claiming `pos` grants exclusive read
                        // access; the slot was written before its sequence
                        // was released to `pos + 1`.
                        let value = unsafe { (*slot.value.get()).assume_init_read() };
                        slot.sequence
                            .store(pos + self.mask + 1, Ordering::Release);
                        return Some(value);
                    }
                    Err(current) => pos = current,
                }
            } else if sequence <= pos {
                return None;
            } else {
                pos = self.dequeue_pos.load(Ordering::Relaxed);
            }
        }
    }

    /// Racy estimate of the number of queued values.
    #[inline]
    pub fn len_approx(&self) -> usize {
        let enqueue = self.enqueue_pos.load(Ordering::Relaxed);
        let dequeue = self.dequeue_pos.load(Ordering::Relaxed);
        enqueue.saturating_sub(dequeue)
    }

    /// Racy emptiness check; see [`len_approx`](Self::len_approx).
    #[inline]
    pub fn is_empty_approx(&self) -> bool {
        self.len_approx() == 0
    }
}

impl<T> Drop for RingQueue<T> {
    fn drop(&mut self) {
        while self.pop().is_some() {}
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_fifo_order() {
        let queue = RingQueue::new(8);
        for i in 0..5 {
            queue.push(i).unwrap();
        }
        for i in 0..5 {
            assert_eq!(queue.pop(), Some(i));
        }
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_full_queue_rejects_push() {
        let queue = RingQueue::new(4);
        for i in 0..4 {
            queue.push(i).unwrap();
        }
        assert_eq!(queue.push(99), Err(99));
        assert_eq!(queue.pop(), Some(0));
        queue.push(99).unwrap();
    }

    #[test]
    fn test_len_approx_quiescent() {
        let queue = RingQueue::new(8);
        assert!(queue.is_empty_approx());
        queue.push(1u32).unwrap();
        queue.push(2u32).unwrap();
        assert_eq!(queue.len_approx(), 2);
        queue.pop();
        assert_eq!(queue.len_approx(), 1);
    }

    #[test]
    fn test_wraparound_many_laps() {
        let queue = RingQueue::new(4);
        for lap in 0..100u32 {
            for i in 0..4 {
                queue.push(lap * 4 + i).unwrap();
            }
            for i in 0..4 {
                assert_eq!(queue.pop(), Some(lap * 4 + i));
            }
        }
    }

    #[test]
    fn test_drop_releases_queued_values() {
        let value = Arc::new(0u64);
        {
            let queue = RingQueue::new(4);
            queue.push(Arc::clone(&value)).unwrap();
            queue.push(Arc::clone(&value)).unwrap();
        }
        assert_eq!(Arc::strong_count(&value), 1);
    }

    #[test]
    fn test_multi_producer_single_consumer() {
        let queue = Arc::new(RingQueue::new(32));
        let producers: Vec<_> = (0..4u64)
            .map(|p| {
                let queue = Arc::clone(&queue);
                std::thread::spawn(move || {
                    for i in 0..1000u64 {
                        let value = p * 1_000_000 + i;
                        loop {
                            if queue.push(value).is_ok() {
                                break;
                            }
                            std::thread::yield_now();
                        }
                    }
                })
            })
            .collect();

        let mut seen = HashSet::new();
        while seen.len() < 4000 {
            if let Some(value) = queue.pop() {
                assert!(seen.insert(value));
            } else {
                std::thread::yield_now();
            }
        }
        for producer in producers {
            producer.join().unwrap();
        }
        assert_eq!(queue.pop(), None);
    }
}

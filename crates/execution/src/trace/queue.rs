//! Lock-free trace queue.
//!
//! A Michael–Scott two-pointer FIFO with a sentinel node. Producers link new
//! nodes with a CAS on the tail's `next` pointer and help the tail along when
//! they find it lagging; consumers swing the head with a CAS and hand the old
//! sentinel to the epoch collector. Values live in `ManuallyDrop` so a node
//! that already surrendered its record is never dropped twice.

use crate::trace::record::TraceRecord;
use crossbeam::epoch::{self, Atomic, Owned, Shared};
use serde::Serialize;
use std::mem::ManuallyDrop;
use std::ptr;
use std::sync::atomic::{AtomicU64, Ordering};

struct Node {
    value: ManuallyDrop<Option<TraceRecord>>,
    next: Atomic<Node>,
}

impl Node {
    fn sentinel() -> Self {
        Self {
            value: ManuallyDrop::new(None),
            next: Atomic::null(),
        }
    }

    fn with_value(record: TraceRecord) -> Self {
        Self {
            value: ManuallyDrop::new(Some(record)),
            next: Atomic::null(),
        }
    }
}

/// Advisory queue statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TraceQueueStats {
    /// Total records ever enqueued
    pub enqueued: u64,
    /// Total records ever dequeued
    pub dequeued: u64,
    /// Approximate current depth
    pub depth: u64,
}

/// Multi-producer / multi-consumer FIFO of trace records.
pub struct TraceQueue {
    head: Atomic<Node>,
    tail: Atomic<Node>,
    enqueued: AtomicU64,
    dequeued: AtomicU64,
}

unsafe impl Send for TraceQueue {}
unsafe impl Sync for TraceQueue {}

impl TraceQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        let queue = Self {
            head: Atomic::null(),
            tail: Atomic::null(),
            enqueued: AtomicU64::new(0),
            dequeued: AtomicU64::new(0),
        };
        unsafe {
            let guard = epoch::unprotected();
            let sentinel = Owned::new(Node::sentinel()).into_shared(guard);
            queue.head.store(sentinel, Ordering::Relaxed);
            queue.tail.store(sentinel, Ordering::Relaxed);
        }
        queue
    }

    /// Appends a record; always succeeds, retrying under contention.
    pub fn enqueue(&self, record: TraceRecord) {
        let guard = epoch::pin();
        let new = Owned::new(Node::with_value(record)).into_shared(&guard);
        loop {
            let tail = self.tail.load(Ordering::Acquire, &guard);
            // The tail is never null after construction.
            let tail_ref = unsafe { tail.deref() };
            let next = tail_ref.next.load(Ordering::Acquire, &guard);
            if !next.is_null() {
                // Tail is lagging; help it along and retry.
                let _ = self.tail.compare_exchange(
                    tail,
                    next,
                    Ordering::Release,
                    Ordering::Relaxed,
                    &guard,
                );
                continue;
            }
            if tail_ref
                .next
                .compare_exchange(
                    Shared::null(),
                    new,
                    Ordering::Release,
                    Ordering::Relaxed,
                    &guard,
                )
                .is_ok()
            {
                let _ = self.tail.compare_exchange(
                    tail,
                    new,
                    Ordering::Release,
                    Ordering::Relaxed,
                    &guard,
                );
                self.enqueued.fetch_add(1, Ordering::Relaxed);
                return;
            }
        }
    }

    /// Removes the oldest record, or `None` when the queue is empty.
    pub fn dequeue(&self) -> Option<TraceRecord> {
        let guard = epoch::pin();
        loop {
            let head = self.head.load(Ordering::Acquire, &guard);
            let head_ref = unsafe { head.deref() };
            let next = head_ref.next.load(Ordering::Acquire, &guard);
            let next_ref = match unsafe { next.as_ref() } {
                Some(node) => node,
                None => return None,
            };
            let tail = self.tail.load(Ordering::Acquire, &guard);
            if head == tail {
                // Tail still points at the sentinel; help before swinging head.
                let _ = self.tail.compare_exchange(
                    tail,
                    next,
                    Ordering::Release,
                    Ordering::Relaxed,
                    &guard,
                );
            }
            if self
                .head
                .compare_exchange(head, next, Ordering::Release, Ordering::Relaxed, &guard)
                .is_ok()
            {
                // `next` is the new sentinel; only the winner of the head CAS
                // may take its value, and the node outlives this read via the
                // epoch guard.
                let value = unsafe { ManuallyDrop::into_inner(ptr::read(&next_ref.value)) };
                unsafe { guard.defer_destroy(head) };
                self.dequeued.fetch_add(1, Ordering::Relaxed);
                return value;
            }
        }
    }

    /// Removes up to `max` records. A zero `max` yields an empty batch.
    pub fn dequeue_batch(&self, max: usize) -> Vec<TraceRecord> {
        if max == 0 {
            return Vec::new();
        }
        let mut batch = Vec::with_capacity(max.min(64));
        while batch.len() < max {
            match self.dequeue() {
                Some(record) => batch.push(record),
                None => break,
            }
        }
        batch
    }

    /// Drains every remaining record.
    pub fn flush(&self) -> Vec<TraceRecord> {
        let mut drained = Vec::new();
        while let Some(record) = self.dequeue() {
            drained.push(record);
        }
        drained
    }

    /// Approximate number of queued records; advisory only.
    pub fn len(&self) -> u64 {
        let enqueued = self.enqueued.load(Ordering::Relaxed);
        let dequeued = self.dequeued.load(Ordering::Relaxed);
        enqueued.saturating_sub(dequeued)
    }

    /// Whether the queue looks empty; advisory only.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Counter snapshot.
    pub fn stats(&self) -> TraceQueueStats {
        let enqueued = self.enqueued.load(Ordering::Relaxed);
        let dequeued = self.dequeued.load(Ordering::Relaxed);
        TraceQueueStats {
            enqueued,
            dequeued,
            depth: enqueued.saturating_sub(dequeued),
        }
    }
}

impl Default for TraceQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TraceQueue {
    fn drop(&mut self) {
        // Drain records through the normal path so their drops run exactly
        // once, then free the remaining sentinel chain.
        while self.dequeue().is_some() {}
        unsafe {
            let guard = epoch::unprotected();
            let mut node = self.head.load(Ordering::Relaxed, guard);
            while !node.is_null() {
                let next = node.deref().next.load(Ordering::Relaxed, guard);
                drop(node.into_owned());
                node = next;
            }
        }
    }
}

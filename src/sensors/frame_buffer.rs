// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/homeguard-rs

//! Drop-oldest frame slot between acquisition and the detection pipeline

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam::queue::ArrayQueue;

use super::Frame;

/// Largest number of frames ever held
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

/// Bounded single/double-slot frame buffer
///
/// The producer never blocks: pushing into a full slot evicts the oldest frame.
pub struct FrameSlot {
    queue: ArrayQueue<Frame>,
    pushed: AtomicU64,
    dropped: AtomicU64,
}

impl FrameSlot {
    /// Capacity is clamped to `1..=MAX_FRAMES_IN_FLIGHT`
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.clamp(1, MAX_FRAMES_IN_FLIGHT)),
            pushed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Store a frame, returning the evicted one if the slot was full
    pub fn push(&self, frame: Frame) -> Option<Frame> {
        self.pushed.fetch_add(1, Ordering::Relaxed);
        let evicted = self.queue.force_push(frame);
        if evicted.is_some() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        evicted
    }

    /// Take the newest frame; anything older is discarded
    pub fn take_latest(&self) -> Option<Frame> {
        let mut latest = None;
        while let Some(frame) = self.queue.pop() {
            if latest.replace(frame).is_some() {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
        latest
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// Frames stored since creation
    pub fn pushed(&self) -> u64 {
        self.pushed.load(Ordering::Relaxed)
    }

    /// Frames discarded unread
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

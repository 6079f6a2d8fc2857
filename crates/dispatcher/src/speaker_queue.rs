//! Per-speaker bounded FIFO with priority classes.
//!
//! Three per-class deques give exactly the ordering the routing rules ask
//! for (Urgent before High before Normal, strict FIFO within a class)
//! without needing a general-purpose priority queue: "High is placed after
//! any existing Urgents but before Normals" falls out for free from popping
//! urgent, then high, then normal.

use std::collections::VecDeque;
use std::time::Instant;

use polyphony_buffer::{AudioSegment, Priority};

pub struct SpeakerQueue {
    user_id: String,
    urgent: VecDeque<AudioSegment>,
    high: VecDeque<AudioSegment>,
    normal: VecDeque<AudioSegment>,
    max_size: usize,
    last_active: Instant,
    is_active: bool,
}

impl SpeakerQueue {
    pub fn new(user_id: String, max_size: usize, now: Instant) -> Self {
        Self {
            user_id,
            urgent: VecDeque::new(),
            high: VecDeque::new(),
            normal: VecDeque::new(),
            max_size,
            last_active: now,
            is_active: false,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn len(&self) -> usize {
        self.urgent.len() + self.high.len() + self.normal.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn last_active(&self) -> Instant {
        self.last_active
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    /// Enqueue respecting priority; returns the segment back to the caller
    /// if the per-speaker cap is already reached.
    pub fn push(&mut self, segment: AudioSegment, now: Instant) -> Result<(), AudioSegment> {
        if self.len() >= self.max_size {
            return Err(segment);
        }
        match segment.priority {
            Priority::Urgent => self.urgent.push_back(segment),
            Priority::High => self.high.push_back(segment),
            Priority::Normal => self.normal.push_back(segment),
        }
        self.last_active = now;
        self.is_active = true;
        Ok(())
    }

    pub fn pop_next(&mut self) -> Option<AudioSegment> {
        self.urgent
            .pop_front()
            .or_else(|| self.high.pop_front())
            .or_else(|| self.normal.pop_front())
    }

    pub fn mark_idle_if_empty(&mut self) {
        if self.is_empty() {
            self.is_active = false;
        }
    }

    /// Remove every queued segment, in priority/FIFO order, leaving the
    /// queue empty and idle. Used by dispatcher shutdown to fail whatever
    /// never made it to a worker.
    pub fn drain_all(&mut self) -> Vec<AudioSegment> {
        let mut drained = Vec::with_capacity(self.len());
        while let Some(segment) = self.pop_next() {
            drained.push(segment);
        }
        self.is_active = false;
        drained
    }
}

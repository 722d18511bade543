// src/memory.rs
//
// Bounded experience store for replay training.
//
// FIFO eviction at `size_max`; sampling yields nothing until the buffer
// holds at least `size_min` transitions, so early training steps do not
// overfit a handful of samples.

use std::collections::VecDeque;

use rand::Rng;

use crate::types::Transition;

#[derive(Debug)]
pub struct Memory {
    samples: VecDeque<Transition>,
    size_max: usize,
    size_min: usize,
}

impl Memory {
    pub fn new(size_max: usize, size_min: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(size_max.min(4096)),
            size_max,
            size_min,
        }
    }

    /// Insert one transition, evicting the oldest when full.
    pub fn add(&mut self, sample: Transition) {
        if self.samples.len() == self.size_max {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Whether the buffer has reached its minimum fill level.
    pub fn can_sample(&self) -> bool {
        self.samples.len() >= self.size_min
    }

    /// Draw up to `batch_size` transitions without replacement.
    ///
    /// Returns an empty draw below the minimum fill level; never blocks.
    pub fn sample<R: Rng + ?Sized>(&self, batch_size: usize, rng: &mut R) -> Vec<Transition> {
        if !self.can_sample() {
            return Vec::new();
        }
        let amount = batch_size.min(self.samples.len());
        rand::seq::index::sample(rng, self.samples.len(), amount)
            .into_iter()
            .map(|i| self.samples[i].clone())
            .collect()
    }
}

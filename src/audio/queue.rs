//! Bounded sample queue between the provider and the output callback

use parking_lot::Mutex;
use ringbuf::{traits::*, HeapRb};
use std::sync::Arc;

/// Assistant audio waiting for the output device
///
/// Bounded; when the device falls behind, the oldest samples are dropped so
/// playback stays close to the live conversation.
pub struct PlaybackQueue {
    buffer: Arc<Mutex<HeapRb<f32>>>,
}

impl PlaybackQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: Arc::new(Mutex::new(HeapRb::new(capacity.max(1)))),
        }
    }

    /// Queue samples; returns how many older samples were discarded
    pub fn push(&self, samples: &[f32]) -> usize {
        let mut buffer = self.buffer.lock();
        let mut dropped = 0;
        for &sample in samples {
            if buffer.try_push(sample).is_err() {
                let _ = buffer.try_pop();
                let _ = buffer.try_push(sample);
                dropped += 1;
            }
        }
        dropped
    }

    /// Fill `out` with queued samples, padding with silence
    ///
    /// Returns the number of real samples written.
    pub fn fill(&self, out: &mut [f32]) -> usize {
        let mut buffer = self.buffer.lock();
        let mut written = 0;
        for slot in out.iter_mut() {
            match buffer.try_pop() {
                Some(sample) => {
                    *slot = sample;
                    written += 1;
                }
                None => *slot = 0.0,
            }
        }
        written
    }

    pub fn len(&self) -> usize {
        self.buffer.lock().occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.lock().is_empty()
    }

    pub fn clear(&self) {
        self.buffer.lock().clear();
    }

    pub fn capacity(&self) -> usize {
        self.buffer.lock().capacity().get()
    }
}

impl Clone for PlaybackQueue {
    fn clone(&self) -> Self {
        Self {
            buffer: Arc::clone(&self.buffer),
        }
    }
}

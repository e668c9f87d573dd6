use crate::fsk::Waveform;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

/// Outcome of one [`StreamingBuffer::fill`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillResult {
    /// The whole request was served from the waveform
    Filled,
    /// The waveform ran out part-way; the tail of the request is zeroed
    FilledWithPadding,
    /// The waveform was already exhausted; the whole request is zeroed
    StreamEnded,
    /// Trailing silence has been sent; the transmitter can be torn down
    AllSamplesSent,
}

/// Lifecycle of a streaming buffer. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StreamState {
    /// Waveform bytes remain
    Streaming = 0,
    /// Waveform exhausted, one silent buffer still owed
    Draining = 1,
    /// Silent buffer handed to the device, not yet known to be on air
    Ended = 2,
    /// The device asked for more after the silent buffer
    Done = 3,
}

impl StreamState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => StreamState::Streaming,
            1 => StreamState::Draining,
            2 => StreamState::Ended,
            _ => StreamState::Done,
        }
    }
}

#[derive(Debug)]
struct Shared {
    state: AtomicU8,
    bytes_sent: AtomicUsize,
}

/// Serves a precomputed waveform to a real-time transfer callback
///
/// The buffer is moved into the callback and only that context mutates the
/// cursor. Other threads observe progress through a [`StreamMonitor`].
/// `fill` never allocates or blocks.
#[derive(Debug)]
pub struct StreamingBuffer {
    waveform: Waveform,
    position: usize,
    shared: Arc<Shared>,
}

impl StreamingBuffer {
    pub fn new(waveform: Waveform) -> Self {
        let state = if waveform.is_empty() {
            StreamState::Draining
        } else {
            StreamState::Streaming
        };
        Self {
            waveform,
            position: 0,
            shared: Arc::new(Shared {
                state: AtomicU8::new(state as u8),
                bytes_sent: AtomicUsize::new(0),
            }),
        }
    }

    /// Handle for polling completion from another thread
    pub fn monitor(&self) -> StreamMonitor {
        StreamMonitor {
            shared: Arc::clone(&self.shared),
            total: self.waveform.len(),
        }
    }

    pub fn waveform(&self) -> &Waveform {
        &self.waveform
    }

    pub fn remaining(&self) -> usize {
        self.waveform.len() - self.position
    }

    pub fn state(&self) -> StreamState {
        StreamState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    /// Fill `buffer` with the next slice of interleaved I/Q bytes
    pub fn fill(&mut self, buffer: &mut [u8]) -> FillResult {
        match self.state() {
            StreamState::Streaming => {
                let samples = self.waveform.samples();
                let count = buffer.len().min(samples.len() - self.position);
                let src = &samples[self.position..self.position + count];

                for (dst, &sample) in buffer[..count].iter_mut().zip(src) {
                    *dst = sample as u8;
                }
                self.position += count;
                self.shared.bytes_sent.fetch_add(count, Ordering::Relaxed);

                if self.position == samples.len() {
                    self.set_state(StreamState::Draining);
                }

                if count < buffer.len() {
                    buffer[count..].fill(0);
                    FillResult::FilledWithPadding
                } else {
                    FillResult::Filled
                }
            }
            StreamState::Draining => {
                buffer.fill(0);
                self.set_state(StreamState::Ended);
                FillResult::StreamEnded
            }
            StreamState::Ended => {
                self.set_state(StreamState::Done);
                FillResult::AllSamplesSent
            }
            StreamState::Done => FillResult::AllSamplesSent,
        }
    }

    fn set_state(&self, state: StreamState) {
        self.shared.state.store(state as u8, Ordering::Release);
    }
}

/// Read-only view of a [`StreamingBuffer`]'s progress, safe to poll from any thread
#[derive(Debug, Clone)]
pub struct StreamMonitor {
    shared: Arc<Shared>,
    total: usize,
}

impl StreamMonitor {
    pub fn state(&self) -> StreamState {
        StreamState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    /// True once `fill` has returned [`FillResult::AllSamplesSent`]
    pub fn is_done(&self) -> bool {
        self.state() == StreamState::Done
    }

    pub fn bytes_sent(&self) -> usize {
        self.shared.bytes_sent.load(Ordering::Relaxed)
    }

    pub fn total_bytes(&self) -> usize {
        self.total
    }
}

//! Lock-free SPSC ring buffer for audio samples, plus the rolling
//! sample ring the pipeline keeps for `read_latest`-style access.
//!
//! The transport ring uses `ringbuf::HeapRb<f32>` which provides a wait-free
//! `push_slice` safe to call from the real-time audio callback.

pub mod chunk;
pub mod ring;

use ringbuf::{traits::Split, HeapRb};

pub use ringbuf::traits::{Consumer, Producer};

/// Type alias for the producer half — held by the audio callback thread.
pub type AudioProducer = ringbuf::HeapProd<f32>;

/// Type alias for the consumer half — held by the pipeline thread.
pub type AudioConsumer = ringbuf::HeapCons<f32>;

/// Transport capacity: 2^16 = 65 536 f32 samples ≈ 1.5 s at 44.1 kHz.
/// Enough slack to ride out a stalled worker without unbounded memory.
pub const RING_CAPACITY: usize = 1 << 16;

/// Create a matched producer/consumer pair backed by a heap-allocated ring buffer.
///
/// # Panics
/// Never panics — `HeapRb` construction cannot fail for reasonable capacities.
pub fn create_audio_ring() -> (AudioProducer, AudioConsumer) {
    HeapRb::<f32>::new(RING_CAPACITY).split()
}

//! Fixed-capacity rolling sample store owned by the pipeline thread.
//!
//! Unlike the SPSC transport ring, this ring is single-threaded and supports
//! non-destructive `read_latest` access: feature extraction re-reads the most
//! recent window without consuming it. Overflow is the intended steady state
//! of a live stream — old samples are silently overwritten.

/// Circular f32 sample buffer with overwrite-on-full semantics.
///
/// Capacity is fixed at construction (the pipeline sizes it at 4× the
/// configured chunk size). Starts zero-filled, so early reads return
/// silence rather than failing.
#[derive(Debug, Clone)]
pub struct SampleRing {
    buf: Vec<f32>,
    write_pos: usize,
}

impl SampleRing {
    pub fn new(capacity: usize) -> Self {
        // A zero-capacity ring would panic on the wrap modulo in `write`;
        // clamp to one sample instead.
        Self {
            buf: vec![0.0; capacity.max(1)],
            write_pos: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Append samples, wrapping the write cursor modulo capacity and
    /// overwriting the oldest data once full. Never blocks, never errors.
    pub fn write(&mut self, samples: &[f32]) {
        for &s in samples {
            self.buf[self.write_pos] = s;
            self.write_pos = (self.write_pos + 1) % self.buf.len();
        }
    }

    /// Copy the most recent `n` samples (oldest first) without moving the
    /// cursor. `n` is clamped to the ring capacity.
    pub fn read_latest(&self, n: usize) -> Vec<f32> {
        let n = n.min(self.buf.len());
        let mut out = Vec::with_capacity(n);
        let start = (self.write_pos + self.buf.len() - n) % self.buf.len();
        for i in 0..n {
            out.push(self.buf[(start + i) % self.buf.len()]);
        }
        out
    }

    /// Reset the ring to its zero-filled initial state.
    pub fn clear(&mut self) {
        self.buf.fill(0.0);
        self.write_pos = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_capacity_is_clamped_to_one_sample() {
        let mut ring = SampleRing::new(0);
        assert_eq!(ring.capacity(), 1);
        ring.write(&[1.0, 2.0]);
        assert_eq!(ring.read_latest(1), vec![2.0]);
    }

    #[test]
    fn read_latest_before_any_write_is_silence() {
        let ring = SampleRing::new(8);
        assert_eq!(ring.read_latest(4), vec![0.0; 4]);
    }

    #[test]
    fn read_latest_returns_most_recent_samples() {
        let mut ring = SampleRing::new(8);
        ring.write(&[1.0, 2.0, 3.0]);
        assert_eq!(ring.read_latest(3), vec![1.0, 2.0, 3.0]);
        assert_eq!(ring.read_latest(2), vec![2.0, 3.0]);
    }

    #[test]
    fn wrap_around_preserves_exactly_the_last_capacity_samples() {
        let mut ring = SampleRing::new(4);
        // 10 writes through a capacity-4 ring: only 7..=10 survive.
        for i in 1..=10 {
            ring.write(&[i as f32]);
        }
        assert_eq!(ring.read_latest(4), vec![7.0, 8.0, 9.0, 10.0]);
    }

    #[test]
    fn wrap_around_with_multi_sample_writes() {
        let mut ring = SampleRing::new(4);
        ring.write(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(ring.read_latest(4), vec![3.0, 4.0, 5.0, 6.0]);
        // A further write keeps the window sliding.
        ring.write(&[7.0]);
        assert_eq!(ring.read_latest(4), vec![4.0, 5.0, 6.0, 7.0]);
    }

    #[test]
    fn read_larger_than_capacity_is_clamped() {
        let mut ring = SampleRing::new(4);
        ring.write(&[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(ring.read_latest(100), vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn clear_restores_silence() {
        let mut ring = SampleRing::new(4);
        ring.write(&[1.0, 2.0, 3.0, 4.0]);
        ring.clear();
        assert_eq!(ring.read_latest(4), vec![0.0; 4]);
    }
}

//! Sample sources and sinks the engine reads from and writes to.
//!
//! Tracks are the engine's only external surface: an `InputTrack` yields
//! mono float samples in order, an `OutputTrack` collects them. The host
//! application adapts its device or file I/O to these traits; in-memory
//! implementations are provided for hosts that buffer whole blocks (and for
//! tests).

// ============================================================================
// Error Types
// ============================================================================

/// Failure reported by a sample source or sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackError {
    message: String,
}

impl TrackError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for TrackError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Track error: {}", self.message)
    }
}

impl std::error::Error for TrackError {}

// ============================================================================
// Traits
// ============================================================================

/// A finite, ordered source of mono samples.
pub trait InputTrack {
    /// Total number of samples the track will yield.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fill `buf` with the next samples, returning how many were written.
    /// A return of 0 signals the end of the track.
    fn read(&mut self, buf: &mut [f32]) -> Result<usize, TrackError>;
}

/// An append-only sink of mono samples.
pub trait OutputTrack {
    /// Append a block of samples.
    fn append(&mut self, samples: &[f32]) -> Result<(), TrackError>;

    /// Truncate the track to `len` samples, discarding any filter tail
    /// appended beyond the original input length.
    fn set_end(&mut self, len: usize) -> Result<(), TrackError>;
}

// ============================================================================
// In-Memory Implementations
// ============================================================================

/// Input track backed by a sample vector with a read cursor.
pub struct MemoryInputTrack {
    samples: Vec<f32>,
    position: usize,
}

impl MemoryInputTrack {
    pub fn new(samples: Vec<f32>) -> Self {
        Self {
            samples,
            position: 0,
        }
    }

    pub fn from_slice(samples: &[f32]) -> Self {
        Self::new(samples.to_vec())
    }

    /// Move the read cursor back to the start.
    pub fn rewind(&mut self) {
        self.position = 0;
    }
}

impl InputTrack for MemoryInputTrack {
    fn len(&self) -> usize {
        self.samples.len()
    }

    fn read(&mut self, buf: &mut [f32]) -> Result<usize, TrackError> {
        let remaining = self.samples.len() - self.position;
        let count = buf.len().min(remaining);
        buf[..count].copy_from_slice(&self.samples[self.position..self.position + count]);
        self.position += count;
        Ok(count)
    }
}

/// Output track backed by a growable sample vector.
#[derive(Default)]
pub struct MemoryOutputTrack {
    samples: Vec<f32>,
}

impl MemoryOutputTrack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }
}

impl OutputTrack for MemoryOutputTrack {
    fn append(&mut self, samples: &[f32]) -> Result<(), TrackError> {
        self.samples.extend_from_slice(samples);
        Ok(())
    }

    fn set_end(&mut self, len: usize) -> Result<(), TrackError> {
        if len > self.samples.len() {
            return Err(TrackError::new(format!(
                "cannot extend track of {} samples to {}",
                self.samples.len(),
                len
            )));
        }
        self.samples.truncate(len);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_input_reads_in_chunks() {
        let mut track = MemoryInputTrack::new((0..10).map(|i| i as f32).collect());
        assert_eq!(track.len(), 10);

        let mut buf = [0.0f32; 4];
        assert_eq!(track.read(&mut buf).unwrap(), 4);
        assert_eq!(buf, [0.0, 1.0, 2.0, 3.0]);
        assert_eq!(track.read(&mut buf).unwrap(), 4);
        assert_eq!(track.read(&mut buf).unwrap(), 2);
        assert_eq!(buf[..2], [8.0, 9.0]);
        assert_eq!(track.read(&mut buf).unwrap(), 0);

        track.rewind();
        assert_eq!(track.read(&mut buf).unwrap(), 4);
        assert_eq!(buf[0], 0.0);
    }

    #[test]
    fn memory_output_appends_and_truncates() {
        let mut track = MemoryOutputTrack::new();
        track.append(&[1.0, 2.0, 3.0]).unwrap();
        track.append(&[4.0, 5.0]).unwrap();
        assert_eq!(track.len(), 5);

        track.set_end(4).unwrap();
        assert_eq!(track.samples(), &[1.0, 2.0, 3.0, 4.0]);

        assert!(track.set_end(10).is_err());
    }
}

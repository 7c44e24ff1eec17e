use std::collections::VecDeque;

/// Interleaved s16 sample queue feeding fixed frame size audio encoders.
#[derive(Debug, Clone)]
pub struct AudioFifo {
    channels: usize,
    buf: VecDeque<i16>,
}

impl AudioFifo {
    pub fn new(channels: u16) -> Self {
        Self {
            channels: channels.max(1) as usize,
            buf: VecDeque::new(),
        }
    }

    pub fn write(&mut self, samples: &[i16]) {
        self.buf.extend(samples.iter().copied());
    }

    /// Samples per channel currently queued.
    pub fn len(&self) -> usize {
        self.buf.len() / self.channels
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pops exactly `nb_samples` per channel, or nothing if not enough are queued.
    pub fn read(&mut self, nb_samples: usize) -> Option<Vec<i16>> {
        if nb_samples == 0 || self.len() < nb_samples {
            return None;
        }
        Some(self.buf.drain(..nb_samples * self.channels).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_frames() {
        let mut fifo = AudioFifo::new(2);
        fifo.write(&[1, 2, 3, 4, 5, 6]);
        assert_eq!(fifo.len(), 3);
        assert_eq!(fifo.read(2), Some(vec![1, 2, 3, 4]));
        assert_eq!(fifo.read(2), None);
        fifo.write(&[7, 8]);
        assert_eq!(fifo.read(2), Some(vec![5, 6, 7, 8]));
        assert!(fifo.is_empty());
    }
}

//! Sample rate and channel layout conversion between a decoder and an
//! audio encoder. Samples are interleaved s16 on both sides.

use anyhow::bail;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResampleParams {
    pub in_channels: u16,
    pub in_rate: u32,
    pub out_channels: u16,
    pub out_rate: u32,
}

impl ResampleParams {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.in_rate == 0 || self.out_rate == 0 {
            bail!("invalid sample rate {} -> {}", self.in_rate, self.out_rate);
        }
        if self.in_channels == 0 || self.out_channels == 0 {
            bail!("invalid channel count {} -> {}", self.in_channels, self.out_channels);
        }
        Ok(())
    }
}

pub trait Resampler: Send {
    fn params(&self) -> ResampleParams;

    /// Whether this resampler was opened for the given input layout.
    fn accepts(&self, channels: u16, rate: u32) -> bool {
        let params = self.params();
        params.in_channels == channels && params.in_rate == rate
    }

    /// Produce `delta` more (or fewer, when negative) output samples over
    /// the next `distance` output samples.
    fn compensate(&mut self, delta: i32, distance: u32) -> anyhow::Result<()>;

    /// Converts interleaved input to the output layout and rate. Output may
    /// lag the input by the converter's internal delay.
    fn resample(&mut self, input: &[i16]) -> anyhow::Result<Vec<i16>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_invalid_layout() {
        let params = ResampleParams {
            in_channels: 0,
            in_rate: 44100,
            out_channels: 2,
            out_rate: 48000,
        };
        assert!(params.validate().is_err());
        assert!(ResampleParams { in_channels: 2, in_rate: 0, ..params }.validate().is_err());
        assert!(ResampleParams { in_channels: 2, ..params }.validate().is_ok());
    }
}

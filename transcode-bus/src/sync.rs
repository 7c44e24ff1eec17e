//! Drift correction decisions. Pure functions of the clocks; the router
//! applies them.

use crate::config::AudioSyncMethod;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoDecision {
    Drop,
    /// Emit the picture this many times (more than once duplicates it).
    Emit(usize),
}

/// How many times a decoded picture is written.
///
/// `ipts` is the corrected input time in output frame units and `sync_opts`
/// the output frame counter. Without sync the counter is re-anchored to the
/// input time instead.
pub fn video_decision(enabled: bool, ipts: f64, sync_opts: &mut i64, threshold: f64) -> VideoDecision {
    if !enabled {
        *sync_opts = ipts.round() as i64;
        return VideoDecision::Emit(1);
    }
    let vdelta = ipts - *sync_opts as f64;
    if vdelta < -threshold {
        VideoDecision::Drop
    } else if vdelta > threshold {
        VideoDecision::Emit(vdelta.round().max(1.0) as usize)
    } else {
        VideoDecision::Emit(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioAdjustment {
    None,
    /// Discard this many input samples per channel from the front.
    Drop(usize),
    /// Prepend this many silent input samples per channel.
    Silence(usize),
    /// Ask the resampler for this many extra (or fewer) samples per second.
    Compensate(i32),
}

pub struct AudioDrift {
    pub method: AudioSyncMethod,
    /// Samples.
    pub threshold: f64,
    /// Interleaved sample cap for a buffer grown by inserted silence.
    pub max_buffer: usize,
}

impl AudioDrift {
    /// Decides how to close `delta`, the drift in output samples between
    /// where the input says we are and what the output has produced.
    ///
    /// Hard corrections only happen while `is_start` is set; inserting
    /// silence clears it unless the buffer cap truncated the insert, dropping
    /// clears it unless it swallowed the whole buffer.
    pub fn adjust(
        &self,
        delta: f64,
        in_rate: u32,
        out_rate: u32,
        in_channels: usize,
        in_samples: usize,
        is_start: &mut bool,
    ) -> AudioAdjustment {
        if !self.method.is_enabled() || delta.abs() <= self.threshold {
            return AudioAdjustment::None;
        }
        if *is_start {
            let idelta = (delta * in_rate as f64 / out_rate as f64) as i64;
            if idelta < 0 {
                let drop = (idelta.unsigned_abs() as usize).min(in_samples);
                if drop < in_samples {
                    *is_start = false;
                }
                return AudioAdjustment::Drop(drop);
            }
            let mut silence = idelta as usize;
            let channels = in_channels.max(1);
            if (silence + in_samples) * channels <= self.max_buffer {
                *is_start = false;
            } else {
                silence = (self.max_buffer / channels).saturating_sub(in_samples);
            }
            return AudioAdjustment::Silence(silence);
        }
        match self.method {
            AudioSyncMethod::Resample { max_compensation } => {
                let max = max_compensation as f64;
                AudioAdjustment::Compensate(delta.clamp(-max, max) as i32)
            }
            _ => AudioAdjustment::None,
        }
    }
}

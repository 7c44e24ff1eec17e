use ffmpeg_next::software::resampling;

use super::frame::{PACKED_S16, from_av_audio, layout, packed_audio};
use crate::resample::{ResampleParams, Resampler};

/// libswresample converter between two packed s16 layouts. Drift
/// compensation goes through `swr_set_compensation`.
pub struct SwrResampler {
    params: ResampleParams,
    context: resampling::Context,
}

unsafe impl Send for SwrResampler {}

impl SwrResampler {
    pub fn new(params: &ResampleParams) -> anyhow::Result<Self> {
        params.validate()?;
        let context = resampling::Context::get(
            PACKED_S16,
            layout(params.in_channels),
            params.in_rate,
            PACKED_S16,
            layout(params.out_channels),
            params.out_rate,
        )?;
        Ok(Self {
            params: *params,
            context,
        })
    }
}

impl Resampler for SwrResampler {
    fn params(&self) -> ResampleParams {
        self.params
    }

    fn compensate(&mut self, delta: i32, distance: u32) -> anyhow::Result<()> {
        let distance = i32::try_from(distance)?;
        let ret = unsafe { ffmpeg_next::ffi::swr_set_compensation(self.context.as_mut_ptr(), delta, distance) };
        if ret < 0 {
            return Err(ffmpeg_next::Error::from(ret).into());
        }
        Ok(())
    }

    fn resample(&mut self, input: &[i16]) -> anyhow::Result<Vec<i16>> {
        let nb_samples = input.len() / self.params.in_channels as usize;
        if nb_samples == 0 {
            return Ok(Vec::new());
        }
        let src = packed_audio(input, self.params.in_channels, self.params.in_rate);
        // upper bound including whatever the context still buffers
        let capacity = unsafe { ffmpeg_next::ffi::swr_get_out_samples(self.context.as_mut_ptr(), nb_samples as i32) };
        if capacity < 0 {
            return Err(ffmpeg_next::Error::from(capacity).into());
        }
        let mut dst =
            ffmpeg_next::frame::Audio::new(PACKED_S16, capacity.max(1) as usize, layout(self.params.out_channels));
        dst.set_rate(self.params.out_rate);
        self.context.run(&src, &mut dst)?;
        Ok(from_av_audio(&dst, self.params.out_channels).samples)
    }
}

//! Collaborators backed by FFmpeg through `ffmpeg_next`.
//!
//! Call [`crate::init`] once before opening anything with [`FfmpegBackend`].

mod codec;
mod frame;
mod hw;
mod input;
mod output;
mod picture;
mod resample;

use std::sync::Arc;

use ffmpeg_next::codec::Parameters;

use crate::backend::Backend;
use crate::config::{InputConfig, OutputConfig};
use crate::decoder::Decoder;
use crate::encoder::{Encoder, EncoderParams};
use crate::input::Demuxer;
use crate::output::Muxer;
use crate::rational::Rational;
use crate::resample::{ResampleParams, Resampler};
use crate::scaler::{Deinterlacer, PictureTransform, VideoGeometry};
use crate::stream::{BackendParams, StreamParams, VideoParams};

pub use codec::{FfmpegDecoder, FfmpegEncoder};
pub use input::FfmpegDemuxer;
pub use output::FfmpegMuxer;
pub use picture::{LineBlend, SwsTransform};
pub use resample::SwrResampler;

impl From<ffmpeg_next::Rational> for Rational {
    fn from(value: ffmpeg_next::Rational) -> Self {
        Rational(value.numerator(), value.denominator())
    }
}

impl From<Rational> for ffmpeg_next::Rational {
    fn from(value: Rational) -> Self {
        ffmpeg_next::Rational::new(value.0, value.1)
    }
}

/// `AVCodecParameters` shared between a demuxer or encoder and the muxer
/// that writes the stream.
pub struct CodecParameters(Parameters);

unsafe impl Send for CodecParameters {}
unsafe impl Sync for CodecParameters {}

impl CodecParameters {
    pub fn parameters(&self) -> &Parameters {
        &self.0
    }

    pub(crate) fn wrap(parameters: Parameters) -> BackendParams {
        BackendParams(Arc::new(CodecParameters(parameters)))
    }

    pub(crate) fn from_stream(params: &StreamParams) -> Option<&CodecParameters> {
        params.backend.as_ref()?.0.downcast_ref::<CodecParameters>()
    }
}

#[derive(Debug, Default)]
pub struct FfmpegBackend;

impl FfmpegBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Backend for FfmpegBackend {
    fn open_input(&mut self, input: &InputConfig) -> anyhow::Result<Box<dyn Demuxer>> {
        Ok(Box::new(FfmpegDemuxer::open(&input.url, input.format.as_deref())?))
    }

    fn open_output(&mut self, output: &OutputConfig) -> anyhow::Result<Box<dyn Muxer>> {
        Ok(Box::new(FfmpegMuxer::create(&output.url, output.format.as_deref())?))
    }

    fn open_decoder(&mut self, params: &StreamParams) -> anyhow::Result<Box<dyn Decoder>> {
        Ok(Box::new(FfmpegDecoder::open(params)?))
    }

    fn open_encoder(&mut self, params: &EncoderParams) -> anyhow::Result<Box<dyn Encoder>> {
        Ok(Box::new(FfmpegEncoder::open(params)?))
    }

    fn open_picture_transform(&mut self, geometry: &VideoGeometry) -> anyhow::Result<Box<dyn PictureTransform>> {
        Ok(Box::new(SwsTransform::new(geometry)?))
    }

    fn open_deinterlacer(&mut self, params: &VideoParams) -> anyhow::Result<Box<dyn Deinterlacer>> {
        Ok(Box::new(LineBlend::new(params)?))
    }

    fn open_resampler(&mut self, params: &ResampleParams) -> anyhow::Result<Box<dyn Resampler>> {
        Ok(Box::new(SwrResampler::new(params)?))
    }
}

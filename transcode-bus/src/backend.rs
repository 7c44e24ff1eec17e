use crate::config::{InputConfig, OutputConfig};
use crate::decoder::Decoder;
use crate::encoder::{Encoder, EncoderParams};
use crate::input::Demuxer;
use crate::output::Muxer;
use crate::resample::{ResampleParams, Resampler};
use crate::scaler::{Deinterlacer, PictureTransform, VideoGeometry};
use crate::stream::{StreamParams, VideoParams};

/// Factory for the external collaborators the engine drives: containers,
/// codecs, picture transforms and audio resamplers.
pub trait Backend: Send {
    fn open_input(&mut self, input: &InputConfig) -> anyhow::Result<Box<dyn Demuxer>>;

    fn open_output(&mut self, output: &OutputConfig) -> anyhow::Result<Box<dyn Muxer>>;

    fn open_decoder(&mut self, params: &StreamParams) -> anyhow::Result<Box<dyn Decoder>>;

    fn open_encoder(&mut self, params: &EncoderParams) -> anyhow::Result<Box<dyn Encoder>>;

    fn open_picture_transform(&mut self, geometry: &VideoGeometry) -> anyhow::Result<Box<dyn PictureTransform>>;

    fn open_deinterlacer(&mut self, params: &VideoParams) -> anyhow::Result<Box<dyn Deinterlacer>>;

    fn open_resampler(&mut self, params: &ResampleParams) -> anyhow::Result<Box<dyn Resampler>>;
}

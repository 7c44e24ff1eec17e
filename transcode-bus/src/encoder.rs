use bytes::Bytes;

use crate::config::Pass;
use crate::frame::Frame;
use crate::packet::EncodedPacket;
use crate::rational::Rational;
use crate::stream::{BackendParams, StreamKind};

/// Everything a backend needs to open an encoder for one output stream.
#[derive(Debug, Clone)]
pub struct EncoderParams {
    /// Global output stream index, for logging.
    pub index: usize,
    /// Requested codec; the backend chooses when unset.
    pub codec: Option<String>,
    /// Output format: sample rate/channels or picture size/format/rate.
    pub kind: StreamKind,
    pub time_base: Rational,
    pub bit_rate: Option<u64>,
    /// Output container name, used to pick a default codec.
    pub container: Option<String>,
    pub pass: Option<Pass>,
    /// Statistics from the first pass, when running the second.
    pub stats_in: Option<String>,
    /// Try a hardware encoder before the software one.
    pub hw_encode: bool,
}

/// Black-box encoder for one output stream.
pub trait Encoder: Send {
    fn codec_name(&self) -> &str;

    /// Units of the pts carried by frames in and packets out.
    fn time_base(&self) -> Rational;

    /// Samples per channel per call for audio; 0 or 1 when any count works.
    fn frame_size(&self) -> usize {
        0
    }

    /// Global headers, counted as "global headers" in the final report.
    fn extradata(&self) -> Bytes {
        Bytes::new()
    }

    /// Encodes one frame, or drains one delayed packet when `frame` is None.
    /// Returning no packet while draining means the encoder is empty.
    fn encode(&mut self, frame: Option<&Frame>) -> anyhow::Result<Option<EncodedPacket>>;

    /// Codec parameters the backend's own muxer needs to describe the
    /// encoded stream.
    fn backend_params(&self) -> Option<BackendParams> {
        None
    }

    /// First-pass statistics accumulated since the last call.
    fn stats_out(&mut self) -> Option<String> {
        None
    }

    /// Quantizer of the last coded picture.
    fn quality(&self) -> Option<f32> {
        None
    }

    fn close(&mut self) {}
}

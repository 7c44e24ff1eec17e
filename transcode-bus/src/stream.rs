use std::any::Any;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::bsf::AvccToAnnexB;
use crate::clock::RateEmulator;
use crate::decoder::Decoder;
use crate::encoder::Encoder;
use crate::fifo::AudioFifo;
use crate::passlog::PassLog;
use crate::rational::Rational;
use crate::resample::Resampler;
use crate::scaler::{Deinterlacer, PictureTransform, VideoGeometry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    Audio,
    Video,
    Subtitle,
    Data,
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MediaType::Audio => "audio",
            MediaType::Video => "video",
            MediaType::Subtitle => "subtitle",
            MediaType::Data => "data",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioParams {
    pub sample_rate: u32,
    pub channels: u16,
    /// Samples per channel per codec frame; 0 or 1 for PCM-like codecs.
    pub frame_size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoParams {
    pub width: u32,
    pub height: u32,
    pub pixel_format: String,
    pub frame_rate: Rational,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamKind {
    Audio(AudioParams),
    Video(VideoParams),
    Subtitle,
    Data,
}

impl StreamKind {
    pub fn media_type(&self) -> MediaType {
        match self {
            StreamKind::Audio(_) => MediaType::Audio,
            StreamKind::Video(_) => MediaType::Video,
            StreamKind::Subtitle => MediaType::Subtitle,
            StreamKind::Data => MediaType::Data,
        }
    }
}

/// Codec parameters private to the backend that produced them, carried
/// untouched from demuxer to muxer for stream copy.
#[derive(Clone)]
pub struct BackendParams(pub Arc<dyn Any + Send + Sync>);

impl fmt::Debug for BackendParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BackendParams(..)")
    }
}

impl PartialEq for BackendParams {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamParams {
    pub index: usize,
    pub codec: String,
    pub kind: StreamKind,
    /// Container time base of the stream.
    pub time_base: Rational,
    /// Stream start, in `time_base`.
    pub start_time: Option<i64>,
    pub bit_rate: u64,
    pub extradata: Bytes,
    pub backend: Option<BackendParams>,
}

impl StreamParams {
    pub fn new(index: usize, codec: impl Into<String>, kind: StreamKind, time_base: Rational) -> Self {
        Self {
            index,
            codec: codec.into(),
            kind,
            time_base,
            start_time: None,
            bit_rate: 0,
            extradata: Bytes::new(),
            backend: None,
        }
    }

    pub fn media_type(&self) -> MediaType {
        self.kind.media_type()
    }

    pub fn audio(&self) -> Option<&AudioParams> {
        match &self.kind {
            StreamKind::Audio(a) => Some(a),
            _ => None,
        }
    }

    pub fn video(&self) -> Option<&VideoParams> {
        match &self.kind {
            StreamKind::Video(v) => Some(v),
            _ => None,
        }
    }

    /// Duration of one codec unit: a picture for video, a sample for audio.
    pub fn codec_time_base(&self) -> Rational {
        match &self.kind {
            StreamKind::Video(v) if v.frame_rate.is_valid() => v.frame_rate.invert(),
            StreamKind::Audio(a) if a.sample_rate > 0 => Rational(1, a.sample_rate as i32),
            _ => self.time_base,
        }
    }
}

/// Per input stream state.
pub struct InputStream {
    pub file_index: usize,
    /// Index within its file.
    pub index: usize,
    pub params: StreamParams,
    /// Nothing reads from this stream; packets are skipped.
    pub discard: bool,
    pub decoding_needed: bool,
    pub decoder: Option<Box<dyn Decoder>>,
    pub deinterlacer: Option<Box<dyn Deinterlacer>>,
    /// Time of the unit being processed, global base.
    pub pts: i64,
    /// Predicted time of the next unit, global base; unknown until anchored.
    pub next_pts: Option<i64>,
    /// No output has been synchronised against this stream yet.
    pub is_start: bool,
    pub rate_emu: Option<RateEmulator>,
    pub frames_decoded: u64,
}

impl InputStream {
    pub fn new(file_index: usize, params: StreamParams) -> Self {
        Self {
            file_index,
            index: params.index,
            params,
            discard: true,
            decoding_needed: false,
            decoder: None,
            deinterlacer: None,
            pts: 0,
            next_pts: None,
            is_start: true,
            rate_emu: None,
            frames_decoded: 0,
        }
    }

    pub fn media_type(&self) -> MediaType {
        self.params.media_type()
    }
}

/// Audio output state: encoder FIFO plus an optional format converter.
pub struct AudioOutput {
    pub fifo: AudioFifo,
    pub resampler: Option<Box<dyn Resampler>>,
    /// Keep a resampler even when formats match, for drift compensation.
    pub force_resample: bool,
}

pub struct VideoOutput {
    pub geometry: VideoGeometry,
    pub transform: Option<Box<dyn PictureTransform>>,
}

/// Type specific half of an output stream.
pub enum OutputKind {
    Audio(AudioOutput),
    Video(VideoOutput),
    Subtitle,
    /// Stream copy: packets only, no codec state.
    Copy,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutputStats {
    /// Decoded units delivered to this output.
    pub frames_in: u64,
    pub frames_emitted: u64,
    pub frames_dropped: u64,
    pub frames_duplicated: u64,
    pub bytes: u64,
    pub samples_inserted: u64,
    pub samples_dropped: u64,
}

/// Per output stream state.
pub struct OutputStream {
    pub file_index: usize,
    /// Index within its file.
    pub index: usize,
    /// Global input stream index feeding this output.
    pub source_index: usize,
    /// Global input stream whose clock this output follows.
    pub sync_index: usize,
    pub params: StreamParams,
    /// Muxer time base, known once the header is written.
    pub time_base: Rational,
    pub encoder: Option<Box<dyn Encoder>>,
    pub kind: OutputKind,
    pub annexb: Option<AvccToAnnexB>,
    pub pass_log: Option<PassLog>,
    /// Output clock in encoder units: frames for video, samples for audio.
    pub sync_opts: i64,
    pub frame_number: u64,
    /// End of the last written packet, global base.
    pub last_end: i64,
    pub stats: OutputStats,
}

impl OutputStream {
    pub fn media_type(&self) -> MediaType {
        self.params.media_type()
    }

    pub fn encoding_needed(&self) -> bool {
        self.encoder.is_some()
    }

    /// How far this output has progressed, global base. Drives input selection.
    pub fn opts(&self) -> i64 {
        match (&self.kind, &self.encoder) {
            (OutputKind::Video(_), Some(encoder)) => {
                crate::clock::to_global(self.sync_opts, encoder.time_base())
            }
            _ => self.last_end,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_time_base() {
        let video = StreamParams::new(
            0,
            "rawvideo",
            StreamKind::Video(VideoParams {
                width: 320,
                height: 240,
                pixel_format: "yuv420p".into(),
                frame_rate: Rational(30000, 1001),
            }),
            Rational(1, 90000),
        );
        assert_eq!(video.codec_time_base(), Rational(1001, 30000));

        let audio = StreamParams::new(
            1,
            "pcm_s16le",
            StreamKind::Audio(AudioParams {
                sample_rate: 48000,
                channels: 2,
                frame_size: 0,
            }),
            Rational(1, 1000),
        );
        assert_eq!(audio.codec_time_base(), Rational(1, 48000));

        let sub = StreamParams::new(2, "subrip", StreamKind::Subtitle, Rational(1, 1000));
        assert_eq!(sub.codec_time_base(), Rational(1, 1000));
        assert_eq!(sub.media_type(), MediaType::Subtitle);
    }
}

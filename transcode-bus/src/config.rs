//! Job configuration. Built once, validated, then only ever read.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};
use crate::rational::Rational;
use crate::stream::MediaType;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TranscodeConfig {
    pub inputs: Vec<InputConfig>,
    pub outputs: Vec<OutputConfig>,
    pub stream_maps: Vec<StreamMap>,
    pub metadata_maps: Vec<MetadataMap>,
    /// Seek target and start gate, global base.
    pub start_time: i64,
    /// Stop once every output has reached this duration, global base.
    pub recording_time: Option<i64>,
    /// Stop once any output file grows past this many bytes.
    pub limit_filesize: Option<u64>,
    /// Added to every input timestamp, global base.
    pub input_ts_offset: i64,
    pub copy_ts: bool,
    pub shortest: bool,
    /// Pick the next input by lowest input time instead of lowest output time.
    pub input_sync: bool,
    /// Duplicate or drop pictures to keep a constant output frame rate.
    pub video_sync: bool,
    pub audio_sync: AudioSyncMethod,
    /// Seconds.
    pub dts_delta_threshold: i64,
    /// Frames.
    pub video_drift_threshold: f64,
    /// Samples.
    pub audio_drift_threshold: f64,
    /// Interleaved s16 values an audio buffer may grow to with inserted silence.
    pub max_audio_packet_samples: usize,
    /// 256 is unity gain.
    pub audio_volume: i32,
    pub deinterlace: bool,
    pub max_frames: FrameLimits,
    pub pass: Option<Pass>,
    pub pass_log_prefix: Option<String>,
    pub vstats: Option<PathBuf>,
    pub report_interval_ms: u64,
    /// Prefer a hardware variant of each video encoder when one exists.
    pub hw_encode: bool,
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            inputs: Vec::new(),
            outputs: Vec::new(),
            stream_maps: Vec::new(),
            metadata_maps: Vec::new(),
            start_time: 0,
            recording_time: None,
            limit_filesize: None,
            input_ts_offset: 0,
            copy_ts: false,
            shortest: false,
            input_sync: false,
            video_sync: true,
            audio_sync: AudioSyncMethod::Disabled,
            dts_delta_threshold: 10,
            video_drift_threshold: 1.1,
            audio_drift_threshold: 50.0,
            max_audio_packet_samples: 65536,
            audio_volume: 256,
            deinterlace: false,
            max_frames: FrameLimits::default(),
            pass: None,
            pass_log_prefix: None,
            vstats: None,
            report_interval_ms: 500,
            hw_encode: false,
        }
    }
}

pub const DEFAULT_PASS_LOG_PREFIX: &str = "transcode2pass";

impl TranscodeConfig {
    pub fn report_interval(&self) -> Duration {
        Duration::from_millis(self.report_interval_ms)
    }

    pub fn pass_log_prefix(&self) -> &str {
        self.pass_log_prefix
            .as_deref()
            .unwrap_or(DEFAULT_PASS_LOG_PREFIX)
    }

    pub fn output_stream_count(&self) -> usize {
        self.outputs.iter().map(|o| o.streams.len()).sum()
    }

    /// Checks everything that can be checked without opening a file.
    pub fn validate(&self) -> Result<()> {
        if self.inputs.is_empty() {
            return Err(Error::Config("at least one input file must be specified".into()));
        }
        if self.outputs.is_empty() {
            return Err(Error::Config("at least one output file must be specified".into()));
        }
        if self.dts_delta_threshold <= 0 {
            return Err(Error::Config("dts_delta_threshold must be positive".into()));
        }
        if self.video_drift_threshold <= 0.0 || self.audio_drift_threshold <= 0.0 {
            return Err(Error::Config("drift thresholds must be positive".into()));
        }
        if self.audio_volume < 0 {
            return Err(Error::Config("audio_volume cannot be negative".into()));
        }
        if self.max_audio_packet_samples == 0 {
            return Err(Error::Config("max_audio_packet_samples must be positive".into()));
        }
        if self.start_time < 0 {
            return Err(Error::Config("start_time cannot be negative".into()));
        }
        if let AudioSyncMethod::Resample { max_compensation } = self.audio_sync {
            if max_compensation == 0 {
                return Err(Error::Config("audio resample sync needs a positive max_compensation".into()));
            }
        }
        for (file_index, output) in self.outputs.iter().enumerate() {
            if output.streams.is_empty() {
                return Err(Error::Config(format!(
                    "output file #{} ({}) does not contain any stream",
                    file_index, output.url
                )));
            }
            for (index, stream) in output.streams.iter().enumerate() {
                stream
                    .validate()
                    .map_err(|e| Error::Config(format!("output stream #{}.{}: {}", file_index, index, e)))?;
            }
        }
        for map in &self.stream_maps {
            if map.file >= self.inputs.len() {
                return Err(Error::Config(format!("invalid input file index in map {}", map)));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct InputConfig {
    pub url: String,
    #[serde(default)]
    pub format: Option<String>,
    /// Read this input no faster than real time.
    #[serde(default)]
    pub rate_emu: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct OutputConfig {
    pub url: String,
    #[serde(default)]
    pub format: Option<String>,
    pub streams: Vec<OutputStreamConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutputStreamConfig {
    pub media_type: MediaType,
    /// Pass packets through untouched instead of re-encoding.
    #[serde(default)]
    pub copy: bool,
    /// Encoder name; the backend picks a default for the container when unset.
    #[serde(default)]
    pub codec: Option<String>,
    #[serde(default)]
    pub bit_rate: Option<u64>,
    #[serde(default)]
    pub sample_rate: Option<u32>,
    #[serde(default)]
    pub channels: Option<u16>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub pixel_format: Option<String>,
    #[serde(default)]
    pub frame_rate: Option<Rational>,
    #[serde(default)]
    pub crop: Bands,
    #[serde(default)]
    pub pad: Bands,
    #[serde(default)]
    pub pad_color: [u8; 3],
    /// Rewrite length-prefixed H.264/HEVC packets to start codes on copy.
    #[serde(default)]
    pub annexb: bool,
}

impl OutputStreamConfig {
    pub fn new(media_type: MediaType) -> Self {
        Self {
            media_type,
            copy: false,
            codec: None,
            bit_rate: None,
            sample_rate: None,
            channels: None,
            width: None,
            height: None,
            pixel_format: None,
            frame_rate: None,
            crop: Bands::default(),
            pad: Bands::default(),
            pad_color: [0, 0, 0],
            annexb: false,
        }
    }

    pub fn copy(media_type: MediaType) -> Self {
        Self {
            copy: true,
            ..Self::new(media_type)
        }
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if self.media_type == MediaType::Data {
            return Err("data streams cannot be written".into());
        }
        if self.sample_rate == Some(0) || self.channels == Some(0) {
            return Err("sample rate and channel count must be positive".into());
        }
        if self.width == Some(0) || self.height == Some(0) {
            return Err("frame size must be positive".into());
        }
        if let Some(rate) = self.frame_rate {
            if rate.numerator() <= 0 || rate.denominator() <= 0 {
                return Err(format!("invalid frame rate {}", rate));
            }
        }
        if !self.crop.is_even() || !self.pad.is_even() {
            return Err("crop and pad sizes must be a multiple of 2".into());
        }
        if self.copy && (!self.crop.is_empty() || !self.pad.is_empty()) {
            return Err("crop and pad cannot be combined with stream copy".into());
        }
        Ok(())
    }
}

/// Pixels removed from (crop) or added to (pad) each edge of a picture.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Bands {
    pub top: u32,
    pub bottom: u32,
    pub left: u32,
    pub right: u32,
}

impl Bands {
    pub fn is_empty(&self) -> bool {
        self.top == 0 && self.bottom == 0 && self.left == 0 && self.right == 0
    }

    pub fn is_even(&self) -> bool {
        [self.top, self.bottom, self.left, self.right]
            .iter()
            .all(|v| v % 2 == 0)
    }

    pub fn width(&self) -> u32 {
        self.left + self.right
    }

    pub fn height(&self) -> u32 {
        self.top + self.bottom
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioSyncMethod {
    /// Output sample clock simply follows the input timestamps.
    #[default]
    Disabled,
    /// Insert silence or drop samples at stream start only.
    Stretch,
    /// Additionally nudge the resampler by up to `max_compensation`
    /// samples per second of output.
    Resample { max_compensation: u32 },
}

impl AudioSyncMethod {
    pub fn is_enabled(&self) -> bool {
        !matches!(self, AudioSyncMethod::Disabled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Pass {
    First,
    Second,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct FrameLimits {
    pub video: Option<u64>,
    pub audio: Option<u64>,
    pub subtitle: Option<u64>,
}

impl FrameLimits {
    pub fn limit(&self, media_type: MediaType) -> u64 {
        let limit = match media_type {
            MediaType::Video => self.video,
            MediaType::Audio => self.audio,
            MediaType::Subtitle => self.subtitle,
            MediaType::Data => None,
        };
        limit.unwrap_or(u64::MAX)
    }
}

/// `file:stream[:sync_file:sync_stream]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamMap {
    pub file: usize,
    pub stream: usize,
    pub sync: Option<(usize, usize)>,
}

impl fmt::Display for StreamMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.stream)?;
        if let Some((file, stream)) = self.sync {
            write!(f, ":{}:{}", file, stream)?;
        }
        Ok(())
    }
}

fn parse_indices(s: &str) -> std::result::Result<Vec<usize>, String> {
    s.split([':', '.'])
        .map(|v| {
            v.trim()
                .parse::<usize>()
                .map_err(|e| format!("invalid index {:?} in {:?}: {}", v, s, e))
        })
        .collect()
}

impl FromStr for StreamMap {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match parse_indices(s)?.as_slice() {
            [file, stream] => Ok(Self {
                file: *file,
                stream: *stream,
                sync: None,
            }),
            [file, stream, sync_file, sync_stream] => Ok(Self {
                file: *file,
                stream: *stream,
                sync: Some((*sync_file, *sync_stream)),
            }),
            _ => Err(format!("invalid stream map {:?}", s)),
        }
    }
}

/// `output_file:input_file`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetadataMap {
    pub output: usize,
    pub input: usize,
}

impl fmt::Display for MetadataMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.output, self.input)
    }
}

impl FromStr for MetadataMap {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match parse_indices(s)?.as_slice() {
            [output, input] => Ok(Self {
                output: *output,
                input: *input,
            }),
            _ => Err(format!("invalid metadata map {:?}", s)),
        }
    }
}

macro_rules! string_serde {
    ($ty:ty) => {
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

string_serde!(StreamMap);
string_serde!(MetadataMap);

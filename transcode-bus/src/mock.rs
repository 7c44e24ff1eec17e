//! In-memory backend for engine tests: scripted demuxers, recording muxers
//! and trivial PCM/raw video/text codecs.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use bytes::Bytes;

use crate::backend::Backend;
use crate::config::{InputConfig, OutputConfig, Pass};
use crate::decoder::{Decoded, Decoder};
use crate::encoder::{Encoder, EncoderParams};
use crate::frame::{AudioFrame, Frame, PictureType, Subtitle, SubtitleRect, VideoFrame};
use crate::input::Demuxer;
use crate::metadata::Metadata;
use crate::output::Muxer;
use crate::packet::{EncodedPacket, Packet};
use crate::rational::Rational;
use crate::resample::{ResampleParams, Resampler};
use crate::scaler::{Deinterlacer, PictureTransform, VideoGeometry};
use crate::stream::{AudioParams, StreamKind, StreamParams, VideoParams};

pub fn audio_stream(index: usize, sample_rate: u32, channels: u16, time_base: Rational) -> StreamParams {
    StreamParams::new(
        index,
        "pcm_s16le",
        StreamKind::Audio(AudioParams {
            sample_rate,
            channels,
            frame_size: 0,
        }),
        time_base,
    )
}

pub fn video_stream(index: usize, width: u32, height: u32, frame_rate: Rational, time_base: Rational) -> StreamParams {
    StreamParams::new(
        index,
        "rawvideo",
        StreamKind::Video(VideoParams {
            width,
            height,
            pixel_format: "gray".into(),
            frame_rate,
        }),
        time_base,
    )
}

pub fn subtitle_stream(index: usize, time_base: Rational) -> StreamParams {
    StreamParams::new(index, "text", StreamKind::Subtitle, time_base)
}

/// Little-endian s16 payload.
pub fn pcm_bytes(samples: &[i16]) -> Bytes {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect::<Vec<u8>>().into()
}

/// A packet payload the mock decoders reject.
pub const CORRUPT: &[u8] = b"corrupt";

#[derive(Clone, Default)]
pub struct MockInput {
    pub streams: Vec<StreamParams>,
    /// `Err` entries surface as read errors.
    pub packets: Vec<std::result::Result<Packet, String>>,
    pub start_time: Option<i64>,
    pub metadata: Metadata,
}

impl MockInput {
    pub fn new(streams: Vec<StreamParams>) -> Self {
        Self {
            streams,
            ..Default::default()
        }
    }

    pub fn push(&mut self, packet: Packet) {
        self.packets.push(Ok(packet));
    }
}

struct MockDemuxer {
    streams: Vec<StreamParams>,
    packets: VecDeque<std::result::Result<Packet, String>>,
    start_time: Option<i64>,
    metadata: Metadata,
    seeks: Arc<Mutex<Vec<i64>>>,
}

impl Demuxer for MockDemuxer {
    fn streams(&self) -> &[StreamParams] {
        &self.streams
    }

    fn start_time(&self) -> Option<i64> {
        self.start_time
    }

    fn metadata(&self) -> Metadata {
        self.metadata.clone()
    }

    fn read_packet(&mut self) -> anyhow::Result<Option<Packet>> {
        match self.packets.pop_front() {
            Some(Ok(packet)) => Ok(Some(packet)),
            Some(Err(e)) => Err(anyhow::anyhow!(e)),
            None => Ok(None),
        }
    }

    fn seek(&mut self, timestamp: i64) -> anyhow::Result<()> {
        self.seeks.lock().unwrap().push(timestamp);
        Ok(())
    }
}

/// Everything a muxer saw, shared with the test.
#[derive(Debug, Default)]
pub struct MuxLog {
    pub streams: Vec<StreamParams>,
    pub metadata: Option<Metadata>,
    pub header: bool,
    pub trailer: bool,
    pub packets: Vec<Packet>,
}

impl MuxLog {
    pub fn stream_packets(&self, stream_index: usize) -> Vec<&Packet> {
        self.packets.iter().filter(|p| p.stream_index == stream_index).collect()
    }
}

struct MockMuxer {
    log: Arc<Mutex<MuxLog>>,
    fail_after: Option<usize>,
    bytes: u64,
}

impl Muxer for MockMuxer {
    fn add_stream(&mut self, params: &StreamParams) -> anyhow::Result<usize> {
        let mut log = self.log.lock().unwrap();
        log.streams.push(params.clone());
        Ok(log.streams.len() - 1)
    }

    fn set_metadata(&mut self, metadata: &Metadata) {
        self.log.lock().unwrap().metadata = Some(metadata.clone());
    }

    fn write_header(&mut self) -> anyhow::Result<()> {
        self.log.lock().unwrap().header = true;
        Ok(())
    }

    fn time_base(&self, stream_index: usize) -> Option<Rational> {
        self.log.lock().unwrap().streams.get(stream_index).map(|s| s.time_base)
    }

    fn write_packet(&mut self, packet: Packet) -> anyhow::Result<()> {
        let mut log = self.log.lock().unwrap();
        if self.fail_after.is_some_and(|n| log.packets.len() >= n) {
            anyhow::bail!("disk full");
        }
        self.bytes += packet.size() as u64;
        log.packets.push(packet);
        Ok(())
    }

    fn write_trailer(&mut self) -> anyhow::Result<()> {
        self.log.lock().unwrap().trailer = true;
        Ok(())
    }

    fn bytes_written(&self) -> u64 {
        self.bytes
    }
}

struct PcmDecoder {
    channels: u16,
    sample_rate: u32,
}

impl Decoder for PcmDecoder {
    fn decode(&mut self, data: &[u8]) -> anyhow::Result<Decoded> {
        if data.is_empty() {
            return Ok(Decoded::nothing(0));
        }
        if data == CORRUPT {
            anyhow::bail!("invalid data found when processing input");
        }
        let samples = data
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        let frame = AudioFrame::new(samples, self.channels, self.sample_rate);
        Ok(Decoded::frame(data.len(), Frame::Audio(frame)))
    }
}

struct RawVideoDecoder {
    params: VideoParams,
    interlaced: bool,
}

impl Decoder for RawVideoDecoder {
    fn decode(&mut self, data: &[u8]) -> anyhow::Result<Decoded> {
        if data.is_empty() {
            return Ok(Decoded::nothing(0));
        }
        if data == CORRUPT {
            anyhow::bail!("invalid data found when processing input");
        }
        let mut frame = VideoFrame::new(self.params.width, self.params.height, self.params.pixel_format.clone());
        frame.planes = vec![Bytes::copy_from_slice(data)];
        frame.linesizes = vec![self.params.width as usize];
        frame.interlaced = self.interlaced;
        Ok(Decoded::frame(data.len(), Frame::Video(frame)))
    }
}

struct TextDecoder;

impl Decoder for TextDecoder {
    fn decode(&mut self, data: &[u8]) -> anyhow::Result<Decoded> {
        if data.is_empty() {
            return Ok(Decoded::nothing(0));
        }
        let sub = Subtitle {
            start_display_time: 0,
            end_display_time: 1000,
            rects: vec![SubtitleRect::Text(String::from_utf8_lossy(data).into_owned())],
        };
        Ok(Decoded::frame(data.len(), Frame::Subtitle(sub)))
    }
}

struct PcmEncoder {
    name: String,
    time_base: Rational,
    frame_size: usize,
}

impl Encoder for PcmEncoder {
    fn codec_name(&self) -> &str {
        &self.name
    }

    fn time_base(&self) -> Rational {
        self.time_base
    }

    fn frame_size(&self) -> usize {
        self.frame_size
    }

    fn encode(&mut self, frame: Option<&Frame>) -> anyhow::Result<Option<EncodedPacket>> {
        let Some(Frame::Audio(frame)) = frame else {
            return Ok(None);
        };
        Ok(Some(EncodedPacket {
            data: pcm_bytes(&frame.samples),
            pts: frame.pts,
            dts: frame.pts,
            is_key: true,
            picture_type: PictureType::None,
        }))
    }
}

/// Emits one byte per picture, holding back `delay` pictures like a codec
/// with reordering would.
struct RawVideoEncoder {
    time_base: Rational,
    delay: usize,
    queue: VecDeque<EncodedPacket>,
    pass: Option<Pass>,
    frames: u64,
    fail: bool,
}

impl Encoder for RawVideoEncoder {
    fn codec_name(&self) -> &str {
        "rawvideo"
    }

    fn time_base(&self) -> Rational {
        self.time_base
    }

    fn encode(&mut self, frame: Option<&Frame>) -> anyhow::Result<Option<EncodedPacket>> {
        if self.fail {
            anyhow::bail!("encoder rejected picture");
        }
        match frame {
            Some(Frame::Video(picture)) => {
                self.frames += 1;
                self.queue.push_back(EncodedPacket {
                    data: Bytes::from(vec![picture.planes.first().and_then(|p| p.first().copied()).unwrap_or(0)]),
                    pts: picture.pts,
                    dts: picture.pts,
                    is_key: self.frames == 1,
                    picture_type: if self.frames == 1 { PictureType::I } else { PictureType::P },
                });
                if self.queue.len() > self.delay {
                    Ok(self.queue.pop_front())
                } else {
                    Ok(None)
                }
            }
            Some(_) => anyhow::bail!("not a picture"),
            None => Ok(self.queue.pop_front()),
        }
    }

    fn stats_out(&mut self) -> Option<String> {
        (self.pass == Some(Pass::First)).then(|| format!("in:{} out:{}\n", self.frames, self.frames))
    }

    fn quality(&self) -> Option<f32> {
        Some(2.0)
    }
}

struct TextEncoder {
    name: String,
    time_base: Rational,
}

impl Encoder for TextEncoder {
    fn codec_name(&self) -> &str {
        &self.name
    }

    fn time_base(&self) -> Rational {
        self.time_base
    }

    fn encode(&mut self, frame: Option<&Frame>) -> anyhow::Result<Option<EncodedPacket>> {
        let Some(Frame::Subtitle(sub)) = frame else {
            return Ok(None);
        };
        let text: String = sub
            .rects
            .iter()
            .filter_map(|r| match r {
                SubtitleRect::Text(t) | SubtitleRect::Ass(t) => Some(t.as_str()),
                SubtitleRect::Bitmap { .. } => None,
            })
            .collect();
        Ok(Some(EncodedPacket {
            data: Bytes::from(text.into_bytes()),
            is_key: true,
            ..Default::default()
        }))
    }
}

struct ResizeTransform {
    output: VideoParams,
}

impl PictureTransform for ResizeTransform {
    fn transform(&mut self, frame: &VideoFrame) -> anyhow::Result<VideoFrame> {
        let mut out = frame.clone();
        out.width = self.output.width;
        out.height = self.output.height;
        out.pixel_format = self.output.pixel_format.clone();
        Ok(out)
    }
}

/// Counts the pictures it is handed.
struct FieldMerge {
    count: Arc<Mutex<u64>>,
}

impl Deinterlacer for FieldMerge {
    fn deinterlace(&mut self, frame: &VideoFrame) -> anyhow::Result<VideoFrame> {
        *self.count.lock().unwrap() += 1;
        let mut out = frame.clone();
        out.interlaced = false;
        Ok(out)
    }
}

/// Backend wiring the mocks together. Muxer logs are keyed by output url.
#[derive(Default)]
pub struct MockBackend {
    pub inputs: HashMap<String, MockInput>,
    pub outputs: HashMap<String, Arc<Mutex<MuxLog>>>,
    pub seeks: Arc<Mutex<Vec<i64>>>,
    pub encoders: Arc<Mutex<Vec<EncoderParams>>>,
    /// Every `compensate(delta, distance)` handed to a resampler.
    pub compensations: Arc<Mutex<Vec<(i32, u32)>>>,
    pub audio_frame_size: usize,
    pub video_delay: usize,
    /// Muxers fail once they hold this many packets.
    pub fail_write_after: Option<usize>,
    pub fail_video_encode: bool,
    /// Decoded pictures are flagged interlaced.
    pub interlaced_video: bool,
    pub deinterlaced: Arc<Mutex<u64>>,
}

impl MockBackend {
    pub fn with_input(mut self, url: &str, input: MockInput) -> Self {
        self.inputs.insert(url.to_string(), input);
        self
    }

    pub fn output(&self, url: &str) -> Arc<Mutex<MuxLog>> {
        self.outputs.get(url).cloned().unwrap_or_default()
    }
}

impl Backend for MockBackend {
    fn open_input(&mut self, input: &InputConfig) -> anyhow::Result<Box<dyn Demuxer>> {
        let script = self
            .inputs
            .get(&input.url)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("No such file or directory"))?;
        Ok(Box::new(MockDemuxer {
            streams: script.streams,
            packets: script.packets.into(),
            start_time: script.start_time,
            metadata: script.metadata,
            seeks: self.seeks.clone(),
        }))
    }

    fn open_output(&mut self, output: &OutputConfig) -> anyhow::Result<Box<dyn Muxer>> {
        let log = Arc::new(Mutex::new(MuxLog::default()));
        self.outputs.insert(output.url.clone(), log.clone());
        Ok(Box::new(MockMuxer {
            log,
            fail_after: self.fail_write_after,
            bytes: 0,
        }))
    }

    fn open_decoder(&mut self, params: &StreamParams) -> anyhow::Result<Box<dyn Decoder>> {
        match &params.kind {
            StreamKind::Audio(a) => Ok(Box::new(PcmDecoder {
                channels: a.channels,
                sample_rate: a.sample_rate,
            })),
            StreamKind::Video(v) => Ok(Box::new(RawVideoDecoder {
                params: v.clone(),
                interlaced: self.interlaced_video,
            })),
            StreamKind::Subtitle => Ok(Box::new(TextDecoder)),
            StreamKind::Data => anyhow::bail!("no decoder for data streams"),
        }
    }

    fn open_encoder(&mut self, params: &EncoderParams) -> anyhow::Result<Box<dyn Encoder>> {
        self.encoders.lock().unwrap().push(params.clone());
        match &params.kind {
            StreamKind::Audio(_) => Ok(Box::new(PcmEncoder {
                name: params.codec.clone().unwrap_or_else(|| "pcm_s16le".into()),
                time_base: params.time_base,
                frame_size: self.audio_frame_size,
            })),
            StreamKind::Video(_) => Ok(Box::new(RawVideoEncoder {
                time_base: params.time_base,
                delay: self.video_delay,
                queue: VecDeque::new(),
                pass: params.pass,
                frames: 0,
                fail: self.fail_video_encode,
            })),
            StreamKind::Subtitle => Ok(Box::new(TextEncoder {
                name: params.codec.clone().unwrap_or_else(|| "text".into()),
                time_base: params.time_base,
            })),
            StreamKind::Data => anyhow::bail!("Unknown encoder"),
        }
    }

    fn open_picture_transform(&mut self, geometry: &VideoGeometry) -> anyhow::Result<Box<dyn PictureTransform>> {
        Ok(Box::new(ResizeTransform {
            output: geometry.output.clone(),
        }))
    }

    fn open_deinterlacer(&mut self, _params: &VideoParams) -> anyhow::Result<Box<dyn Deinterlacer>> {
        Ok(Box::new(FieldMerge {
            count: self.deinterlaced.clone(),
        }))
    }

    fn open_resampler(&mut self, params: &ResampleParams) -> anyhow::Result<Box<dyn Resampler>> {
        Ok(Box::new(LinearResampler::new(*params, self.compensations.clone())?))
    }
}

/// Linear interpolation with channel folding. One input sample of latency.
pub struct LinearResampler {
    params: ResampleParams,
    /// Input frames consumed per output frame.
    ratio: f64,
    /// Fractional read position relative to the start of the next input.
    position: f64,
    /// Last mixed input frame of the previous call.
    prev: Vec<f64>,
    compensation_ratio: f64,
    compensation_left: u64,
    compensations: Arc<Mutex<Vec<(i32, u32)>>>,
}

impl LinearResampler {
    pub fn new(params: ResampleParams, compensations: Arc<Mutex<Vec<(i32, u32)>>>) -> anyhow::Result<Self> {
        params.validate()?;
        let ratio = params.in_rate as f64 / params.out_rate as f64;
        Ok(Self {
            params,
            ratio,
            position: 0.0,
            prev: vec![0.0; params.out_channels as usize],
            compensation_ratio: ratio,
            compensation_left: 0,
            compensations,
        })
    }

    fn next_step(&mut self) -> f64 {
        if self.compensation_left > 0 {
            self.compensation_left -= 1;
            self.compensation_ratio
        } else {
            self.ratio
        }
    }

    fn mix(&self, input: &[i16]) -> Vec<f64> {
        let (in_ch, out_ch) = (self.params.in_channels as usize, self.params.out_channels as usize);
        let mut out = Vec::with_capacity(input.len() / in_ch * out_ch);
        for frame in input.chunks_exact(in_ch) {
            for ch in 0..out_ch {
                if in_ch <= out_ch {
                    out.push(frame[ch % in_ch] as f64);
                } else {
                    let (sum, n) = frame
                        .iter()
                        .enumerate()
                        .filter(|(i, _)| i % out_ch == ch)
                        .fold((0.0, 0usize), |(s, n), (_, v)| (s + *v as f64, n + 1));
                    out.push(sum / n.max(1) as f64);
                }
            }
        }
        out
    }
}

impl Resampler for LinearResampler {
    fn params(&self) -> ResampleParams {
        self.params
    }

    fn compensate(&mut self, delta: i32, distance: u32) -> anyhow::Result<()> {
        self.compensations.lock().unwrap().push((delta, distance));
        let target = distance as i64 + delta as i64;
        if distance == 0 || target <= 0 {
            self.compensation_left = 0;
            return Ok(());
        }
        self.compensation_ratio = self.ratio * distance as f64 / target as f64;
        self.compensation_left = target as u64;
        Ok(())
    }

    fn resample(&mut self, input: &[i16]) -> anyhow::Result<Vec<i16>> {
        let mixed = self.mix(input);
        let ch = self.params.out_channels as usize;
        let frames = mixed.len() / ch;
        if frames == 0 {
            return Ok(Vec::new());
        }
        let mut out = Vec::with_capacity(((frames as f64 / self.ratio).ceil() as usize + 1) * ch);
        let mut pos = self.position;
        while (pos as usize) < frames {
            let idx = pos as usize;
            let frac = pos - idx as f64;
            for c in 0..ch {
                let s0 = if idx > 0 { mixed[(idx - 1) * ch + c] } else { self.prev[c] };
                let s1 = mixed[idx * ch + c];
                let v = s0 + (s1 - s0) * frac;
                out.push(v.round().clamp(i16::MIN as f64, i16::MAX as f64) as i16);
            }
            pos += self.next_step();
        }
        self.position = pos - frames as f64;
        self.prev.copy_from_slice(&mixed[(frames - 1) * ch..]);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear(in_channels: u16, out_channels: u16, in_rate: u32, out_rate: u32) -> LinearResampler {
        let params = ResampleParams {
            in_channels,
            in_rate,
            out_channels,
            out_rate,
        };
        LinearResampler::new(params, Arc::default()).unwrap()
    }

    #[test]
    fn test_same_rate_keeps_sample_count() -> anyhow::Result<()> {
        let mut r = linear(1, 1, 8000, 8000);
        assert_eq!(r.resample(&[10, 20, 30, 40])?, vec![0, 10, 20, 30]);
        assert_eq!(r.resample(&[50])?, vec![40]);
        Ok(())
    }

    #[test]
    fn test_rate_conversion_lengths() -> anyhow::Result<()> {
        let mut r = linear(2, 2, 44100, 22050);
        let mut total = 0;
        for _ in 0..10 {
            total += r.resample(&vec![100; 441 * 2])?.len() / 2;
        }
        assert!((total as i64 - 2205).abs() <= 1, "got {}", total);
        Ok(())
    }

    #[test]
    fn test_channel_mixing() -> anyhow::Result<()> {
        let mut up = linear(1, 2, 8000, 8000);
        up.resample(&[7])?;
        assert_eq!(up.resample(&[9])?, vec![7, 7]);

        let mut down = linear(2, 1, 8000, 8000);
        down.resample(&[100, 300])?;
        assert_eq!(down.resample(&[0, 0])?, vec![200]);
        Ok(())
    }

    #[test]
    fn test_compensation_adds_samples() -> anyhow::Result<()> {
        let mut r = linear(1, 1, 8000, 8000);
        r.compensate(80, 8000)?;
        let mut total = 0;
        for _ in 0..10 {
            total += r.resample(&vec![0; 800])?.len();
        }
        assert!((total as i64 - 8080).abs() <= 1, "got {}", total);
        Ok(())
    }
}

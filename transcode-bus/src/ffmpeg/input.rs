use std::ffi::CString;
use std::path::Path;

use bytes::Bytes;
use ffmpeg_next::Dictionary;
use ffmpeg_next::format::format::Format;

use super::CodecParameters;
use crate::input::Demuxer;
use crate::metadata::Metadata;
use crate::packet::Packet;
use crate::stream::{AudioParams, StreamKind, StreamParams, VideoParams};

/// Reads packets from any container libavformat can open.
pub struct FfmpegDemuxer {
    inner: ffmpeg_next::format::context::Input,
    streams: Vec<StreamParams>,
}

unsafe impl Send for FfmpegDemuxer {}

impl FfmpegDemuxer {
    /// Resolves a forced input format by name, e.g. "s16le" or "v4l2".
    fn find_input_format(name: &str) -> anyhow::Result<ffmpeg_next::format::format::Input> {
        let cname = CString::new(name).map_err(|e| anyhow::anyhow!("invalid format name {:?}: {}", name, e))?;
        let ptr = unsafe { ffmpeg_next::ffi::av_find_input_format(cname.as_ptr()) };
        if ptr.is_null() {
            return Err(anyhow::anyhow!("input format not found: {}", name));
        }
        Ok(unsafe { ffmpeg_next::format::format::Input::wrap(ptr as *mut _) })
    }

    pub fn open(url: &str, format: Option<&str>) -> anyhow::Result<Self> {
        let path = Path::new(url);
        let input = match format {
            Some(name) => {
                let fmt = Self::find_input_format(name)?;
                ffmpeg_next::format::open_with(path, &Format::Input(fmt), Dictionary::new())?.input()
            }
            None => ffmpeg_next::format::input(path)?,
        };

        let mut streams = Vec::with_capacity(input.nb_streams() as usize);
        for stream in input.streams() {
            streams.push(stream_params(&stream)?);
        }
        Ok(Self { inner: input, streams })
    }
}

fn stream_params(stream: &ffmpeg_next::format::stream::Stream<'_>) -> anyhow::Result<StreamParams> {
    let parameters = stream.parameters();
    let codec = parameters.id().name().to_string();
    let raw = unsafe { &*(parameters.as_ptr() as *const ffmpeg_next::ffi::AVCodecParameters) };

    let kind = match parameters.medium() {
        ffmpeg_next::media::Type::Audio => StreamKind::Audio(AudioParams {
            sample_rate: raw.sample_rate.max(0) as u32,
            channels: raw.ch_layout.nb_channels.max(0) as u16,
            frame_size: raw.frame_size.max(0) as usize,
        }),
        ffmpeg_next::media::Type::Video => {
            let decoder = ffmpeg_next::codec::Context::from_parameters(parameters.clone())?
                .decoder()
                .video()?;
            let pixel_format = decoder
                .format()
                .descriptor()
                .map(|d| d.name().to_string())
                .unwrap_or_default();
            StreamKind::Video(VideoParams {
                width: raw.width.max(0) as u32,
                height: raw.height.max(0) as u32,
                pixel_format,
                frame_rate: stream.avg_frame_rate().into(),
            })
        }
        ffmpeg_next::media::Type::Subtitle => StreamKind::Subtitle,
        _ => StreamKind::Data,
    };

    let mut params = StreamParams::new(stream.index(), codec, kind, stream.time_base().into());
    let start = stream.start_time();
    params.start_time = (start != ffmpeg_next::ffi::AV_NOPTS_VALUE).then_some(start);
    params.bit_rate = raw.bit_rate.max(0) as u64;
    if !raw.extradata.is_null() && raw.extradata_size > 0 {
        let extradata = unsafe { std::slice::from_raw_parts(raw.extradata, raw.extradata_size as usize) };
        params.extradata = Bytes::copy_from_slice(extradata);
    }
    params.backend = Some(CodecParameters::wrap(parameters));
    Ok(params)
}

fn ts(value: Option<i64>) -> Option<i64> {
    value.filter(|v| *v != ffmpeg_next::ffi::AV_NOPTS_VALUE)
}

impl Demuxer for FfmpegDemuxer {
    fn streams(&self) -> &[StreamParams] {
        &self.streams
    }

    fn start_time(&self) -> Option<i64> {
        let start = unsafe { (*self.inner.as_ptr()).start_time };
        (start != ffmpeg_next::ffi::AV_NOPTS_VALUE).then_some(start)
    }

    fn metadata(&self) -> Metadata {
        let tags = self.inner.metadata();
        Metadata::from_tags(tags.iter())
    }

    fn read_packet(&mut self) -> anyhow::Result<Option<Packet>> {
        let mut packet = ffmpeg_next::Packet::empty();
        match packet.read(&mut self.inner) {
            Ok(()) => {}
            Err(ffmpeg_next::Error::Eof) => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        let data = packet.data().map(Bytes::copy_from_slice).unwrap_or_default();
        let duration = Some(packet.duration()).filter(|d| *d > 0);
        let mut out = Packet::new(packet.stream(), data)
            .with_ts(ts(packet.pts()), ts(packet.dts()))
            .with_key(packet.is_key());
        out.duration = duration;
        Ok(Some(out))
    }

    fn seek(&mut self, timestamp: i64) -> anyhow::Result<()> {
        self.inner.seek(timestamp, ..timestamp)?;
        Ok(())
    }
}

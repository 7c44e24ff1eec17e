use ffmpeg_next::Dictionary;

use super::CodecParameters;
use crate::metadata::Metadata;
use crate::output::Muxer;
use crate::packet::Packet;
use crate::rational::Rational;
use crate::stream::StreamParams;

/// Writes packets into any container libavformat can produce.
pub struct FfmpegMuxer {
    inner: ffmpeg_next::format::context::Output,
    /// Payload bytes handed to the muxer, used when the output has no
    /// seekable byte counter.
    payload: u64,
}

unsafe impl Send for FfmpegMuxer {}

impl FfmpegMuxer {
    pub fn create(url: &str, format: Option<&str>) -> anyhow::Result<Self> {
        let output = match format {
            Some(format) => ffmpeg_next::format::output_as(url, format)?,
            None => ffmpeg_next::format::output(url)?,
        };
        Ok(Self { inner: output, payload: 0 })
    }
}

impl Muxer for FfmpegMuxer {
    fn add_stream(&mut self, params: &StreamParams) -> anyhow::Result<usize> {
        let codec_params = CodecParameters::from_stream(params)
            .ok_or_else(|| anyhow::anyhow!("stream {} ({}) has no FFmpeg codec parameters", params.index, params.codec))?;
        let parameters = codec_params.parameters().clone();
        let mut writer_stream = self
            .inner
            .add_stream(ffmpeg_next::encoder::find(parameters.id()))?;
        writer_stream.set_parameters(parameters);
        writer_stream.set_time_base(ffmpeg_next::Rational::from(params.time_base));
        unsafe {
            // The source container's tag may not be valid in this one.
            (*(*writer_stream.as_mut_ptr()).codecpar).codec_tag = 0;
        }
        Ok(writer_stream.index())
    }

    fn set_metadata(&mut self, metadata: &Metadata) {
        let mut dict = Dictionary::new();
        for (key, value) in metadata.tags() {
            dict.set(key, &value);
        }
        self.inner.set_metadata(dict);
    }

    fn write_header(&mut self) -> anyhow::Result<()> {
        self.inner.write_header()?;
        Ok(())
    }

    fn time_base(&self, stream_index: usize) -> Option<Rational> {
        self.inner.stream(stream_index).map(|s| s.time_base().into())
    }

    fn write_packet(&mut self, packet: Packet) -> anyhow::Result<()> {
        let mut p = ffmpeg_next::Packet::copy(&packet.data);
        p.set_stream(packet.stream_index);
        p.set_pts(packet.pts);
        p.set_dts(packet.dts);
        if let Some(duration) = packet.duration {
            p.set_duration(duration);
        }
        if packet.is_key {
            p.set_flags(ffmpeg_next::codec::packet::Flags::KEY);
        }
        p.set_position(-1);
        p.write_interleaved(&mut self.inner)?;
        self.payload += packet.data.len() as u64;
        Ok(())
    }

    fn write_trailer(&mut self) -> anyhow::Result<()> {
        self.inner.write_trailer()?;
        Ok(())
    }

    fn bytes_written(&self) -> u64 {
        let position = unsafe {
            let pb = (*self.inner.as_ptr()).pb;
            if pb.is_null() { -1 } else { ffmpeg_next::ffi::avio_size(pb) }
        };
        if position > 0 { position as u64 } else { self.payload }
    }
}

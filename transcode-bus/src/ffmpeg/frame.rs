use std::str::FromStr;

use bytes::Bytes;
use ffmpeg_next::ChannelLayout;
use ffmpeg_next::format::{Pixel, Sample, sample};
use ffmpeg_next::picture;

use crate::frame::{AudioFrame, PictureType, VideoFrame};

/// Interleaved s16, the only sample format the engine handles.
pub(crate) const PACKED_S16: Sample = Sample::I16(sample::Type::Packed);

pub(crate) fn pixel(name: &str) -> anyhow::Result<Pixel> {
    Pixel::from_str(name).map_err(|_| anyhow::anyhow!("unknown pixel format: {}", name))
}

pub(crate) fn pixel_name(format: Pixel) -> String {
    format.descriptor().map(|d| d.name().to_string()).unwrap_or_default()
}

pub(crate) fn layout(channels: u16) -> ChannelLayout {
    ChannelLayout::default(channels as i32)
}

pub(crate) fn to_av_video(frame: &VideoFrame) -> anyhow::Result<ffmpeg_next::frame::Video> {
    let mut av = ffmpeg_next::frame::Video::new(pixel(&frame.pixel_format)?, frame.width, frame.height);
    for (i, plane) in frame.planes.iter().enumerate().take(av.planes()) {
        let src_stride = frame.linesizes.get(i).copied().unwrap_or(0);
        let dst_stride = av.stride(i);
        let rows = av.plane_height(i) as usize;
        let row_len = src_stride.min(dst_stride);
        let dst = av.data_mut(i);
        for row in 0..rows {
            let src_start = row * src_stride;
            if src_start + row_len > plane.len() {
                break;
            }
            dst[row * dst_stride..row * dst_stride + row_len].copy_from_slice(&plane[src_start..src_start + row_len]);
        }
    }
    av.set_pts(frame.pts);
    av.set_kind(match frame.picture_type {
        PictureType::I => picture::Type::I,
        PictureType::P => picture::Type::P,
        PictureType::B => picture::Type::B,
        PictureType::None => picture::Type::None,
    });
    Ok(av)
}

pub(crate) fn from_av_video(av: &ffmpeg_next::frame::Video) -> VideoFrame {
    let mut frame = VideoFrame::new(av.width(), av.height(), pixel_name(av.format()));
    for i in 0..av.planes() {
        let stride = av.stride(i);
        let len = (stride * av.plane_height(i) as usize).min(av.data(i).len());
        frame.planes.push(Bytes::copy_from_slice(&av.data(i)[..len]));
        frame.linesizes.push(stride);
    }
    frame.pts = av.pts();
    frame.key_frame = av.is_key();
    frame.interlaced = av.is_interlaced();
    frame.top_field_first = av.is_top_first();
    frame.picture_type = match av.kind() {
        picture::Type::I => PictureType::I,
        picture::Type::P => PictureType::P,
        picture::Type::B => PictureType::B,
        _ => PictureType::None,
    };
    frame
}

pub(crate) fn packed_audio(samples: &[i16], channels: u16, rate: u32) -> ffmpeg_next::frame::Audio {
    let nb_samples = samples.len() / channels.max(1) as usize;
    let mut av = ffmpeg_next::frame::Audio::new(PACKED_S16, nb_samples, layout(channels));
    av.set_rate(rate);
    let dst = av.data_mut(0);
    for (chunk, sample) in dst.chunks_exact_mut(2).zip(samples.iter()) {
        chunk.copy_from_slice(&sample.to_ne_bytes());
    }
    av
}

pub(crate) fn to_av_audio(frame: &AudioFrame) -> ffmpeg_next::frame::Audio {
    let mut av = packed_audio(&frame.samples, frame.channels, frame.sample_rate);
    av.set_pts(frame.pts);
    av
}

/// `av` must already hold packed s16.
pub(crate) fn from_av_audio(av: &ffmpeg_next::frame::Audio, channels: u16) -> AudioFrame {
    let len = av.samples() * channels as usize * 2;
    let data = av.data(0);
    let samples = data[..len.min(data.len())]
        .chunks_exact(2)
        .map(|b| i16::from_ne_bytes([b[0], b[1]]))
        .collect();
    let mut frame = AudioFrame::new(samples, channels, av.rate());
    frame.pts = av.pts();
    frame
}

use bytes::{Bytes, BytesMut};
use ffmpeg_next::format::Pixel;
use ffmpeg_next::software::scaling;

use super::frame::{from_av_video, pixel, pixel_name, to_av_video};
use crate::config::Bands;
use crate::frame::VideoFrame;
use crate::scaler::{Deinterlacer, PictureTransform, VideoGeometry};
use crate::stream::VideoParams;

/// Chroma subsampling shifts `(horizontal, vertical)` of each plane, for the
/// 8-bit planar formats crop, pad and deinterlace work on directly.
fn planar_layout(format: Pixel) -> anyhow::Result<&'static [(u32, u32)]> {
    Ok(match format {
        Pixel::GRAY8 => &[(0, 0)],
        Pixel::YUV420P | Pixel::YUVJ420P => &[(0, 0), (1, 1), (1, 1)],
        Pixel::YUV422P | Pixel::YUVJ422P => &[(0, 0), (1, 0), (1, 0)],
        Pixel::YUV444P | Pixel::YUVJ444P => &[(0, 0), (0, 0), (0, 0)],
        _ => anyhow::bail!("{} is not an 8-bit planar format", pixel_name(format)),
    })
}

fn plane_size(width: u32, height: u32, (sw, sh): (u32, u32)) -> (usize, usize) {
    (
        (width as usize + (1 << sw) - 1) >> sw,
        (height as usize + (1 << sh) - 1) >> sh,
    )
}

fn rgb_to_yuv([r, g, b]: [u8; 3]) -> [u8; 3] {
    let (r, g, b) = (r as i32, g as i32, b as i32);
    [
        (((66 * r + 129 * g + 25 * b + 128) >> 8) + 16) as u8,
        (((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128) as u8,
        (((112 * r - 94 * g - 18 * b + 128) >> 8) + 128) as u8,
    ]
}

fn with_planes(src: &VideoFrame, width: u32, height: u32, planes: Vec<Bytes>, linesizes: Vec<usize>) -> VideoFrame {
    VideoFrame {
        width,
        height,
        planes,
        linesizes,
        ..src.clone()
    }
}

fn crop(frame: &VideoFrame, bands: Bands, layout: &[(u32, u32)]) -> anyhow::Result<VideoFrame> {
    let width = frame.width - bands.width();
    let height = frame.height - bands.height();
    let mut planes = Vec::with_capacity(layout.len());
    let mut linesizes = Vec::with_capacity(layout.len());
    for (i, &shift) in layout.iter().enumerate() {
        let (src, stride) = match (frame.planes.get(i), frame.linesizes.get(i)) {
            (Some(src), Some(stride)) => (src, *stride),
            _ => anyhow::bail!("picture is missing plane {}", i),
        };
        let (w, h) = plane_size(width, height, shift);
        let (left, top) = ((bands.left >> shift.0) as usize, (bands.top >> shift.1) as usize);
        let mut out = BytesMut::with_capacity(w * h);
        for row in 0..h {
            let start = (top + row) * stride + left;
            let line = src
                .get(start..start + w)
                .ok_or_else(|| anyhow::anyhow!("plane {} is shorter than its geometry", i))?;
            out.extend_from_slice(line);
        }
        planes.push(out.freeze());
        linesizes.push(w);
    }
    Ok(with_planes(frame, width, height, planes, linesizes))
}

fn pad(
    frame: &VideoFrame,
    bands: Bands,
    (width, height): (u32, u32),
    color: [u8; 3],
    layout: &[(u32, u32)],
) -> anyhow::Result<VideoFrame> {
    let mut planes = Vec::with_capacity(layout.len());
    let mut linesizes = Vec::with_capacity(layout.len());
    for (i, &shift) in layout.iter().enumerate() {
        let (src, stride) = match (frame.planes.get(i), frame.linesizes.get(i)) {
            (Some(src), Some(stride)) => (src, *stride),
            _ => anyhow::bail!("picture is missing plane {}", i),
        };
        let (w, h) = plane_size(width, height, shift);
        let (inner_w, inner_h) = plane_size(frame.width, frame.height, shift);
        let (left, top) = ((bands.left >> shift.0) as usize, (bands.top >> shift.1) as usize);
        let mut out = vec![color[i]; w * h];
        for row in 0..inner_h.min(h.saturating_sub(top)) {
            let line = src
                .get(row * stride..row * stride + inner_w)
                .ok_or_else(|| anyhow::anyhow!("plane {} is shorter than its geometry", i))?;
            let dst = (top + row) * w + left;
            let len = inner_w.min(w.saturating_sub(left));
            out[dst..dst + len].copy_from_slice(&line[..len]);
        }
        planes.push(Bytes::from(out));
        linesizes.push(w);
    }
    Ok(with_planes(frame, width, height, planes, linesizes))
}

/// Crops in place, resizes and converts with libswscale, then pads.
pub struct SwsTransform {
    geometry: VideoGeometry,
    crop_layout: Option<&'static [(u32, u32)]>,
    pad_layout: Option<&'static [(u32, u32)]>,
    scaler: Option<scaling::Context>,
    pad_color: [u8; 3],
}

unsafe impl Send for SwsTransform {}

impl SwsTransform {
    pub fn new(geometry: &VideoGeometry) -> anyhow::Result<Self> {
        let input = pixel(&geometry.input.pixel_format)?;
        let output = pixel(&geometry.output.pixel_format)?;
        let crop_layout = if geometry.crop.is_empty() {
            None
        } else {
            Some(planar_layout(input)?)
        };
        let pad_layout = if geometry.pad.is_empty() {
            None
        } else {
            Some(planar_layout(output)?)
        };
        let scaler = if geometry.needs_resize() || geometry.needs_format_conversion() {
            let (src_w, src_h) = geometry.cropped_size();
            let (dst_w, dst_h) = geometry.scaled_size();
            Some(scaling::Context::get(
                input,
                src_w,
                src_h,
                output,
                dst_w,
                dst_h,
                scaling::Flags::BICUBIC,
            )?)
        } else {
            None
        };
        let pad_color = if output == Pixel::GRAY8 {
            let [y, _, _] = rgb_to_yuv(geometry.pad_color);
            [y; 3]
        } else {
            rgb_to_yuv(geometry.pad_color)
        };
        Ok(Self {
            geometry: geometry.clone(),
            crop_layout,
            pad_layout,
            scaler,
            pad_color,
        })
    }
}

impl PictureTransform for SwsTransform {
    fn transform(&mut self, frame: &VideoFrame) -> anyhow::Result<VideoFrame> {
        let mut picture = match self.crop_layout {
            Some(layout) => crop(frame, self.geometry.crop, layout)?,
            None => frame.clone(),
        };
        if let Some(scaler) = self.scaler.as_mut() {
            let src = to_av_video(&picture)?;
            let mut dst = ffmpeg_next::frame::Video::empty();
            scaler.run(&src, &mut dst)?;
            let scaled = from_av_video(&dst);
            picture = VideoFrame {
                width: scaled.width,
                height: scaled.height,
                pixel_format: scaled.pixel_format,
                planes: scaled.planes,
                linesizes: scaled.linesizes,
                ..picture
            };
        }
        if let Some(layout) = self.pad_layout {
            let size = (self.geometry.output.width, self.geometry.output.height);
            picture = pad(&picture, self.geometry.pad, size, self.pad_color, layout)?;
        }
        Ok(picture)
    }
}

/// Blends each line with its neighbours, `(above + 2 * line + below) / 4`,
/// which removes combing at the cost of some vertical detail.
pub struct LineBlend {
    layout: &'static [(u32, u32)],
}

impl LineBlend {
    pub fn new(params: &VideoParams) -> anyhow::Result<Self> {
        Ok(Self {
            layout: planar_layout(pixel(&params.pixel_format)?)?,
        })
    }
}

impl Deinterlacer for LineBlend {
    fn deinterlace(&mut self, frame: &VideoFrame) -> anyhow::Result<VideoFrame> {
        let mut planes = Vec::with_capacity(self.layout.len());
        let mut linesizes = Vec::with_capacity(self.layout.len());
        for (i, &shift) in self.layout.iter().enumerate() {
            let (src, stride) = match (frame.planes.get(i), frame.linesizes.get(i)) {
                (Some(src), Some(stride)) => (src, *stride),
                _ => anyhow::bail!("picture is missing plane {}", i),
            };
            let (w, h) = plane_size(frame.width, frame.height, shift);
            if src.len() < stride * (h - 1) + w {
                anyhow::bail!("plane {} is shorter than its geometry", i);
            }
            let mut out = vec![0u8; w * h];
            for row in 0..h {
                let above = row.saturating_sub(1);
                let below = (row + 1).min(h - 1);
                for x in 0..w {
                    let sum = src[above * stride + x] as u16
                        + 2 * src[row * stride + x] as u16
                        + src[below * stride + x] as u16;
                    out[row * w + x] = ((sum + 2) >> 2) as u8;
                }
            }
            planes.push(Bytes::from(out));
            linesizes.push(w);
        }
        let mut out = with_planes(frame, frame.width, frame.height, planes, linesizes);
        out.interlaced = false;
        Ok(out)
    }
}

use crate::config::Bands;
use crate::frame::VideoFrame;
use crate::stream::VideoParams;

/// Crop, resize, pad and pixel format plan for one video output.
///
/// The picture is cropped first, scaled into the area left inside the pad
/// bands, then padded out to the output size.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoGeometry {
    pub input: VideoParams,
    pub output: VideoParams,
    pub crop: Bands,
    pub pad: Bands,
    pub pad_color: [u8; 3],
}

impl VideoGeometry {
    pub fn new(
        input: &VideoParams,
        output: &VideoParams,
        crop: Bands,
        pad: Bands,
        pad_color: [u8; 3],
    ) -> Result<Self, String> {
        if crop.width() >= input.width || crop.height() >= input.height {
            return Err(format!(
                "crop {:?} leaves nothing of a {}x{} picture",
                crop, input.width, input.height
            ));
        }
        if pad.width() >= output.width || pad.height() >= output.height {
            return Err(format!(
                "pad {:?} leaves nothing of a {}x{} picture",
                pad, output.width, output.height
            ));
        }
        Ok(Self {
            input: input.clone(),
            output: output.clone(),
            crop,
            pad,
            pad_color,
        })
    }

    pub fn cropped_size(&self) -> (u32, u32) {
        (
            self.input.width - self.crop.width(),
            self.input.height - self.crop.height(),
        )
    }

    /// Size the cropped picture is scaled to before padding.
    pub fn scaled_size(&self) -> (u32, u32) {
        (
            self.output.width - self.pad.width(),
            self.output.height - self.pad.height(),
        )
    }

    pub fn needs_resize(&self) -> bool {
        self.cropped_size() != self.scaled_size()
    }

    pub fn needs_format_conversion(&self) -> bool {
        self.input.pixel_format != self.output.pixel_format
    }

    pub fn needs_transform(&self) -> bool {
        !self.crop.is_empty()
            || !self.pad.is_empty()
            || self.needs_resize()
            || self.needs_format_conversion()
    }
}

/// Executes a [`VideoGeometry`] on decoded pictures.
pub trait PictureTransform: Send {
    fn transform(&mut self, frame: &VideoFrame) -> anyhow::Result<VideoFrame>;
}

pub trait Deinterlacer: Send {
    fn deinterlace(&mut self, frame: &VideoFrame) -> anyhow::Result<VideoFrame>;
}

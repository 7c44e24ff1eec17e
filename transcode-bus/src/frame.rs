use bytes::Bytes;

use crate::stream::MediaType;

/// A decoded unit, one variant per media type.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Audio(AudioFrame),
    Video(VideoFrame),
    Subtitle(Subtitle),
}

impl Frame {
    pub fn media_type(&self) -> MediaType {
        match self {
            Frame::Audio(_) => MediaType::Audio,
            Frame::Video(_) => MediaType::Video,
            Frame::Subtitle(_) => MediaType::Subtitle,
        }
    }
}

/// Interleaved signed 16-bit PCM.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AudioFrame {
    pub samples: Vec<i16>,
    pub channels: u16,
    pub sample_rate: u32,
    pub pts: Option<i64>,
}

impl AudioFrame {
    pub fn new(samples: Vec<i16>, channels: u16, sample_rate: u32) -> Self {
        Self {
            samples,
            channels,
            sample_rate,
            pts: None,
        }
    }

    /// Samples per channel.
    pub fn nb_samples(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    /// Scales every sample by `volume / 256`, saturating at the i16 range.
    pub fn apply_volume(&mut self, volume: i32) {
        if volume == 256 {
            return;
        }
        for sample in self.samples.iter_mut() {
            let v = (*sample as i64 * volume as i64 + 128) >> 8;
            *sample = v.clamp(i16::MIN as i64, i16::MAX as i64) as i16;
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PictureType {
    #[default]
    None,
    I,
    P,
    B,
}

impl PictureType {
    pub fn as_char(&self) -> char {
        match self {
            PictureType::None => '?',
            PictureType::I => 'I',
            PictureType::P => 'P',
            PictureType::B => 'B',
        }
    }
}

/// A decoded picture. Plane data is reference counted so duplicating a
/// frame for constant frame rate output does not copy pixels.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub pixel_format: String,
    pub planes: Vec<Bytes>,
    pub linesizes: Vec<usize>,
    pub pts: Option<i64>,
    pub key_frame: bool,
    pub interlaced: bool,
    pub top_field_first: bool,
    pub picture_type: PictureType,
}

impl VideoFrame {
    pub fn new(width: u32, height: u32, pixel_format: impl Into<String>) -> Self {
        Self {
            width,
            height,
            pixel_format: pixel_format.into(),
            ..Default::default()
        }
    }

    pub fn size(&self) -> usize {
        self.planes.iter().map(|p| p.len()).sum()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubtitleRect {
    Text(String),
    Ass(String),
    Bitmap {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        data: Bytes,
    },
}

/// Display times are milliseconds relative to the packet pts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Subtitle {
    pub start_display_time: u32,
    pub end_display_time: u32,
    pub rects: Vec<SubtitleRect>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_volume_scaling() {
        let mut frame = AudioFrame::new(vec![100, -100, 20000, -20000, 1], 1, 8000);
        frame.apply_volume(512);
        assert_eq!(frame.samples, vec![200, -200, 32767, -32768, 2]);

        let mut frame = AudioFrame::new(vec![100, -100, 3], 1, 8000);
        frame.apply_volume(128);
        assert_eq!(frame.samples, vec![50, -50, 2]);
    }

    #[test]
    fn test_large_gain_saturates() {
        let mut frame = AudioFrame::new(vec![32767, -32768, 1000], 1, 48000);
        frame.apply_volume(102_400);
        assert_eq!(frame.samples, vec![32767, -32768, 32767]);

        let mut frame = AudioFrame::new(vec![-1, 0, 1], 1, 48000);
        frame.apply_volume(i32::MAX);
        assert_eq!(frame.samples, vec![-32768, 0, 32767]);
    }

    #[test]
    fn test_nb_samples() {
        let frame = AudioFrame::new(vec![0; 2048], 2, 48000);
        assert_eq!(frame.nb_samples(), 1024);
        assert_eq!(Frame::Audio(frame).media_type(), MediaType::Audio);
    }
}

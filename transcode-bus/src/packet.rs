use bytes::Bytes;

use crate::frame::PictureType;

/// A compressed unit as read from a demuxer or handed to a muxer.
///
/// Timestamps are in the time base of the stream the packet belongs to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Packet {
    pub stream_index: usize,
    pub data: Bytes,
    pub pts: Option<i64>,
    pub dts: Option<i64>,
    pub duration: Option<i64>,
    pub is_key: bool,
}

impl Packet {
    pub fn new(stream_index: usize, data: impl Into<Bytes>) -> Self {
        Self {
            stream_index,
            data: data.into(),
            ..Default::default()
        }
    }

    pub fn with_ts(mut self, pts: Option<i64>, dts: Option<i64>) -> Self {
        self.pts = pts;
        self.dts = dts;
        self
    }

    pub fn with_duration(mut self, duration: i64) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn with_key(mut self, is_key: bool) -> Self {
        self.is_key = is_key;
        self
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// Encoder output. Timestamps are in the encoder's time base.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncodedPacket {
    pub data: Bytes,
    pub pts: Option<i64>,
    pub dts: Option<i64>,
    pub is_key: bool,
    pub picture_type: PictureType,
}

impl EncodedPacket {
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

use crate::frame::Frame;

/// Result of one decode call.
#[derive(Debug, Default)]
pub struct Decoded {
    /// Bytes of the input slice used up by this call.
    pub consumed: usize,
    pub frame: Option<Frame>,
}

impl Decoded {
    pub fn frame(consumed: usize, frame: Frame) -> Self {
        Self {
            consumed,
            frame: Some(frame),
        }
    }

    pub fn nothing(consumed: usize) -> Self {
        Self {
            consumed,
            frame: None,
        }
    }
}

/// Black-box decoder for one input stream.
pub trait Decoder: Send {
    /// Decodes from the front of `data`, reporting how much was consumed and
    /// at most one frame. An empty slice drains frames still buffered inside
    /// the decoder, one per call, until it returns no frame.
    fn decode(&mut self, data: &[u8]) -> anyhow::Result<Decoded>;

    fn close(&mut self) {}
}

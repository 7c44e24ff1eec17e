pub mod backend;
pub mod bsf;
pub mod clock;
pub mod config;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod fifo;
pub mod frame;
pub mod input;
pub mod mapping;
pub mod metadata;
pub mod output;
pub mod packet;
pub mod passlog;
pub mod rational;
pub mod report;
pub mod resample;
pub mod scaler;
pub mod stream;
pub mod sync;
pub mod task;
pub mod transcoder;

mod router;

#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;

#[cfg(test)]
pub(crate) mod mock;

pub use backend::Backend;
pub use config::TranscodeConfig;
pub use error::{Error, Result};
pub use task::TranscodeTask;
pub use transcoder::{TranscodeSummary, Transcoder};

/// Registers FFmpeg components. Call once at startup before opening any
/// input with the FFmpeg backend.
#[cfg(feature = "ffmpeg")]
pub fn init() -> anyhow::Result<()> {
    ffmpeg_next::init().map_err(|e| anyhow::anyhow!("ffmpeg_next init: {}", e))
}

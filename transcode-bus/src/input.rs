use crate::config::{InputConfig, TranscodeConfig};
use crate::error::{Error, Result};
use crate::metadata::Metadata;
use crate::packet::Packet;
use crate::stream::StreamParams;

/// Black-box demuxer for one input file.
pub trait Demuxer: Send {
    fn streams(&self) -> &[StreamParams];

    /// Container start time, global base.
    fn start_time(&self) -> Option<i64> {
        None
    }

    fn metadata(&self) -> Metadata {
        Metadata::default()
    }

    /// Next packet in file order, `None` at end of file.
    fn read_packet(&mut self) -> anyhow::Result<Option<Packet>>;

    /// Seeks to the nearest point at or before `timestamp` (global base).
    fn seek(&mut self, timestamp: i64) -> anyhow::Result<()>;
}

pub struct InputFile {
    pub index: usize,
    pub url: String,
    demuxer: Box<dyn Demuxer>,
    /// Global index of this file's first stream.
    pub ist_index: usize,
    pub nb_streams: usize,
    pub eof_reached: bool,
    /// Added to every timestamp of this file, global base.
    pub ts_offset: i64,
    /// Corrected time a unit must reach to pass the start gate.
    pub start_threshold: i64,
    pub rate_emu: bool,
}

impl InputFile {
    /// Seeks to the requested start and derives the initial timestamp offset.
    pub fn open(
        index: usize,
        input: &InputConfig,
        mut demuxer: Box<dyn Demuxer>,
        config: &TranscodeConfig,
        ist_index: usize,
    ) -> Self {
        let seek_target = config.start_time + demuxer.start_time().unwrap_or(0);
        if config.start_time != 0 {
            if let Err(e) = demuxer.seek(seek_target) {
                log::warn!(
                    "{}: could not seek to position {:.3}: {:#}",
                    input.url,
                    seek_target as f64 / crate::clock::TIME_BASE as f64,
                    e
                );
            }
        }
        let ts_offset = config.input_ts_offset - if config.copy_ts { 0 } else { seek_target };
        let nb_streams = demuxer.streams().len();

        Self {
            index,
            url: input.url.clone(),
            demuxer,
            ist_index,
            nb_streams,
            eof_reached: false,
            ts_offset,
            start_threshold: seek_target + ts_offset,
            rate_emu: input.rate_emu,
        }
    }

    pub fn streams(&self) -> &[StreamParams] {
        self.demuxer.streams()
    }

    pub fn metadata(&self) -> Metadata {
        self.demuxer.metadata()
    }

    pub fn read_packet(&mut self) -> Result<Option<Packet>> {
        self.demuxer.read_packet().map_err(|source| Error::Read {
            file: self.index,
            source,
        })
    }

    /// Whether a unit at `pts` (global base, uncorrected) is at or past the
    /// requested start.
    pub fn passes_start_gate(&self, pts: i64, start_time: i64) -> bool {
        start_time == 0 || pts + self.ts_offset >= self.start_threshold
    }
}

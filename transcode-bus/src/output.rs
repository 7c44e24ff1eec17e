use crate::error::{Error, Result};
use crate::metadata::Metadata;
use crate::packet::Packet;
use crate::rational::Rational;
use crate::stream::StreamParams;

/// Black-box muxer for one output file.
pub trait Muxer: Send {
    /// Registers a stream and returns its index in the file.
    fn add_stream(&mut self, params: &StreamParams) -> anyhow::Result<usize>;

    fn set_metadata(&mut self, _metadata: &Metadata) {}

    fn write_header(&mut self) -> anyhow::Result<()>;

    /// The time base the muxer settled on for a stream; known after the header.
    fn time_base(&self, stream_index: usize) -> Option<Rational>;

    /// Timestamps are in the stream's muxer time base.
    fn write_packet(&mut self, packet: Packet) -> anyhow::Result<()>;

    fn write_trailer(&mut self) -> anyhow::Result<()>;

    fn bytes_written(&self) -> u64;
}

pub struct OutputFile {
    pub index: usize,
    pub url: String,
    muxer: Box<dyn Muxer>,
    have_written_header: bool,
    have_written_trailer: bool,
    failed: bool,
    last_dts: Vec<Option<i64>>,
}

impl OutputFile {
    pub fn new(index: usize, url: impl Into<String>, muxer: Box<dyn Muxer>) -> Self {
        Self {
            index,
            url: url.into(),
            muxer,
            have_written_header: false,
            have_written_trailer: false,
            failed: false,
            last_dts: Vec::new(),
        }
    }

    pub fn add_stream(&mut self, params: &StreamParams) -> Result<usize> {
        let index = self.muxer.add_stream(params).map_err(|source| Error::Open {
            url: self.url.clone(),
            source,
        })?;
        if self.last_dts.len() <= index {
            self.last_dts.resize(index + 1, None);
        }
        Ok(index)
    }

    pub fn set_metadata(&mut self, metadata: &Metadata) {
        self.muxer.set_metadata(metadata);
    }

    pub fn write_header(&mut self) -> Result<()> {
        match self.muxer.write_header() {
            Ok(()) => {
                self.have_written_header = true;
                Ok(())
            }
            Err(source) => {
                self.failed = true;
                Err(Error::Write {
                    file: self.index,
                    source,
                })
            }
        }
    }

    pub fn time_base(&self, stream_index: usize) -> Option<Rational> {
        self.muxer.time_base(stream_index)
    }

    /// Writes one packet, keeping each stream's dts non-decreasing and pts
    /// never below dts.
    pub fn write_packet(&mut self, mut packet: Packet) -> Result<()> {
        if !self.have_written_header {
            return Err(Error::Write {
                file: self.index,
                source: anyhow::anyhow!("packet written before the header"),
            });
        }
        let index = packet.stream_index;
        if self.last_dts.len() <= index {
            self.last_dts.resize(index + 1, None);
        }
        if packet.dts.is_none() {
            packet.dts = packet.pts;
        }
        if let (Some(dts), Some(last)) = (packet.dts, self.last_dts[index]) {
            if dts < last {
                log::warn!(
                    "{}: non-monotonic dts on stream {} ({} < {}), clamping",
                    self.url,
                    index,
                    dts,
                    last
                );
                packet.dts = Some(last);
            }
        }
        if packet.dts.is_none() {
            packet.dts = self.last_dts[index];
        }
        if let (Some(pts), Some(dts)) = (packet.pts, packet.dts) {
            if pts < dts {
                packet.pts = Some(dts);
            }
        }
        if packet.dts.is_some() {
            self.last_dts[index] = packet.dts;
        }

        self.muxer.write_packet(packet).map_err(|source| {
            self.failed = true;
            Error::Write {
                file: self.index,
                source,
            }
        })
    }

    /// Finalises the file unless its header never made it out or a write failed.
    pub fn write_trailer(&mut self) -> Result<()> {
        if !self.have_written_header || self.have_written_trailer || self.failed {
            return Ok(());
        }
        self.have_written_trailer = true;
        self.muxer.write_trailer().map_err(|source| Error::Write {
            file: self.index,
            source,
        })
    }

    pub fn size(&self) -> u64 {
        self.muxer.bytes_written()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::stream::StreamKind;

    #[derive(Default)]
    struct Recorder {
        packets: Arc<Mutex<Vec<Packet>>>,
    }

    impl Muxer for Recorder {
        fn add_stream(&mut self, _params: &StreamParams) -> anyhow::Result<usize> {
            Ok(0)
        }

        fn write_header(&mut self) -> anyhow::Result<()> {
            Ok(())
        }

        fn time_base(&self, _stream_index: usize) -> Option<Rational> {
            Some(Rational(1, 25))
        }

        fn write_packet(&mut self, packet: Packet) -> anyhow::Result<()> {
            self.packets.lock().unwrap().push(packet);
            Ok(())
        }

        fn write_trailer(&mut self) -> anyhow::Result<()> {
            Ok(())
        }

        fn bytes_written(&self) -> u64 {
            0
        }
    }

    #[test]
    fn test_dts_never_goes_backwards() -> anyhow::Result<()> {
        let recorder = Recorder::default();
        let packets = recorder.packets.clone();
        let mut file = OutputFile::new(0, "out", Box::new(recorder));
        file.add_stream(&StreamParams::new(0, "raw", StreamKind::Data, Rational(1, 25)))?;

        assert!(file.write_packet(Packet::new(0, vec![0])).is_err());
        file.write_header()?;
        file.write_packet(Packet::new(0, vec![0]).with_ts(Some(4), Some(4)))?;
        file.write_packet(Packet::new(0, vec![1]).with_ts(Some(2), Some(3)))?;
        file.write_packet(Packet::new(0, vec![2]).with_ts(Some(6), None))?;

        let ts: Vec<_> = packets.lock().unwrap().iter().map(|p| (p.pts, p.dts)).collect();
        assert_eq!(ts, vec![(Some(4), Some(4)), (Some(4), Some(4)), (Some(6), Some(6))]);
        Ok(())
    }
}

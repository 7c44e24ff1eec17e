//! Setup, the main read/route loop and shutdown.

use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::backend::Backend;
use crate::bsf::AvccToAnnexB;
use crate::clock::{self, RateEmulator, TIME_BASE};
use crate::config::{OutputConfig, OutputStreamConfig, Pass, TranscodeConfig};
use crate::encoder::EncoderParams;
use crate::error::{Error, Result};
use crate::fifo::AudioFifo;
use crate::input::InputFile;
use crate::mapping::{self, StreamMapping};
use crate::metadata::{self, Metadata};
use crate::output::OutputFile;
use crate::packet::Packet;
use crate::passlog::{self, PassLog};
use crate::rational::Rational;
use crate::report::{ProgressReport, ProgressSender, Reporter, VideoStatsLog};
use crate::scaler::VideoGeometry;
use crate::stream::{
    AudioOutput, AudioParams, InputStream, MediaType, OutputKind, OutputStats, OutputStream,
    StreamKind, StreamParams, VideoOutput, VideoParams,
};

/// Byte and frame totals across all outputs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    pub video_size: u64,
    pub audio_size: u64,
    pub extra_size: u64,
    pub frames_dup: u64,
    pub frames_drop: u64,
}

#[derive(Debug, Clone)]
pub struct TranscodeSummary {
    /// One entry per output stream, in configuration order.
    pub streams: Vec<OutputStats>,
    pub counters: Counters,
    pub report: ProgressReport,
    /// Stopped early by cancellation.
    pub interrupted: bool,
}

pub struct Transcoder<'a> {
    pub(crate) config: &'a TranscodeConfig,
    /// Kept for collaborators opened mid-stream, such as audio resamplers.
    pub(crate) backend: &'a mut dyn Backend,
    pub(crate) input_files: Vec<InputFile>,
    pub(crate) input_streams: Vec<InputStream>,
    pub(crate) output_files: Vec<OutputFile>,
    pub(crate) output_streams: Vec<OutputStream>,
    pub(crate) counters: Counters,
    pub(crate) vstats: Option<VideoStatsLog>,
    reporter: Reporter,
}

impl<'a> Transcoder<'a> {
    /// Opens every input, resolves the stream mapping, opens codecs and
    /// output files. Nothing is written until [`Transcoder::run`].
    pub fn open(
        config: &'a TranscodeConfig,
        backend: &'a mut dyn Backend,
        progress: Option<ProgressSender>,
    ) -> Result<Self> {
        config.validate()?;

        let mut input_files = Vec::with_capacity(config.inputs.len());
        let mut input_streams = Vec::new();
        for (index, input) in config.inputs.iter().enumerate() {
            let demuxer = backend.open_input(input).map_err(|source| Error::Open {
                url: input.url.clone(),
                source,
            })?;
            let file = InputFile::open(index, input, demuxer, config, input_streams.len());
            for params in file.streams() {
                let mut ist = InputStream::new(index, params.clone());
                if file.rate_emu {
                    ist.rate_emu = Some(RateEmulator::new());
                }
                input_streams.push(ist);
            }
            input_files.push(file);
        }

        let types: Vec<Vec<MediaType>> = input_files
            .iter()
            .map(|f| f.streams().iter().map(|s| s.media_type()).collect())
            .collect();
        let mappings = mapping::resolve(config, &types)?;

        let mut counters = Counters::default();
        let mut output_streams = Vec::with_capacity(mappings.len());
        let ostreams = config
            .outputs
            .iter()
            .enumerate()
            .flat_map(|(f, o)| o.streams.iter().enumerate().map(move |(s, cfg)| (f, o, s, cfg)));
        for (k, (file_index, output, index, cfg)) in ostreams.enumerate() {
            let ost = open_output_stream(
                config,
                backend,
                output,
                cfg,
                (file_index, index, k),
                mappings[k],
                &mut input_streams,
            )?;
            counters.extra_size += ost.encoder.as_ref().map_or(0, |e| e.extradata().len() as u64);
            output_streams.push(ost);
        }

        for ist in input_streams.iter_mut().filter(|ist| ist.decoding_needed) {
            let decoder = backend.open_decoder(&ist.params).map_err(|source| Error::CodecOpen {
                stream: format!("input stream #{}.{}", ist.file_index, ist.index),
                source,
            })?;
            ist.decoder = Some(decoder);
            if let (true, StreamKind::Video(video)) = (config.deinterlace, &ist.params.kind) {
                match backend.open_deinterlacer(video) {
                    Ok(d) => ist.deinterlacer = Some(d),
                    Err(e) => log::warn!(
                        "deinterlacing unavailable for input stream #{}.{}: {:#}",
                        ist.file_index,
                        ist.index,
                        e
                    ),
                }
            }
        }

        for ist in input_streams.iter_mut() {
            let file = &input_files[ist.file_index];
            ist.pts = 0;
            ist.next_pts = if file.ts_offset != 0 {
                None
            } else {
                Some(
                    ist.params
                        .start_time
                        .map_or(0, |t| clock::to_global(t, ist.params.time_base)),
                )
            };
            ist.is_start = true;
        }

        let input_metadata: Vec<Metadata> = input_files.iter().map(|f| f.metadata()).collect();
        let output_metadata = metadata::apply_maps(&config.metadata_maps, &input_metadata, config.outputs.len())?;

        let vstats = match &config.vstats {
            Some(path) => Some(VideoStatsLog::create(path)?),
            None => None,
        };

        let mut output_files = Vec::with_capacity(config.outputs.len());
        for (file_index, output) in config.outputs.iter().enumerate() {
            let muxer = backend.open_output(output).map_err(|source| Error::Open {
                url: output.url.clone(),
                source,
            })?;
            let mut file = OutputFile::new(file_index, &output.url, muxer);
            if !output_metadata[file_index].is_empty() {
                file.set_metadata(&output_metadata[file_index]);
            }
            for ost in output_streams.iter_mut().filter(|o| o.file_index == file_index) {
                ost.index = file.add_stream(&ost.params)?;
            }
            output_files.push(file);
        }

        log::info!("Stream mapping:");
        for ost in &output_streams {
            let ist = &input_streams[ost.source_index];
            let sync = &input_streams[ost.sync_index];
            let mut line = format!(
                "  Stream #{}.{} -> #{}.{}",
                ist.file_index, ist.index, ost.file_index, ost.index
            );
            if ost.sync_index != ost.source_index {
                line.push_str(&format!(" [sync #{}.{}]", sync.file_index, sync.index));
            }
            match &ost.encoder {
                Some(encoder) => line.push_str(&format!(" ({} -> {})", ist.params.codec, encoder.codec_name())),
                None => line.push_str(" (copy)"),
            }
            log::info!("{}", line);
        }

        Ok(Self {
            config,
            backend,
            input_files,
            input_streams,
            output_files,
            output_streams,
            counters,
            vstats,
            reporter: Reporter::new(config.report_interval(), progress),
        })
    }

    pub fn input_file(&self, index: usize) -> &InputFile {
        &self.input_files[index]
    }

    pub fn input_stream(&self, index: usize) -> &InputStream {
        &self.input_streams[index]
    }

    pub fn output_stream(&self, index: usize) -> &OutputStream {
        &self.output_streams[index]
    }

    /// Writes headers, interleaves inputs until they are exhausted, a limit
    /// is hit or `cancel` fires, then flushes codecs and writes trailers.
    pub fn run(&mut self, cancel: &CancellationToken) -> Result<TranscodeSummary> {
        let result = self
            .write_headers()
            .and_then(|()| self.transcode_loop(cancel))
            .and_then(|interrupted| {
                self.flush()?;
                Ok(interrupted)
            });

        match result {
            Ok(interrupted) => {
                let trailers = self.write_trailers();
                let report = self.build_report(true);
                self.reporter.publish(report.clone());
                let closed = self.close();
                trailers?;
                closed?;
                Ok(TranscodeSummary {
                    streams: self.output_streams.iter().map(|o| o.stats).collect(),
                    counters: self.counters,
                    report,
                    interrupted,
                })
            }
            Err(e) => {
                if e.allows_trailer() {
                    if let Err(te) = self.write_trailers() {
                        log::warn!("{}", te);
                    }
                }
                if let Err(ce) = self.close() {
                    log::warn!("{}", ce);
                }
                Err(e)
            }
        }
    }

    fn write_headers(&mut self) -> Result<()> {
        for file in self.output_files.iter_mut() {
            file.write_header()?;
        }
        for ost in self.output_streams.iter_mut() {
            ost.time_base = self.output_files[ost.file_index]
                .time_base(ost.index)
                .unwrap_or(ost.params.time_base);
        }
        Ok(())
    }

    /// Returns whether the loop was interrupted.
    fn transcode_loop(&mut self, cancel: &CancellationToken) -> Result<bool> {
        loop {
            if cancel.is_cancelled() {
                log::info!("transcode cancelled, finishing outputs");
                return Ok(true);
            }

            let Some((file_index, opts_min)) = self.select_input() else {
                break;
            };
            if let Some(recording_time) = self.config.recording_time {
                if opts_min >= recording_time {
                    break;
                }
            }
            if let Some(limit) = self.config.limit_filesize {
                if self.output_files.iter().any(|f| f.size() > limit) {
                    break;
                }
            }

            let file = &mut self.input_files[file_index];
            let packet = match file.read_packet() {
                Ok(Some(packet)) => packet,
                Ok(None) => {
                    file.eof_reached = true;
                    if self.config.shortest {
                        break;
                    }
                    continue;
                }
                Err(e) => {
                    log::warn!("{:#}, treating as end of file", e);
                    file.eof_reached = true;
                    if self.config.shortest {
                        break;
                    }
                    continue;
                }
            };

            if packet.stream_index >= file.nb_streams {
                self.maybe_report();
                continue;
            }
            let ist_index = file.ist_index + packet.stream_index;
            if self.input_streams[ist_index].discard {
                self.maybe_report();
                continue;
            }

            self.correct_discontinuity(ist_index, &packet);

            if let Err(e) = self.output_packet(ist_index, Some(&packet)) {
                if !e.is_recoverable() {
                    return Err(e);
                }
                log::error!("{:#}", e);
                continue;
            }
            self.maybe_report();
        }
        Ok(false)
    }

    /// Picks the input file feeding the output that lags furthest behind,
    /// or the input furthest behind with `input_sync`. Outputs whose input
    /// is exhausted or that reached their frame cap are not eligible.
    fn select_input(&self) -> Option<(usize, i64)> {
        let mut file_index = None;
        let mut ipts_min = i64::MAX;
        let mut opts_min = i64::MAX;
        for ost in &self.output_streams {
            let ist = &self.input_streams[ost.source_index];
            let file = &self.input_files[ist.file_index];
            if file.eof_reached || ost.frame_number >= self.config.max_frames.limit(ost.media_type()) {
                continue;
            }
            let ipts = ist.pts + file.ts_offset;
            let opts = ost.opts();
            if ipts < ipts_min {
                ipts_min = ipts;
                if self.config.input_sync {
                    file_index = Some(ist.file_index);
                }
            }
            if opts < opts_min {
                opts_min = opts;
                if !self.config.input_sync {
                    file_index = Some(ist.file_index);
                }
            }
        }
        file_index.map(|f| (f, opts_min))
    }

    /// Folds a timestamp jump larger than the threshold into the file's
    /// offset so corrected time stays continuous.
    fn correct_discontinuity(&mut self, ist_index: usize, packet: &Packet) {
        if self.config.copy_ts {
            return;
        }
        let ist = &self.input_streams[ist_index];
        let Some(dts) = packet.dts else {
            return;
        };
        let dts = clock::to_global(dts, ist.params.time_base);
        let Some(delta) = clock::detect_discontinuity(dts, ist.next_pts, self.config.dts_delta_threshold)
        else {
            return;
        };

        let file_index = ist.file_index;
        let file = &mut self.input_files[file_index];
        file.ts_offset -= delta;
        log::warn!(
            "timestamp discontinuity {} in input #{}, new offset= {}",
            delta,
            file_index,
            file.ts_offset
        );
        for s in self.input_streams.iter_mut().filter(|s| s.file_index == file_index) {
            if let Some(next_pts) = s.next_pts.as_mut() {
                *next_pts += delta;
            }
            s.is_start = true;
        }
    }

    /// Drains decoders and encoders of every decoded input.
    fn flush(&mut self) -> Result<()> {
        for ist_index in 0..self.input_streams.len() {
            if self.input_streams[ist_index].decoding_needed {
                self.output_packet(ist_index, None)?;
            }
        }
        Ok(())
    }

    fn write_trailers(&mut self) -> Result<()> {
        let mut first_error = None;
        for file in self.output_files.iter_mut() {
            if let Err(e) = file.write_trailer() {
                log::error!("{}", e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn close(&mut self) -> Result<()> {
        for ist in self.input_streams.iter_mut() {
            if let Some(decoder) = ist.decoder.as_mut() {
                decoder.close();
            }
        }
        let mut result = Ok(());
        for ost in self.output_streams.iter_mut() {
            if let Some(encoder) = ost.encoder.as_mut() {
                encoder.close();
            }
            if let Some(log) = ost.pass_log.as_mut() {
                if let Err(e) = log.finish() {
                    result = Err(e);
                }
            }
        }
        if let Some(vstats) = self.vstats.as_mut() {
            vstats.finish();
        }
        result
    }

    fn maybe_report(&mut self) {
        if self.reporter.due(Instant::now()) {
            let report = self.build_report(false);
            self.reporter.publish(report);
        }
    }

    fn build_report(&self, is_last: bool) -> ProgressReport {
        let mut report = ProgressReport {
            total_size: self.output_files.first().map_or(0, |f| f.size()),
            dup: self.counters.frames_dup,
            drop: self.counters.frames_drop,
            video_size: self.counters.video_size,
            audio_size: self.counters.audio_size,
            extra_size: self.counters.extra_size,
            is_last,
            ..Default::default()
        };

        let mut time = f64::MAX;
        let mut seen_video = false;
        for ost in &self.output_streams {
            if !seen_video && ost.media_type() == MediaType::Video {
                seen_video = true;
                report.frame = ost.frame_number;
                report.quality = ost.encoder.as_ref().and_then(|e| e.quality());
            }
            time = time.min(ost.opts() as f64 / TIME_BASE as f64);
        }
        report.time = if time < 0.01 { 0.01 } else { time };
        report.bitrate_kbps = report.total_size as f64 * 8.0 / report.time / 1000.0;
        let elapsed = self.reporter.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            report.fps = report.frame as f64 / elapsed;
        }
        report
    }
}

fn stream_kind_for_encoding(
    source: &StreamParams,
    cfg: &OutputStreamConfig,
) -> std::result::Result<StreamKind, String> {
    match (&source.kind, cfg.media_type) {
        (StreamKind::Audio(a), MediaType::Audio) => Ok(StreamKind::Audio(AudioParams {
            sample_rate: cfg.sample_rate.unwrap_or(a.sample_rate),
            channels: cfg.channels.unwrap_or(a.channels),
            frame_size: 0,
        })),
        (StreamKind::Video(v), MediaType::Video) => {
            let cropped_w = v.width.saturating_sub(cfg.crop.width()) + cfg.pad.width();
            let cropped_h = v.height.saturating_sub(cfg.crop.height()) + cfg.pad.height();
            let frame_rate = cfg
                .frame_rate
                .or(Some(v.frame_rate).filter(|r| r.numerator() > 0 && r.denominator() > 0))
                .unwrap_or(Rational(25, 1));
            Ok(StreamKind::Video(VideoParams {
                width: cfg.width.unwrap_or(cropped_w),
                height: cfg.height.unwrap_or(cropped_h),
                pixel_format: cfg.pixel_format.clone().unwrap_or_else(|| v.pixel_format.clone()),
                frame_rate,
            }))
        }
        (StreamKind::Subtitle, MediaType::Subtitle) => Ok(StreamKind::Subtitle),
        (kind, wanted) => Err(format!(
            "cannot encode a {} stream from a {} source",
            wanted,
            kind.media_type()
        )),
    }
}

fn open_output_stream(
    config: &TranscodeConfig,
    backend: &mut dyn Backend,
    output: &OutputConfig,
    cfg: &OutputStreamConfig,
    (file_index, index, global_index): (usize, usize, usize),
    mapping: StreamMapping,
    input_streams: &mut [InputStream],
) -> Result<OutputStream> {
    let name = format!("output stream #{}.{}", file_index, index);
    let ist = &mut input_streams[mapping.source];
    ist.discard = false;
    let source = &ist.params;

    let new_stream = |params: StreamParams, kind: OutputKind| OutputStream {
        file_index,
        index,
        source_index: mapping.source,
        sync_index: mapping.sync,
        time_base: params.time_base,
        params,
        encoder: None,
        kind,
        annexb: None,
        pass_log: None,
        sync_opts: 0,
        frame_number: 0,
        last_end: 0,
        stats: OutputStats::default(),
    };

    if cfg.copy {
        let mut params = source.clone();
        params.index = index;
        let annexb = if cfg.annexb {
            AvccToAnnexB::new(&params.extradata)
        } else {
            None
        };
        let mut ost = new_stream(params, OutputKind::Copy);
        ost.annexb = annexb;
        return Ok(ost);
    }

    ist.decoding_needed = true;
    let kind = stream_kind_for_encoding(source, cfg).map_err(|e| Error::Config(format!("{}: {}", name, e)))?;
    let time_base = match &kind {
        StreamKind::Audio(a) => Rational(1, a.sample_rate as i32),
        StreamKind::Video(v) => v.frame_rate.invert(),
        _ => source.time_base,
    };

    let log_path = passlog::pass_log_path(config.pass_log_prefix(), global_index);
    let (pass_log, stats_in) = match (config.pass, &kind) {
        (Some(Pass::First), StreamKind::Video(_)) => (Some(PassLog::create(&log_path)?), None),
        (Some(Pass::Second), StreamKind::Video(_)) => (None, Some(passlog::read_pass_log(&log_path)?)),
        _ => (None, None),
    };

    let encoder = backend
        .open_encoder(&EncoderParams {
            index: global_index,
            codec: cfg.codec.clone(),
            kind: kind.clone(),
            time_base,
            bit_rate: cfg.bit_rate,
            container: output.format.clone(),
            pass: config.pass,
            stats_in,
            hw_encode: config.hw_encode,
        })
        .map_err(|source| Error::CodecOpen {
            stream: name.clone(),
            source,
        })?;
    log::info!("{}: opened encoder {}", name, encoder.codec_name());

    let mut kind = kind;
    if let StreamKind::Audio(a) = &mut kind {
        a.frame_size = encoder.frame_size();
    }
    let output_kind = match (&source.kind, &kind) {
        (StreamKind::Audio(_), StreamKind::Audio(a)) => OutputKind::Audio(AudioOutput {
            fifo: AudioFifo::new(a.channels),
            resampler: None,
            force_resample: matches!(config.audio_sync, crate::config::AudioSyncMethod::Resample { .. }),
        }),
        (StreamKind::Video(input), StreamKind::Video(out)) => {
            let geometry = VideoGeometry::new(input, out, cfg.crop, cfg.pad, cfg.pad_color)
                .map_err(|e| Error::Config(format!("{}: {}", name, e)))?;
            let transform = if geometry.needs_transform() {
                Some(backend.open_picture_transform(&geometry).map_err(|source| Error::CodecOpen {
                    stream: format!("picture transform for {}", name),
                    source,
                })?)
            } else {
                None
            };
            OutputKind::Video(VideoOutput { geometry, transform })
        }
        _ => OutputKind::Subtitle,
    };

    let mut params = StreamParams::new(index, encoder.codec_name(), kind, encoder.time_base());
    params.bit_rate = cfg.bit_rate.unwrap_or(0);
    params.extradata = encoder.extradata();
    params.backend = encoder.backend_params();

    let mut ost = new_stream(params, output_kind);
    ost.encoder = Some(encoder);
    ost.pass_log = pass_log;
    Ok(ost)
}

#[cfg(test)]
#[path = "transcoder_test.rs"]
mod transcoder_test;

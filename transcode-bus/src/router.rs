//! Packet routing: decode, synchronise, re-encode or copy, then mux.

use std::borrow::Cow;

use crate::clock::{self, TIME_BASE};
use crate::decoder::Decoded;
use crate::error::{Error, Result};
use crate::frame::{AudioFrame, Frame, Subtitle, VideoFrame};
use crate::output::OutputFile;
use crate::packet::{EncodedPacket, Packet};
use crate::rational::{Rational, rescale_q, rescale_rnd};
use crate::resample::ResampleParams;
use crate::stream::{MediaType, OutputKind, StreamKind};
use crate::sync::{self, AudioAdjustment, AudioDrift, VideoDecision};
use crate::transcoder::Transcoder;

/// Rescales an encoder packet into the muxer time base and writes it.
/// Returns the packet's end time in the global base.
fn mux_encoded(
    file: &mut OutputFile,
    stream_index: usize,
    enc_tb: Rational,
    ost_tb: Rational,
    packet: EncodedPacket,
    fallback_pts: i64,
    duration: i64,
) -> Result<i64> {
    let pts = packet.pts.unwrap_or(fallback_pts);
    file.write_packet(Packet {
        stream_index,
        data: packet.data,
        pts: Some(rescale_q(pts, enc_tb, ost_tb)),
        dts: packet.dts.map(|dts| rescale_q(dts, enc_tb, ost_tb)),
        duration: Some(rescale_q(duration, enc_tb, ost_tb)),
        is_key: packet.is_key,
    })?;
    Ok(clock::to_global(pts + duration, enc_tb))
}

fn encode_error(kind: &'static str, file: usize, stream: usize) -> impl FnOnce(anyhow::Error) -> Error {
    move |source| Error::Encode {
        kind,
        file,
        stream,
        source,
    }
}

impl Transcoder<'_> {
    /// Routes one demuxed packet, or flushes the stream when `packet` is None.
    pub(crate) fn output_packet(&mut self, ist_index: usize, packet: Option<&Packet>) -> Result<()> {
        let ist = &mut self.input_streams[ist_index];
        let Some(packet) = packet else {
            if let Some(next_pts) = ist.next_pts {
                ist.pts = next_pts;
            }
            return self.flush_stream(ist_index);
        };

        if let Some(dts) = packet.dts {
            let dts = clock::to_global(dts, ist.params.time_base);
            ist.pts = dts;
            ist.next_pts = Some(dts);
        } else if let Some(next_pts) = ist.next_pts {
            ist.pts = next_pts;
        }

        if let Some(emu) = ist.rate_emu.as_mut() {
            emu.pace(ist.pts);
        }

        self.copy_packet(ist_index, packet)?;

        let ist = &mut self.input_streams[ist_index];
        if ist.decoding_needed {
            self.decode_packet(ist_index, packet)
        } else {
            let duration = match (packet.duration, &ist.params.kind) {
                (Some(d), _) if d > 0 => clock::to_global(d, ist.params.time_base),
                (_, StreamKind::Audio(a)) if a.frame_size > 0 && a.sample_rate > 0 => {
                    rescale_rnd(a.frame_size as i64, TIME_BASE, a.sample_rate as i64)
                }
                (_, StreamKind::Video(_)) => clock::to_global(1, ist.params.codec_time_base()),
                _ => 0,
            };
            ist.next_pts = Some(ist.pts + duration);
            Ok(())
        }
    }

    fn decode(&mut self, ist_index: usize, data: &[u8]) -> Result<Decoded> {
        let ist = &mut self.input_streams[ist_index];
        let Some(decoder) = ist.decoder.as_mut() else {
            return Ok(Decoded::nothing(data.len()));
        };
        decoder.decode(data).map_err(|source| Error::Decode {
            file: ist.file_index,
            stream: ist.index,
            source,
        })
    }

    fn decode_packet(&mut self, ist_index: usize, packet: &Packet) -> Result<()> {
        let mut data: &[u8] = &packet.data;
        while !data.is_empty() {
            let ist = &mut self.input_streams[ist_index];
            if let Some(next_pts) = ist.next_pts {
                ist.pts = next_pts;
            }
            let decoded = self.decode(ist_index, data)?;
            let consumed = decoded.consumed.min(data.len());
            data = &data[consumed..];
            match decoded.frame {
                Some(frame) => self.dispatch_frame(ist_index, frame, packet.pts)?,
                None if consumed == 0 => break,
                None => {}
            }
        }
        Ok(())
    }

    /// Drains the decoder, then every encoder this stream feeds.
    fn flush_stream(&mut self, ist_index: usize) -> Result<()> {
        if self.input_streams[ist_index].decoding_needed {
            loop {
                let ist = &mut self.input_streams[ist_index];
                if let Some(next_pts) = ist.next_pts {
                    ist.pts = next_pts;
                }
                match self.decode(ist_index, &[]) {
                    Ok(Decoded { frame: Some(frame), .. }) => self.dispatch_frame(ist_index, frame, None)?,
                    Ok(_) => break,
                    Err(e) => {
                        log::error!("{:#}", e);
                        break;
                    }
                }
            }
        }
        for j in 0..self.output_streams.len() {
            if self.output_streams[j].source_index == ist_index {
                self.flush_encoder(j)?;
            }
        }
        Ok(())
    }

    /// Advances the input clock past a decoded frame and hands it to every
    /// encoding output fed by the stream.
    fn dispatch_frame(&mut self, ist_index: usize, frame: Frame, packet_pts: Option<i64>) -> Result<()> {
        let config = self.config;
        let ist = &mut self.input_streams[ist_index];
        ist.frames_decoded += 1;

        let frame = match frame {
            Frame::Audio(mut audio) => {
                if audio.sample_rate > 0 {
                    let duration = rescale_rnd(audio.nb_samples() as i64, TIME_BASE, audio.sample_rate as i64);
                    ist.next_pts = Some(ist.pts + duration);
                }
                audio.apply_volume(config.audio_volume);
                Frame::Audio(audio)
            }
            Frame::Video(video) => {
                ist.next_pts = Some(ist.pts + clock::to_global(1, ist.params.codec_time_base()));
                let video = match ist.deinterlacer.as_mut() {
                    Some(d) if video.interlaced => match d.deinterlace(&video) {
                        Ok(progressive) => progressive,
                        Err(e) => {
                            log::warn!("deinterlacing failed, keeping picture as is: {:#}", e);
                            video
                        }
                    },
                    _ => video,
                };
                Frame::Video(video)
            }
            subtitle => subtitle,
        };

        let ist = &self.input_streams[ist_index];
        if !self.input_files[ist.file_index].passes_start_gate(ist.pts, config.start_time) {
            return Ok(());
        }

        for j in 0..self.output_streams.len() {
            let ost = &self.output_streams[j];
            if ost.source_index != ist_index || !ost.encoding_needed() {
                continue;
            }
            match (&frame, &ost.kind) {
                (Frame::Audio(audio), OutputKind::Audio(_)) => self.do_audio_out(j, audio)?,
                (Frame::Video(video), OutputKind::Video(_)) => self.do_video_out(j, video)?,
                (Frame::Subtitle(sub), OutputKind::Subtitle) => self.do_subtitle_out(j, sub, packet_pts)?,
                _ => log::warn!(
                    "{} frame does not fit output stream #{}.{}",
                    frame.media_type(),
                    ost.file_index,
                    ost.index
                ),
            }
        }
        Ok(())
    }

    /// Corrected time of the stream an output follows, in seconds.
    fn sync_ipts(&self, ost_index: usize) -> f64 {
        let sync = &self.input_streams[self.output_streams[ost_index].sync_index];
        clock::sync_seconds(sync.pts, self.input_files[sync.file_index].ts_offset)
    }

    fn do_audio_out(&mut self, ost_index: usize, frame: &AudioFrame) -> Result<()> {
        let config = self.config;
        let sync_ipts = self.sync_ipts(ost_index);
        let ost = &mut self.output_streams[ost_index];
        let (file_index, stream_index) = (ost.file_index, ost.index);
        let Some(out) = ost.params.audio().copied() else {
            return Ok(());
        };
        let (Some(encoder), OutputKind::Audio(audio)) = (ost.encoder.as_mut(), &mut ost.kind) else {
            return Ok(());
        };
        let ist = &mut self.input_streams[ost.source_index];
        ost.stats.frames_in += 1;

        let in_channels = frame.channels.max(1) as usize;
        let in_rate = frame.sample_rate;
        let needs_resample =
            audio.force_resample || frame.channels != out.channels || in_rate != out.sample_rate;
        if !needs_resample {
            audio.resampler = None;
        } else if !audio.resampler.as_ref().is_some_and(|r| r.accepts(frame.channels, in_rate)) {
            let params = ResampleParams {
                in_channels: frame.channels,
                in_rate,
                out_channels: out.channels,
                out_rate: out.sample_rate,
            };
            let resampler = self.backend.open_resampler(&params).map_err(|source| Error::CodecOpen {
                stream: format!("audio resampler for output stream #{}.{}", file_index, stream_index),
                source,
            })?;
            audio.resampler = Some(resampler);
        }

        let fifo_len = audio.fifo.len() as i64;
        let mut samples = Cow::Borrowed(frame.samples.as_slice());
        if config.audio_sync.is_enabled() {
            let delta = sync_ipts * out.sample_rate as f64 - ost.sync_opts as f64 - fifo_len as f64;
            let drift = AudioDrift {
                method: config.audio_sync,
                threshold: config.audio_drift_threshold,
                max_buffer: config.max_audio_packet_samples,
            };
            match drift.adjust(delta, in_rate, out.sample_rate, in_channels, frame.nb_samples(), &mut ist.is_start) {
                AudioAdjustment::None => {}
                AudioAdjustment::Drop(n) => {
                    log::debug!("discarding {} audio samples", n);
                    ost.stats.samples_dropped += n as u64;
                    samples = Cow::Borrowed(&frame.samples[n * in_channels..]);
                    if samples.is_empty() {
                        return Ok(());
                    }
                }
                AudioAdjustment::Silence(n) => {
                    log::debug!("adding {} audio samples of silence", n);
                    ost.stats.samples_inserted += n as u64;
                    let mut padded = vec![0i16; n * in_channels];
                    padded.extend_from_slice(&frame.samples);
                    samples = Cow::Owned(padded);
                }
                AudioAdjustment::Compensate(comp) => {
                    log::debug!("compensating audio timestamp drift: {:.0} compensation: {}", delta, comp);
                    if let Some(resampler) = audio.resampler.as_mut() {
                        resampler
                            .compensate(comp, out.sample_rate)
                            .map_err(encode_error("audio", file_index, stream_index))?;
                    }
                }
            }
        } else {
            ost.sync_opts = (sync_ipts * out.sample_rate as f64).round() as i64 - fifo_len;
        }

        let converted = match audio.resampler.as_mut() {
            Some(resampler) => resampler
                .resample(&samples)
                .map_err(encode_error("audio", file_index, stream_index))?,
            None => samples.into_owned(),
        };

        let enc_tb = encoder.time_base();
        let ost_tb = ost.time_base;
        let file = &mut self.output_files[file_index];
        let frame_size = encoder.frame_size();
        let mut batches = Vec::new();
        if frame_size > 1 {
            audio.fifo.write(&converted);
            while let Some(chunk) = audio.fifo.read(frame_size) {
                batches.push(chunk);
            }
        } else if !converted.is_empty() {
            batches.push(converted);
        }

        for chunk in batches {
            let nb_samples = (chunk.len() / out.channels.max(1) as usize) as i64;
            let mut f = AudioFrame::new(chunk, out.channels, out.sample_rate);
            f.pts = Some(ost.sync_opts);
            let packet = encoder
                .encode(Some(&Frame::Audio(f)))
                .map_err(encode_error("audio", file_index, stream_index))?;
            let pts = ost.sync_opts;
            ost.sync_opts += nb_samples;
            ost.frame_number += 1;
            ost.stats.frames_emitted += 1;
            if let Some(packet) = packet {
                let size = packet.size() as u64;
                let end = mux_encoded(file, stream_index, enc_tb, ost_tb, packet, pts, nb_samples)?;
                ost.last_end = ost.last_end.max(end);
                ost.stats.bytes += size;
                self.counters.audio_size += size;
            }
        }
        Ok(())
    }

    fn do_video_out(&mut self, ost_index: usize, frame: &VideoFrame) -> Result<()> {
        let config = self.config;
        let sync_ipts = self.sync_ipts(ost_index);
        let ost = &mut self.output_streams[ost_index];
        let (file_index, stream_index) = (ost.file_index, ost.index);
        let (Some(encoder), OutputKind::Video(video)) = (ost.encoder.as_mut(), &mut ost.kind) else {
            return Ok(());
        };
        ost.stats.frames_in += 1;

        let enc_tb = encoder.time_base();
        let ipts = sync_ipts / enc_tb.to_f64();
        let decision = sync::video_decision(config.video_sync, ipts, &mut ost.sync_opts, config.video_drift_threshold);
        let nb_frames = match decision {
            VideoDecision::Drop => {
                log::debug!("*** drop!");
                ost.stats.frames_dropped += 1;
                self.counters.frames_drop += 1;
                0
            }
            VideoDecision::Emit(n) => {
                if n > 1 {
                    log::debug!("*** {} dup!", n - 1);
                    ost.stats.frames_duplicated += n as u64 - 1;
                    self.counters.frames_dup += n as u64 - 1;
                }
                n
            }
        };
        let left = config.max_frames.limit(MediaType::Video).saturating_sub(ost.frame_number);
        let nb_frames = nb_frames.min(usize::try_from(left).unwrap_or(usize::MAX));
        if nb_frames == 0 {
            return Ok(());
        }

        let picture = match video.transform.as_mut() {
            Some(transform) => transform
                .transform(frame)
                .map_err(encode_error("video", file_index, stream_index))?,
            None => frame.clone(),
        };

        let ost_tb = ost.time_base;
        let file = &mut self.output_files[file_index];
        for _ in 0..nb_frames {
            let mut picture = picture.clone();
            picture.pts = Some(ost.sync_opts);
            let packet = encoder
                .encode(Some(&Frame::Video(picture)))
                .map_err(encode_error("video", file_index, stream_index))?;
            if let (Some(log), Some(stats)) = (ost.pass_log.as_mut(), encoder.stats_out()) {
                log.write(&stats)?;
            }
            if let Some(packet) = packet {
                let size = packet.size();
                let picture_type = packet.picture_type;
                let end = mux_encoded(file, stream_index, enc_tb, ost_tb, packet, ost.sync_opts, 1)?;
                ost.last_end = ost.last_end.max(end);
                ost.stats.bytes += size as u64;
                self.counters.video_size += size as u64;
                if let Some(vstats) = self.vstats.as_mut() {
                    vstats.write_frame(
                        ost.frame_number,
                        encoder.quality(),
                        size,
                        self.counters.video_size,
                        enc_tb,
                        picture_type,
                    );
                }
            }
            ost.sync_opts += 1;
            ost.frame_number += 1;
            ost.stats.frames_emitted += 1;
        }
        Ok(())
    }

    fn do_subtitle_out(&mut self, ost_index: usize, sub: &Subtitle, packet_pts: Option<i64>) -> Result<()> {
        let ost = &mut self.output_streams[ost_index];
        let (file_index, stream_index) = (ost.file_index, ost.index);
        let Some(encoder) = ost.encoder.as_mut() else {
            return Ok(());
        };
        ost.stats.frames_in += 1;
        let Some(pts) = packet_pts else {
            log::warn!("subtitle packets must have a pts");
            return Ok(());
        };

        let ist = &self.input_streams[ost.source_index];
        let offset = self.input_files[ist.file_index].ts_offset;
        let start = clock::to_global(pts, ist.params.time_base) + offset;
        let ost_tb = ost.time_base;

        // DVB subtitles need one packet to show and one to clear
        let dvb = encoder.codec_name() == "dvb_subtitle";
        let passes = if dvb { 2 } else { 1 };
        let mut sub = sub.clone();
        for i in 0..passes {
            if i == 1 {
                sub.rects.clear();
            }
            let packet = encoder
                .encode(Some(&Frame::Subtitle(sub.clone())))
                .map_err(encode_error("subtitle", file_index, stream_index))?;
            let Some(packet) = packet else {
                continue;
            };
            let mut out_pts = clock::from_global(start, ost_tb);
            if dvb {
                let shift = if i == 0 {
                    sub.start_display_time
                } else {
                    sub.end_display_time
                };
                out_pts += rescale_q(shift as i64, Rational(1, 1000), ost_tb);
            }
            let size = packet.size() as u64;
            self.output_files[file_index].write_packet(Packet {
                stream_index,
                data: packet.data,
                pts: Some(out_pts),
                dts: Some(out_pts),
                duration: None,
                is_key: true,
            })?;
            ost.last_end = ost.last_end.max(clock::to_global(out_pts, ost_tb));
            ost.stats.bytes += size;
            ost.frame_number += 1;
            ost.stats.frames_emitted += 1;
        }
        Ok(())
    }

    /// Passes the packet through to every copy output of the stream.
    fn copy_packet(&mut self, ist_index: usize, packet: &Packet) -> Result<()> {
        let config = self.config;
        let ist = &self.input_streams[ist_index];
        let file = &self.input_files[ist.file_index];
        if !file.passes_start_gate(ist.pts, config.start_time) {
            return Ok(());
        }
        let in_tb = ist.params.time_base;
        let offset = file.ts_offset;

        for ost in self
            .output_streams
            .iter_mut()
            .filter(|o| o.source_index == ist_index && !o.encoding_needed())
        {
            let tb = ost.time_base;
            let pts = packet
                .pts
                .map(|pts| clock::from_global(clock::to_global(pts, in_tb) + offset, tb));
            let dts = clock::from_global(ist.pts + offset, tb);
            let duration = packet.duration.map(|d| rescale_q(d, in_tb, tb));
            let data = match &ost.annexb {
                Some(filter) => filter.filter_packet(packet),
                None => packet.data.clone(),
            };
            let size = data.len() as u64;
            match ost.media_type() {
                MediaType::Audio => self.counters.audio_size += size,
                MediaType::Video => self.counters.video_size += size,
                _ => {}
            }

            self.output_files[ost.file_index].write_packet(Packet {
                stream_index: ost.index,
                data,
                pts,
                dts: Some(dts),
                duration,
                is_key: packet.is_key,
            })?;

            let end = pts.unwrap_or(dts).max(dts) + duration.unwrap_or(0);
            ost.last_end = ost.last_end.max(clock::to_global(end, tb));
            ost.stats.frames_in += 1;
            ost.stats.frames_emitted += 1;
            ost.stats.bytes += size;
            ost.frame_number += 1;
        }
        Ok(())
    }

    /// Drains one encoder. PCM-like audio encoders hold nothing back; a
    /// partial audio frame left in the FIFO is padded with silence.
    fn flush_encoder(&mut self, ost_index: usize) -> Result<()> {
        let ost = &mut self.output_streams[ost_index];
        let (file_index, stream_index) = (ost.file_index, ost.index);
        let Some(encoder) = ost.encoder.as_mut() else {
            return Ok(());
        };
        let enc_tb = encoder.time_base();
        let ost_tb = ost.time_base;
        let file = &mut self.output_files[file_index];

        let (kind, duration) = match &mut ost.kind {
            OutputKind::Audio(audio) => {
                let frame_size = encoder.frame_size();
                if frame_size <= 1 {
                    return Ok(());
                }
                let left = audio.fifo.len();
                if left > 0 {
                    let channels = ost.params.audio().map_or(1, |a| a.channels);
                    let rate = ost.params.audio().map_or(0, |a| a.sample_rate);
                    audio.fifo.write(&vec![0i16; (frame_size - left) * channels.max(1) as usize]);
                    if let Some(chunk) = audio.fifo.read(frame_size) {
                        let mut f = AudioFrame::new(chunk, channels, rate);
                        f.pts = Some(ost.sync_opts);
                        let pts = ost.sync_opts;
                        let packet = encoder
                            .encode(Some(&Frame::Audio(f)))
                            .map_err(encode_error("audio", file_index, stream_index))?;
                        ost.sync_opts += frame_size as i64;
                        ost.frame_number += 1;
                        ost.stats.frames_emitted += 1;
                        if let Some(packet) = packet {
                            let size = packet.size() as u64;
                            let end = mux_encoded(file, stream_index, enc_tb, ost_tb, packet, pts, frame_size as i64)?;
                            ost.last_end = ost.last_end.max(end);
                            ost.stats.bytes += size;
                            self.counters.audio_size += size;
                        }
                    }
                }
                ("audio", frame_size as i64)
            }
            OutputKind::Video(_) => ("video", 1),
            OutputKind::Subtitle | OutputKind::Copy => return Ok(()),
        };

        loop {
            let packet = encoder.encode(None).map_err(encode_error(kind, file_index, stream_index))?;
            if kind == "video" {
                if let (Some(log), Some(stats)) = (ost.pass_log.as_mut(), encoder.stats_out()) {
                    log.write(&stats)?;
                }
            }
            let Some(packet) = packet else {
                break;
            };
            let size = packet.size();
            let picture_type = packet.picture_type;
            let end = mux_encoded(file, stream_index, enc_tb, ost_tb, packet, ost.sync_opts, duration)?;
            ost.last_end = ost.last_end.max(end);
            ost.stats.bytes += size as u64;
            if kind == "video" {
                self.counters.video_size += size as u64;
                if let Some(vstats) = self.vstats.as_mut() {
                    vstats.write_frame(
                        ost.frame_number,
                        encoder.quality(),
                        size,
                        self.counters.video_size,
                        enc_tb,
                        picture_type,
                    );
                }
            } else {
                self.counters.audio_size += size as u64;
            }
        }
        Ok(())
    }
}

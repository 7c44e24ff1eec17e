use std::collections::VecDeque;
use std::ffi::{CStr, CString};

use bytes::Bytes;
use ffmpeg_next::codec::{Flags, Parameters};
use ffmpeg_next::format::Sample;
use ffmpeg_next::software::{resampling, scaling};
use ffmpeg_next::{Codec, Dictionary};

use super::frame::{PACKED_S16, from_av_audio, from_av_video, layout, pixel, to_av_audio, to_av_video};
use super::hw::{find_hw_encoder, pixel_format_for_encoder};
use super::CodecParameters;
use crate::config::Pass;
use crate::decoder::{Decoded, Decoder};
use crate::encoder::{Encoder, EncoderParams};
use crate::frame::{Frame, PictureType, Subtitle, SubtitleRect};
use crate::packet::EncodedPacket;
use crate::rational::Rational;
use crate::stream::{BackendParams, StreamKind, StreamParams};

/// `FF_QP2LAMBDA`: quality stats are reported in lambda units.
const QP2LAMBDA: f32 = 118.0;

fn would_block(e: &ffmpeg_next::Error) -> bool {
    matches!(e, ffmpeg_next::Error::Eof)
        || matches!(e, ffmpeg_next::Error::Other { errno } if *errno == ffmpeg_next::util::error::EAGAIN)
}

enum DecoderKind {
    Video(ffmpeg_next::codec::decoder::Video),
    Audio {
        decoder: ffmpeg_next::codec::decoder::Audio,
        resampler: Option<resampling::Context>,
        channels: u16,
    },
    Subtitle(ffmpeg_next::codec::decoder::Subtitle),
}

/// Wraps libavcodec's send/receive API in the engine's slice based
/// decoder contract: a whole packet is consumed per send and frames the
/// codec buffered are handed out on the following calls.
pub struct FfmpegDecoder {
    inner: DecoderKind,
    draining: bool,
}

unsafe impl Send for FfmpegDecoder {}

impl FfmpegDecoder {
    pub fn open(params: &StreamParams) -> anyhow::Result<Self> {
        let codec_params = CodecParameters::from_stream(params)
            .ok_or_else(|| anyhow::anyhow!("stream #{} has no FFmpeg codec parameters", params.index))?;
        let mut ctx = ffmpeg_next::codec::Context::new();
        unsafe {
            (*ctx.as_mut_ptr()).time_base = ffmpeg_next::Rational::from(params.time_base).into();
        }
        ctx.set_parameters(codec_params.parameters().clone())?;

        let inner = match &params.kind {
            StreamKind::Video(_) => {
                let decoder = ctx.decoder().video()?;
                if decoder.format() == ffmpeg_next::format::Pixel::None || decoder.width() == 0 || decoder.height() == 0 {
                    return Err(anyhow::anyhow!("missing codec parameters"));
                }
                DecoderKind::Video(decoder)
            }
            StreamKind::Audio(a) => DecoderKind::Audio {
                decoder: ctx.decoder().audio()?,
                resampler: None,
                channels: a.channels,
            },
            StreamKind::Subtitle => DecoderKind::Subtitle(ctx.decoder().subtitle()?),
            StreamKind::Data => return Err(anyhow::anyhow!("data streams cannot be decoded")),
        };
        Ok(Self { inner, draining: false })
    }

    fn send(&mut self, data: &[u8]) -> anyhow::Result<()> {
        let packet = ffmpeg_next::Packet::copy(data);
        match &mut self.inner {
            DecoderKind::Video(decoder) => decoder.send_packet(&packet)?,
            DecoderKind::Audio { decoder, .. } => decoder.send_packet(&packet)?,
            DecoderKind::Subtitle(_) => {}
        }
        Ok(())
    }

    fn send_eof(&mut self) -> anyhow::Result<()> {
        match &mut self.inner {
            DecoderKind::Video(decoder) => decoder.send_eof()?,
            DecoderKind::Audio { decoder, .. } => decoder.send_eof()?,
            DecoderKind::Subtitle(_) => {}
        }
        Ok(())
    }

    fn receive(&mut self) -> anyhow::Result<Option<Frame>> {
        match &mut self.inner {
            DecoderKind::Video(decoder) => {
                let mut frame = ffmpeg_next::frame::Video::empty();
                match decoder.receive_frame(&mut frame) {
                    Ok(()) => Ok(Some(Frame::Video(from_av_video(&frame)))),
                    Err(e) if would_block(&e) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            }
            DecoderKind::Audio {
                decoder,
                resampler,
                channels,
            } => {
                let mut frame = ffmpeg_next::frame::Audio::empty();
                match decoder.receive_frame(&mut frame) {
                    Ok(()) => {}
                    Err(e) if would_block(&e) => return Ok(None),
                    Err(e) => return Err(e.into()),
                }
                if frame.format() == PACKED_S16 {
                    return Ok(Some(Frame::Audio(from_av_audio(&frame, *channels))));
                }
                if resampler.is_none() {
                    *resampler = Some(resampling::Context::get(
                        frame.format(),
                        frame.channel_layout(),
                        frame.rate(),
                        PACKED_S16,
                        frame.channel_layout(),
                        frame.rate(),
                    )?);
                }
                let mut packed = ffmpeg_next::frame::Audio::empty();
                if let Some(resampler) = resampler.as_mut() {
                    resampler.run(&frame, &mut packed)?;
                }
                packed.set_pts(frame.pts());
                Ok(Some(Frame::Audio(from_av_audio(&packed, *channels))))
            }
            DecoderKind::Subtitle(_) => Ok(None),
        }
    }

    fn decode_subtitle(&mut self, data: &[u8]) -> anyhow::Result<Option<Frame>> {
        let DecoderKind::Subtitle(decoder) = &mut self.inner else {
            return Ok(None);
        };
        let packet = ffmpeg_next::Packet::copy(data);
        let mut subtitle = ffmpeg_next::codec::subtitle::Subtitle::new();
        if !decoder.decode(&packet, &mut subtitle)? {
            return Ok(None);
        }
        let rects = subtitle
            .rects()
            .filter_map(|rect| match rect {
                ffmpeg_next::codec::subtitle::Rect::Text(text) => Some(SubtitleRect::Text(text.get().to_string())),
                ffmpeg_next::codec::subtitle::Rect::Ass(ass) => Some(SubtitleRect::Ass(ass.get().to_string())),
                ffmpeg_next::codec::subtitle::Rect::Bitmap(bitmap) => Some(SubtitleRect::Bitmap {
                    x: bitmap.x() as u32,
                    y: bitmap.y() as u32,
                    width: bitmap.width(),
                    height: bitmap.height(),
                    data: Bytes::new(),
                }),
                ffmpeg_next::codec::subtitle::Rect::None(_) => None,
            })
            .collect();
        Ok(Some(Frame::Subtitle(Subtitle {
            start_display_time: subtitle.start(),
            end_display_time: subtitle.end(),
            rects,
        })))
    }
}

impl Decoder for FfmpegDecoder {
    fn decode(&mut self, data: &[u8]) -> anyhow::Result<Decoded> {
        if matches!(self.inner, DecoderKind::Subtitle(_)) {
            if data.is_empty() {
                return Ok(Decoded::nothing(0));
            }
            let frame = self.decode_subtitle(data)?;
            return Ok(Decoded {
                consumed: data.len(),
                frame,
            });
        }

        if data.is_empty() {
            if !self.draining {
                self.draining = true;
                self.send_eof()?;
            }
            return Ok(Decoded {
                consumed: 0,
                frame: self.receive()?,
            });
        }
        if let Some(frame) = self.receive()? {
            return Ok(Decoded::frame(0, frame));
        }
        self.send(data)?;
        Ok(Decoded {
            consumed: data.len(),
            frame: self.receive()?,
        })
    }
}

enum EncoderKind {
    Video {
        encoder: ffmpeg_next::codec::encoder::Video,
        /// Converts to the pixel format a hardware encoder insists on.
        scaler: Option<scaling::Context>,
    },
    Audio {
        encoder: ffmpeg_next::codec::encoder::Audio,
        resampler: Option<resampling::Context>,
    },
    Subtitle(ffmpeg_next::codec::encoder::Subtitle),
}

pub struct FfmpegEncoder {
    inner: EncoderKind,
    name: String,
    time_base: Rational,
    frame_size: usize,
    extradata: Bytes,
    params: BackendParams,
    pending: VecDeque<EncodedPacket>,
    draining: bool,
    quality: Option<f32>,
}

unsafe impl Send for FfmpegEncoder {}

/// Whether the container wants codec headers out of band.
fn needs_global_header(container: Option<&str>) -> bool {
    let Some(name) = container.and_then(|c| CString::new(c).ok()) else {
        return false;
    };
    unsafe {
        let fmt = ffmpeg_next::ffi::av_guess_format(name.as_ptr(), std::ptr::null(), std::ptr::null());
        !fmt.is_null() && ((*fmt).flags & ffmpeg_next::ffi::AVFMT_GLOBALHEADER as i32) != 0
    }
}

/// The container's preferred encoder for a stream kind, falling back to a
/// codec every FFmpeg build carries.
fn default_codec(params: &EncoderParams) -> anyhow::Result<Codec> {
    if let Some(name) = params.container.as_deref().and_then(|c| CString::new(c).ok()) {
        let id = unsafe {
            let fmt = ffmpeg_next::ffi::av_guess_format(name.as_ptr(), std::ptr::null(), std::ptr::null());
            if fmt.is_null() {
                None
            } else {
                match params.kind {
                    StreamKind::Audio(_) => Some((*fmt).audio_codec),
                    StreamKind::Video(_) => Some((*fmt).video_codec),
                    StreamKind::Subtitle => Some((*fmt).subtitle_codec),
                    StreamKind::Data => None,
                }
            }
        };
        if let Some(codec) = id.and_then(|id| ffmpeg_next::encoder::find(id.into())) {
            return Ok(codec);
        }
    }
    let fallback = match params.kind {
        StreamKind::Audio(_) => "mp2",
        StreamKind::Video(_) => "mpeg4",
        StreamKind::Subtitle => "ass",
        StreamKind::Data => anyhow::bail!("data streams cannot be encoded"),
    };
    ffmpeg_next::encoder::find_by_name(fallback).ok_or_else(|| anyhow::anyhow!("codec not found: {}", fallback))
}

fn open_video(codec: Codec, params: &EncoderParams) -> anyhow::Result<EncoderKind> {
    let StreamKind::Video(video) = &params.kind else {
        anyhow::bail!("not a video stream");
    };
    let source = pixel(&video.pixel_format)?;
    let format = pixel_format_for_encoder(source, codec.name());

    let mut encoder = ffmpeg_next::codec::Context::new_with_codec(codec).encoder().video()?;
    encoder.set_width(video.width);
    encoder.set_height(video.height);
    encoder.set_format(format);
    encoder.set_frame_rate(Some(ffmpeg_next::Rational::from(video.frame_rate)));
    encoder.set_time_base(ffmpeg_next::Rational::from(params.time_base));
    if let Some(bit_rate) = params.bit_rate {
        encoder.set_bit_rate(bit_rate as usize);
    }
    let mut flags = Flags::empty();
    match params.pass {
        Some(Pass::First) => flags |= Flags::PASS1,
        Some(Pass::Second) => flags |= Flags::PASS2,
        None => {}
    }
    if needs_global_header(params.container.as_deref()) {
        flags |= Flags::GLOBAL_HEADER;
    }
    encoder.set_flags(flags);
    if let Some(stats) = &params.stats_in {
        let stats = CString::new(stats.as_str())?;
        unsafe {
            (*encoder.as_mut_ptr()).stats_in = ffmpeg_next::ffi::av_strdup(stats.as_ptr());
        }
    }
    let encoder = encoder.open_with(Dictionary::new())?;

    let scaler = if format != source {
        Some(scaling::Context::get(
            source,
            video.width,
            video.height,
            format,
            video.width,
            video.height,
            scaling::Flags::BILINEAR,
        )?)
    } else {
        None
    };
    Ok(EncoderKind::Video { encoder, scaler })
}

fn open_audio(codec: Codec, params: &EncoderParams) -> anyhow::Result<EncoderKind> {
    let StreamKind::Audio(audio) = &params.kind else {
        anyhow::bail!("not an audio stream");
    };
    let format = codec
        .audio()
        .ok()
        .and_then(|a| a.formats())
        .and_then(|formats| {
            let formats: Vec<Sample> = formats.collect();
            formats.iter().copied().find(|f| *f == PACKED_S16).or(formats.first().copied())
        })
        .unwrap_or(PACKED_S16);

    let mut encoder = ffmpeg_next::codec::Context::new_with_codec(codec).encoder().audio()?;
    encoder.set_rate(audio.sample_rate as i32);
    encoder.set_channel_layout(layout(audio.channels));
    encoder.set_format(format);
    encoder.set_time_base(ffmpeg_next::Rational::from(params.time_base));
    if let Some(bit_rate) = params.bit_rate {
        encoder.set_bit_rate(bit_rate as usize);
    }
    if needs_global_header(params.container.as_deref()) {
        encoder.set_flags(Flags::GLOBAL_HEADER);
    }
    let encoder = encoder.open_with(Dictionary::new())?;

    let resampler = if format != PACKED_S16 {
        Some(resampling::Context::get(
            PACKED_S16,
            layout(audio.channels),
            audio.sample_rate,
            format,
            layout(audio.channels),
            audio.sample_rate,
        )?)
    } else {
        None
    };
    Ok(EncoderKind::Audio { encoder, resampler })
}

fn open_subtitle(codec: Codec, params: &EncoderParams) -> anyhow::Result<EncoderKind> {
    let mut encoder = ffmpeg_next::codec::Context::new_with_codec(codec).encoder().subtitle()?;
    encoder.set_time_base(ffmpeg_next::Rational::from(params.time_base));
    Ok(EncoderKind::Subtitle(encoder.open()?))
}

fn open_kind(codec: Codec, params: &EncoderParams) -> anyhow::Result<EncoderKind> {
    match params.kind {
        StreamKind::Video(_) => open_video(codec, params),
        StreamKind::Audio(_) => open_audio(codec, params),
        StreamKind::Subtitle => open_subtitle(codec, params),
        StreamKind::Data => anyhow::bail!("data streams cannot be encoded"),
    }
}

impl FfmpegEncoder {
    /// Opens the requested codec, or the container's default. With
    /// `hw_encode` a hardware variant is tried first and a failure to open
    /// it falls back to the software codec.
    pub fn open(params: &EncoderParams) -> anyhow::Result<Self> {
        let software = match &params.codec {
            Some(name) => {
                ffmpeg_next::encoder::find_by_name(name).ok_or_else(|| anyhow::anyhow!("codec not found: {}", name))?
            }
            None => default_codec(params)?,
        };

        let hw = if params.hw_encode { find_hw_encoder(software.name()) } else { None };
        let (inner, codec) = match hw {
            Some(hw_codec) => match open_kind(hw_codec, params) {
                Ok(inner) => (inner, hw_codec),
                Err(e) => {
                    log::warn!(
                        "hardware encoder {} failed: {}, falling back to {}",
                        hw_codec.name(),
                        e,
                        software.name()
                    );
                    (open_kind(software, params)?, software)
                }
            },
            None => (open_kind(software, params)?, software),
        };
        log::debug!("output stream #{}: encoder {} opened", params.index, codec.name());

        let ctx = match &inner {
            EncoderKind::Video { encoder, .. } => unsafe { encoder.as_ptr() },
            EncoderKind::Audio { encoder, .. } => unsafe { encoder.as_ptr() },
            EncoderKind::Subtitle(encoder) => unsafe { encoder.as_ptr() },
        };
        let (time_base, frame_size, extradata, parameters) = unsafe {
            let time_base: ffmpeg_next::Rational = (*ctx).time_base.into();
            let extradata = if (*ctx).extradata.is_null() || (*ctx).extradata_size <= 0 {
                Bytes::new()
            } else {
                Bytes::copy_from_slice(std::slice::from_raw_parts((*ctx).extradata, (*ctx).extradata_size as usize))
            };
            let mut parameters = Parameters::new();
            ffmpeg_next::ffi::avcodec_parameters_from_context(parameters.as_mut_ptr(), ctx);
            (time_base, (*ctx).frame_size.max(0) as usize, extradata, parameters)
        };

        Ok(Self {
            inner,
            name: codec.name().to_string(),
            time_base: time_base.into(),
            frame_size,
            extradata,
            params: CodecParameters::wrap(parameters),
            pending: VecDeque::new(),
            draining: false,
            quality: None,
        })
    }

    fn send(&mut self, frame: &Frame) -> anyhow::Result<()> {
        match (&mut self.inner, frame) {
            (EncoderKind::Video { encoder, scaler }, Frame::Video(frame)) => {
                let av = to_av_video(frame)?;
                match scaler {
                    Some(scaler) => {
                        let mut converted = ffmpeg_next::frame::Video::empty();
                        scaler.run(&av, &mut converted)?;
                        converted.set_pts(av.pts());
                        encoder.send_frame(&converted)?;
                    }
                    None => encoder.send_frame(&av)?,
                }
            }
            (EncoderKind::Audio { encoder, resampler }, Frame::Audio(frame)) => {
                let av = to_av_audio(frame);
                match resampler {
                    Some(resampler) => {
                        let mut converted = ffmpeg_next::frame::Audio::empty();
                        resampler.run(&av, &mut converted)?;
                        converted.set_pts(av.pts());
                        encoder.send_frame(&converted)?;
                    }
                    None => encoder.send_frame(&av)?,
                }
            }
            _ => anyhow::bail!("{} cannot encode a {} frame", self.name, frame.media_type()),
        }
        Ok(())
    }

    fn send_eof(&mut self) -> anyhow::Result<()> {
        match &mut self.inner {
            EncoderKind::Video { encoder, .. } => encoder.send_eof()?,
            EncoderKind::Audio { encoder, .. } => encoder.send_eof()?,
            EncoderKind::Subtitle(_) => {}
        }
        Ok(())
    }

    fn receive_all(&mut self) -> anyhow::Result<()> {
        loop {
            let mut packet = ffmpeg_next::Packet::empty();
            let result = match &mut self.inner {
                EncoderKind::Video { encoder, .. } => encoder.receive_packet(&mut packet),
                EncoderKind::Audio { encoder, .. } => encoder.receive_packet(&mut packet),
                EncoderKind::Subtitle(_) => return Ok(()),
            };
            match result {
                Ok(()) => {}
                Err(e) if would_block(&e) => return Ok(()),
                Err(e) => return Err(e.into()),
            }
            let mut picture_type = PictureType::None;
            for side_data in packet.side_data() {
                if side_data.kind() != ffmpeg_next::codec::packet::side_data::Type::QualityStats {
                    continue;
                }
                let data = side_data.data();
                if data.len() >= 5 {
                    let lambda = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
                    self.quality = Some(lambda as f32 / QP2LAMBDA);
                    picture_type = match data[4] {
                        1 => PictureType::I,
                        2 => PictureType::P,
                        3 => PictureType::B,
                        _ => PictureType::None,
                    };
                }
            }
            self.pending.push_back(EncodedPacket {
                data: packet.data().map(Bytes::copy_from_slice).unwrap_or_default(),
                pts: packet.pts(),
                dts: packet.dts(),
                is_key: packet.is_key(),
                picture_type,
            });
        }
    }

    fn encode_subtitle(&mut self, subtitle: &Subtitle) -> anyhow::Result<Option<EncodedPacket>> {
        let EncoderKind::Subtitle(encoder) = &mut self.inner else {
            return Ok(None);
        };
        let mut av = ffmpeg_next::codec::subtitle::Subtitle::new();
        av.set_start(subtitle.start_display_time);
        av.set_end(subtitle.end_display_time);
        for rect in &subtitle.rects {
            match rect {
                SubtitleRect::Text(text) => {
                    if let ffmpeg_next::codec::subtitle::RectMut::Text(mut r) =
                        av.add_rect(ffmpeg_next::codec::subtitle::Type::Text)
                    {
                        r.set(text);
                    }
                }
                SubtitleRect::Ass(text) => {
                    if let ffmpeg_next::codec::subtitle::RectMut::Ass(mut r) =
                        av.add_rect(ffmpeg_next::codec::subtitle::Type::Ass)
                    {
                        r.set(text);
                    }
                }
                SubtitleRect::Bitmap { .. } => {
                    log::warn!("{}: bitmap subtitle rects are not re-encoded", self.name);
                }
            }
        }
        let mut buf = vec![0u8; 1 << 16];
        let size = unsafe {
            ffmpeg_next::ffi::avcodec_encode_subtitle(encoder.as_mut_ptr(), buf.as_mut_ptr(), buf.len() as i32, av.as_ptr())
        };
        if size < 0 {
            return Err(ffmpeg_next::Error::from(size).into());
        }
        buf.truncate(size as usize);
        Ok(Some(EncodedPacket {
            data: Bytes::from(buf),
            is_key: true,
            ..Default::default()
        }))
    }
}

impl Encoder for FfmpegEncoder {
    fn codec_name(&self) -> &str {
        &self.name
    }

    fn time_base(&self) -> Rational {
        self.time_base
    }

    fn frame_size(&self) -> usize {
        self.frame_size
    }

    fn extradata(&self) -> Bytes {
        self.extradata.clone()
    }

    fn backend_params(&self) -> Option<BackendParams> {
        Some(self.params.clone())
    }

    fn encode(&mut self, frame: Option<&Frame>) -> anyhow::Result<Option<EncodedPacket>> {
        if let Some(Frame::Subtitle(subtitle)) = frame {
            return self.encode_subtitle(subtitle);
        }
        match frame {
            Some(frame) => self.send(frame)?,
            None if !self.draining => {
                self.draining = true;
                self.send_eof()?;
            }
            None => {}
        }
        self.receive_all()?;
        Ok(self.pending.pop_front())
    }

    fn stats_out(&mut self) -> Option<String> {
        let ctx = match &self.inner {
            EncoderKind::Video { encoder, .. } => unsafe { encoder.as_ptr() },
            _ => return None,
        };
        let stats = unsafe { (*ctx).stats_out };
        if stats.is_null() {
            return None;
        }
        let stats = unsafe { CStr::from_ptr(stats) }.to_string_lossy().into_owned();
        (!stats.is_empty()).then_some(stats)
    }

    fn quality(&self) -> Option<f32> {
        self.quality
    }
}

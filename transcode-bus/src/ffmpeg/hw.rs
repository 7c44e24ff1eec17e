//! Hardware encoder discovery with software fallback.

/// First hardware encoder available for a software codec name.
pub fn find_hw_encoder(codec_name: &str) -> Option<ffmpeg_next::Codec> {
    let hw_names: &[&str] = match codec_name {
        "libx264" | "h264" => &["h264_nvenc", "h264_vaapi", "h264_qsv", "h264_v4l2m2m"],
        "libx265" | "hevc" | "h265" => &["hevc_nvenc", "hevc_vaapi", "hevc_qsv", "hevc_v4l2m2m"],
        "libvpx" | "libvpx-vp9" | "vp9" => &["vp9_vaapi", "vp9_qsv"],
        "libaom-av1" | "libsvtav1" | "av1" => &["av1_nvenc", "av1_vaapi", "av1_qsv"],
        _ => &[],
    };

    for name in hw_names {
        if let Some(codec) = ffmpeg_next::encoder::find_by_name(name) {
            log::info!("found hardware encoder: {}", name);
            return Some(codec);
        }
    }
    None
}

pub fn is_hw_codec(codec_name: &str) -> bool {
    ["nvenc", "vaapi", "qsv", "v4l2m2m"]
        .iter()
        .any(|suffix| codec_name.contains(suffix))
}

/// Hardware encoders commonly reject planar 4:2:0 and want NV12.
pub fn pixel_format_for_encoder(source: ffmpeg_next::format::Pixel, codec_name: &str) -> ffmpeg_next::format::Pixel {
    use ffmpeg_next::format::Pixel;
    match source {
        Pixel::YUV420P | Pixel::RGB24 | Pixel::BGR24 if is_hw_codec(codec_name) => Pixel::NV12,
        _ => source,
    }
}

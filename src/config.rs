use std::path::Path;

use transcode_bus::TranscodeConfig;

/// Reads a JSON job description and checks it before anything is opened.
pub fn load(path: impl AsRef<Path>) -> anyhow::Result<TranscodeConfig> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("cannot read job file {}: {}", path.display(), e))?;
    let config: TranscodeConfig =
        serde_json::from_str(&text).map_err(|e| anyhow::anyhow!("invalid job file {}: {}", path.display(), e))?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_job() -> anyhow::Result<()> {
        let path = std::env::temp_dir().join(format!("transcoder-job-{}.json", std::process::id()));
        std::fs::write(
            &path,
            r#"{
                "inputs": [{ "url": "in.mkv" }],
                "outputs": [{
                    "url": "out.mkv",
                    "streams": [
                        { "media_type": "video", "codec": "mpeg4", "width": 320, "height": 240 },
                        { "media_type": "audio", "copy": true }
                    ]
                }],
                "stream_maps": ["0:0", "0:1"],
                "recording_time": 10000000
            }"#,
        )?;
        let config = load(&path);
        std::fs::remove_file(&path)?;
        let config = config?;
        assert_eq!(config.output_stream_count(), 2);
        assert_eq!(config.recording_time, Some(10_000_000));
        assert!(config.outputs[0].streams[1].copy);
        Ok(())
    }

    #[test]
    fn test_rejects_job_without_outputs() -> anyhow::Result<()> {
        let path = std::env::temp_dir().join(format!("transcoder-empty-{}.json", std::process::id()));
        std::fs::write(&path, r#"{ "inputs": [{ "url": "in.mkv" }], "outputs": [] }"#)?;
        let result = load(&path);
        std::fs::remove_file(&path)?;
        assert!(result.is_err());
        Ok(())
    }
}

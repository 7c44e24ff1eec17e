//! Binds every output stream to the input stream that feeds it.

use crate::config::TranscodeConfig;
use crate::error::{Error, Result};
use crate::stream::MediaType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamMapping {
    /// Global input stream index.
    pub source: usize,
    /// Global input stream index whose clock the output follows.
    pub sync: usize,
}

/// Resolves explicit maps, or picks the first unused input stream of the
/// right media type for each output (any stream of that type if all are
/// taken). `inputs` lists the media type of every stream of every input file.
pub fn resolve(config: &TranscodeConfig, inputs: &[Vec<MediaType>]) -> Result<Vec<StreamMapping>> {
    let offsets: Vec<usize> = inputs
        .iter()
        .scan(0, |acc, streams| {
            let start = *acc;
            *acc += streams.len();
            Some(start)
        })
        .collect();
    let types: Vec<MediaType> = inputs.iter().flatten().copied().collect();
    let global = |file: usize, stream: usize| -> Option<usize> {
        let streams = inputs.get(file)?;
        (stream < streams.len()).then(|| offsets[file] + stream)
    };

    let nb_ostreams = config.output_stream_count();
    let maps = &config.stream_maps;
    if !maps.is_empty() && maps.len() != nb_ostreams {
        return Err(Error::Config(format!(
            "number of stream maps ({}) must match number of output streams ({})",
            maps.len(),
            nb_ostreams
        )));
    }

    let mut used = vec![false; types.len()];
    let mut mappings = Vec::with_capacity(nb_ostreams);
    let ostreams = config
        .outputs
        .iter()
        .enumerate()
        .flat_map(|(f, o)| o.streams.iter().enumerate().map(move |(s, cfg)| (f, s, cfg)));

    for (k, (file_index, index, ost)) in ostreams.enumerate() {
        let mapping = if let Some(map) = maps.get(k) {
            let source = global(map.file, map.stream).ok_or_else(|| {
                Error::Config(format!("invalid input stream index #{}.{}", map.file, map.stream))
            })?;
            let (sync_file, sync_stream) = map.sync.unwrap_or((map.file, map.stream));
            let sync = global(sync_file, sync_stream).ok_or_else(|| {
                Error::Config(format!("invalid sync stream index #{}.{}", sync_file, sync_stream))
            })?;
            if types[source] != ost.media_type {
                return Err(Error::Config(format!(
                    "codec type mismatch for mapping #{}.{} -> #{}.{} ({} -> {})",
                    map.file, map.stream, file_index, index, types[source], ost.media_type
                )));
            }
            StreamMapping { source, sync }
        } else {
            let unused = (0..types.len()).find(|&i| types[i] == ost.media_type && !used[i]);
            let source = unused
                .or_else(|| (0..types.len()).find(|&i| types[i] == ost.media_type))
                .ok_or_else(|| {
                    Error::Config(format!(
                        "could not find input stream matching output stream #{}.{}",
                        file_index, index
                    ))
                })?;
            StreamMapping { source, sync: source }
        };
        used[mapping.source] = true;
        mappings.push(mapping);
    }
    Ok(mappings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{InputConfig, OutputConfig, OutputStreamConfig};

    fn config(outputs: &[&[MediaType]], maps: &[&str]) -> TranscodeConfig {
        TranscodeConfig {
            inputs: vec![InputConfig::default(), InputConfig::default()],
            outputs: outputs
                .iter()
                .map(|streams| OutputConfig {
                    url: "out".into(),
                    format: None,
                    streams: streams.iter().map(|t| OutputStreamConfig::new(*t)).collect(),
                })
                .collect(),
            stream_maps: maps.iter().map(|m| m.parse().unwrap()).collect(),
            ..Default::default()
        }
    }

    fn inputs() -> Vec<Vec<MediaType>> {
        vec![
            vec![MediaType::Video, MediaType::Audio],
            vec![MediaType::Audio, MediaType::Subtitle],
        ]
    }

    #[test]
    fn test_auto_selection_prefers_unused_streams() {
        let cfg = config(&[&[MediaType::Video, MediaType::Audio, MediaType::Audio]], &[]);
        let m = resolve(&cfg, &inputs()).unwrap();
        assert_eq!(m.iter().map(|m| m.source).collect::<Vec<_>>(), vec![0, 1, 2]);

        // third audio output reuses the first audio stream
        let cfg = config(
            &[&[MediaType::Audio, MediaType::Audio], &[MediaType::Audio]],
            &[],
        );
        let m = resolve(&cfg, &inputs()).unwrap();
        assert_eq!(m.iter().map(|m| m.source).collect::<Vec<_>>(), vec![1, 2, 1]);
    }

    #[test]
    fn test_explicit_maps_with_sync() {
        let cfg = config(&[&[MediaType::Video, MediaType::Audio]], &["0:0", "1:0:0:0"]);
        let m = resolve(&cfg, &inputs()).unwrap();
        assert_eq!(m[0], StreamMapping { source: 0, sync: 0 });
        assert_eq!(m[1], StreamMapping { source: 2, sync: 0 });
    }

    #[test]
    fn test_mapping_errors() {
        let cfg = config(&[&[MediaType::Video, MediaType::Audio]], &["0:0"]);
        assert!(matches!(resolve(&cfg, &inputs()), Err(Error::Config(_))));

        let cfg = config(&[&[MediaType::Video]], &["0:5"]);
        assert!(matches!(resolve(&cfg, &inputs()), Err(Error::Config(_))));

        let cfg = config(&[&[MediaType::Video]], &["0:0:1:9"]);
        assert!(matches!(resolve(&cfg, &inputs()), Err(Error::Config(_))));

        let cfg = config(&[&[MediaType::Video]], &["0:1"]);
        let err = resolve(&cfg, &inputs()).unwrap_err();
        assert!(err.to_string().contains("codec type mismatch"), "{}", err);

        let cfg = config(&[&[MediaType::Subtitle, MediaType::Subtitle]], &[]);
        assert!(resolve(&cfg, &inputs()).is_ok());
        let only_video = vec![vec![MediaType::Video]];
        assert!(matches!(resolve(&cfg, &only_video), Err(Error::Config(_))));
    }
}

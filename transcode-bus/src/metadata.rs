//! Container level tags and the `output:input` metadata maps.

use std::fmt;

use crate::config::MetadataMap;
use crate::error::{Error, Result};

/// Tags copied between containers by a metadata map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub copyright: Option<String>,
    pub comment: Option<String>,
    pub album: Option<String>,
    pub year: Option<u32>,
    pub track: Option<u32>,
    pub genre: Option<String>,
}

impl Metadata {
    /// Builds from `key=value` style tags; unknown keys are ignored.
    pub fn from_tags<'a>(tags: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let mut metadata = Self::default();
        for (key, value) in tags {
            let value = value.to_string();
            match key.to_ascii_lowercase().as_str() {
                "title" => metadata.title = Some(value),
                "author" | "artist" => metadata.author = Some(value),
                "copyright" => metadata.copyright = Some(value),
                "comment" => metadata.comment = Some(value),
                "album" => metadata.album = Some(value),
                "year" | "date" => metadata.year = value.get(..4).and_then(|y| y.parse().ok()),
                "track" => metadata.track = value.split('/').next().and_then(|t| t.parse().ok()),
                "genre" => metadata.genre = Some(value),
                _ => {}
            }
        }
        metadata
    }

    pub fn tags(&self) -> Vec<(&'static str, String)> {
        let mut tags = Vec::new();
        let mut push = |key, value: Option<String>| {
            if let Some(value) = value {
                tags.push((key, value));
            }
        };
        push("title", self.title.clone());
        push("author", self.author.clone());
        push("copyright", self.copyright.clone());
        push("comment", self.comment.clone());
        push("album", self.album.clone());
        push("year", self.year.map(|y| y.to_string()));
        push("track", self.track.map(|t| t.to_string()));
        push("genre", self.genre.clone());
        tags
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

impl fmt::Display for Metadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, value) in self.tags() {
            writeln!(f, "{}={}", key, value)?;
        }
        Ok(())
    }
}

/// Resolves metadata maps into the tags each output file receives.
pub fn apply_maps(
    maps: &[MetadataMap],
    inputs: &[Metadata],
    nb_outputs: usize,
) -> Result<Vec<Metadata>> {
    let mut outputs = vec![Metadata::default(); nb_outputs];
    for map in maps {
        if map.output >= nb_outputs {
            return Err(Error::Config(format!(
                "invalid output file index {} in metadata map {}",
                map.output, map
            )));
        }
        let Some(input) = inputs.get(map.input) else {
            return Err(Error::Config(format!(
                "invalid input file index {} in metadata map {}",
                map.input, map
            )));
        };
        outputs[map.output] = input.clone();
    }
    Ok(outputs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_tags() {
        let m = Metadata::from_tags([
            ("TITLE", "Song"),
            ("artist", "Band"),
            ("date", "2007-03-01"),
            ("track", "3/12"),
            ("encoder", "ignored"),
        ]);
        assert_eq!(m.title.as_deref(), Some("Song"));
        assert_eq!(m.author.as_deref(), Some("Band"));
        assert_eq!(m.year, Some(2007));
        assert_eq!(m.track, Some(3));
        assert_eq!(m.tags().len(), 4);
    }

    #[test]
    fn test_apply_maps() {
        let inputs = vec![
            Metadata::default(),
            Metadata {
                title: Some("B".into()),
                ..Default::default()
            },
        ];
        let maps = ["1:1".parse().unwrap()];
        let out = apply_maps(&maps, &inputs, 2).unwrap();
        assert!(out[0].is_empty());
        assert_eq!(out[1].title.as_deref(), Some("B"));

        let bad = ["0:5".parse().unwrap()];
        assert!(matches!(apply_maps(&bad, &inputs, 2), Err(Error::Config(_))));
        let bad = ["2:0".parse().unwrap()];
        assert!(matches!(apply_maps(&bad, &inputs, 2), Err(Error::Config(_))));
    }
}

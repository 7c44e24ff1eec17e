use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

pub fn pass_log_path(prefix: &str, ost_index: usize) -> PathBuf {
    PathBuf::from(format!("{}-{}.log", prefix, ost_index))
}

/// First-pass statistics sink for one video encoder.
pub struct PassLog {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl PassLog {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path).map_err(|source| Error::PassLog {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    pub fn write(&mut self, stats: &str) -> Result<()> {
        self.writer
            .write_all(stats.as_bytes())
            .map_err(|source| self.error(source))
    }

    pub fn finish(&mut self) -> Result<()> {
        self.writer.flush().map_err(|source| self.error(source))
    }

    fn error(&self, source: std::io::Error) -> Error {
        Error::PassLog {
            path: self.path.display().to_string(),
            source,
        }
    }
}

/// Reads the whole first-pass log for the second pass.
pub fn read_pass_log(path: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref();
    std::fs::read_to_string(path).map_err(|source| Error::PassLog {
        path: path.display().to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_then_read() -> anyhow::Result<()> {
        let prefix = std::env::temp_dir().join(format!("passlog-test-{}", std::process::id()));
        let path = pass_log_path(&prefix.display().to_string(), 3);
        assert!(path.display().to_string().ends_with("-3.log"));

        let mut log = PassLog::create(&path)?;
        log.write("in:0 out:0 type:1 q:2\n")?;
        log.write("in:1 out:1 type:3 q:4\n")?;
        log.finish()?;

        let stats = read_pass_log(&path)?;
        assert_eq!(stats.lines().count(), 2);
        std::fs::remove_file(&path)?;

        assert!(matches!(read_pass_log(&path), Err(Error::PassLog { .. })));
        Ok(())
    }
}

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("could not open {url}: {source}")]
    Open {
        url: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("error while opening codec for {stream}: {source}")]
    CodecOpen {
        stream: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("error while decoding stream #{file}.{stream}: {source}")]
    Decode {
        file: usize,
        stream: usize,
        #[source]
        source: anyhow::Error,
    },

    #[error("{kind} encoding failed on stream #{file}.{stream}: {source}")]
    Encode {
        kind: &'static str,
        file: usize,
        stream: usize,
        #[source]
        source: anyhow::Error,
    },

    #[error("error while reading input #{file}: {source}")]
    Read {
        file: usize,
        #[source]
        source: anyhow::Error,
    },

    #[error("error while writing output #{file}: {source}")]
    Write {
        file: usize,
        #[source]
        source: anyhow::Error,
    },

    #[error("resource exhausted: {0}")]
    Resource(String),

    #[error("two-pass log {path}: {source}")]
    PassLog {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    /// The scheduler logs these and moves on to the next packet.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::Decode { .. })
    }

    /// Whether output trailers may still be written after this error.
    pub fn allows_trailer(&self) -> bool {
        !matches!(self, Error::Resource(_))
    }
}

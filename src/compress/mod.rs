//! Response encoding: negotiation, content-type gating, gzip and brotli.
//!
//! The pool is stateless and safe for concurrent use; every call returns a
//! freshly-allocated output buffer owned by the caller. When an encode fails
//! the pipeline falls back to the identity body.

use std::io::Write;

use flate2::{Compression, write::GzEncoder};
use thiserror::Error;

use crate::config::CompressionSettings;

const GZIP_MIN_LEVEL: u32 = 1;
const GZIP_MAX_LEVEL: u32 = 9;
const GZIP_DEFAULT_LEVEL: u32 = 6;
const BROTLI_MAX_LEVEL: u32 = 11;
const BROTLI_DEFAULT_LEVEL: u32 = 6;
const BROTLI_BUFFER_SIZE: usize = 4096;
const BROTLI_WINDOW_SIZE: u32 = 22;

/// Wire encoding of a response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Encoding {
    Identity,
    Gzip,
    Brotli,
}

impl Encoding {
    /// All encodings a cache entry may be stored under.
    pub const ALL: [Encoding; 3] = [Encoding::Identity, Encoding::Gzip, Encoding::Brotli];

    /// Value for the `Content-Encoding` header; identity sets none.
    pub fn content_encoding(self) -> Option<&'static str> {
        match self {
            Encoding::Identity => None,
            Encoding::Gzip => Some("gzip"),
            Encoding::Brotli => Some("br"),
        }
    }
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("gzip encoding failed: {0}")]
    Gzip(#[source] std::io::Error),
    #[error("brotli encoding failed: {0}")]
    Brotli(#[source] std::io::Error),
}

/// Shared gzip/brotli encoder pool.
pub struct EncoderPool {
    settings: CompressionSettings,
}

impl EncoderPool {
    pub fn new(settings: CompressionSettings) -> Self {
        Self { settings }
    }

    /// Pick the response encoding for an `Accept-Encoding` header.
    ///
    /// Brotli wins when advertised and enabled, then gzip (a bare `*` counts
    /// as gzip). Q-values and client ordering are not honoured.
    pub fn choose(&self, accept_encoding: &str) -> Encoding {
        let accept = accept_encoding.to_ascii_lowercase();

        if self.settings.brotli && accept.contains("br") {
            return Encoding::Brotli;
        }
        if self.settings.gzip && (accept.contains("gzip") || accept.contains('*')) {
            return Encoding::Gzip;
        }
        Encoding::Identity
    }

    /// Whether a body of this content type and size is worth compressing.
    pub fn should_compress(&self, content_type: &str, size: u64) -> bool {
        if size < self.settings.min_compress_size {
            return false;
        }
        self.settings
            .compress_types
            .iter()
            .any(|candidate| content_type.contains(candidate.as_str()))
    }

    /// Compress `data` with the configured level, coerced into the encoder's
    /// valid range when out of bounds.
    pub fn encode(&self, data: &[u8], encoding: Encoding) -> Result<Vec<u8>, EncodeError> {
        match encoding {
            Encoding::Identity => Ok(data.to_vec()),
            Encoding::Gzip => self.encode_gzip(data),
            Encoding::Brotli => self.encode_brotli(data),
        }
    }

    fn encode_gzip(&self, data: &[u8]) -> Result<Vec<u8>, EncodeError> {
        let mut level = self.settings.level;
        if !(GZIP_MIN_LEVEL..=GZIP_MAX_LEVEL).contains(&level) {
            level = GZIP_DEFAULT_LEVEL;
        }

        let mut encoder = GzEncoder::new(
            Vec::with_capacity(data.len() / 2),
            Compression::new(level),
        );
        encoder.write_all(data).map_err(EncodeError::Gzip)?;
        encoder.finish().map_err(EncodeError::Gzip)
    }

    fn encode_brotli(&self, data: &[u8]) -> Result<Vec<u8>, EncodeError> {
        let mut level = self.settings.level;
        if level > BROTLI_MAX_LEVEL {
            level = BROTLI_DEFAULT_LEVEL;
        }

        let mut output = Vec::with_capacity(data.len() / 2);
        {
            let mut encoder = brotli::CompressorWriter::new(
                &mut output,
                BROTLI_BUFFER_SIZE,
                level,
                BROTLI_WINDOW_SIZE,
            );
            encoder.write_all(data).map_err(EncodeError::Brotli)?;
            encoder.flush().map_err(EncodeError::Brotli)?;
        }
        Ok(output)
    }
}

// src/compression/mod.rs

//! Decompression of fetched descriptor payloads
//!
//! Repository, component and package descriptors are served compressed.
//! The format is detected from magic bytes; plain payloads pass through.

use crate::error::{Error, Result};
use std::io::Read;
use std::path::Path;

/// Supported compression formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionFormat {
    /// No compression (raw data)
    None,
    Gzip,
    Xz,
    Zstd,
}

impl CompressionFormat {
    /// Detect compression format from magic bytes
    ///
    /// - Gzip: `1f 8b`
    /// - XZ: `fd 37 7a 58 5a 00`
    /// - Zstd: `28 b5 2f fd`
    pub fn from_magic_bytes(data: &[u8]) -> Self {
        if data.starts_with(&[0x1f, 0x8b]) {
            Self::Gzip
        } else if data.starts_with(&[0xfd, 0x37, 0x7a, 0x58, 0x5a, 0x00]) {
            Self::Xz
        } else if data.starts_with(&[0x28, 0xb5, 0x2f, 0xfd]) {
            Self::Zstd
        } else {
            Self::None
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Gzip => "gzip",
            Self::Xz => "xz",
            Self::Zstd => "zstd",
        }
    }
}

impl std::fmt::Display for CompressionFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Decompress `data`, attributing failures to `origin` (the spooled file)
///
/// In-process decoders have no exit status, so `Error::Unpack` carries
/// `exit_code: None` and the decoder's message.
pub fn decompress(data: &[u8], origin: &Path) -> Result<Vec<u8>> {
    let format = CompressionFormat::from_magic_bytes(data);
    let unpack_err = |reason: String| Error::Unpack {
        path: origin.to_path_buf(),
        exit_code: None,
        reason,
    };

    let mut output = Vec::new();
    let read = match format {
        CompressionFormat::None => {
            output.extend_from_slice(data);
            return Ok(output);
        }
        CompressionFormat::Gzip => flate2::read::GzDecoder::new(data).read_to_end(&mut output),
        CompressionFormat::Xz => xz2::read::XzDecoder::new(data).read_to_end(&mut output),
        CompressionFormat::Zstd => {
            let mut decoder = zstd::Decoder::new(data)
                .map_err(|e| unpack_err(format!("failed to create zstd decoder: {e}")))?;
            decoder.read_to_end(&mut output)
        }
    };

    read.map_err(|e| unpack_err(format!("{format} error: {e}")))?;
    Ok(output)
}

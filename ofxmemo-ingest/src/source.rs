//! Reading OFX files from disk and sniffing their dialect.

use std::fs;
use std::path::Path;

use ofxmemo_core::{OfxError, OfxVersion, Result};
use tracing::warn;

const BOM: char = '\u{feff}';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Utf8,
    /// Single-byte fallback for exports that are not valid UTF-8
    /// (typically `CHARSET:1252`).
    Latin1,
}

/// Decoded file contents plus the encoding to write them back with.
#[derive(Debug, Clone)]
pub struct Source {
    pub text: String,
    pub encoding: Encoding,
}

impl Source {
    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|e| OfxError::io(path, e))?;
        let source = Self::decode(bytes);
        if source.encoding == Encoding::Latin1 {
            warn!(path = %path.display(), "input is not UTF-8, decoding as Latin-1");
        }
        Ok(source)
    }

    pub fn decode(bytes: Vec<u8>) -> Self {
        match String::from_utf8(bytes) {
            Ok(text) => Self {
                text,
                encoding: Encoding::Utf8,
            },
            Err(e) => Self {
                text: e.into_bytes().into_iter().map(char::from).collect(),
                encoding: Encoding::Latin1,
            },
        }
    }

    /// Encode `text` the way this source was encoded.
    pub fn encode(&self, text: &str) -> Vec<u8> {
        match self.encoding {
            Encoding::Utf8 => text.as_bytes().to_vec(),
            Encoding::Latin1 => text
                .chars()
                .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
                .collect(),
        }
    }

    /// Bytes for a rewrite of this source in `version`'s dialect. v2 output
    /// declares no encoding, which XML reads as UTF-8, so it is always
    /// written as UTF-8. v1 keeps the source encoding.
    pub fn encode_for(&self, version: OfxVersion, text: &str) -> Vec<u8> {
        match version {
            OfxVersion::V1 => self.encode(text),
            OfxVersion::V2 => text.as_bytes().to_vec(),
        }
    }
}

/// Pick the dialect from the first non-blank line: `<?xml` means v2,
/// anything else v1.
pub fn detect_version(text: &str) -> Result<OfxVersion> {
    let first = text
        .trim_start_matches(BOM)
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .ok_or_else(|| OfxError::UnsupportedFormat("input is empty".to_string()))?;

    if first.starts_with("<?xml") {
        Ok(OfxVersion::V2)
    } else {
        Ok(OfxVersion::V1)
    }
}

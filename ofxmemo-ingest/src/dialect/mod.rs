//! The two OFX wire dialects.

pub mod v1;
pub mod v2;

use ofxmemo_core::{OfxVersion, ParsedOfx, Result};

/// Render `parsed` in the dialect it was read from.
pub fn serialize(parsed: &ParsedOfx) -> Result<String> {
    match parsed.version {
        OfxVersion::V1 => Ok(v1::serialize(parsed)),
        OfxVersion::V2 => v2::serialize(parsed),
    }
}

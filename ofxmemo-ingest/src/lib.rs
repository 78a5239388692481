//! ofxmemo-ingest: OFX v1/v2 dialects, format sniffing and the `OfxParser` facade.

pub mod dialect;
pub mod parser;
pub mod source;

pub use parser::{OfxParser, prune_memos};
pub use source::{Encoding, Source, detect_version};

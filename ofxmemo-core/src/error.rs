//! Error taxonomy shared by every ofxmemo crate.

use std::path::PathBuf;

use thiserror::Error;

/// Coarse class of an [`OfxError`], used by callers that only need to know
/// whether the input, the configuration or the requested operation is at fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Configuration,
    StructuralParse,
    Domain,
    UnsupportedFormat,
}

#[derive(Debug, Error)]
pub enum OfxError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("aliases file does not exist: {}", .0.display())]
    AliasFile(PathBuf),

    #[error("unable to parse aliases JSON {}: {source}", path.display())]
    AliasJson {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("unable to decode memo store {}: {source}", path.display())]
    MemoStore {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error("missing <{0}> root tag")]
    MissingRoot(String),

    #[error("malformed XML: {0}")]
    Xml(String),

    #[error("FITID not found: {0}")]
    FitidNotFound(String),

    #[error("FITID is not unique: {fitid} matches {count} transactions")]
    FitidNotUnique { fitid: String, count: usize },

    #[error("found memo on {0} and overwrite not allowed")]
    MemoExists(String),

    #[error("JSON encoding failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported OFX format: {0}")]
    UnsupportedFormat(String),
}

impl OfxError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        OfxError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            OfxError::Io { .. }
            | OfxError::AliasFile(_)
            | OfxError::AliasJson { .. }
            | OfxError::MemoStore { .. }
            | OfxError::InvalidTimezone(_) => ErrorClass::Configuration,
            OfxError::MissingRoot(_) | OfxError::Xml(_) | OfxError::Json(_) => {
                ErrorClass::StructuralParse
            }
            OfxError::FitidNotFound(_)
            | OfxError::FitidNotUnique { .. }
            | OfxError::MemoExists(_) => ErrorClass::Domain,
            OfxError::UnsupportedFormat(_) => ErrorClass::UnsupportedFormat,
        }
    }
}

pub type Result<T> = std::result::Result<T, OfxError>;

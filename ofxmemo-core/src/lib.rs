//! ofxmemo-core: document model, value coercion, aliases and memo storage for OFX files

pub mod alias;
pub mod apply;
pub mod builder;
pub mod coerce;
pub mod document;
pub mod error;
pub mod memo;

pub use alias::{AliasRule, AliasRules, Resolution, Rewrite};
pub use apply::{TransactionHit, apply_memos, find_transactions, set_memo};
pub use builder::{Assignment, DocumentBuilder};
pub use coerce::{ParserOptions, coerce, parse_timezone};
pub use document::{Headers, Node, OfxVersion, ParsedOfx, ROOT_TAG, Record, Scalar, Segment};
pub use error::{ErrorClass, OfxError, Result};
pub use memo::{MemoRecord, MemoStore, Upsert, write_atomic};

//! `OfxParser`: the public entry point for parsing, exporting and annotating
//! OFX files.

use std::fs;
use std::path::Path;

use chrono::Utc;
use ofxmemo_core::{
    AliasRules, MemoRecord, MemoStore, OfxError, OfxVersion, ParsedOfx, ParserOptions, Result,
    Upsert, apply_memos, write_atomic,
};
use tracing::{debug, info};

use crate::dialect::{self, v1, v2};
use crate::source::{Source, detect_version};

#[derive(Debug, Clone, Default)]
pub struct OfxParser {
    aliases: AliasRules,
    options: ParserOptions,
}

impl OfxParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(mut self, options: ParserOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_aliases(mut self, aliases: AliasRules) -> Self {
        self.aliases = aliases;
        self
    }

    /// Load alias rules from a JSON file.
    pub fn load_aliases(self, path: impl AsRef<Path>) -> Result<Self> {
        let aliases = AliasRules::load(path)?;
        debug!(rules = aliases.len(), "aliases loaded");
        Ok(self.with_aliases(aliases))
    }

    pub fn options(&self) -> &ParserOptions {
        &self.options
    }

    pub fn aliases(&self) -> &AliasRules {
        &self.aliases
    }

    /// Parse OFX text of either dialect.
    pub fn parse_str(&self, text: &str) -> Result<ParsedOfx> {
        let text = text.trim_start_matches('\u{feff}');
        let version = detect_version(text)?;
        debug!(%version, "dialect detected");
        match version {
            OfxVersion::V1 => v1::parse(text, &self.aliases, &self.options),
            OfxVersion::V2 => v2::parse(text, &self.aliases, &self.options),
        }
    }

    /// Parse a file, then attach any memos held in `memo_store`. A store
    /// path that does not exist is ignored.
    pub fn parse_file(
        &self,
        path: impl AsRef<Path>,
        memo_store: Option<&Path>,
    ) -> Result<ParsedOfx> {
        let path = path.as_ref();
        let source = Source::read(path)?;
        let mut parsed = self.parse_str(&source.text)?;

        if let Some(store_path) = memo_store.filter(|p| p.exists()) {
            let store = MemoStore::open(store_path)?;
            let applied = apply_memos(&mut parsed.document, store.records());
            debug!(store = %store_path.display(), applied, "memos applied");
        }

        info!(path = %path.display(), version = %parsed.version, "parsed");
        Ok(parsed)
    }

    /// Parse a file and render it as pretty JSON.
    pub fn to_json(&self, path: impl AsRef<Path>, memo_store: Option<&Path>) -> Result<String> {
        let parsed = self.parse_file(path, memo_store)?;
        Ok(parsed.to_json_pretty()?)
    }

    /// Attach `memo` to the transaction `fitid` and rewrite `path` in place,
    /// keeping its dialect. v1 files keep their byte encoding; v2 files are
    /// written as UTF-8 to match the XML declaration.
    ///
    /// Values are read raw and aliases are not applied, so every other field
    /// is written back as it was read. Nothing is written when the FITID is
    /// missing, ambiguous, or already annotated without `allow_overwrite`.
    pub fn set_memo(
        &self,
        path: impl AsRef<Path>,
        fitid: &str,
        memo: &str,
        allow_overwrite: bool,
        memo_store: Option<&Path>,
    ) -> Result<()> {
        let path = path.as_ref();
        let source = Source::read(path)?;
        let raw = OfxParser::new().with_options(ParserOptions::raw());
        let mut parsed = raw.parse_str(&source.text)?;

        let accountid =
            ofxmemo_core::set_memo(&mut parsed.document, fitid, memo, allow_overwrite)?;
        let rendered = dialect::serialize(&parsed)?;

        if let Some(store_path) = memo_store {
            let filename = fs::canonicalize(path).map_err(|e| OfxError::io(path, e))?;
            let mut store = MemoStore::open(store_path)?;
            let outcome = store.upsert(MemoRecord {
                accountid,
                fitid: fitid.to_string(),
                datetime: Utc::now().timestamp(),
                filename: filename.to_string_lossy().into_owned(),
                memo: memo.to_string(),
            });
            store.save()?;
            debug!(
                store = %store_path.display(),
                updated = outcome == Upsert::Updated,
                "memo persisted"
            );
        }

        write_atomic(path, &source.encode_for(parsed.version, &rendered))?;
        info!(path = %path.display(), fitid, version = %parsed.version, "memo set");
        Ok(())
    }
}

/// Drop stored memos older than `retain_days` and rewrite the store.
/// Returns the number of records removed.
pub fn prune_memos(store_path: &Path, retain_days: i64) -> Result<usize> {
    let mut store = MemoStore::open(store_path)?;
    let removed = store.prune(retain_days, Utc::now().timestamp());
    store.save()?;
    info!(store = %store_path.display(), removed, remaining = store.len(), "memo store pruned");
    Ok(removed)
}

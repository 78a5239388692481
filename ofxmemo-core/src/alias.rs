//! Field aliases: rename, substitute or drop fields by their logical path.
//!
//! An alias file is a JSON object mapping `/`-delimited field paths to a
//! rewrite string:
//!
//! ```json
//! {
//!   "OFX/SIGNONMSGSRSV1": "",
//!   "OFX/BANKMSGSRSV1/STMTTRNRS/STMTRS/BANKTRANLIST/STMTTRN/NAME": "PAYEE",
//!   "OFX/BANKMSGSRSV1/STMTTRNRS/STMTRS/BANKACCTFROM": "s/BANK/SOURCE/"
//! }
//! ```
//!
//! Paths never contain sequence indexes. An empty rewrite drops the field,
//! `s/A/B/` replaces the literal substring `A` with `B` in the field name
//! (plain text, no regex), anything else is the new field name.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{OfxError, Result};

static SUBSTITUTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^s/(?P<from>[^/]+)/(?P<to>[^/]*)/?$").expect("substitution pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rewrite {
    Drop,
    Substitute { from: String, to: String },
    Rename(String),
}

impl Rewrite {
    pub fn parse(raw: &str) -> Self {
        if raw.is_empty() {
            return Rewrite::Drop;
        }
        match SUBSTITUTION.captures(raw) {
            Some(caps) => Rewrite::Substitute {
                from: caps["from"].to_string(),
                to: caps["to"].to_string(),
            },
            None => Rewrite::Rename(raw.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasRule {
    pub path: Vec<String>,
    pub rewrite: Rewrite,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Drop,
    Keep(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AliasRules {
    rules: Vec<AliasRule>,
}

impl AliasRules {
    pub fn new(rules: Vec<AliasRule>) -> Self {
        Self { rules }
    }

    /// Load rules from an alias JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(OfxError::AliasFile(path.to_path_buf()));
        }
        let s = fs::read_to_string(path).map_err(|e| OfxError::io(path, e))?;
        Self::from_json_str(&s).map_err(|source| OfxError::AliasJson {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        let raw: BTreeMap<String, String> = serde_json::from_str(s)?;
        let rules = raw
            .into_iter()
            .map(|(xpath, rewrite)| AliasRule {
                path: xpath
                    .trim_matches('/')
                    .split('/')
                    .map(str::to_string)
                    .collect(),
                rewrite: Rewrite::parse(&rewrite),
            })
            .collect();
        Ok(Self { rules })
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Resolve the stored name of `name`, whose logical path (ancestors plus
    /// itself, no indexes) is `field_path`.
    pub fn resolve(&self, field_path: &[&str], name: &str) -> Resolution {
        let mut resolved = name.to_string();
        for rule in self.rules.iter().filter(|r| r.path == field_path) {
            match &rule.rewrite {
                Rewrite::Drop => return Resolution::Drop,
                Rewrite::Substitute { from, to } => resolved = resolved.replace(from, to),
                Rewrite::Rename(alias) => resolved = alias.clone(),
            }
        }
        Resolution::Keep(resolved)
    }
}

use anyhow::{Context, Result};
use ofxmemo_core::ParserOptions;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::state::ensure_ofxmemo_home;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub parser: ParserSection,
    #[serde(default)]
    pub memo: MemoSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserSection {
    /// Turn literal `NONE` values into null.
    pub none_to_null: bool,
    /// IANA zone OFX timestamps are converted into.
    pub target_timezone: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoSection {
    /// Memo store path, relative to the working directory unless absolute.
    pub store: PathBuf,
    pub retain_days: i64,
}

impl Default for ParserSection {
    fn default() -> Self {
        Self {
            none_to_null: false,
            target_timezone: "UTC".to_string(),
        }
    }
}

impl Default for MemoSection {
    fn default() -> Self {
        Self {
            store: PathBuf::from("memodb.json"),
            retain_days: 365,
        }
    }
}

impl Config {
    pub fn parser_options(&self) -> Result<ParserOptions> {
        let opts = ParserOptions {
            none_to_null: self.parser.none_to_null,
            ..ParserOptions::default()
        };
        Ok(opts.with_timezone(&self.parser.target_timezone)?)
    }
}

pub fn config_path() -> Result<PathBuf> {
    Ok(ensure_ofxmemo_home()?.join("config.toml"))
}

pub fn load_config() -> Result<Config> {
    load_config_from(&config_path()?)
}

pub fn load_config_from(p: &Path) -> Result<Config> {
    if !p.exists() {
        return Ok(Config::default());
    }
    let s = fs::read_to_string(p).with_context(|| format!("read {}", p.display()))?;
    let cfg = toml::from_str(&s).with_context(|| format!("parse {}", p.display()))?;
    debug!(path = %p.display(), "config loaded");
    Ok(cfg)
}

pub fn save_config_to(p: &Path, cfg: &Config) -> Result<()> {
    let s = toml::to_string_pretty(cfg).context("serialize config")?;
    fs::write(p, s).with_context(|| format!("write {}", p.display()))?;
    Ok(())
}

pub fn init_config() -> Result<()> {
    let p = config_path()?;
    if p.exists() {
        println!("Config already exists: {}", p.display());
        return Ok(());
    }
    save_config_to(&p, &Config::default())?;
    println!("Wrote {}", p.display());
    Ok(())
}

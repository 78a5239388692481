use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use ofxmemo_ingest::{OfxParser, prune_memos};
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod config;
mod state;

use config::Config;

const VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("OFXMEMO_BUILD_SHA"), ")");

#[derive(Parser, Debug)]
#[command(name = "ofxmemo", version = VERSION, about = "Parse OFX statements and keep transaction memos")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Parse an OFX file (v1 or v2) and print it as JSON
    Parse {
        /// OFX file to read
        ofxfile: PathBuf,

        /// Alias definition file (JSON map of /PATH/TO/FIELD => rewrite)
        aliases: Option<PathBuf>,

        /// Memo store to merge into the output (default from config)
        #[arg(long)]
        memodb: Option<PathBuf>,

        /// Do not merge stored memos
        #[arg(long, conflicts_with = "memodb")]
        no_memodb: bool,

        /// Write JSON here instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,

        /// Convert timestamps into this IANA zone (default from config)
        #[arg(long)]
        timezone: Option<String>,

        /// Turn literal NONE values into null
        #[arg(long)]
        none_to_null: bool,
    },

    /// Set the memo of one transaction and rewrite the file in place
    SetMemo {
        ofxfile: PathBuf,
        fitid: String,
        memo: String,

        /// Replace an existing memo
        #[arg(long)]
        overwrite: bool,

        /// Memo store to record the memo in (default from config)
        #[arg(long)]
        memodb: Option<PathBuf>,

        /// Do not record the memo in a store
        #[arg(long, conflicts_with = "memodb")]
        no_memodb: bool,
    },

    /// Drop stored memos older than the retention window
    Prune {
        #[arg(long)]
        memodb: Option<PathBuf>,

        /// Days to keep (default from config)
        #[arg(long)]
        retain_days: Option<i64>,
    },

    /// Manage ~/.ofxmemo/config.toml
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Write the default config file if none exists
    Init,

    /// Print the effective config
    Show,
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{}", error_line(&err));
            ExitCode::from(1)
        }
    }
}

/// Whole error chain on one line.
fn error_line(err: &anyhow::Error) -> String {
    format!("error: {err:#}")
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("OFXMEMO_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let cfg = config::load_config()?;
    run_with(cli.command, &cfg)
}

fn run_with(command: Command, cfg: &Config) -> Result<()> {
    match command {
        Command::Parse {
            ofxfile,
            aliases,
            memodb,
            no_memodb,
            output,
            timezone,
            none_to_null,
        } => {
            let mut opts = cfg.parser_options()?;
            if let Some(tz) = timezone {
                opts = opts.with_timezone(&tz)?;
            }
            opts.none_to_null |= none_to_null;

            let mut parser = OfxParser::new().with_options(opts);
            if let Some(aliases) = aliases {
                parser = parser
                    .load_aliases(&aliases)
                    .with_context(|| format!("loading aliases {}", aliases.display()))?;
            }

            let store = memo_store(cfg, memodb, no_memodb);
            let json = parser
                .to_json(&ofxfile, store.as_deref())
                .with_context(|| format!("parsing {}", ofxfile.display()))?;

            match output {
                Some(out) => {
                    fs::write(&out, json).with_context(|| format!("write {}", out.display()))?
                }
                None => println!("{json}"),
            }
        }

        Command::SetMemo {
            ofxfile,
            fitid,
            memo,
            overwrite,
            memodb,
            no_memodb,
        } => {
            let store = memo_store(cfg, memodb, no_memodb);
            OfxParser::new()
                .set_memo(&ofxfile, &fitid, &memo, overwrite, store.as_deref())
                .with_context(|| format!("setting memo in {}", ofxfile.display()))?;
        }

        Command::Prune {
            memodb,
            retain_days,
        } => {
            let days = retain_days.unwrap_or(cfg.memo.retain_days);
            if days < 0 {
                bail!("--retain-days must not be negative (got {days})");
            }
            let store = memodb.unwrap_or_else(|| cfg.memo.store.clone());
            let removed = prune_memos(&store, days)
                .with_context(|| format!("pruning {}", store.display()))?;
            println!("Removed {removed} memo(s) older than {days} days from {}", store.display());
        }

        Command::Config { command } => match command {
            ConfigCommand::Init => config::init_config()?,
            ConfigCommand::Show => {
                let p = config::config_path()?;
                println!("# {}", p.display());
                print!("{}", toml::to_string_pretty(cfg).context("serialize config")?);
            }
        },
    }

    Ok(())
}

/// Store path for this run: the flag, else the configured default, unless
/// disabled.
fn memo_store(cfg: &Config, flag: Option<PathBuf>, disabled: bool) -> Option<PathBuf> {
    if disabled {
        return None;
    }
    Some(flag.unwrap_or_else(|| cfg.memo.store.clone()))
}

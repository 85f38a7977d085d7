// `docmirror cache`: inspect or clear the persisted schema cache.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Subcommand};
use docmirror_core::{Mirror, MirrorConfig, ScriptedTransport};
use serde::Serialize;

use crate::commands::load_config;
use crate::output::{self, OutputFormat};

#[derive(Debug, Subcommand)]
pub enum CacheCommand {
    /// Show cached doctypes and space used
    Stats(CacheArgs),
    /// Drop every cached schema
    Clear(CacheArgs),
}

#[derive(Debug, Args)]
pub struct CacheArgs {
    /// Config file (defaults to ~/.docmirror/config.toml).
    #[arg(long)]
    config: Option<PathBuf>,
    /// Force JSON output.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CacheStats {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub used_bytes: u64,
    pub max_bytes: u64,
    pub doctypes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CacheCleared {
    pub removed: usize,
}

pub fn run(cmd: CacheCommand) -> anyhow::Result<()> {
    match cmd {
        CacheCommand::Stats(args) => {
            let format = OutputFormat::detect(args.json);
            report(format, open(&args).and_then(|mirror| stats(&mirror)), format_stats)
        }
        CacheCommand::Clear(args) => {
            let format = OutputFormat::detect(args.json);
            report(format, open(&args).and_then(|mirror| clear(&mirror)), |cleared| {
                format!("Cleared {} cached schema(s)", cleared.removed)
            })
        }
    }
}

fn report<T: Serialize>(
    format: OutputFormat,
    result: anyhow::Result<T>,
    human_fn: impl FnOnce(&T) -> String,
) -> anyhow::Result<()> {
    match result {
        Ok(value) => {
            output::print_output(format, &value, human_fn)?;
            Ok(())
        }
        Err(e) => {
            output::print_anyhow_error(format, &e);
            Err(e)
        }
    }
}

fn open(args: &CacheArgs) -> anyhow::Result<Mirror> {
    let config = load_config(args.config.as_deref())?;
    open_with(config)
}

fn open_with(config: MirrorConfig) -> anyhow::Result<Mirror> {
    Mirror::open(config, Arc::new(ScriptedTransport::new()))
}

fn stats(mirror: &Mirror) -> anyhow::Result<CacheStats> {
    let config = mirror.config();
    Ok(CacheStats {
        path: config.cache_path().map(|path| path.display().to_string()),
        used_bytes: mirror.cache_used_bytes()?,
        max_bytes: config.cache.max_bytes,
        doctypes: mirror.cached_doctypes()?,
    })
}

fn clear(mirror: &Mirror) -> anyhow::Result<CacheCleared> {
    let removed = mirror.clear_cached_schemas()?;
    tracing::info!(removed, "schema cache cleared");
    Ok(CacheCleared { removed })
}

fn format_stats(stats: &CacheStats) -> String {
    let mut lines = Vec::new();
    if let Some(path) = &stats.path {
        lines.push(format!("Cache: {path}"));
    }
    lines.push(format!("Used:  {} / {} bytes", stats.used_bytes, stats.max_bytes));
    if stats.doctypes.is_empty() {
        lines.push("No cached schemas".to_string());
    } else {
        lines.push(format!("{} cached schema(s):", stats.doctypes.len()));
        for doctype in &stats.doctypes {
            lines.push(format!("  {doctype}"));
        }
    }
    lines.join("\n")
}

// CLI subcommand dispatch and the helpers shared by offline commands.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Subcommand;
use docmirror_core::{Mirror, MirrorConfig, ScriptedTransport};
use serde_json::Value;

pub mod cache;
pub mod inspect;
pub mod new;

#[derive(Subcommand)]
pub enum Command {
    /// Replay sync payload files and show the resulting registry
    Inspect(inspect::InspectArgs),
    /// Create a draft from schema files and print it with defaults applied
    New(new::NewArgs),
    /// Show or clear the persisted schema cache
    #[command(subcommand)]
    Cache(cache::CacheCommand),
}

pub fn run(cmd: Command) -> anyhow::Result<()> {
    match cmd {
        Command::Inspect(args) => inspect::run(args),
        Command::New(args) => new::run(args),
        Command::Cache(cmd) => cache::run(cmd),
    }
}

/// Drive one async command to completion on a fresh current-thread runtime.
pub(crate) fn block_on<F: Future>(future: F) -> anyhow::Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start tokio runtime")?;
    Ok(runtime.block_on(future))
}

/// Config from `--config`, else `~/.docmirror/config.toml`, else defaults.
pub(crate) fn load_config(path: Option<&Path>) -> anyhow::Result<MirrorConfig> {
    match path {
        Some(path) => MirrorConfig::load_from(path)
            .with_context(|| format!("failed to load config `{}`", path.display())),
        None => Ok(MirrorConfig::load()),
    }
}

/// A mirror with no server behind it: every transport call fails as
/// unreachable, so schemas and documents come only from payload files.
pub(crate) fn offline_mirror(config: MirrorConfig) -> Mirror {
    Mirror::in_memory(config, Arc::new(ScriptedTransport::new()))
}

pub(crate) fn read_json(path: &Path) -> anyhow::Result<Value> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read `{}`", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("`{}` is not valid JSON", path.display()))
}

/// Sync getdoctype responses (or bare DocType records) so their schemas load.
pub(crate) async fn load_meta(mirror: &Mirror, files: &[PathBuf]) -> anyhow::Result<Vec<String>> {
    let mut loaded = Vec::new();
    for path in files {
        let report = mirror
            .sync_value(read_json(path)?)
            .await
            .with_context(|| format!("`{}` is not a schema payload", path.display()))?;
        tracing::debug!(path = %path.display(), schemas = report.schemas.len(), "schema file loaded");
        loaded.extend(report.schemas);
    }
    Ok(loaded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_json_reports_the_path() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("broken.json");
        std::fs::write(&path, "{not json").unwrap();

        let error = read_json(&path).unwrap_err();
        assert!(format!("{error:#}").contains("broken.json"));
    }

    #[test]
    fn meta_files_load_schemas() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("task.json");
        std::fs::write(
            &path,
            r#"{"docs": [{"doctype": "DocType", "name": "Task", "fields": [{"fieldname": "subject", "fieldtype": "Data"}]}]}"#,
        )
        .unwrap();

        let mirror = offline_mirror(MirrorConfig::default());
        let loaded = block_on(load_meta(&mirror, &[path])).unwrap().unwrap();
        assert_eq!(loaded, vec!["Task".to_string()]);
    }
}

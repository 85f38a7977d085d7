// `docmirror new`: build a draft offline and print it with defaults applied.

use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use docmirror_common::protocol::boot::BootInfo;
use docmirror_core::Mirror;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::commands::{block_on, load_config, load_meta, offline_mirror, read_json};
use crate::output::{self, OutputFormat};

#[derive(Debug, Args)]
pub struct NewArgs {
    /// Doctype of the draft.
    doctype: String,
    /// getdoctype responses covering the doctype and its table doctypes.
    #[arg(long = "meta", required = true)]
    meta: Vec<PathBuf>,
    /// Session boot file (user, defaults, permissions, boot records).
    #[arg(long)]
    boot: Option<PathBuf>,
    /// Add one row to every mandatory table field.
    #[arg(long)]
    mandatory_children: bool,
    /// JSON object of values to carry into the draft.
    #[arg(long)]
    intent: Option<String>,
    /// Config file (defaults to ~/.docmirror/config.toml).
    #[arg(long)]
    config: Option<PathBuf>,
    /// Force JSON output.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewResult {
    pub doctype: String,
    pub name: String,
    pub doc: Value,
}

pub fn run(args: NewArgs) -> anyhow::Result<()> {
    let format = OutputFormat::detect(args.json);
    match block_on(new_draft(&args)).and_then(|result| result) {
        Ok(result) => {
            output::print_output(format, &result, format_human)?;
            Ok(())
        }
        Err(e) => {
            output::print_anyhow_error(format, &e);
            Err(e)
        }
    }
}

async fn new_draft(args: &NewArgs) -> anyhow::Result<NewResult> {
    let intent = args.intent.as_deref().map(parse_intent).transpose()?;
    let mirror = offline_mirror(load_config(args.config.as_deref())?);
    load_meta(&mirror, &args.meta).await?;

    if let Some(path) = &args.boot {
        boot_from_file(&mirror, path).await?;
    }
    if let Some(values) = intent {
        mirror.set_create_intent(values).await;
    }

    let key = mirror
        .get_new_doc(&args.doctype, None, args.mandatory_children)
        .await
        .with_context(|| format!("failed to create a new {}", args.doctype))?;
    let doc = mirror
        .doc_value(&key)
        .await
        .with_context(|| format!("draft {key} vanished from the registry"))?;

    Ok(NewResult { doctype: key.doctype, name: key.name, doc })
}

async fn boot_from_file(mirror: &Mirror, path: &PathBuf) -> anyhow::Result<()> {
    let boot: BootInfo = serde_json::from_value(read_json(path)?)
        .with_context(|| format!("`{}` is not a boot payload", path.display()))?;
    mirror.boot(boot).await?;
    Ok(())
}

fn parse_intent(raw: &str) -> anyhow::Result<Map<String, Value>> {
    match serde_json::from_str(raw).context("--intent must be JSON")? {
        Value::Object(values) => Ok(values),
        other => anyhow::bail!("--intent must be a JSON object, got {other}"),
    }
}

fn format_human(result: &NewResult) -> String {
    let mut lines = vec![format!("New {} {}", result.doctype, result.name)];
    let Some(fields) = result.doc.as_object() else {
        return lines.join("\n");
    };
    for (field, value) in fields {
        match value {
            Value::Array(rows) => lines.push(format!("  {field:<24} {} row(s)", rows.len())),
            Value::Null => {}
            Value::String(text) => lines.push(format!("  {field:<24} {text}")),
            other => lines.push(format!("  {field:<24} {other}")),
        }
    }
    lines.join("\n")
}

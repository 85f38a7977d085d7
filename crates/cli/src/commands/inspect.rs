// `docmirror inspect`: replay sync payloads and show the registry.

use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use docmirror_core::{Filter, Filters, Mirror};
use serde::Serialize;
use serde_json::Value;

use crate::commands::{block_on, load_config, load_meta, offline_mirror, read_json};
use crate::output::{self, OutputFormat};

#[derive(Debug, Args)]
pub struct InspectArgs {
    /// Sync payload files, applied in order.
    #[arg(required = true)]
    payloads: Vec<PathBuf>,
    /// getdoctype responses to load before syncing.
    #[arg(long = "meta")]
    meta: Vec<PathBuf>,
    /// List the registered documents of this doctype.
    #[arg(long)]
    doctype: Option<String>,
    /// `field=value` equality filters for --doctype.
    #[arg(long = "filter", requires = "doctype")]
    filters: Vec<String>,
    /// Config file (defaults to ~/.docmirror/config.toml).
    #[arg(long)]
    config: Option<PathBuf>,
    /// Force JSON output.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct InspectResult {
    pub schemas: Vec<String>,
    pub doctypes: Vec<DoctypeCount>,
    pub renamed: Vec<RenameEntry>,
    pub removed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub documents: Option<Vec<Value>>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DoctypeCount {
    pub doctype: String,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RenameEntry {
    pub doctype: String,
    pub from: String,
    pub to: String,
}

pub fn run(args: InspectArgs) -> anyhow::Result<()> {
    let format = OutputFormat::detect(args.json);
    match block_on(inspect(&args)).and_then(|result| result) {
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

async fn inspect(args: &InspectArgs) -> anyhow::Result<InspectResult> {
    let filters = parse_filters(&args.filters)?;
    let mirror = offline_mirror(load_config(args.config.as_deref())?);
    let mut schemas = load_meta(&mirror, &args.meta).await?;

    let mut renamed = Vec::new();
    let mut removed = 0;
    for path in &args.payloads {
        let report = mirror
            .sync_value(read_json(path)?)
            .await
            .with_context(|| format!("failed to sync `{}`", path.display()))?;
        tracing::info!(path = %path.display(), docs = report.synced.len(), "payload synced");
        schemas.extend(report.schemas);
        removed += report.removed.len();
        renamed.extend(report.renamed.into_iter().map(|rename| RenameEntry {
            doctype: rename.doctype,
            from: rename.from,
            to: rename.to,
        }));
    }

    let documents = match &args.doctype {
        Some(doctype) => Some(documents_of(&mirror, doctype, &filters).await),
        None => None,
    };

    Ok(InspectResult {
        schemas,
        doctypes: doctype_counts(&mirror).await,
        renamed,
        removed,
        documents,
    })
}

async fn doctype_counts(mirror: &Mirror) -> Vec<DoctypeCount> {
    let mut counts = Vec::new();
    for doctype in mirror.registered_doctypes().await {
        let count = mirror.get_list(&doctype, &Filters::new()).await.len();
        counts.push(DoctypeCount { doctype, count });
    }
    counts
}

async fn documents_of(mirror: &Mirror, doctype: &str, filters: &Filters) -> Vec<Value> {
    let mut documents = Vec::new();
    for doc in mirror.get_list(doctype, filters).await {
        if let Some(value) = mirror.doc_value(&doc.key()).await {
            documents.push(value);
        }
    }
    documents
}

/// `field=value` pairs; the value is read as JSON when it parses, else as text.
fn parse_filters(raw: &[String]) -> anyhow::Result<Filters> {
    let mut filters = Filters::new();
    for pair in raw {
        let (field, value) = pair
            .split_once('=')
            .with_context(|| format!("filter `{pair}` must look like field=value"))?;
        let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
        filters = filters.with(field.trim(), Filter::Eq(value));
    }
    Ok(filters)
}

fn format_human(result: &InspectResult) -> String {
    let mut lines = Vec::new();
    if !result.schemas.is_empty() {
        lines.push(format!("Schemas: {}", result.schemas.join(", ")));
    }

    let total: usize = result.doctypes.iter().map(|entry| entry.count).sum();
    lines.push(format!("{total} document(s) registered"));
    for entry in &result.doctypes {
        lines.push(format!("  {:<32} {}", entry.doctype, entry.count));
    }

    for rename in &result.renamed {
        lines.push(format!("Renamed {}: {} -> {}", rename.doctype, rename.from, rename.to));
    }
    if result.removed > 0 {
        lines.push(format!("{} stale entr(ies) removed", result.removed));
    }

    if let Some(documents) = &result.documents {
        lines.push(String::new());
        for document in documents {
            lines.push(serde_json::to_string_pretty(document).unwrap_or_else(|_| document.to_string()));
        }
    }
    lines.join("\n")
}

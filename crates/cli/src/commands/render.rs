use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use switchboard_core::config::{AppConfig, LoadOptions};
use switchboard_core::document::markdown;
use switchboard_core::render::{plan, render, BlockKind, DeliveryBatch, PlatformLimits};

use crate::commands::CommandResult;

#[derive(Debug, Serialize)]
struct RenderOutput {
    command: &'static str,
    status: &'static str,
    limits: PlatformLimits,
    block_count: usize,
    batches: Vec<DeliveryBatch>,
}

/// Uses the configured rendering limits when configuration loads, defaults otherwise.
pub fn run(path: &Path, json_output: bool) -> CommandResult {
    let limits = AppConfig::load(LoadOptions::default())
        .map(|config| config.rendering)
        .unwrap_or_default();

    let batches = match render_file(path, &limits) {
        Ok(batches) => batches,
        Err(error) => {
            return CommandResult::failure("render", "input", format!("{error:#}"), 3);
        }
    };

    let output = RenderOutput {
        command: "render",
        status: "ok",
        limits,
        block_count: batches.iter().map(DeliveryBatch::len).sum(),
        batches,
    };

    if json_output {
        return match serde_json::to_string_pretty(&output) {
            Ok(output) => CommandResult { exit_code: 0, output },
            Err(error) => CommandResult::failure("render", "serialization", error.to_string(), 1),
        };
    }

    CommandResult { exit_code: 0, output: render_human(&output) }
}

fn render_file(path: &Path, limits: &PlatformLimits) -> Result<Vec<DeliveryBatch>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read markdown file `{}`", path.display()))?;
    let document = markdown::parse(&raw);
    Ok(plan(&render(&document, limits), limits))
}

fn render_human(output: &RenderOutput) -> String {
    let mut lines = vec![format!(
        "{} blocks in {} message(s)",
        output.block_count,
        output.batches.len()
    )];

    for (index, batch) in output.batches.iter().enumerate() {
        lines.push(format!("message {} ({} blocks):", index + 1, batch.len()));
        for block in &batch.blocks {
            let label = match block.kind {
                BlockKind::Section => "section",
                BlockKind::Divider => "divider",
                BlockKind::Actions => "actions",
                BlockKind::Context => "context",
            };
            let mut summary = block.text.lines().next().unwrap_or_default().to_string();
            if !block.fields.is_empty() {
                summary = format!("{} fields", block.fields.len());
            }
            if let Some(link) = &block.link {
                summary = format!("{summary} [{}]({})", link.label, link.url);
            }
            lines.push(format!("  - {label}: {summary}"));
        }
    }

    lines.join("\n")
}

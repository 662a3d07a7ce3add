use tracing::debug;

use super::{char_len, fit, take_chars, LinkButton, PlatformLimits, RenderedBlock, TRUNCATION_SUFFIX};
use crate::document::{Document, Emphasis, InlineRun, Node, StatusKind};

const OPEN_LABEL: &str = "Open";
const MAX_CELL_WIDTH: usize = 40;
const CLOSING_FENCE: &str = "```";

/// Lays a document out as blocks, in node order. Every node yields at least
/// one block and no block text exceeds `limits.max_text_per_block`.
pub fn render(doc: &Document, limits: &PlatformLimits) -> Vec<RenderedBlock> {
    let limit = limits.max_text_per_block.max(1);
    if doc.is_empty() {
        return vec![no_content(limit)];
    }

    let mut blocks = Vec::with_capacity(doc.len());
    for (index, node) in doc.nodes().iter().enumerate() {
        if node.is_empty() {
            blocks.push(no_content(limit));
            continue;
        }

        match node {
            Node::Heading { level, text } => {
                if *level == 1 && index > 0 {
                    blocks.push(RenderedBlock::divider());
                }
                blocks.push(RenderedBlock::section(heading(text, limit)));
            }
            Node::Paragraph { runs } => {
                blocks.push(RenderedBlock::section(format_runs(runs, limit)));
            }
            Node::BulletList { items } => blocks.extend(bullet_blocks(items, limit)),
            Node::Table { headers, rows } => blocks.extend(table_blocks(headers, rows, limits)),
            Node::LinkCard { url, title, preview } => {
                blocks.push(link_card(url, title, preview.as_deref(), limit));
            }
            Node::StatusLine { kind, text } => blocks.push(status_line(*kind, text, limit)),
        }
    }
    blocks
}

fn no_content(limit: usize) -> RenderedBlock {
    RenderedBlock::context(fit(super::NO_CONTENT_TEXT, limit).0)
}

fn truncated(kind: &'static str, text: &str, limit: usize) -> String {
    let (fitted, cut) = fit(text, limit);
    if cut {
        debug!(
            event_name = "render.overflow.truncated",
            node = kind,
            original_chars = char_len(text),
            limit,
            "block text truncated"
        );
    }
    fitted
}

fn heading(text: &str, limit: usize) -> String {
    let text = text.trim();
    if limit < 3 {
        return truncated("heading", text, limit);
    }
    format!("*{}*", truncated("heading", text, limit - 2))
}

fn format_run(run: &InlineRun) -> String {
    let text = match run.emphasis {
        Some(Emphasis::Bold) => format!("*{}*", run.text),
        Some(Emphasis::Italic) => format!("_{}_", run.text),
        Some(Emphasis::Code) if run.text.contains('\n') => format!("```{}```", run.text),
        Some(Emphasis::Code) => format!("`{}`", run.text),
        None => run.text.clone(),
    };
    match run.link_url.as_deref() {
        Some(url) if run.text.is_empty() => format!("<{url}>"),
        Some(url) => format!("<{url}|{text}>"),
        None => text,
    }
}

/// Formats runs as mrkdwn. When the whole does not fit, markup of the run
/// that crosses the limit is dropped so no link or emphasis is cut open.
fn format_runs(runs: &[InlineRun], limit: usize) -> String {
    let formatted: Vec<String> = runs.iter().map(format_run).collect();
    let total: usize = formatted.iter().map(|piece| char_len(piece)).sum();
    if total <= limit {
        return formatted.concat();
    }

    debug!(
        event_name = "render.overflow.truncated",
        node = "paragraph",
        original_chars = total,
        limit,
        "block text truncated"
    );

    let suffix_len = char_len(TRUNCATION_SUFFIX);
    if limit <= suffix_len {
        let plain: String = runs.iter().map(|run| run.text.as_str()).collect();
        return take_chars(&plain, limit).to_owned();
    }

    let budget = limit - suffix_len;
    let mut output = String::new();
    let mut used = 0;
    for (run, piece) in runs.iter().zip(&formatted) {
        let len = char_len(piece);
        if used + len <= budget {
            output.push_str(piece);
            used += len;
            continue;
        }
        output.push_str(take_chars(&run.text, budget - used));
        break;
    }
    let mut output = output.trim_end().to_owned();
    output.push_str(TRUNCATION_SUFFIX);
    output
}

fn bullet_blocks(items: &[Vec<InlineRun>], limit: usize) -> Vec<RenderedBlock> {
    let mut blocks = Vec::new();
    let mut current = String::new();

    for item in items.iter().filter(|item| !item.iter().all(InlineRun::is_blank)) {
        let line = format!("• {}", format_runs(item, limit.saturating_sub(2).max(1)));
        let line = truncated("bullet_list", &line, limit);

        let joined_len = if current.is_empty() {
            char_len(&line)
        } else {
            char_len(&current) + 1 + char_len(&line)
        };
        if joined_len > limit && !current.is_empty() {
            blocks.push(RenderedBlock::section(std::mem::take(&mut current)));
        }
        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(&line);
    }

    if !current.is_empty() {
        blocks.push(RenderedBlock::section(current));
    }
    blocks
}

fn table_blocks(
    headers: &[String],
    rows: &[Vec<String>],
    limits: &PlatformLimits,
) -> Vec<RenderedBlock> {
    let columns = rows.iter().map(Vec::len).chain([headers.len()]).max().unwrap_or(0).max(1);
    let compact = columns <= limits.compact_table_column_threshold
        && columns <= limits.max_fields_per_block.max(1);

    if compact {
        field_grid(headers, rows, columns, limits)
    } else {
        vec![monospace_table(headers, rows, columns, limits)]
    }
}

fn cell(row: &[String], column: usize) -> &str {
    row.get(column).map(String::as_str).unwrap_or("")
}

fn header_label(headers: &[String], column: usize) -> String {
    match headers.get(column).map(|header| header.trim()) {
        Some(header) if !header.is_empty() => header.to_owned(),
        _ => format!("Column {}", column + 1),
    }
}

fn omitted_rows_notice(omitted: usize) -> String {
    if omitted == 1 {
        "…1 row omitted".to_owned()
    } else {
        format!("…{omitted} rows omitted")
    }
}

fn field_grid(
    headers: &[String],
    rows: &[Vec<String>],
    columns: usize,
    limits: &PlatformLimits,
) -> Vec<RenderedBlock> {
    let limit = limits.max_text_per_block.max(1);
    let shown = rows.len().min(limits.max_table_rows_displayed.max(1));
    let rows_per_block = (limits.max_fields_per_block.max(1) / columns).max(1);

    let mut blocks: Vec<RenderedBlock> = rows[..shown]
        .chunks(rows_per_block)
        .map(|chunk| {
            let fields = chunk
                .iter()
                .flat_map(|row| {
                    (0..columns).map(move |column| (column, cell(row, column)))
                })
                .map(|(column, value)| {
                    let value = if value.trim().is_empty() { "-" } else { value };
                    let field = format!("*{}*\n{}", header_label(headers, column), value);
                    truncated("table", &field, limit)
                })
                .collect();
            RenderedBlock::fields(fields)
        })
        .collect();

    let omitted = rows.len() - shown;
    if omitted > 0 {
        debug!(event_name = "render.overflow.rows_omitted", omitted, "table rows omitted");
        blocks.push(RenderedBlock::context(fit(&omitted_rows_notice(omitted), limit).0));
    }
    blocks
}

fn table_line(cells: impl Iterator<Item = String>, widths: &[usize]) -> String {
    cells
        .zip(widths)
        .map(|(cell, width)| format!("{cell:<width$}", width = *width))
        .collect::<Vec<_>>()
        .join(" | ")
        .trim_end()
        .to_owned()
}

fn monospace_table(
    headers: &[String],
    rows: &[Vec<String>],
    columns: usize,
    limits: &PlatformLimits,
) -> RenderedBlock {
    let limit = limits.max_text_per_block.max(1);
    let clip = |text: &str| -> String {
        let text = text.trim();
        if char_len(text) > MAX_CELL_WIDTH {
            format!("{}…", take_chars(text, MAX_CELL_WIDTH - 1))
        } else {
            text.to_owned()
        }
    };

    let header_cells: Vec<String> =
        (0..columns).map(|column| clip(&header_label(headers, column))).collect();
    let candidates = rows.len().min(limits.max_table_rows_displayed.max(1));
    let body: Vec<Vec<String>> = rows[..candidates]
        .iter()
        .map(|row| (0..columns).map(|column| clip(cell(row, column))).collect())
        .collect();

    let widths: Vec<usize> = (0..columns)
        .map(|column| {
            body.iter()
                .map(|row| char_len(&row[column]))
                .chain([char_len(&header_cells[column])])
                .max()
                .unwrap_or(0)
        })
        .collect();

    let header_line = table_line(header_cells.into_iter(), &widths);
    let separator =
        widths.iter().map(|width| "-".repeat((*width).max(1))).collect::<Vec<_>>().join("-+-");
    let opening = format!("```\n{header_line}\n{separator}\n");

    let mut text = opening;
    let mut shown = 0;
    for row in body {
        let line = table_line(row.into_iter(), &widths);
        let omitted_after = rows.len() - (shown + 1);
        let footer_len = if omitted_after > 0 {
            1 + char_len(&omitted_rows_notice(omitted_after))
        } else {
            0
        };
        if char_len(&text) + char_len(&line) + 1 + char_len(CLOSING_FENCE) + footer_len > limit {
            break;
        }
        text.push_str(&line);
        text.push('\n');
        shown += 1;
    }
    text.push_str(CLOSING_FENCE);

    let omitted = rows.len() - shown;
    if omitted > 0 {
        debug!(event_name = "render.overflow.rows_omitted", omitted, shown, "table rows omitted");
        text.push('\n');
        text.push_str(&omitted_rows_notice(omitted));
    }

    RenderedBlock::section(truncated("table", &text, limit))
}

fn link_card(url: &str, title: &str, preview: Option<&str>, limit: usize) -> RenderedBlock {
    let url = url.trim();
    let title = match title.trim() {
        "" => url,
        title => title,
    };
    let mut text = heading(title, limit);

    if let Some(preview) = preview.map(str::trim).filter(|preview| !preview.is_empty()) {
        if char_len(&text) + 1 + char_len(preview) <= limit {
            text.push('\n');
            text.push_str(preview);
        } else {
            debug!(event_name = "render.overflow.preview_omitted", url, "link preview omitted");
        }
    }

    RenderedBlock::actions(text, LinkButton { url: url.to_owned(), label: OPEN_LABEL.to_owned() })
}

fn status_line(kind: StatusKind, text: &str, limit: usize) -> RenderedBlock {
    let marker = match kind {
        StatusKind::Processing => "⏳",
        StatusKind::Success => "✅",
        StatusKind::Error => "❌",
    };
    let text = truncated("status_line", &format!("{marker} {}", text.trim()), limit);
    match kind {
        StatusKind::Error => RenderedBlock::section(text),
        StatusKind::Processing | StatusKind::Success => RenderedBlock::context(text),
    }
}

//! Reader for the markdown-like text that LLM and tool responses come back as.

use super::{Document, Emphasis, InlineRun, Node, StatusKind};

#[derive(Debug, Default)]
struct Reader {
    document: Document,
    paragraph: Vec<String>,
    items: Vec<Vec<InlineRun>>,
    table: Vec<Vec<String>>,
}

impl Reader {
    fn flush(&mut self) {
        self.flush_paragraph();
        self.flush_list();
        self.flush_table();
    }

    fn flush_paragraph(&mut self) {
        if self.paragraph.is_empty() {
            return;
        }
        let text = self.paragraph.join("\n");
        self.paragraph.clear();

        let trimmed = text.trim();
        if is_bare_url(trimmed) {
            let title = trimmed.trim_start_matches("https://").trim_start_matches("http://");
            self.document.push(Node::link_card(trimmed, title.trim_end_matches('/'), None));
        } else {
            self.document.push(Node::Paragraph { runs: parse_inline(trimmed) });
        }
    }

    fn flush_list(&mut self) {
        if !self.items.is_empty() {
            self.document.push(Node::BulletList { items: std::mem::take(&mut self.items) });
        }
    }

    fn flush_table(&mut self) {
        if self.table.is_empty() {
            return;
        }
        let mut rows = std::mem::take(&mut self.table).into_iter();
        let headers = rows.next().unwrap_or_default();
        self.document.push(Node::table(headers, rows.collect()));
    }
}

pub fn parse(input: &str) -> Document {
    let mut reader = Reader::default();
    let mut lines = input.lines();

    while let Some(line) = lines.next() {
        let trimmed = line.trim();

        if trimmed.starts_with("```") {
            reader.flush();
            let mut code = Vec::new();
            for inner in lines.by_ref() {
                if inner.trim_start().starts_with("```") {
                    break;
                }
                code.push(inner);
            }
            reader.document.push(Node::Paragraph {
                runs: vec![InlineRun::emphasized(code.join("\n"), Emphasis::Code)],
            });
            continue;
        }

        if trimmed.is_empty() {
            reader.flush();
            continue;
        }

        if let Some((level, text)) = heading(trimmed) {
            reader.flush();
            reader.document.push(Node::heading(level, text));
            continue;
        }

        if let Some((kind, text)) = status(trimmed) {
            reader.flush();
            reader.document.push(Node::status(kind, text));
            continue;
        }

        if let Some(item) = bullet(trimmed) {
            reader.flush_paragraph();
            reader.flush_table();
            reader.items.push(parse_inline(item));
            continue;
        }

        if trimmed.starts_with('|') {
            reader.flush_paragraph();
            reader.flush_list();
            let cells = table_cells(trimmed);
            if !is_separator_row(&cells) {
                reader.table.push(cells);
            }
            continue;
        }

        reader.flush_list();
        reader.flush_table();
        reader.paragraph.push(trimmed.to_owned());
    }

    reader.flush();
    reader.document
}

fn heading(line: &str) -> Option<(u8, &str)> {
    let level = line.chars().take_while(|character| *character == '#').count();
    if level == 0 || level > 6 {
        return None;
    }
    let text = line[level..].strip_prefix(' ')?;
    Some((level as u8, text.trim().trim_matches('*').trim()))
}

fn status(line: &str) -> Option<(StatusKind, &str)> {
    [("✅", StatusKind::Success), ("❌", StatusKind::Error), ("⏳", StatusKind::Processing)]
        .into_iter()
        .find_map(|(marker, kind)| line.strip_prefix(marker).map(|text| (kind, text.trim())))
}

fn bullet(line: &str) -> Option<&str> {
    for marker in ["- ", "* ", "• "] {
        if let Some(item) = line.strip_prefix(marker) {
            return Some(item.trim());
        }
    }

    let digits = line.chars().take_while(char::is_ascii_digit).count();
    if digits == 0 {
        return None;
    }
    line[digits..].strip_prefix(". ").map(str::trim)
}

fn table_cells(line: &str) -> Vec<String> {
    let inner = line.trim_start_matches('|');
    let inner = inner.strip_suffix('|').unwrap_or(inner);
    inner.split('|').map(|cell| cell.trim().to_owned()).collect()
}

fn is_separator_row(cells: &[String]) -> bool {
    !cells.is_empty()
        && cells.iter().all(|cell| {
            !cell.is_empty() && cell.chars().all(|character| matches!(character, '-' | ':' | ' '))
        })
}

fn is_bare_url(text: &str) -> bool {
    (text.starts_with("https://") || text.starts_with("http://"))
        && !text.contains(char::is_whitespace)
}

/// Splits `**bold**`, `*italic*`, `_italic_`, `` `code` `` and `[label](url)`
/// markup into runs. Unterminated markup is kept as literal text.
pub fn parse_inline(text: &str) -> Vec<InlineRun> {
    let mut runs = Vec::new();
    let mut plain = String::new();
    let mut rest = text;

    while let Some(character) = rest.chars().next() {
        let at_boundary = plain.chars().last().map_or(true, char::is_whitespace);
        let markup = match character {
            '*' if rest.starts_with("**") => delimited(rest, "**")
                .map(|(inner, len)| (InlineRun::emphasized(inner, Emphasis::Bold), len)),
            '*' | '_' if at_boundary => delimited(rest, &rest[..1])
                .map(|(inner, len)| (InlineRun::emphasized(inner, Emphasis::Italic), len)),
            '`' => delimited(rest, "`")
                .map(|(inner, len)| (InlineRun::emphasized(inner, Emphasis::Code), len)),
            '[' => link(rest),
            _ => None,
        };

        match markup {
            Some((run, len)) => {
                if !plain.is_empty() {
                    runs.push(InlineRun::plain(std::mem::take(&mut plain)));
                }
                runs.push(run);
                rest = &rest[len..];
            }
            None => {
                plain.push(character);
                rest = &rest[character.len_utf8()..];
            }
        }
    }

    if !plain.is_empty() || runs.is_empty() {
        runs.push(InlineRun::plain(plain));
    }
    runs
}

fn delimited<'a>(text: &'a str, delimiter: &str) -> Option<(&'a str, usize)> {
    let body = &text[delimiter.len()..];
    let end = body.find(delimiter)?;
    if end == 0 || body[..end].contains('\n') {
        return None;
    }
    Some((&body[..end], delimiter.len() * 2 + end))
}

fn link(text: &str) -> Option<(InlineRun, usize)> {
    let label_end = text.find("](")?;
    let label = &text[1..label_end];
    if label.contains(['[', '\n']) {
        return None;
    }
    let target = &text[label_end + 2..];
    let url_end = target.find(')')?;
    let url = &target[..url_end];
    if url.is_empty() || url.contains(char::is_whitespace) {
        return None;
    }
    Some((InlineRun::link(label, url), label_end + 2 + url_end + 1))
}

#[cfg(test)]
mod tests {
    use super::{parse, parse_inline};
    use crate::document::{Emphasis, InlineRun, Node, StatusKind};

    #[test]
    fn reads_headings_paragraphs_and_lists() {
        let doc = parse(
            "## Roadmap\nQ3 goals are below.\nSecond line.\n\n- ship search\n* fix sync\n1. write docs",
        );

        assert_eq!(
            doc.nodes(),
            &[
                Node::heading(2, "Roadmap"),
                Node::paragraph("Q3 goals are below.\nSecond line."),
                Node::bullets(["ship search", "fix sync", "write docs"]),
            ]
        );
    }

    #[test]
    fn pipe_tables_skip_the_separator_row() {
        let doc = parse("| Name | Status |\n|------|:------:|\n| Alpha | Done |\n| Beta | Open |");

        assert_eq!(
            doc.nodes(),
            &[Node::table(
                vec!["Name".to_owned(), "Status".to_owned()],
                vec![
                    vec!["Alpha".to_owned(), "Done".to_owned()],
                    vec!["Beta".to_owned(), "Open".to_owned()],
                ],
            )]
        );
    }

    #[test]
    fn status_markers_and_bare_urls_become_dedicated_nodes() {
        let doc = parse("✅ Page created\n\nhttps://www.notion.so/Roadmap-123\n\n❌ Sync failed");

        assert_eq!(
            doc.nodes(),
            &[
                Node::status(StatusKind::Success, "Page created"),
                Node::link_card(
                    "https://www.notion.so/Roadmap-123",
                    "www.notion.so/Roadmap-123",
                    None
                ),
                Node::status(StatusKind::Error, "Sync failed"),
            ]
        );
    }

    #[test]
    fn fenced_code_is_kept_verbatim() {
        let doc = parse("```\n| not | a table |\n# not a heading\n```");
        assert_eq!(
            doc.nodes(),
            &[Node::Paragraph {
                runs: vec![InlineRun::emphasized(
                    "| not | a table |\n# not a heading",
                    Emphasis::Code
                )]
            }]
        );
    }

    #[test]
    fn inline_markup_splits_into_runs() {
        assert_eq!(
            parse_inline("See **Roadmap** in [Notion](https://notion.so/x) or run `sync`"),
            vec![
                InlineRun::plain("See "),
                InlineRun::emphasized("Roadmap", Emphasis::Bold),
                InlineRun::plain(" in "),
                InlineRun::link("Notion", "https://notion.so/x"),
                InlineRun::plain(" or run "),
                InlineRun::emphasized("sync", Emphasis::Code),
            ]
        );
    }

    #[test]
    fn snake_case_and_unterminated_markup_stay_literal() {
        assert_eq!(
            parse_inline("database_id is **missing"),
            vec![InlineRun::plain("database_id is **missing")]
        );
        assert_eq!(
            parse_inline("_quick_ note"),
            vec![InlineRun::emphasized("quick", Emphasis::Italic), InlineRun::plain(" note")]
        );
    }

    #[test]
    fn empty_input_yields_empty_document() {
        assert!(parse("\n\n   \n").is_empty());
    }
}

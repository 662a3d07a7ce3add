//! Layout of a [`Document`](crate::document::Document) into bounded display
//! blocks and of those blocks into per-message batches.
//!
//! Both steps are pure and infallible: content that does not fit is
//! truncated or omitted with a visible marker, never dropped silently.

pub mod planner;
pub mod renderer;

use serde::{Deserialize, Serialize};

pub use planner::{plan, DeliveryBatch};
pub use renderer::render;

pub const TRUNCATION_SUFFIX: &str = "… …truncated";
pub const NO_CONTENT_TEXT: &str = "_no content_";

/// Structural limits of the target chat platform.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformLimits {
    pub max_text_per_block: usize,
    pub max_blocks_per_message: usize,
    pub max_blocks_per_response: usize,
    pub compact_table_column_threshold: usize,
    pub max_table_rows_displayed: usize,
    /// Nested elements (fields) a single block may carry.
    pub max_fields_per_block: usize,
}

impl Default for PlatformLimits {
    fn default() -> Self {
        Self {
            max_text_per_block: 3000,
            max_blocks_per_message: 50,
            max_blocks_per_response: 100,
            compact_table_column_threshold: 3,
            max_table_rows_displayed: 10,
            max_fields_per_block: 10,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    Section,
    Divider,
    Actions,
    Context,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LinkButton {
    pub url: String,
    pub label: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RenderedBlock {
    pub kind: BlockKind,
    pub text: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<LinkButton>,
}

impl RenderedBlock {
    pub fn section(text: impl Into<String>) -> Self {
        Self { kind: BlockKind::Section, text: text.into(), fields: Vec::new(), link: None }
    }

    pub fn context(text: impl Into<String>) -> Self {
        Self { kind: BlockKind::Context, ..Self::section(text) }
    }

    pub fn divider() -> Self {
        Self { kind: BlockKind::Divider, ..Self::section(String::new()) }
    }

    pub fn fields(fields: Vec<String>) -> Self {
        Self { fields, ..Self::section(String::new()) }
    }

    pub fn actions(text: impl Into<String>, link: LinkButton) -> Self {
        Self { kind: BlockKind::Actions, link: Some(link), ..Self::section(text) }
    }

    pub fn no_content() -> Self {
        Self::context(NO_CONTENT_TEXT)
    }

    /// Longest text payload carried by the block, in characters.
    pub fn longest_text(&self) -> usize {
        self.fields.iter().map(|field| char_len(field)).chain([char_len(&self.text)]).max().unwrap_or(0)
    }
}

pub(crate) fn char_len(text: &str) -> usize {
    text.chars().count()
}

pub(crate) fn take_chars(text: &str, count: usize) -> &str {
    match text.char_indices().nth(count) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}

/// Cuts `text` to at most `limit` characters, ending in the truncation
/// suffix when there is room for it. Returns whether anything was cut.
pub fn fit(text: &str, limit: usize) -> (String, bool) {
    if char_len(text) <= limit {
        return (text.to_owned(), false);
    }
    let suffix_len = char_len(TRUNCATION_SUFFIX);
    if limit <= suffix_len {
        return (take_chars(text, limit).to_owned(), true);
    }
    let mut kept = take_chars(text, limit - suffix_len).trim_end().to_owned();
    kept.push_str(TRUNCATION_SUFFIX);
    (kept, true)
}

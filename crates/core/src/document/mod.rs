//! Tagged-node representation of a response before it is laid out for a
//! chat platform.

pub mod markdown;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Emphasis {
    Bold,
    Italic,
    Code,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineRun {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emphasis: Option<Emphasis>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_url: Option<String>,
}

impl InlineRun {
    pub fn plain(text: impl Into<String>) -> Self {
        Self { text: text.into(), ..Self::default() }
    }

    pub fn emphasized(text: impl Into<String>, emphasis: Emphasis) -> Self {
        Self { text: text.into(), emphasis: Some(emphasis), link_url: None }
    }

    pub fn link(text: impl Into<String>, url: impl Into<String>) -> Self {
        Self { text: text.into(), emphasis: None, link_url: Some(url.into()) }
    }

    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty() && self.link_url.as_deref().map_or(true, str::is_empty)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    Processing,
    Success,
    Error,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Node {
    Heading { level: u8, text: String },
    Paragraph { runs: Vec<InlineRun> },
    BulletList { items: Vec<Vec<InlineRun>> },
    Table { headers: Vec<String>, rows: Vec<Vec<String>> },
    LinkCard { url: String, title: String, preview: Option<String> },
    StatusLine { kind: StatusKind, text: String },
}

impl Node {
    pub fn heading(level: u8, text: impl Into<String>) -> Self {
        Self::Heading { level: level.clamp(1, 6), text: text.into() }
    }

    pub fn paragraph(text: impl Into<String>) -> Self {
        Self::Paragraph { runs: vec![InlineRun::plain(text)] }
    }

    pub fn bullets<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::BulletList { items: items.into_iter().map(|item| vec![InlineRun::plain(item)]).collect() }
    }

    pub fn table(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self::Table { headers, rows }
    }

    pub fn link_card(
        url: impl Into<String>,
        title: impl Into<String>,
        preview: Option<String>,
    ) -> Self {
        Self::LinkCard { url: url.into(), title: title.into(), preview }
    }

    pub fn status(kind: StatusKind, text: impl Into<String>) -> Self {
        Self::StatusLine { kind, text: text.into() }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Heading { .. } => "heading",
            Self::Paragraph { .. } => "paragraph",
            Self::BulletList { .. } => "bullet_list",
            Self::Table { .. } => "table",
            Self::LinkCard { .. } => "link_card",
            Self::StatusLine { .. } => "status_line",
        }
    }

    /// True when the node has nothing a reader could see.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Heading { text, .. } | Self::StatusLine { text, .. } => text.trim().is_empty(),
            Self::Paragraph { runs } => runs.iter().all(InlineRun::is_blank),
            Self::BulletList { items } => items.iter().all(|item| item.iter().all(InlineRun::is_blank)),
            Self::Table { rows, .. } => rows.iter().all(|row| row.iter().all(|cell| cell.trim().is_empty())),
            Self::LinkCard { url, .. } => url.trim().is_empty(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    nodes: Vec<Node>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, node: Node) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn push(&mut self, node: Node) {
        self.nodes.push(node);
    }

    pub fn extend(&mut self, other: Document) {
        self.nodes.extend(other.nodes);
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }
}

impl FromIterator<Node> for Document {
    fn from_iter<T: IntoIterator<Item = Node>>(iter: T) -> Self {
        Self { nodes: iter.into_iter().collect() }
    }
}

#[cfg(test)]
mod tests {
    use super::{Document, InlineRun, Node, StatusKind};

    #[test]
    fn empty_nodes_are_detected_per_variant() {
        assert!(Node::heading(1, "  ").is_empty());
        assert!(Node::Paragraph { runs: vec![InlineRun::plain("")] }.is_empty());
        assert!(Node::bullets(Vec::<String>::new()).is_empty());
        assert!(Node::table(vec!["Name".to_owned()], vec![]).is_empty());
        assert!(Node::link_card("", "Roadmap", None).is_empty());

        assert!(!Node::Paragraph { runs: vec![InlineRun::link("", "https://x.io")] }.is_empty());
        assert!(!Node::status(StatusKind::Error, "boom").is_empty());
    }

    #[test]
    fn heading_level_is_clamped() {
        assert_eq!(Node::heading(9, "Deep"), Node::Heading { level: 6, text: "Deep".to_owned() });
    }

    #[test]
    fn nodes_serialize_with_type_tag() {
        let json = serde_json::to_value(Node::status(StatusKind::Success, "done")).expect("json");
        assert_eq!(json["type"], "status_line");
        assert_eq!(json["kind"], "success");
    }

    #[test]
    fn documents_collect_in_order() {
        let doc: Document = vec![Node::heading(1, "A"), Node::paragraph("b")].into_iter().collect();
        assert_eq!(doc.len(), 2);
        assert_eq!(doc.nodes()[0].kind_name(), "heading");
    }
}

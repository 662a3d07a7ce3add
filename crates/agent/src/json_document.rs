//! Conversion of gateway JSON results into documents.

use serde_json::{Map, Value};
use switchboard_core::document::{markdown, Document, Node, StatusKind};

const WRAPPER_KEYS: [&str; 4] = ["results", "data", "items", "response_data"];
const MAX_TABLE_COLUMNS: usize = 8;

pub fn document_from_json(value: &Value) -> Document {
    match value {
        Value::Null => Document::new().with(Node::status(StatusKind::Success, "Done")),
        Value::String(text) => markdown::parse(text),
        Value::Bool(_) | Value::Number(_) => Document::new().with(Node::paragraph(scalar(value))),
        Value::Array(items) => array_document(items),
        Value::Object(object) => object_document(object),
    }
}

fn object_document(object: &Map<String, Value>) -> Document {
    if let Some(inner) = WRAPPER_KEYS.iter().find_map(|key| object.get(*key)) {
        if inner.is_array() || inner.is_object() {
            return document_from_json(inner);
        }
    }

    if let Some(card) = link_card(object) {
        return Document::new().with(card);
    }

    let rows = object
        .iter()
        .filter(|(_, value)| !value.is_null())
        .map(|(key, value)| vec![key.clone(), scalar(value)])
        .collect();
    Document::new().with(Node::table(vec!["Field".to_owned(), "Value".to_owned()], rows))
}

fn array_document(items: &[Value]) -> Document {
    if items.is_empty() {
        return Document::new().with(Node::status(StatusKind::Success, "No results found."));
    }

    let objects: Vec<&Map<String, Value>> = items.iter().filter_map(Value::as_object).collect();
    if objects.len() < items.len() {
        return Document::new().with(Node::bullets(items.iter().map(scalar)));
    }

    let cards: Vec<Node> = objects.iter().filter_map(|object| link_card(object)).collect();
    if cards.len() == objects.len() {
        return cards.into_iter().collect();
    }

    let mut headers: Vec<String> = Vec::new();
    for object in &objects {
        for key in object.keys() {
            if headers.len() < MAX_TABLE_COLUMNS && !headers.contains(key) {
                headers.push(key.clone());
            }
        }
    }
    let rows = objects
        .iter()
        .map(|object| headers.iter().map(|key| object.get(key).map(scalar).unwrap_or_default()).collect())
        .collect();
    Document::new().with(Node::table(headers, rows))
}

fn link_card(object: &Map<String, Value>) -> Option<Node> {
    let url = object.get("url").and_then(Value::as_str)?;
    let title = ["title", "name"]
        .iter()
        .find_map(|key| object.get(*key).and_then(Value::as_str))
        .unwrap_or(url);
    let preview = ["description", "preview", "snippet"]
        .iter()
        .find_map(|key| object.get(*key).and_then(Value::as_str))
        .map(str::to_owned);
    Some(Node::link_card(url, title, preview))
}

fn scalar(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => number.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

//! Keyword routing of inbound messages to domain handlers.
//!
//! Routes are declared once at startup as an ordered table. The first route
//! whose patterns match the message wins, so declaration order is also the
//! tie-break order.

use serde::Serialize;

pub const GENERAL_HANDLER: &str = "general";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    /// A declared pattern matched.
    Certain,
    /// Nothing matched; the thread's previous handler was reused.
    Heuristic,
    Fallback,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct IntentDecision {
    pub handler_id: String,
    pub confidence: Confidence,
}

impl IntentDecision {
    fn new(handler_id: impl Into<String>, confidence: Confidence) -> Self {
        Self { handler_id: handler_id.into(), confidence }
    }
}

/// Per-thread routing memory owned by the caller.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConversationState {
    pub last_handler: Option<String>,
}

impl ConversationState {
    pub fn remember(&mut self, decision: &IntentDecision) {
        if decision.handler_id != GENERAL_HANDLER {
            self.last_handler = Some(decision.handler_id.clone());
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct Pattern {
    tokens: Vec<String>,
}

impl Pattern {
    fn parse(raw: &str) -> Option<Self> {
        let tokens = tokenize(raw);
        (!tokens.is_empty()).then_some(Self { tokens })
    }

    fn matches(&self, message: &[String]) -> bool {
        message.windows(self.tokens.len()).any(|window| window == self.tokens.as_slice())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Route {
    handler_id: String,
    patterns: Vec<Pattern>,
}

impl Route {
    pub fn new<I, S>(handler_id: impl Into<String>, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            handler_id: handler_id.into(),
            patterns: patterns.into_iter().filter_map(|raw| Pattern::parse(raw.as_ref())).collect(),
        }
    }

    pub fn handler_id(&self) -> &str {
        &self.handler_id
    }

    fn matches(&self, message: &[String]) -> bool {
        self.patterns.iter().any(|pattern| pattern.matches(message))
    }
}

/// Routes in declaration order: workflow automation, seller analytics, then
/// the Notion workspace.
pub fn default_routes() -> Vec<Route> {
    vec![
        Route::new(
            "workflow",
            [
                "n8n",
                "workflow",
                "workflows",
                "automation",
                "automate",
                "trigger",
                "webhook",
                "schedule",
                "execute",
                "node",
            ],
        ),
        Route::new(
            "amazon",
            [
                "research",
                "keywords",
                "competitor",
                "competitors",
                "sales",
                "trends",
                "validate",
                "asin",
                "product research",
            ],
        ),
        Route::new(
            "notion",
            [
                "notion",
                "page",
                "database",
                "workspace",
                "search",
                "find",
                "create",
                "update",
                "list",
                "show",
                "archive",
                "comment",
                "property",
                "append",
            ],
        ),
    ]
}

#[derive(Clone, Debug)]
pub struct IntentClassifier {
    routes: Vec<Route>,
}

impl Default for IntentClassifier {
    fn default() -> Self {
        Self::new(default_routes())
    }
}

impl IntentClassifier {
    pub fn new(routes: Vec<Route>) -> Self {
        Self { routes }
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn classify(&self, message: &str, state: &ConversationState) -> IntentDecision {
        let tokens = tokenize(&strip_mentions(message));

        if let Some(route) = self.routes.iter().find(|route| route.matches(&tokens)) {
            return IntentDecision::new(route.handler_id.clone(), Confidence::Certain);
        }

        let continued = state
            .last_handler
            .as_deref()
            .filter(|handler| self.routes.iter().any(|route| route.handler_id == *handler));
        match continued {
            Some(handler) => IntentDecision::new(handler, Confidence::Heuristic),
            None => IntentDecision::new(GENERAL_HANDLER, Confidence::Fallback),
        }
    }
}

/// Removes `<@U123>` style user mentions.
pub fn strip_mentions(message: &str) -> String {
    let mut output = String::with_capacity(message.len());
    let mut rest = message;
    while let Some(start) = rest.find("<@") {
        output.push_str(&rest[..start]);
        match rest[start..].find('>') {
            Some(end) => {
                output.push(' ');
                rest = &rest[start + end + 1..];
            }
            None => {
                rest = &rest[start..];
                break;
            }
        }
    }
    output.push_str(rest);
    output
}

fn tokenize(text: &str) -> Vec<String> {
    let mut sanitized = String::with_capacity(text.len());
    for character in text.chars() {
        if character.is_alphanumeric() {
            sanitized.extend(character.to_lowercase());
        } else {
            sanitized.push(' ');
        }
    }
    sanitized.split_whitespace().map(str::to_owned).collect()
}

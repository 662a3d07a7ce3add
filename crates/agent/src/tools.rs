use async_trait::async_trait;
use serde_json::Value;
use switchboard_core::errors::ServiceError;

/// Name of the resilience profile every action call is made under.
pub const ACTIONS_SERVICE: &str = "composio";

/// Remote tool-calling gateway. Implementations tag failures as transient or
/// permanent; anything they cannot classify is reported as unclassified.
#[async_trait]
pub trait ActionProvider: Send + Sync {
    async fn call(&self, action: &str, params: Value) -> Result<Value, ServiceError>;
}

/// Stand-in used when no gateway is configured; every call is rejected.
#[derive(Clone, Copy, Debug, Default)]
pub struct UnconfiguredActionProvider;

#[async_trait]
impl ActionProvider for UnconfiguredActionProvider {
    async fn call(&self, action: &str, _params: Value) -> Result<Value, ServiceError> {
        Err(ServiceError::permanent(format!(
            "no action gateway is configured, so `{action}` cannot run (set actions.base_url)"
        )))
    }
}

/// Maps a message onto one gateway action by keyword, first rule wins.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActionRule {
    pub action: &'static str,
    pub keywords: &'static [&'static str],
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActionTable {
    rules: Vec<ActionRule>,
    fallback: &'static str,
}

impl ActionTable {
    pub fn new(rules: Vec<ActionRule>, fallback: &'static str) -> Self {
        Self { rules, fallback }
    }

    pub fn select(&self, message: &str) -> &'static str {
        let lowered = message.to_lowercase();
        let words: Vec<&str> =
            lowered.split(|character: char| !character.is_alphanumeric()).collect();
        self.rules
            .iter()
            .find(|rule| rule.keywords.iter().any(|keyword| words.contains(keyword)))
            .map(|rule| rule.action)
            .unwrap_or(self.fallback)
    }

    pub fn actions(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.rules.iter().map(|rule| rule.action).chain([self.fallback])
    }
}

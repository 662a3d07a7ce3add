use serde::Serialize;
use switchboard_core::intent::{strip_mentions, ConversationState, IntentClassifier, IntentDecision};

use crate::commands::CommandResult;

#[derive(Debug, Serialize)]
struct ClassifyOutput<'a> {
    command: &'static str,
    status: &'static str,
    normalized_text: String,
    previous_handler: Option<&'a str>,
    decision: IntentDecision,
}

pub fn run(text: &str, previous_handler: Option<&str>) -> CommandResult {
    let classifier = IntentClassifier::default();
    let state = ConversationState { last_handler: previous_handler.map(str::to_owned) };
    let decision = classifier.classify(text, &state);

    let output = ClassifyOutput {
        command: "classify",
        status: "ok",
        normalized_text: strip_mentions(text),
        previous_handler,
        decision,
    };

    match serde_json::to_string(&output) {
        Ok(output) => CommandResult { exit_code: 0, output },
        Err(error) => CommandResult::failure("classify", "serialization", error.to_string(), 1),
    }
}

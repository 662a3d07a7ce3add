use secrecy::ExposeSecret;
use serde::Serialize;
use switchboard_core::config::{AppConfig, LlmProvider, LoadOptions};

use crate::commands::CommandResult;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

impl DoctorCheck {
    fn new(name: &'static str, status: CheckStatus, details: impl Into<String>) -> Self {
        Self { name, status, details: details.into() }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> CommandResult {
    let report = build_report();
    let exit_code = if report.overall_status == CheckStatus::Pass { 0 } else { 1 };

    let output = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        })
    } else {
        render_human(&report)
    };

    CommandResult { exit_code, output }
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck::new(
                "config_validation",
                CheckStatus::Pass,
                "configuration loaded and validated",
            ));
            checks.push(check_slack_tokens(&config));
            checks.push(check_llm(&config));
            checks.push(check_action_gateway(&config));
            checks.push(check_rendering_limits(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck::new("config_validation", CheckStatus::Fail, error.to_string()));
            for name in
                ["slack_token_readiness", "llm_readiness", "action_gateway", "rendering_limits"]
            {
                checks.push(DoctorCheck::new(
                    name,
                    CheckStatus::Skipped,
                    "skipped because configuration did not load",
                ));
            }
        }
    }

    let any_failed = checks.iter().any(|check| check.status == CheckStatus::Fail);
    let (overall_status, summary) = if any_failed {
        (CheckStatus::Fail, "doctor: one or more readiness checks failed")
    } else {
        (CheckStatus::Pass, "doctor: all readiness checks passed")
    };

    DoctorReport { overall_status, summary: summary.to_string(), checks }
}

fn check_slack_tokens(config: &AppConfig) -> DoctorCheck {
    let app = config.slack.app_token.expose_secret();
    let bot = config.slack.bot_token.expose_secret();
    if app.starts_with("xapp-") && bot.starts_with("xoxb-") {
        DoctorCheck::new(
            "slack_token_readiness",
            CheckStatus::Pass,
            "app token (xapp-) and bot token (xoxb-) present",
        )
    } else {
        DoctorCheck::new(
            "slack_token_readiness",
            CheckStatus::Fail,
            "expected an xapp- app token and an xoxb- bot token",
        )
    }
}

fn check_llm(config: &AppConfig) -> DoctorCheck {
    let credential = match config.llm.provider {
        LlmProvider::OpenAi => "api key configured",
        LlmProvider::Ollama => "no api key required",
    };
    DoctorCheck::new(
        "llm_readiness",
        CheckStatus::Pass,
        format!(
            "{:?} model `{}` at {} ({credential})",
            config.llm.provider,
            config.llm.model,
            config.llm.endpoint()
        ),
    )
}

fn check_action_gateway(config: &AppConfig) -> DoctorCheck {
    match &config.actions.base_url {
        Some(base_url) => DoctorCheck::new(
            "action_gateway",
            CheckStatus::Pass,
            format!(
                "gateway at {base_url} ({})",
                if config.actions.api_key.is_some() { "api key set" } else { "no api key" }
            ),
        ),
        None => DoctorCheck::new(
            "action_gateway",
            CheckStatus::Skipped,
            "actions.base_url unset; domain handlers will reply with a configuration notice",
        ),
    }
}

fn check_rendering_limits(config: &AppConfig) -> DoctorCheck {
    let limits = &config.rendering;
    let messages_per_reply = limits.max_blocks_per_response.div_ceil(limits.max_blocks_per_message);
    DoctorCheck::new(
        "rendering_limits",
        CheckStatus::Pass,
        format!(
            "{} chars per block, {} blocks per message, {} blocks per reply (up to {} messages)",
            limits.max_text_per_block,
            limits.max_blocks_per_message,
            limits.max_blocks_per_response,
            messages_per_reply
        ),
    )
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

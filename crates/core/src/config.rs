use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::render::PlatformLimits;
use crate::resilience::{BreakerConfig, RetryPolicy, ServiceProfile, ServiceRegistry};

pub const CONFIG_FILE_NAME: &str = "switchboard.toml";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub slack: SlackConfig,
    pub llm: LlmConfig,
    pub actions: ActionsConfig,
    pub server: ServerConfig,
    pub resilience: ResilienceConfig,
    pub rendering: PlatformLimits,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct SlackConfig {
    pub app_token: SecretString,
    pub bot_token: SecretString,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
}

impl LlmConfig {
    pub fn endpoint(&self) -> &str {
        match (&self.base_url, self.provider) {
            (Some(base_url), _) => base_url,
            (None, LlmProvider::OpenAi) => "https://api.openai.com/v1",
            (None, LlmProvider::Ollama) => "http://localhost:11434/v1",
        }
    }
}

/// Tool-calling gateway that executes Notion, seller-analytics and workflow
/// actions on the assistant's behalf.
#[derive(Clone, Debug)]
pub struct ActionsConfig {
    pub base_url: Option<String>,
    pub api_key: Option<SecretString>,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub health_check_port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServiceSettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_fraction: f64,
    pub backoff_multiplier: f64,
    pub failure_threshold: u32,
    pub reset_timeout_secs: u64,
    pub call_timeout_secs: u64,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
            jitter_fraction: 0.1,
            backoff_multiplier: 2.0,
            failure_threshold: 5,
            reset_timeout_secs: 60,
            call_timeout_secs: 30,
        }
    }
}

impl ServiceSettings {
    fn with_breaker(failure_threshold: u32, reset_timeout_secs: u64, call_timeout_secs: u64) -> Self {
        Self { failure_threshold, reset_timeout_secs, call_timeout_secs, ..Self::default() }
    }

    pub fn to_profile(&self) -> ServiceProfile {
        ServiceProfile::new(
            RetryPolicy::new(
                self.max_attempts,
                Duration::from_millis(self.base_delay_ms),
                Duration::from_millis(self.max_delay_ms),
            )
            .with_jitter(self.jitter_fraction)
            .with_multiplier(self.backoff_multiplier),
            BreakerConfig {
                failure_threshold: self.failure_threshold,
                reset_timeout: Duration::from_secs(self.reset_timeout_secs),
            },
            Duration::from_secs(self.call_timeout_secs),
        )
    }

    fn apply_patch(&mut self, patch: ServicePatch) {
        if let Some(max_attempts) = patch.max_attempts {
            self.max_attempts = max_attempts;
        }
        if let Some(base_delay_ms) = patch.base_delay_ms {
            self.base_delay_ms = base_delay_ms;
        }
        if let Some(max_delay_ms) = patch.max_delay_ms {
            self.max_delay_ms = max_delay_ms;
        }
        if let Some(jitter_fraction) = patch.jitter_fraction {
            self.jitter_fraction = jitter_fraction;
        }
        if let Some(backoff_multiplier) = patch.backoff_multiplier {
            self.backoff_multiplier = backoff_multiplier;
        }
        if let Some(failure_threshold) = patch.failure_threshold {
            self.failure_threshold = failure_threshold;
        }
        if let Some(reset_timeout_secs) = patch.reset_timeout_secs {
            self.reset_timeout_secs = reset_timeout_secs;
        }
        if let Some(call_timeout_secs) = patch.call_timeout_secs {
            self.call_timeout_secs = call_timeout_secs;
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ResilienceConfig {
    pub default: ServiceSettings,
    pub services: BTreeMap<String, ServiceSettings>,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        let services = [
            ("llm", ServiceSettings::with_breaker(3, 30, 120)),
            ("composio", ServiceSettings::with_breaker(5, 60, 60)),
            ("slack", ServiceSettings::with_breaker(5, 30, 30)),
        ]
        .into_iter()
        .map(|(name, settings)| (name.to_string(), settings))
        .collect();
        Self { default: ServiceSettings::default(), services }
    }
}

impl ResilienceConfig {
    pub fn settings_for(&self, service: &str) -> &ServiceSettings {
        self.services.get(service).unwrap_or(&self.default)
    }

    pub fn registry(&self) -> ServiceRegistry {
        self.services.iter().fold(
            ServiceRegistry::new(self.default.to_profile()),
            |registry, (name, settings)| registry.with_profile(name.clone(), settings.to_profile()),
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    #[serde(rename = "openai")]
    OpenAi,
    Ollama,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub log_level: Option<String>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub slack_app_token: Option<String>,
    pub slack_bot_token: Option<String>,
    pub actions_base_url: Option<String>,
    pub max_text_per_block: Option<usize>,
    pub max_blocks_per_message: Option<usize>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            slack: SlackConfig {
                app_token: secret_value(String::new()),
                bot_token: secret_value(String::new()),
            },
            llm: LlmConfig {
                provider: LlmProvider::OpenAi,
                api_key: None,
                base_url: None,
                model: "gpt-4o-mini".to_string(),
                timeout_secs: 120,
            },
            actions: ActionsConfig { base_url: None, api_key: None },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                health_check_port: 8080,
                graceful_shutdown_secs: 15,
            },
            resilience: ResilienceConfig::default(),
            rendering: PlatformLimits::default(),
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected openai|ollama)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(slack) = patch.slack {
            if let Some(app_token) = slack.app_token {
                self.slack.app_token = secret_value(app_token);
            }
            if let Some(bot_token) = slack.bot_token {
                self.slack.bot_token = secret_value(bot_token);
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(api_key) = llm.api_key {
                self.llm.api_key = Some(secret_value(api_key));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
        }

        if let Some(actions) = patch.actions {
            if let Some(base_url) = actions.base_url {
                self.actions.base_url = Some(base_url);
            }
            if let Some(api_key) = actions.api_key {
                self.actions.api_key = Some(secret_value(api_key));
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(health_check_port) = server.health_check_port {
                self.server.health_check_port = health_check_port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(resilience) = patch.resilience {
            if let Some(default) = resilience.default {
                self.resilience.default.apply_patch(default);
            }
            for (name, service) in resilience.services {
                let base = self
                    .resilience
                    .services
                    .get(&name)
                    .copied()
                    .unwrap_or(self.resilience.default);
                let settings = self.resilience.services.entry(name).or_insert(base);
                settings.apply_patch(service);
            }
        }

        if let Some(rendering) = patch.rendering {
            let limits = &mut self.rendering;
            if let Some(value) = rendering.max_text_per_block {
                limits.max_text_per_block = value;
            }
            if let Some(value) = rendering.max_blocks_per_message {
                limits.max_blocks_per_message = value;
            }
            if let Some(value) = rendering.max_blocks_per_response {
                limits.max_blocks_per_response = value;
            }
            if let Some(value) = rendering.compact_table_column_threshold {
                limits.compact_table_column_threshold = value;
            }
            if let Some(value) = rendering.max_table_rows_displayed {
                limits.max_table_rows_displayed = value;
            }
            if let Some(value) = rendering.max_fields_per_block {
                limits.max_fields_per_block = value;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("SWITCHBOARD_SLACK_APP_TOKEN") {
            self.slack.app_token = secret_value(value);
        }
        if let Some(value) = read_env("SWITCHBOARD_SLACK_BOT_TOKEN") {
            self.slack.bot_token = secret_value(value);
        }

        if let Some(value) = read_env("SWITCHBOARD_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        if let Some(value) = read_env("SWITCHBOARD_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("SWITCHBOARD_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("SWITCHBOARD_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("SWITCHBOARD_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("SWITCHBOARD_LLM_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("SWITCHBOARD_ACTIONS_BASE_URL") {
            self.actions.base_url = Some(value);
        }
        if let Some(value) = read_env("SWITCHBOARD_ACTIONS_API_KEY") {
            self.actions.api_key = Some(secret_value(value));
        }

        if let Some(value) = read_env("SWITCHBOARD_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("SWITCHBOARD_SERVER_HEALTH_CHECK_PORT") {
            self.server.health_check_port =
                parse_u16("SWITCHBOARD_SERVER_HEALTH_CHECK_PORT", &value)?;
        }
        if let Some(value) = read_env("SWITCHBOARD_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("SWITCHBOARD_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("SWITCHBOARD_RESILIENCE_MAX_ATTEMPTS") {
            self.resilience.default.max_attempts =
                parse_u32("SWITCHBOARD_RESILIENCE_MAX_ATTEMPTS", &value)?;
        }
        if let Some(value) = read_env("SWITCHBOARD_RESILIENCE_FAILURE_THRESHOLD") {
            self.resilience.default.failure_threshold =
                parse_u32("SWITCHBOARD_RESILIENCE_FAILURE_THRESHOLD", &value)?;
        }

        if let Some(value) = read_env("SWITCHBOARD_RENDERING_MAX_TEXT_PER_BLOCK") {
            self.rendering.max_text_per_block =
                parse_usize("SWITCHBOARD_RENDERING_MAX_TEXT_PER_BLOCK", &value)?;
        }
        if let Some(value) = read_env("SWITCHBOARD_RENDERING_MAX_BLOCKS_PER_MESSAGE") {
            self.rendering.max_blocks_per_message =
                parse_usize("SWITCHBOARD_RENDERING_MAX_BLOCKS_PER_MESSAGE", &value)?;
        }
        if let Some(value) = read_env("SWITCHBOARD_RENDERING_MAX_BLOCKS_PER_RESPONSE") {
            self.rendering.max_blocks_per_response =
                parse_usize("SWITCHBOARD_RENDERING_MAX_BLOCKS_PER_RESPONSE", &value)?;
        }

        let log_level =
            read_env("SWITCHBOARD_LOGGING_LEVEL").or_else(|| read_env("SWITCHBOARD_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("SWITCHBOARD_LOGGING_FORMAT").or_else(|| read_env("SWITCHBOARD_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(llm_provider) = overrides.llm_provider {
            self.llm.provider = llm_provider;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(slack_app_token) = overrides.slack_app_token {
            self.slack.app_token = secret_value(slack_app_token);
        }
        if let Some(slack_bot_token) = overrides.slack_bot_token {
            self.slack.bot_token = secret_value(slack_bot_token);
        }
        if let Some(actions_base_url) = overrides.actions_base_url {
            self.actions.base_url = Some(actions_base_url);
        }
        if let Some(max_text_per_block) = overrides.max_text_per_block {
            self.rendering.max_text_per_block = max_text_per_block;
        }
        if let Some(max_blocks_per_message) = overrides.max_blocks_per_message {
            self.rendering.max_blocks_per_message = max_blocks_per_message;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_slack(&self.slack)?;
        validate_llm(&self.llm)?;
        validate_actions(&self.actions)?;
        validate_server(&self.server)?;
        validate_resilience(&self.resilience)?;
        validate_rendering(&self.rendering)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

pub fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from(CONFIG_FILE_NAME), Path::new("config").join(CONFIG_FILE_NAME)]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_slack(slack: &SlackConfig) -> Result<(), ConfigError> {
    let app_token = slack.app_token.expose_secret();
    if app_token.is_empty() {
        return Err(ConfigError::Validation(
            "slack.app_token is required. Get it from https://api.slack.com/apps > Your App > Basic Information > App-Level Tokens".to_string()
        ));
    }
    if !app_token.starts_with("xapp-") {
        let hint = if app_token.starts_with("xoxb-") {
            " (hint: you may have used the bot token instead of the app token)"
        } else {
            ""
        };
        return Err(ConfigError::Validation(format!(
            "slack.app_token must start with `xapp-`{hint}. Get it from https://api.slack.com/apps"
        )));
    }

    let bot_token = slack.bot_token.expose_secret();
    if bot_token.is_empty() {
        return Err(ConfigError::Validation(
            "slack.bot_token is required. Get it from https://api.slack.com/apps > Your App > OAuth & Permissions > Bot User OAuth Token".to_string()
        ));
    }
    if !bot_token.starts_with("xoxb-") {
        let hint = if bot_token.starts_with("xapp-") {
            " (hint: you may have used the app token instead of the bot token)"
        } else {
            ""
        };
        return Err(ConfigError::Validation(format!(
            "slack.bot_token must start with `xoxb-`{hint}. Get it from https://api.slack.com/apps"
        )));
    }

    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }
    if llm.model.trim().is_empty() {
        return Err(ConfigError::Validation("llm.model must not be empty".to_string()));
    }

    match llm.provider {
        LlmProvider::OpenAi => {
            let missing = llm
                .api_key
                .as_ref()
                .map(|value| value.expose_secret().trim().is_empty())
                .unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.api_key is required for the openai provider".to_string(),
                ));
            }
        }
        LlmProvider::Ollama => {
            let missing =
                llm.base_url.as_ref().map(|value| value.trim().is_empty()).unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.base_url is required for the ollama provider".to_string(),
                ));
            }
        }
    }

    validate_http_url("llm.base_url", llm.base_url.as_deref())
}

fn validate_actions(actions: &ActionsConfig) -> Result<(), ConfigError> {
    validate_http_url("actions.base_url", actions.base_url.as_deref())
}

fn validate_http_url(field: &str, value: Option<&str>) -> Result<(), ConfigError> {
    match value {
        Some(url) if !url.starts_with("http://") && !url.starts_with("https://") => Err(
            ConfigError::Validation(format!("{field} must start with http:// or https://")),
        ),
        _ => Ok(()),
    }
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.health_check_port == 0 {
        return Err(ConfigError::Validation(
            "server.health_check_port must be greater than zero".to_string(),
        ));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_resilience(resilience: &ResilienceConfig) -> Result<(), ConfigError> {
    validate_service("resilience.default", &resilience.default)?;
    for (name, settings) in &resilience.services {
        validate_service(&format!("resilience.services.{name}"), settings)?;
    }
    Ok(())
}

fn validate_service(scope: &str, settings: &ServiceSettings) -> Result<(), ConfigError> {
    let problem = if settings.max_attempts == 0 {
        Some("max_attempts must be at least 1")
    } else if settings.max_delay_ms < settings.base_delay_ms {
        Some("max_delay_ms must be greater than or equal to base_delay_ms")
    } else if !(0.0..=1.0).contains(&settings.jitter_fraction) {
        Some("jitter_fraction must be in range 0.0..=1.0")
    } else if settings.backoff_multiplier.is_nan() || settings.backoff_multiplier < 2.0 {
        Some("backoff_multiplier must be at least 2.0")
    } else if settings.failure_threshold == 0 {
        Some("failure_threshold must be at least 1")
    } else if settings.reset_timeout_secs == 0 {
        Some("reset_timeout_secs must be greater than zero")
    } else if settings.call_timeout_secs == 0 {
        Some("call_timeout_secs must be greater than zero")
    } else {
        None
    };

    match problem {
        Some(problem) => Err(ConfigError::Validation(format!("{scope}.{problem}"))),
        None => Ok(()),
    }
}

fn validate_rendering(limits: &PlatformLimits) -> Result<(), ConfigError> {
    let problem = if limits.max_text_per_block < 32 {
        Some("max_text_per_block must be at least 32")
    } else if limits.max_blocks_per_message < 2 {
        Some("max_blocks_per_message must be at least 2")
    } else if limits.max_blocks_per_response < limits.max_blocks_per_message {
        Some("max_blocks_per_response must be greater than or equal to max_blocks_per_message")
    } else if limits.max_table_rows_displayed == 0 {
        Some("max_table_rows_displayed must be at least 1")
    } else if limits.max_fields_per_block < 2 {
        Some("max_fields_per_block must be at least 2")
    } else if limits.compact_table_column_threshold > limits.max_fields_per_block {
        Some("compact_table_column_threshold must not exceed max_fields_per_block")
    } else {
        None
    };

    match problem {
        Some(problem) => Err(ConfigError::Validation(format!("rendering.{problem}"))),
        None => Ok(()),
    }
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn invalid_override(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() }
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| invalid_override(key, value))
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| invalid_override(key, value))
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| invalid_override(key, value))
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.parse::<usize>().map_err(|_| invalid_override(key, value))
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    slack: Option<SlackPatch>,
    llm: Option<LlmPatch>,
    actions: Option<ActionsPatch>,
    server: Option<ServerPatch>,
    resilience: Option<ResiliencePatch>,
    rendering: Option<RenderingPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct SlackPatch {
    app_token: Option<String>,
    bot_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ActionsPatch {
    base_url: Option<String>,
    api_key: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    health_check_port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ResiliencePatch {
    default: Option<ServicePatch>,
    #[serde(default)]
    services: BTreeMap<String, ServicePatch>,
}

#[derive(Debug, Default, Deserialize)]
struct ServicePatch {
    max_attempts: Option<u32>,
    base_delay_ms: Option<u64>,
    max_delay_ms: Option<u64>,
    jitter_fraction: Option<f64>,
    backoff_multiplier: Option<f64>,
    failure_threshold: Option<u32>,
    reset_timeout_secs: Option<u64>,
    call_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct RenderingPatch {
    max_text_per_block: Option<usize>,
    max_blocks_per_message: Option<usize>,
    max_blocks_per_response: Option<usize>,
    compact_table_column_threshold: Option<usize>,
    max_table_rows_displayed: Option<usize>,
    max_fields_per_block: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

use std::sync::Arc;
use std::time::Duration;

use switchboard_agent::runtime::AssistantRuntime;
use switchboard_agent::tools::{ActionProvider, UnconfiguredActionProvider};
use switchboard_core::config::{AppConfig, ConfigError};
use switchboard_core::resilience::{HealthRegistry, ResilientInvoker};
use switchboard_slack::commands::CommandRouter;
use switchboard_slack::events::assistant_dispatcher;
use switchboard_slack::outbox::Outbox;
use switchboard_slack::socket::SocketModeRunner;
use thiserror::Error;
use tracing::info;

use crate::providers::{HttpActionProvider, HttpTextGenerator, SlackWebApiSink};

pub struct Application {
    pub config: AppConfig,
    pub invoker: Arc<ResilientInvoker>,
    pub runtime: Arc<AssistantRuntime>,
    pub slack_runner: SocketModeRunner,
}

impl Application {
    pub fn health(&self) -> HealthRegistry {
        self.invoker.health()
    }
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("http client construction failed: {0}")]
    HttpClient(#[source] reqwest::Error),
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );
    config.validate()?;

    let client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()
        .map_err(BootstrapError::HttpClient)?;
    let invoker = Arc::new(ResilientInvoker::new(Arc::new(config.resilience.registry())));

    let provider: Arc<dyn ActionProvider> = match &config.actions.base_url {
        Some(base_url) => Arc::new(HttpActionProvider::new(
            client.clone(),
            base_url.as_str(),
            config.actions.api_key.clone(),
        )),
        None => Arc::new(UnconfiguredActionProvider),
    };
    let generator = HttpTextGenerator::new(
        client.clone(),
        config.llm.endpoint(),
        config.llm.model.as_str(),
        config.llm.api_key.clone(),
    )
    .with_request_timeout(Duration::from_secs(config.llm.timeout_secs));
    info!(
        event_name = "system.bootstrap.providers_ready",
        correlation_id = "bootstrap",
        actions_configured = config.actions.base_url.is_some(),
        llm_endpoint = config.llm.endpoint(),
        "external providers configured"
    );

    let runtime = Arc::new(AssistantRuntime::standard(
        provider,
        Arc::new(generator),
        Arc::clone(&invoker),
        config.rendering,
    ));
    let dispatcher = assistant_dispatcher(
        Arc::clone(&runtime),
        CommandRouter::new(invoker.health(), config.rendering),
    );
    let sink = SlackWebApiSink::new(client, config.slack.bot_token.clone(), Arc::clone(&invoker));
    let slack_runner =
        SocketModeRunner::without_transport(dispatcher, Arc::new(Outbox::new(Arc::new(sink))));

    Ok(Application { config, invoker, runtime, slack_runner })
}

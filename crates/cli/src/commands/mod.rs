//! CLI subcommands and the shared runtime assembly.

pub mod ask;
pub mod doctor;
pub mod serve;

use anyhow::Context;
use hearthclaw_agent::ToolLoop;
use hearthclaw_config::AppConfig;
use hearthclaw_core::event::EventBus;
use hearthclaw_core::session::SessionResolver;
use hearthclaw_core::tool::ToolCatalog;
use hearthclaw_pipeline::{
    DeliveryWorker, Engine, InboundJob, IndexWorker, LoggingIndexer, QueueReplySink,
};
use hearthclaw_plugins::{PluginGateway, PluginRegistry, RoutePluginTool};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const SYSTEM_PROMPT: &str = "You are Hearthclaw, a personal assistant. Use your tools when they \
     help; route requests to plugins when a registered plugin fits better. Answer plainly.";

/// The assembled pipeline: engine, workers, and the inbound entrance.
pub struct Runtime {
    pub inbound_tx: mpsc::Sender<InboundJob>,
    pub sync_reply_timeout: Duration,
}

/// Load the plugin registry named by the config, or an empty one.
pub fn load_registry(config: &AppConfig) -> anyhow::Result<Arc<PluginRegistry>> {
    let registry = match &config.plugins.manifest_path {
        Some(path) => PluginRegistry::from_manifest_file(path)
            .with_context(|| format!("loading plugin manifest {}", path.display()))?,
        None => PluginRegistry::new(),
    };
    Ok(Arc::new(registry))
}

/// Build the engine and spawn the three queue workers.
pub fn build_runtime(config: &AppConfig) -> anyhow::Result<Runtime> {
    let provider = hearthclaw_providers::build_provider(config).context("building provider")?;
    let registry = load_registry(config)?;
    let event_bus = Arc::new(EventBus::default());

    let capacity = config.pipeline.queue_capacity;
    let (inbound_tx, inbound_rx) = mpsc::channel(capacity);
    let (outbound_tx, outbound_rx) = mpsc::channel(capacity);
    let (index_tx, index_rx) = mpsc::channel(capacity);

    let gateway = Arc::new(
        PluginGateway::new(registry, &config.plugins)
            .with_profiles(config.profiles.clone())
            .with_post_processor(provider.clone(), config.default_model.clone()),
    );

    let mut catalog = ToolCatalog::new();
    catalog
        .register(Box::new(RoutePluginTool::new(
            gateway.clone(),
            Arc::new(QueueReplySink::new(outbound_tx.clone())),
        )))
        .context("registering routing tool")?;

    let tool_loop = ToolLoop::new(
        provider,
        config.default_model.clone(),
        Arc::new(catalog),
        &config.agent,
        event_bus.clone(),
    )
    .with_temperature(config.default_temperature);

    let resolver = Arc::new(SessionResolver::new(
        config.session.scope,
        &config.session.identity_links,
    ));

    let engine = Arc::new(
        Engine::new(
            tool_loop,
            gateway,
            resolver,
            config.pipeline.allowed_users.clone(),
            outbound_tx,
            index_tx,
            event_bus.clone(),
        )
        .with_system_prompt(SYSTEM_PROMPT),
    );

    tokio::spawn(async move { engine.run(inbound_rx).await });
    tokio::spawn(
        DeliveryWorker::new(
            Duration::from_secs(config.pipeline.delivery_timeout_secs),
            event_bus,
        )
        .run(outbound_rx),
    );
    tokio::spawn(IndexWorker::new(Arc::new(LoggingIndexer)).run(index_rx));

    Ok(Runtime {
        inbound_tx,
        sync_reply_timeout: Duration::from_secs(config.pipeline.sync_reply_timeout_secs),
    })
}

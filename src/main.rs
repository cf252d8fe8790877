//! workspace-agent - command-line entry point.
//!
//! Runs one request against the configured workspace and prints every event as a
//! JSON line on stdout.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use workspace_agent::{
    config::Config,
    llm::OllamaGateway,
    task::{TaskManager, TaskStatus},
    Orchestrator, PolicyEngine, TaskEvent, ToolRegistry,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so stdout carries only events
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "workspace_agent=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let request = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    if request.trim().is_empty() {
        anyhow::bail!("usage: workspace-agent \"<request>\"");
    }

    let config = Config::from_env()?;
    let workspace = config.workspace_path.canonicalize().with_context(|| {
        format!(
            "workspace {} is not accessible",
            config.workspace_path.display()
        )
    })?;
    info!(
        "Loaded configuration: model={}, workspace={}, strict_mode={}",
        config.model.model,
        workspace.display(),
        config.policy.strict_mode
    );

    let tools = Arc::new(ToolRegistry::with_defaults());
    let gateway = OllamaGateway::new(&config.model, &tools.system_prompt_section());
    match gateway.check_model_available().await {
        Ok(true) => {}
        Ok(false) => warn!("Model {} is not pulled on the server", gateway.model()),
        Err(e) => warn!("Could not reach Ollama at {}: {}", config.model.host, e),
    }

    let orchestrator = Orchestrator::new(
        Arc::new(gateway),
        tools,
        Arc::new(PolicyEngine::new(config.policy.clone())),
        config.limits.clone(),
    )
    .with_model_timeout(config.model.timeout);
    let manager = TaskManager::new(orchestrator);

    let task = manager.create_task(None, request, workspace).await?;
    let mut events = manager.execute_task(task.id()).await?;

    while let Some(event) = events.recv().await {
        println!("{}", serde_json::to_string(&event)?);
        if let TaskEvent::TaskFailed { error, .. } = &event {
            warn!("Task {} failed: {}", task.id(), error);
        }
    }

    let status = manager
        .get_task(task.id())
        .await
        .map(|record| record.status())
        .context("task disappeared from the registry")?;
    if status != TaskStatus::Completed {
        anyhow::bail!("task {} ended as {}", task.id(), status);
    }
    Ok(())
}

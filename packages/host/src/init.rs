//! Runtime initialization for the jobflow host.

use std::error::Error;
use std::path::Path;
use std::sync::Arc;

use actors::{FlowClient, FlowStore, SupervisorArgs, start_supervisor};
use broker::{SurrealBroker, SurrealConfig};
use jobflow_core::{FlowConfig, RuntimeSettings};
use library::ScriptLibrary;

/// Load a flow from a JSON file, or by name from the flow store.
///
/// Flows loaded from a file are saved to the store under the file stem so
/// later runs can refer to them by name.
pub async fn load_flow(source: &str) -> Result<FlowConfig, Box<dyn Error>> {
    let store = match std::env::var("JOBFLOW_FLOW_DIR") {
        Ok(dir) if !dir.trim().is_empty() => FlowStore::new(dir.trim()),
        _ => FlowStore::default_dir(),
    };

    let path = Path::new(source);
    if tokio::fs::try_exists(path).await? {
        let flow = FlowConfig::from_json_str(&tokio::fs::read_to_string(path).await?)?;
        if let Some(name) = path.file_stem().and_then(|s| s.to_str())
            && let Err(e) = store.save(name, &flow).await
        {
            tracing::warn!("Could not save flow {}: {}", name, e);
        }
        return Ok(flow);
    }

    match store.load(source).await? {
        Some(flow) => Ok(flow),
        None => Err(format!("No flow file or saved flow named {}", source).into()),
    }
}

/// Broker settings from the environment.
///
/// - `JOBFLOW_DB_NAMESPACE` / `JOBFLOW_DB_DATABASE`
/// - `JOBFLOW_DB_USER` and `JOBFLOW_DB_PASS` for root sign-in
fn broker_config() -> SurrealConfig {
    let mut config = SurrealConfig::default();
    if let Ok(namespace) = std::env::var("JOBFLOW_DB_NAMESPACE") {
        config = config.with_namespace(namespace);
    }
    if let Ok(database) = std::env::var("JOBFLOW_DB_DATABASE") {
        config = config.with_database(database);
    }
    if let (Ok(user), Ok(pass)) = (
        std::env::var("JOBFLOW_DB_USER"),
        std::env::var("JOBFLOW_DB_PASS"),
    ) {
        config = config.with_credentials(user, pass);
    }
    config
}

/// Start the supervisor and deploy `flow`.
pub async fn init_runtime(flow: FlowConfig) -> Result<FlowClient, Box<dyn Error>> {
    tracing::info!("Initializing jobflow runtime...");

    let settings = RuntimeSettings::from_env()?;
    let broker = Arc::new(SurrealBroker::new(broker_config()));

    let mut args = SupervisorArgs::new(broker).with_settings(settings);
    if flow.consumers.iter().any(|c| c.library.is_some()) {
        let library = ScriptLibrary::from_env().await?;
        tracing::info!("Function library backend: {}", library.kind().as_str());
        args = args.with_library(library);
    }

    let (supervisor, _handle) = start_supervisor(args).await?;
    let flows = FlowClient::new(supervisor);
    flows.deploy(flow).await?;

    tracing::info!("Flow deployed: {}", flows.nodes().await?.join(", "));
    Ok(flows)
}

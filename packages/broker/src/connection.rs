//! Broker connections to SurrealDB.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use jobflow_core::QueueEndpoint;
use surrealdb::Surreal;
use surrealdb::engine::any::{Any, connect};
use surrealdb::opt::auth::Root;
use tokio::sync::Mutex;

use crate::queue::SurrealQueue;
use crate::schema::init_schema;
use crate::{Broker, BrokerError, BrokerFuture, QueueRef};

/// Broker configuration.
#[derive(Debug, Clone)]
pub struct SurrealConfig {
    /// Namespace to use
    pub namespace: String,
    /// Database name to use
    pub database: String,
    /// Optional root credentials for authentication
    pub credentials: Option<(String, String)>,
    /// Jobs processed in parallel per `process` call.
    pub concurrency: usize,
    /// Delay between polls when a queue is empty.
    pub poll_interval: Duration,
    /// Deliveries before a failing job is archived as failed.
    pub max_attempts: u32,
}

impl Default for SurrealConfig {
    fn default() -> Self {
        Self {
            namespace: "jobflow".to_string(),
            database: "queues".to_string(),
            credentials: None,
            concurrency: 1,
            poll_interval: Duration::from_millis(100),
            max_attempts: 1,
        }
    }
}

impl SurrealConfig {
    /// Set the namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Set the database name.
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Set root credentials for authentication.
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }

    /// Set the per-handle processing concurrency (at least 1).
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Set the idle poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set how many deliveries a failing job gets (at least 1).
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Connection URL for an endpoint.
    ///
    /// An empty address or `memory` selects the embedded in-memory engine;
    /// anything else is a WebSocket server (requires the `remote` feature).
    pub fn url_for(endpoint: &QueueEndpoint) -> String {
        match endpoint.address.as_str() {
            "" | "memory" | "mem" => "mem://".to_string(),
            address => format!("ws://{}:{}", address, endpoint.port),
        }
    }
}

/// A [`Broker`] storing queues in SurrealDB.
///
/// Connections are shared per URL, so every endpoint on the same server (and
/// every in-memory endpoint of one broker) sees the same job tables.
#[derive(Clone)]
pub struct SurrealBroker {
    config: SurrealConfig,
    connections: Arc<Mutex<HashMap<String, Surreal<Any>>>>,
}

impl SurrealBroker {
    pub fn new(config: SurrealConfig) -> Self {
        Self {
            config,
            connections: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &SurrealConfig {
        &self.config
    }

    /// Get or open the database connection for `url`.
    async fn database(&self, url: &str) -> Result<Surreal<Any>, BrokerError> {
        let mut connections = self.connections.lock().await;
        if let Some(db) = connections.get(url) {
            return Ok(db.clone());
        }

        tracing::info!("Connecting to broker database: {}", url);

        let db = connect(url)
            .await
            .map_err(|e| BrokerError::Connection(format!("{}: {}", url, e)))?;

        // Authenticate if credentials provided
        if let Some((username, password)) = &self.config.credentials {
            db.signin(Root { username, password }).await?;
        }

        db.use_ns(&self.config.namespace)
            .use_db(&self.config.database)
            .await?;
        init_schema(&db).await?;

        tracing::info!(
            "Connected to broker database: {}/{}",
            self.config.namespace,
            self.config.database
        );

        connections.insert(url.to_string(), db.clone());
        Ok(db)
    }

    /// Open the queue described by `endpoint` as a concrete handle.
    pub async fn open(&self, endpoint: &QueueEndpoint) -> Result<SurrealQueue, BrokerError> {
        let url = SurrealConfig::url_for(endpoint);
        let db = self.database(&url).await?;
        Ok(SurrealQueue::new(
            endpoint.name.clone(),
            db,
            self.config.clone(),
        ))
    }
}

impl Default for SurrealBroker {
    fn default() -> Self {
        Self::new(SurrealConfig::default())
    }
}

impl Broker for SurrealBroker {
    fn connect(&self, endpoint: &QueueEndpoint) -> BrokerFuture<QueueRef> {
        let broker = self.clone();
        let endpoint = endpoint.clone();
        Box::pin(async move {
            let queue = broker.open(&endpoint).await?;
            Ok(Arc::new(queue) as QueueRef)
        })
    }
}

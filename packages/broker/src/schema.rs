//! Database schema definitions using SurrealQL.

use surrealdb::Surreal;
use surrealdb::engine::any::Any;

use crate::BrokerError;

/// Initialize the queue schema.
///
/// This creates the job tables and their indexes. Safe to run repeatedly.
pub async fn init_schema(db: &Surreal<Any>) -> Result<(), BrokerError> {
    tracing::debug!("Initializing queue schema...");

    db.query(JOB_SCHEMA).await?.check()?;
    db.query(JOB_HISTORY_SCHEMA).await?.check()?;

    Ok(())
}

/// Job table schema. Payloads are open records, so the table is schemaless.
const JOB_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS job SCHEMALESS;

-- Polling for the oldest waiting job of a queue
DEFINE INDEX IF NOT EXISTS job_queue_status ON job FIELDS queue, status;
"#;

/// Finished jobs, kept for auditing.
const JOB_HISTORY_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS job_history SCHEMALESS;

DEFINE INDEX IF NOT EXISTS history_queue ON job_history FIELDS queue;
DEFINE INDEX IF NOT EXISTS history_status ON job_history FIELDS final_status;
"#;

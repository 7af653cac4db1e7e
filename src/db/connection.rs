use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use surrealdb::engine::any::Any;
use surrealdb::opt::auth::Root;
use surrealdb::Surreal;
use tracing::debug;

pub type Db = Surreal<Any>;

/// Root credentials for a remote task store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Where the task store lives. `memory` keeps it inside the process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub namespace: String,
    pub database: String,
    pub credentials: Option<Credentials>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "memory".to_string(),
            namespace: "calc".to_string(),
            database: "orchestrator".to_string(),
            credentials: None,
        }
    }
}

impl DatabaseConfig {
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// `url`, with namespace, database and credentials taken from the
    /// `SURREALDB_*` variables when set.
    pub fn from_env(url: impl Into<String>) -> Self {
        let defaults = Self::with_url(url);
        let credentials = match (env::var("SURREALDB_USERNAME"), env::var("SURREALDB_PASSWORD")) {
            (Ok(username), Ok(password)) => Some(Credentials { username, password }),
            _ => None,
        };

        Self {
            namespace: env::var("SURREALDB_NAMESPACE").unwrap_or(defaults.namespace),
            database: env::var("SURREALDB_DATABASE").unwrap_or(defaults.database),
            credentials,
            url: defaults.url,
        }
    }
}

pub async fn create_connection(config: DatabaseConfig) -> Result<Db> {
    debug!(
        "Connecting to task store at {} ({}/{})",
        config.url, config.namespace, config.database
    );
    let db = surrealdb::engine::any::connect(config.url.clone())
        .await
        .with_context(|| format!("connecting to {}", config.url))?;

    if let Some(credentials) = &config.credentials {
        db.signin(Root {
            username: &credentials.username,
            password: &credentials.password,
        })
        .await
        .context("signing in to the task store")?;
    }

    db.use_ns(config.namespace).use_db(config.database).await?;
    Ok(db)
}

/// Define the task and operation tables. Safe to run on every start.
pub async fn ensure_schema(db: &Db) -> Result<()> {
    let schema_queries = [
        // Submitted expressions and their lifecycle
        "DEFINE TABLE IF NOT EXISTS task SCHEMALESS;
         DEFINE FIELD IF NOT EXISTS expression ON TABLE task TYPE string;
         DEFINE FIELD IF NOT EXISTS hash_id ON TABLE task TYPE string;
         DEFINE FIELD IF NOT EXISTS status ON TABLE task TYPE string;
         DEFINE FIELD IF NOT EXISTS result ON TABLE task TYPE string DEFAULT '';
         DEFINE FIELD IF NOT EXISTS begin_time ON TABLE task TYPE datetime;
         DEFINE FIELD IF NOT EXISTS end_time ON TABLE task TYPE option<datetime>;",

        // Simulated per-operator cost, one row per operator
        "DEFINE TABLE IF NOT EXISTS operation SCHEMALESS;
         DEFINE FIELD IF NOT EXISTS operation ON TABLE operation TYPE string;
         DEFINE FIELD IF NOT EXISTS seconds ON TABLE operation TYPE int;",

        "DEFINE INDEX IF NOT EXISTS task_expression ON TABLE task COLUMNS expression;
         DEFINE INDEX IF NOT EXISTS task_status ON TABLE task COLUMNS status, begin_time;",
    ];

    for query in schema_queries {
        db.query(query).await?.check()?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_url_keeps_defaults() {
        let config = DatabaseConfig::with_url("rocksdb://tasks.db");
        assert_eq!(config.url, "rocksdb://tasks.db");
        assert_eq!(config.namespace, "calc");
        assert_eq!(config.database, "orchestrator");
        assert!(config.credentials.is_none());
    }

    #[tokio::test]
    async fn test_schema_is_idempotent() {
        let db = create_connection(DatabaseConfig::default()).await.unwrap();
        ensure_schema(&db).await.unwrap();
        ensure_schema(&db).await.unwrap();
    }
}

//! PostgreSQL target store.
//!
//! Uses deadpool-postgres for connection pooling and the binary COPY protocol
//! for loading. Every COPY runs in its own transaction.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::NaiveDateTime;
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use futures::SinkExt;
use tokio_postgres::Config as PgConfig;
use tracing::{debug, info, warn};

use super::tls::SslMode;
use super::TargetStore;
use crate::config::TargetConfig;
use crate::error::{MigrateError, Result};

/// Connection pool timeout.
const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// PostgreSQL target store.
pub struct PgTargetStore {
    pool: Pool,
    schema: String,
}

impl PgTargetStore {
    /// Build the pool and verify one connection.
    pub async fn connect(config: &TargetConfig) -> Result<Self> {
        let mut pg_config = PgConfig::new();
        pg_config.host(&config.host);
        pg_config.port(config.port);
        pg_config.dbname(&config.database);
        pg_config.user(&config.user);
        pg_config.password(&config.password);
        pg_config.application_name("bulk-migrate");
        pg_config.keepalives(true);
        pg_config.keepalives_idle(Duration::from_secs(30));
        pg_config.connect_timeout(POOL_CONNECTION_TIMEOUT);

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };

        let mgr = match SslMode::parse(&config.ssl_mode)?.connector()? {
            Some(tls) => Manager::from_config(pg_config, tls, mgr_config),
            None => {
                warn!("PostgreSQL TLS is disabled. Credentials will be transmitted in plaintext.");
                Manager::from_config(pg_config, tokio_postgres::NoTls, mgr_config)
            }
        };
        let pool = Pool::builder(mgr)
            .max_size(config.max_connections)
            .build()
            .map_err(|e| MigrateError::pool(e, "creating PostgreSQL target pool"))?;

        let store = Self {
            pool,
            schema: config.schema.clone(),
        };
        store.ping().await?;

        info!("Connected to PostgreSQL target: {}", config.display_name());
        Ok(store)
    }

    fn quote_ident(name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    fn qualify_table(&self, table: &str) -> String {
        format!(
            "{}.{}",
            Self::quote_ident(&self.schema),
            Self::quote_ident(table)
        )
    }

    async fn client(&self, context: &str) -> Result<deadpool_postgres::Object> {
        self.pool
            .get()
            .await
            .map_err(|e| MigrateError::pool(e, context))
    }
}

#[async_trait]
impl TargetStore for PgTargetStore {
    async fn column_types(&self, table: &str) -> Result<HashMap<String, String>> {
        let client = self.client("loading column types").await?;
        let rows = client
            .query(
                "SELECT column_name::text, udt_name::text \
                 FROM information_schema.columns \
                 WHERE table_schema = $1 AND table_name = $2",
                &[&self.schema, &table],
            )
            .await?;

        let types: HashMap<String, String> = rows
            .iter()
            .map(|row| (row.get::<_, String>(0), row.get::<_, String>(1)))
            .collect();
        if types.is_empty() {
            return Err(MigrateError::batch(
                table,
                format!("table not found in schema '{}'", self.schema),
            ));
        }
        Ok(types)
    }

    async fn max_id(&self, table: &str) -> Result<i64> {
        let client = self.client("reading max id").await?;
        let sql = format!(
            "SELECT COALESCE(MAX(id), 0)::int8 FROM {}",
            self.qualify_table(table)
        );
        let row = client.query_one(&sql, &[]).await?;
        Ok(row.get::<_, i64>(0))
    }

    async fn now(&self) -> Result<NaiveDateTime> {
        let client = self.client("reading target clock").await?;
        let row = client
            .query_one("SELECT (now() AT TIME ZONE 'UTC')", &[])
            .await?;
        Ok(row.get::<_, NaiveDateTime>(0))
    }

    async fn query_set(&self, sql: &str) -> Result<HashSet<String>> {
        let client = self.client("loading shared data").await?;
        let rows = client.query(sql, &[]).await?;
        Ok(rows
            .iter()
            .filter_map(|row| row.get::<_, Option<String>>(0))
            .collect())
    }

    async fn copy_batch(&self, table: &str, columns: &[String], payload: Bytes) -> Result<u64> {
        let qualified_table = self.qualify_table(table);
        let mut client = self.client("getting PostgreSQL connection").await?;

        let col_list: Vec<String> = columns.iter().map(|c| Self::quote_ident(c)).collect();
        let copy_sql = format!(
            "COPY {} ({}) FROM STDIN WITH (FORMAT BINARY)",
            qualified_table,
            col_list.join(", ")
        );

        // Dropping the transaction without commit rolls the batch back.
        let tx = client.transaction().await?;
        let sink = tx
            .copy_in(&copy_sql)
            .await
            .map_err(|e| MigrateError::batch(table, format!("COPY init: {}", e)))?;
        tokio::pin!(sink);

        sink.send(payload)
            .await
            .map_err(|e| MigrateError::batch(table, format!("COPY send: {}", e)))?;
        let copied = sink
            .finish()
            .await
            .map_err(|e| MigrateError::batch(table, format!("COPY finish: {}", e)))?;

        tx.commit()
            .await
            .map_err(|e| MigrateError::batch(table, format!("commit: {}", e)))?;

        Ok(copied)
    }

    async fn reset_sequence(&self, table: &str) -> Result<()> {
        let client = self.client("resetting sequence").await?;
        let qualified_table = self.qualify_table(table);

        let row = client
            .query_one(
                "SELECT pg_get_serial_sequence($1, 'id')",
                &[&qualified_table],
            )
            .await?;
        let Some(seq_name) = row.get::<_, Option<String>>(0) else {
            debug!("No sequence owns {}.id, nothing to reset", qualified_table);
            return Ok(());
        };

        // is_called = false: the next nextval() returns exactly this value,
        // so an empty table starts at 1
        let reset_query = format!(
            "SELECT setval($1::text::regclass, COALESCE((SELECT MAX(id) FROM {}), 0) + 1, false)",
            qualified_table
        );
        client.execute(&reset_query, &[&seq_name]).await?;
        debug!("Reset sequence {} for {}", seq_name, qualified_table);

        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        let client = self.client("testing PostgreSQL target connection").await?;
        client.simple_query("SELECT 1").await?;
        Ok(())
    }

    fn db_type(&self) -> &str {
        "postgres"
    }

    async fn close(&self) {
        self.pool.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident_escapes_quotes() {
        assert_eq!(PgTargetStore::quote_ident("users"), "\"users\"");
        assert_eq!(PgTargetStore::quote_ident("we\"ird"), "\"we\"\"ird\"");
    }
}

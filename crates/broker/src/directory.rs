//! Human-name directory
//!
//! Optional mapping from human-readable names to internal log names,
//! kept in its own database. Writes are best-effort from the broker's
//! point of view: a directory failure downgrades to a NAK to the client
//! and never corrupts broker state.

use libsql::{Builder, Connection, Value};
use std::path::Path;
use tracing::{debug, info};

use crate::address::Address;
use crate::error::{BrokerError, BrokerResult};
use crate::pool::{ConnectionPool, PoolConfig};

static CREATE_NAMES_TABLE_SQL: &str = include_str!("../sql/create_names_table.sql");
static INSERT_NAME_SQL: &str = include_str!("../sql/insert_name.sql");
static SELECT_NAME_SQL: &str = include_str!("../sql/select_name.sql");

/// Pooled handle to the name directory database
pub struct NameDirectory {
    pool: ConnectionPool<Connection>,
}

impl NameDirectory {
    /// Open (creating if necessary) the directory database at `path`
    pub async fn open(path: impl AsRef<Path>, config: &PoolConfig) -> BrokerResult<Self> {
        info!(path = %path.as_ref().display(), "opening name directory");
        let database = Builder::new_local(path.as_ref())
            .build()
            .await
            .map_err(BrokerError::from_db)?;

        let mut connections = Vec::with_capacity(config.size);
        for _ in 0..config.size.max(1) {
            connections.push(database.connect().map_err(BrokerError::from_db)?);
        }

        connections[0]
            .execute(CREATE_NAMES_TABLE_SQL, Vec::<Value>::new())
            .await
            .map_err(BrokerError::from_db)?;

        Ok(Self {
            pool: ConnectionPool::new(connections, config),
        })
    }

    /// Record a human-name to log-name mapping.
    ///
    /// Fails with [`BrokerError::Conflict`] when the human name is
    /// already taken.
    pub async fn record(&self, human_name: &str, logname: &Address) -> BrokerResult<()> {
        info!(human_name, logname = %logname, "adding directory mapping");
        let connection = self.pool.acquire().await?;
        let result = connection
            .execute(
                INSERT_NAME_SQL,
                vec![
                    Value::Text(human_name.to_string()),
                    Value::Text(logname.printable()),
                ],
            )
            .await
            .map_err(BrokerError::from_db)
            .map(|_| ());
        self.pool.release(connection);
        result
    }

    /// Look up the log name registered under `human_name`
    pub async fn lookup(&self, human_name: &str) -> BrokerResult<Option<Address>> {
        let connection = self.pool.acquire().await?;
        let result = Self::lookup_with(&connection, human_name).await;
        self.pool.release(connection);
        result
    }

    async fn lookup_with(
        connection: &Connection,
        human_name: &str,
    ) -> BrokerResult<Option<Address>> {
        debug!(human_name, "directory lookup");
        let mut rows = connection
            .query(
                SELECT_NAME_SQL,
                vec![Value::Text(human_name.to_string())],
            )
            .await
            .map_err(BrokerError::from_db)?;

        match rows.next().await.map_err(BrokerError::from_db)? {
            Some(row) => {
                let printable = row.get::<String>(0).map_err(BrokerError::from_db)?;
                Ok(Some(Address::from_printable(&printable)?))
            }
            None => Ok(None),
        }
    }
}

impl std::fmt::Debug for NameDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NameDirectory").finish()
    }
}

//! Durable duplicate-detection table
//!
//! One row per admitted create request, keyed by log name with a unique
//! constraint — the constraint is what makes admission at-most-once.
//! The row's storage-assigned rowid doubles as the correlation id
//! embedded in the request forwarded to the backend, so the eventual
//! response can be matched back to the original creator. Rows are never
//! deleted; they are the audit and dedup trail.

use libsql::{Builder, Connection, Value};
use std::path::Path;
use tracing::{debug, info};

use crate::error::{BrokerError, BrokerResult};
use crate::pool::{ConnectionPool, PoolConfig};

static CREATE_LOGS_TABLE_SQL: &str = include_str!("../sql/create_logs_table.sql");
static CREATE_LOGNAME_INDEX_SQL: &str = include_str!("../sql/create_logname_index.sql");
static CREATE_SRVNAME_INDEX_SQL: &str = include_str!("../sql/create_srvname_index.sql");
static CREATE_ACK_SEEN_INDEX_SQL: &str = include_str!("../sql/create_ack_seen_index.sql");
static INSERT_LOG_SQL: &str = include_str!("../sql/insert_log.sql");
static SELECT_REQUEST_SQL: &str = include_str!("../sql/select_request.sql");
static MARK_ACKED_SQL: &str = include_str!("../sql/mark_acked.sql");

/// Pooled handle to the dedup database
pub struct DedupStore {
    pool: ConnectionPool<Connection>,
}

impl DedupStore {
    /// Open (creating and migrating if necessary) the dedup database at
    /// `path` and fill a connection pool over it.
    pub async fn open(path: impl AsRef<Path>, config: &PoolConfig) -> BrokerResult<Self> {
        info!(path = %path.as_ref().display(), "opening dedup database");
        let database = Builder::new_local(path.as_ref())
            .build()
            .await
            .map_err(BrokerError::from_db)?;

        let mut connections = Vec::with_capacity(config.size);
        for _ in 0..config.size.max(1) {
            connections.push(database.connect().map_err(BrokerError::from_db)?);
        }

        let setup = &connections[0];
        for statement in [
            CREATE_LOGS_TABLE_SQL,
            CREATE_LOGNAME_INDEX_SQL,
            CREATE_SRVNAME_INDEX_SQL,
            CREATE_ACK_SEEN_INDEX_SQL,
        ] {
            setup
                .execute(statement, Vec::<Value>::new())
                .await
                .map_err(BrokerError::from_db)?;
        }

        Ok(Self {
            pool: ConnectionPool::new(connections, config),
        })
    }

    /// Admit a create request for `logname`, returning the local
    /// correlation id for the forwarded request.
    ///
    /// A second admission for the same log name fails with
    /// [`BrokerError::Conflict`] without touching the table.
    pub async fn admit(
        &self,
        logname: &str,
        srvname: &str,
        creator: &str,
        rid: i64,
    ) -> BrokerResult<i64> {
        let connection = self.pool.acquire().await?;
        let result = Self::admit_with(&connection, logname, srvname, creator, rid).await;
        self.pool.release(connection);
        result
    }

    async fn admit_with(
        connection: &Connection,
        logname: &str,
        srvname: &str,
        creator: &str,
        rid: i64,
    ) -> BrokerResult<i64> {
        debug!(logname, srvname, creator, rid, "inserting admission row");
        connection
            .execute(
                INSERT_LOG_SQL,
                vec![
                    Value::Text(logname.to_string()),
                    Value::Text(srvname.to_string()),
                    Value::Text(creator.to_string()),
                    Value::Integer(rid),
                ],
            )
            .await
            .map_err(BrokerError::from_db)?;
        Ok(connection.last_insert_rowid())
    }

    /// Match a backend response to its admission row.
    ///
    /// Returns the original creator (printable form) and the creator's
    /// request id, and marks the row acknowledged. A second response for
    /// the same id — or an id that was never issued — fails with
    /// [`BrokerError::UnknownResponse`]; both cases signal backend
    /// duplication or a bug, never a reason to crash.
    pub async fn resolve(&self, local_rid: i64) -> BrokerResult<(String, i64)> {
        let connection = self.pool.acquire().await?;
        let result = Self::resolve_with(&connection, local_rid).await;
        self.pool.release(connection);
        result
    }

    async fn resolve_with(connection: &Connection, local_rid: i64) -> BrokerResult<(String, i64)> {
        let mut rows = connection
            .query(SELECT_REQUEST_SQL, vec![Value::Integer(local_rid)])
            .await
            .map_err(BrokerError::from_db)?;

        let Some(row) = rows.next().await.map_err(BrokerError::from_db)? else {
            return Err(BrokerError::UnknownResponse(local_rid));
        };

        let creator = row.get::<String>(0).map_err(BrokerError::from_db)?;
        let original_rid = row.get::<i64>(1).map_err(BrokerError::from_db)?;
        let ack_seen = row.get::<i64>(2).map_err(BrokerError::from_db)?;
        if ack_seen != 0 {
            return Err(BrokerError::UnknownResponse(local_rid));
        }

        debug!(local_rid, "marking admission row acknowledged");
        connection
            .execute(MARK_ACKED_SQL, vec![Value::Integer(local_rid)])
            .await
            .map_err(BrokerError::from_db)?;

        Ok((creator, original_rid))
    }
}

impl std::fmt::Debug for DedupStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DedupStore").finish()
    }
}

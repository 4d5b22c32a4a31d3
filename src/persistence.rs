//! Database persistence layer: the store context shared by the block and
//! transaction stores.
//!
//! A [`Database`] owns one SQLite connection behind a mutex together with the
//! [`PartitionRouter`] that gates access to tenant tables. It is constructed
//! explicitly and handed to workers behind an `Arc`; there is no global
//! handle.

use crate::config::Config;
use crate::error::{LedgerError, Result};
use crate::partition::{Partition, PartitionRouter, TenantId};
use alloy_primitives::{Address, B256, U256};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row, TransactionBehavior};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Greatest height the store can hold (SQLite integers are signed).
pub const MAX_STORED_HEIGHT: u64 = i64::MAX as u64;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const GLOBAL_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS blocks (
        hash BLOB PRIMARY KEY,
        parent_hash BLOB NOT NULL,
        number INTEGER NOT NULL,
        timestamp INTEGER NOT NULL
    );
    CREATE UNIQUE INDEX IF NOT EXISTS idx_blocks_number ON blocks (number);
    CREATE TABLE IF NOT EXISTS tenants (
        id TEXT PRIMARY KEY,
        created_at INTEGER NOT NULL
    );
";

pub struct Database {
    conn: Mutex<Connection>,
    router: PartitionRouter,
    batch_size: usize,
}

impl Database {
    /// Opens (or creates) a file-backed store.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening ledger database at {}", path.display());
        let conn = Connection::open(path)?;
        // WAL lets readers proceed while a writer holds the lock.
        let mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        debug!("journal_mode = {}", mode);
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    /// Opens the store described by `config`, creating the parent directory
    /// and provisioning every tenant listed in `tenants.allow`.
    pub fn open_with_config(config: &Config) -> Result<Self> {
        let path = Path::new(&config.database.path);
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let db = Self::open(path)?.with_batch_size(config.ingest.batch_size);
        for raw in &config.tenants.allow {
            db.provision_tenant(&TenantId::new(raw.as_str())?)?;
        }
        Ok(db)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(GLOBAL_SCHEMA)?;

        let router = PartitionRouter::new();
        {
            let mut stmt = conn.prepare("SELECT id FROM tenants ORDER BY id")?;
            let ids = stmt.query_map([], |row| row.get::<_, String>(0))?;
            for id in ids {
                router.allow(TenantId::new(id?)?);
            }
        }
        debug!("Loaded {} provisioned tenant(s)", router.tenants().len());

        Ok(Database {
            conn: Mutex::new(conn),
            router,
            batch_size: DEFAULT_BATCH_SIZE,
        })
    }

    /// Sets the number of rows per insert chunk. Zero is clamped to one.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn router(&self) -> &PartitionRouter {
        &self.router
    }

    pub fn partition(&self, tenant: &TenantId) -> Result<Partition> {
        self.router.route(tenant)
    }

    /// Closes the underlying connection, surfacing any error SQLite reports
    /// while finalizing.
    pub fn close(self) -> Result<()> {
        info!("Closing ledger database");
        self.conn.into_inner().close().map_err(|(_, e)| LedgerError::from(e))
    }

    /// Creates the tenant's partition tables if they do not exist and adds the
    /// tenant to the registry and the router's allow-list.
    ///
    /// This stands in for the external migration step; calling it for an
    /// already provisioned tenant is harmless.
    pub fn provision_tenant(&self, tenant: &TenantId) -> Result<Partition> {
        let partition = Partition::for_tenant(tenant.clone());

        self.write(|tx| {
            for (table, kind) in [
                (partition.transactions_table(), "transactions"),
                (partition.deposits_table(), "deposits"),
            ] {
                tx.execute_batch(&partition_schema(table, kind, tenant))?;
            }
            tx.execute(
                "INSERT OR IGNORE INTO tenants (id, created_at) VALUES (?1, ?2)",
                params![tenant.as_str(), chrono::Utc::now().timestamp()],
            )?;
            Ok(())
        })?;

        self.router.allow(tenant.clone());
        info!("Provisioned partition for tenant {}", tenant);
        Ok(partition)
    }

    /// Runs `f` with exclusive access to the connection.
    pub(crate) fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock();
        f(&conn)
    }

    /// Runs `f` inside an IMMEDIATE transaction and commits if it succeeds.
    /// On error the transaction is rolled back when dropped.
    pub(crate) fn write<T>(
        &self,
        f: impl FnOnce(&rusqlite::Transaction<'_>) -> Result<T>,
    ) -> Result<T> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}

fn partition_schema(table: &str, kind: &str, tenant: &TenantId) -> String {
    let index = |suffix: &str| format!("\"idx_{}_{}_{}\"", kind, tenant.as_str(), suffix);
    format!(
        "CREATE TABLE IF NOT EXISTS {table} (
            guid TEXT PRIMARY KEY,
            block_hash BLOB NOT NULL,
            block_number INTEGER NOT NULL,
            hash BLOB NOT NULL UNIQUE,
            from_address BLOB NOT NULL,
            to_address BLOB NOT NULL,
            token_address BLOB,
            token_id TEXT,
            token_meta TEXT,
            fee BLOB NOT NULL,
            amount BLOB NOT NULL,
            status INTEGER NOT NULL,
            tx_type INTEGER NOT NULL,
            timestamp INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS {number_idx} ON {table} (block_number);
        CREATE INDEX IF NOT EXISTS {status_idx} ON {table} (status, block_number);",
        table = table,
        number_idx = index("number"),
        status_idx = index("status"),
    )
}

// ---------------------------------------------------------------------------
// Column codecs shared by the stores
// ---------------------------------------------------------------------------

/// Converts an unsigned height/timestamp into SQLite's signed integer.
/// Used for values being written.
pub(crate) fn to_sql_int(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| LedgerError::ValueOutOfRange(value))
}

/// Saturating conversion for query bounds. No stored row lies above
/// [`MAX_STORED_HEIGHT`], so clamping never changes which rows match.
pub(crate) fn clamp_to_sql_int(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

pub(crate) fn u256_bytes(value: &U256) -> [u8; 32] {
    value.to_be_bytes::<32>()
}

pub(crate) fn read_u64(row: &Row<'_>, idx: usize) -> rusqlite::Result<u64> {
    let value: i64 = row.get(idx)?;
    u64::try_from(value).map_err(|_| rusqlite::Error::IntegralValueOutOfRange(idx, value))
}

fn read_fixed<const N: usize>(row: &Row<'_>, idx: usize) -> rusqlite::Result<[u8; N]> {
    let bytes: Vec<u8> = row.get(idx)?;
    <[u8; N]>::try_from(bytes.as_slice())
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Blob, Box::new(e)))
}

pub(crate) fn read_b256(row: &Row<'_>, idx: usize) -> rusqlite::Result<B256> {
    read_fixed::<32>(row, idx).map(B256::from)
}

pub(crate) fn read_address(row: &Row<'_>, idx: usize) -> rusqlite::Result<Address> {
    read_fixed::<20>(row, idx).map(Address::from)
}

pub(crate) fn read_opt_address(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Address>> {
    let bytes: Option<Vec<u8>> = row.get(idx)?;
    bytes
        .map(|b| {
            <[u8; 20]>::try_from(b.as_slice())
                .map(Address::from)
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Blob, Box::new(e)))
        })
        .transpose()
}

pub(crate) fn read_u256(row: &Row<'_>, idx: usize) -> rusqlite::Result<U256> {
    read_fixed::<32>(row, idx).map(|bytes| U256::from_be_bytes::<32>(bytes))
}

pub(crate) fn read_uuid(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Decodes an enum stored as its integer code.
pub(crate) fn read_code<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: TryFrom<i64, Error = LedgerError>,
{
    let code: i64 = row.get(idx)?;
    T::try_from(code)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Integer, Box::new(e)))
}

//! Per-tenant transaction storage.
//!
//! Two mutation paths exist besides insertion:
//! - the monotonic path ([`TransactionStorage::advance_status`]), a single
//!   `max(status, ..)` statement that can never regress a row;
//! - the reconciliation paths ([`TransactionStorage::apply_status_updates`]
//!   and [`TransactionStorage::mark_fallen_back`]), which overwrite status as
//!   far as the status state machine allows.

pub mod types;

pub use types::*;

use crate::error::{LedgerError, Result};
use crate::partition::{Partition, TenantId};
use crate::persistence::{
    clamp_to_sql_int, read_address, read_b256, read_code, read_opt_address, read_u256, read_u64,
    read_uuid, to_sql_int, u256_bytes, Database, MAX_STORED_HEIGHT,
};
use alloy_primitives::B256;
use rusqlite::{params, OptionalExtension, Row};
use tracing::{debug, error, info, warn};

/// Storage contract for tenant-partitioned transactions.
pub trait TransactionStorage: Send + Sync {
    /// Inserts `transactions` into the tenant's partition atomically. A hash
    /// already present in the partition fails the whole batch.
    fn store_transactions(&self, tenant: &TenantId, transactions: &[Transaction]) -> Result<()>;

    /// `None` when the partition holds no transaction with `hash`.
    fn transaction_by_hash(&self, tenant: &TenantId, hash: &B256) -> Result<Option<Transaction>>;

    /// Deposits with `from_height <= block_number <= to_height`, ordered by
    /// height then timestamp.
    fn transactions_in_range(
        &self,
        tenant: &TenantId,
        from_height: u64,
        to_height: u64,
    ) -> Result<Vec<Transaction>>;

    /// Raises every `Unconfirmed` transaction at or below `below_height` to at
    /// least `Confirmed`. Returns the number of rows advanced.
    fn advance_status(&self, tenant: &TenantId, below_height: u64) -> Result<usize>;

    /// Overwrites status and fee of each stored transaction matching an
    /// update's hash. Unknown hashes and transitions the state machine
    /// forbids are skipped. Returns the number of rows changed.
    fn apply_status_updates(&self, tenant: &TenantId, updates: &[Transaction]) -> Result<usize>;

    /// Marks every non-terminal transaction at `height` as `FallenBack`.
    /// Returns the number of rows marked; zero means the height is clean.
    fn mark_fallen_back(&self, tenant: &TenantId, height: u64) -> Result<usize>;
}

const TX_COLUMNS: &str = "guid, block_hash, block_number, hash, from_address, to_address, \
     token_address, token_id, token_meta, fee, amount, status, tx_type, timestamp";

fn transaction_from_row(row: &Row<'_>) -> rusqlite::Result<Transaction> {
    Ok(Transaction {
        guid: read_uuid(row, 0)?,
        block_hash: read_b256(row, 1)?,
        block_number: read_u64(row, 2)?,
        hash: read_b256(row, 3)?,
        from_address: read_address(row, 4)?,
        to_address: read_address(row, 5)?,
        token: TokenInfo {
            address: read_opt_address(row, 6)?,
            id: row.get(7)?,
            meta: row.get(8)?,
        },
        fee: read_u256(row, 9)?,
        amount: read_u256(row, 10)?,
        status: read_code(row, 11)?,
        tx_type: read_code(row, 12)?,
        timestamp: read_u64(row, 13)?,
    })
}

fn find_by_hash(
    conn: &rusqlite::Connection,
    table: &str,
    hash: &B256,
) -> Result<Option<Transaction>> {
    let found = conn
        .query_row(
            &format!("SELECT {} FROM {} WHERE hash = ?1", TX_COLUMNS, table),
            params![hash.as_slice()],
            transaction_from_row,
        )
        .optional()?;
    Ok(found)
}

impl Database {
    /// Writes `transactions` into `table` inside one IMMEDIATE transaction,
    /// chunked by the configured batch size.
    fn insert_into(&self, table: &str, transactions: &[Transaction]) -> Result<()> {
        let batch_size = self.batch_size();
        self.write(|tx| {
            let mut stmt = tx.prepare_cached(&format!(
                "INSERT INTO {} ({}) VALUES \
                 (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                table, TX_COLUMNS
            ))?;
            for chunk in transactions.chunks(batch_size) {
                for t in chunk {
                    let fee = u256_bytes(&t.fee);
                    let amount = u256_bytes(&t.amount);
                    stmt.execute(params![
                        t.guid.to_string(),
                        t.block_hash.as_slice(),
                        to_sql_int(t.block_number)?,
                        t.hash.as_slice(),
                        t.from_address.as_slice(),
                        t.to_address.as_slice(),
                        t.token.address.as_ref().map(|a| a.as_slice()),
                        t.token.id.as_deref(),
                        t.token.meta.as_deref(),
                        &fee[..],
                        &amount[..],
                        t.status.code(),
                        t.tx_type.code(),
                        to_sql_int(t.timestamp)?,
                    ])
                    .map_err(|e| {
                        error!("Failed to insert transaction {} into {}: {}", t.hash_str(), table, e);
                        LedgerError::from(e)
                    })?;
                }
            }
            Ok(())
        })
    }

    /// Writes deposit rows consumed by [`TransactionStorage::transactions_in_range`].
    pub fn store_deposits(&self, tenant: &TenantId, deposits: &[Transaction]) -> Result<()> {
        if deposits.is_empty() {
            return Ok(());
        }
        let partition = self.partition(tenant)?;
        self.insert_into(partition.deposits_table(), deposits)?;
        info!("Stored {} deposit(s) for tenant {}", deposits.len(), tenant);
        Ok(())
    }

    /// Applies one reconciliation update in its own IMMEDIATE transaction.
    /// Returns `true` if the stored row changed.
    fn apply_one(&self, partition: &Partition, update: &Transaction) -> Result<bool> {
        let table = partition.transactions_table();
        self.write(|tx| {
            let Some(current) = find_by_hash(tx, table, &update.hash)? else {
                debug!(
                    "No stored transaction {} for tenant {}, skipping update",
                    update.hash_str(),
                    partition.tenant()
                );
                return Ok(false);
            };

            if !current.status.can_transition_to(update.status) {
                warn!(
                    "Refusing status change {} -> {} for transaction {} (tenant {})",
                    current.status,
                    update.status,
                    update.hash_str(),
                    partition.tenant()
                );
                return Ok(false);
            }

            let fee = u256_bytes(&update.fee);
            tx.execute(
                &format!("UPDATE {} SET status = ?1, fee = ?2 WHERE guid = ?3", table),
                params![update.status.code(), &fee[..], current.guid.to_string()],
            )?;
            Ok(true)
        })
    }
}

impl TransactionStorage for Database {
    fn store_transactions(&self, tenant: &TenantId, transactions: &[Transaction]) -> Result<()> {
        if transactions.is_empty() {
            return Ok(());
        }
        let partition = self.partition(tenant)?;
        debug!(
            "Storing {} transaction(s) for tenant {}",
            transactions.len(),
            tenant
        );
        self.insert_into(partition.transactions_table(), transactions)?;
        info!(
            "Stored {} transaction(s) for tenant {}",
            transactions.len(),
            tenant
        );
        Ok(())
    }

    fn transaction_by_hash(&self, tenant: &TenantId, hash: &B256) -> Result<Option<Transaction>> {
        let partition = self.partition(tenant)?;
        self.with_conn(|conn| find_by_hash(conn, partition.transactions_table(), hash))
    }

    fn transactions_in_range(
        &self,
        tenant: &TenantId,
        from_height: u64,
        to_height: u64,
    ) -> Result<Vec<Transaction>> {
        let partition = self.partition(tenant)?;
        if from_height > to_height {
            return Ok(Vec::new());
        }
        if from_height > MAX_STORED_HEIGHT {
            return Ok(Vec::new());
        }
        let from = clamp_to_sql_int(from_height);
        let to = clamp_to_sql_int(to_height);

        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {} FROM {} WHERE block_number >= ?1 AND block_number <= ?2 \
                 ORDER BY block_number, timestamp",
                TX_COLUMNS,
                partition.deposits_table()
            ))?;
            let rows = stmt.query_map(params![from, to], transaction_from_row)?;
            let mut found = Vec::new();
            for row in rows {
                found.push(row?);
            }
            debug!(
                "Found {} deposit(s) in [{}, {}] for tenant {}",
                found.len(),
                from_height,
                to_height,
                tenant
            );
            Ok(found)
        })
    }

    fn advance_status(&self, tenant: &TenantId, below_height: u64) -> Result<usize> {
        let partition = self.partition(tenant)?;
        let below = clamp_to_sql_int(below_height);

        // Single statement: the row lock and the max() keep concurrent
        // advances from interleaving into a regression.
        let advanced = self.write(|tx| {
            let changed = tx.execute(
                &format!(
                    "UPDATE {} SET status = max(status, ?1) \
                     WHERE status = ?2 AND block_number <= ?3",
                    partition.transactions_table()
                ),
                params![
                    TxStatus::Confirmed.code(),
                    TxStatus::Unconfirmed.code(),
                    below
                ],
            )?;
            Ok(changed)
        })?;

        debug!(
            "Advanced {} transaction(s) at or below height {} for tenant {}",
            advanced, below_height, tenant
        );
        Ok(advanced)
    }

    fn apply_status_updates(&self, tenant: &TenantId, updates: &[Transaction]) -> Result<usize> {
        let partition = self.partition(tenant)?;
        let mut applied = 0;
        for update in updates {
            if self.apply_one(&partition, update)? {
                applied += 1;
            }
        }
        info!(
            "Applied {}/{} status update(s) for tenant {}",
            applied,
            updates.len(),
            tenant
        );
        Ok(applied)
    }

    fn mark_fallen_back(&self, tenant: &TenantId, height: u64) -> Result<usize> {
        let partition = self.partition(tenant)?;
        if height > MAX_STORED_HEIGHT {
            return Ok(0);
        }
        let number = clamp_to_sql_int(height);
        self.write(|tx| {
            let marked = tx.execute(
                &format!(
                    "UPDATE {} SET status = ?1 \
                     WHERE block_number = ?2 AND status NOT IN (?3, ?4)",
                    partition.transactions_table()
                ),
                params![
                    TxStatus::FallenBack.code(),
                    number,
                    TxStatus::Finalized.code(),
                    TxStatus::FallenBack.code()
                ],
            )?;
            Ok(marked)
        })
    }
}

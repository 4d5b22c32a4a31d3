//! Canonical block header storage.
//!
//! Headers live in the single global `blocks` table, keyed by hash and
//! uniquely indexed by height. Rollback deletes by height rather than by hash:
//! after a reorg the caller knows which heights are invalid, not which hash is
//! currently stored there.

use crate::error::{LedgerError, Result};
use crate::persistence::{read_b256, read_u64, to_sql_int, Database, MAX_STORED_HEIGHT};
use std::ops::RangeInclusive;
use alloy_primitives::B256;
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockHeader {
    pub hash: B256,
    pub parent_hash: B256,
    /// Block height.
    pub number: u64,
    /// Seconds since the Unix epoch.
    pub timestamp: u64,
}

impl BlockHeader {
    pub fn new(hash: B256, parent_hash: B256, number: u64, timestamp: u64) -> Self {
        BlockHeader {
            hash,
            parent_hash,
            number,
            timestamp,
        }
    }

    /// Whether `self` directly extends `parent`.
    pub fn is_child_of(&self, parent: &BlockHeader) -> bool {
        self.parent_hash == parent.hash && parent.number.checked_add(1) == Some(self.number)
    }
}

/// Storage contract for canonical block headers.
pub trait BlockStorage: Send + Sync {
    /// Inserts `headers` atomically. Fails on a duplicate hash or on a height
    /// that already holds a header.
    fn store_headers(&self, headers: &[BlockHeader]) -> Result<()>;

    /// Header with the greatest height, or `None` on an empty store.
    fn latest_header(&self) -> Result<Option<BlockHeader>>;

    /// Header stored at `height`; [`LedgerError::NotFound`] if there is none.
    fn header_by_height(&self, height: u64) -> Result<BlockHeader>;

    /// Deletes whatever header is stored at each given header's height and
    /// returns how many rows were removed. Heights with nothing stored are
    /// not an error.
    fn delete_headers_by_height(&self, headers: &[BlockHeader]) -> Result<usize>;

    /// Deletes every header whose height lies in `range` in one atomic step
    /// and returns how many rows were removed. An empty range removes
    /// nothing.
    fn delete_headers_in_range(&self, range: RangeInclusive<u64>) -> Result<usize>;
}

const HEADER_COLUMNS: &str = "hash, parent_hash, number, timestamp";

fn header_from_row(row: &Row<'_>) -> rusqlite::Result<BlockHeader> {
    Ok(BlockHeader {
        hash: read_b256(row, 0)?,
        parent_hash: read_b256(row, 1)?,
        number: read_u64(row, 2)?,
        timestamp: read_u64(row, 3)?,
    })
}

impl BlockStorage for Database {
    fn store_headers(&self, headers: &[BlockHeader]) -> Result<()> {
        if headers.is_empty() {
            return Ok(());
        }
        debug!("Storing {} block header(s)", headers.len());

        let batch_size = self.batch_size();
        self.write(|tx| {
            let mut stmt = tx.prepare_cached(&format!(
                "INSERT INTO blocks ({}) VALUES (?1, ?2, ?3, ?4)",
                HEADER_COLUMNS
            ))?;
            for chunk in headers.chunks(batch_size) {
                for header in chunk {
                    stmt.execute(params![
                        header.hash.as_slice(),
                        header.parent_hash.as_slice(),
                        to_sql_int(header.number)?,
                        to_sql_int(header.timestamp)?,
                    ])
                    .map_err(|e| {
                        error!("Failed to insert block {} ({}): {}", header.number, header.hash, e);
                        LedgerError::from(e)
                    })?;
                }
                debug!("Inserted chunk of {} header(s)", chunk.len());
            }
            Ok(())
        })?;

        if let (Some(first), Some(last)) = (headers.first(), headers.last()) {
            info!(
                "Stored {} block header(s) [{}..={}]",
                headers.len(),
                first.number,
                last.number
            );
        }
        Ok(())
    }

    fn latest_header(&self) -> Result<Option<BlockHeader>> {
        self.with_conn(|conn| {
            let header = conn
                .query_row(
                    &format!(
                        "SELECT {} FROM blocks ORDER BY number DESC LIMIT 1",
                        HEADER_COLUMNS
                    ),
                    [],
                    header_from_row,
                )
                .optional()?;
            Ok(header)
        })
    }

    fn header_by_height(&self, height: u64) -> Result<BlockHeader> {
        debug!("Fetching block header at height {}", height);
        if height > MAX_STORED_HEIGHT {
            return Err(LedgerError::NotFound(format!("block at height {}", height)));
        }
        let number = to_sql_int(height)?;
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {} FROM blocks WHERE number = ?1", HEADER_COLUMNS),
                params![number],
                header_from_row,
            )
            .optional()?
            .ok_or_else(|| LedgerError::NotFound(format!("block at height {}", height)))
        })
    }

    fn delete_headers_by_height(&self, headers: &[BlockHeader]) -> Result<usize> {
        if headers.is_empty() {
            return Ok(0);
        }

        let deleted = self.write(|tx| {
            let mut stmt = tx.prepare_cached("DELETE FROM blocks WHERE number = ?1")?;
            let mut deleted = 0;
            for header in headers {
                let removed = stmt.execute(params![to_sql_int(header.number)?])?;
                if removed == 0 {
                    debug!("No block stored at height {}, nothing to delete", header.number);
                }
                deleted += removed;
            }
            Ok(deleted)
        })?;

        info!(
            "Deleted {} block header(s) across {} height(s)",
            deleted,
            headers.len()
        );
        Ok(deleted)
    }

    fn delete_headers_in_range(&self, range: RangeInclusive<u64>) -> Result<usize> {
        let (start, end) = (*range.start(), (*range.end()).min(MAX_STORED_HEIGHT));
        if start > end {
            return Ok(0);
        }

        let deleted = self.write(|tx| {
            let removed = tx.execute(
                "DELETE FROM blocks WHERE number BETWEEN ?1 AND ?2",
                params![to_sql_int(start)?, to_sql_int(end)?],
            )?;
            Ok(removed)
        })?;

        info!(
            "Deleted {} block header(s) in [{}, {}]",
            deleted, start, end
        );
        Ok(deleted)
    }
}

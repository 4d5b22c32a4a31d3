//! Reconciliation engine
//!
//! Executes the storage-side consequences of a chain reorganization once an
//! external detector has named the invalidated height range: the headers at
//! those heights are rolled back and every affected tenant's transactions are
//! marked as fallen back. Also fronts the confirmation tracker's status
//! advancement.
//!
//! Every step is idempotent per height, so an interrupted run is recovered by
//! issuing the same call again.

use crate::block::BlockStorage;
use crate::error::Result;
use crate::partition::TenantId;
use crate::persistence::MAX_STORED_HEIGHT;
use crate::transaction::{Transaction, TransactionStorage};
use std::ops::RangeInclusive;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of fallback marking over one tenant's range.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FallbackReport {
    pub heights_scanned: u64,
    pub transactions_marked: usize,
    /// Heights that held no transaction still eligible for fallback.
    pub clean_heights: u64,
}

/// Outcome of a full reorg: header rollback plus per-tenant fallback.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReorgReport {
    pub headers_deleted: usize,
    pub tenants: Vec<(TenantId, FallbackReport)>,
}

impl ReorgReport {
    pub fn transactions_marked(&self) -> usize {
        self.tenants.iter().map(|(_, r)| r.transactions_marked).sum()
    }
}

pub struct Reconciler<B, T> {
    blocks: Arc<B>,
    transactions: Arc<T>,
}

impl<B: BlockStorage, T: TransactionStorage> Reconciler<B, T> {
    pub fn new(blocks: Arc<B>, transactions: Arc<T>) -> Self {
        Reconciler {
            blocks,
            transactions,
        }
    }

    /// Marks every non-terminal transaction of `tenant` whose block height
    /// lies in `range` as fallen back, walking heights in ascending order.
    ///
    /// Stops at the first storage error. Heights processed before the
    /// failure stay marked. Heights above [`MAX_STORED_HEIGHT`] cannot hold
    /// rows and are not visited.
    pub fn handle_fallback(
        &self,
        tenant: &TenantId,
        range: RangeInclusive<u64>,
    ) -> Result<FallbackReport> {
        let mut report = FallbackReport::default();
        let (start, end) = (*range.start(), (*range.end()).min(MAX_STORED_HEIGHT));
        if start > end {
            debug!("Empty fallback range {:?} for tenant {}, nothing to do", range, tenant);
            return Ok(report);
        }

        for height in start..=end {
            let marked = self.transactions.mark_fallen_back(tenant, height)?;
            report.heights_scanned += 1;
            if marked == 0 {
                report.clean_heights += 1;
            } else {
                debug!(
                    "Marked {} transaction(s) at height {} as fallen back for tenant {}",
                    marked, height, tenant
                );
                report.transactions_marked += marked;
            }
        }

        info!(
            "Fallback for tenant {} over [{}, {}]: {} marked, {} clean height(s)",
            tenant, start, end, report.transactions_marked, report.clean_heights
        );
        Ok(report)
    }

    /// Deletes whatever header is stored at every height in `range`, in one
    /// atomic step, whichever hash it carries. Returns the number removed.
    pub fn rollback_headers(&self, range: RangeInclusive<u64>) -> Result<usize> {
        if range.is_empty() {
            return Ok(0);
        }
        self.blocks.delete_headers_in_range(range)
    }

    /// Rolls back the headers in `range`, then marks the transactions of each
    /// tenant in the same range as fallen back.
    pub fn handle_reorg(
        &self,
        tenants: &[TenantId],
        range: RangeInclusive<u64>,
    ) -> Result<ReorgReport> {
        if range.is_empty() {
            warn!("Ignoring reorg with inverted range {:?}", range);
            return Ok(ReorgReport::default());
        }
        info!(
            "Handling reorg over [{}, {}] for {} tenant(s)",
            range.start(),
            range.end(),
            tenants.len()
        );

        let mut report = ReorgReport {
            headers_deleted: self.rollback_headers(range.clone())?,
            tenants: Vec::with_capacity(tenants.len()),
        };
        for tenant in tenants {
            let fallback = self.handle_fallback(tenant, range.clone())?;
            report.tenants.push((tenant.clone(), fallback));
        }

        info!(
            "Reorg complete: {} header(s) deleted, {} transaction(s) fallen back",
            report.headers_deleted,
            report.transactions_marked()
        );
        Ok(report)
    }

    /// Confirms every unconfirmed transaction of `tenant` at or below
    /// `below_height`.
    pub fn advance_confirmations(&self, tenant: &TenantId, below_height: u64) -> Result<usize> {
        self.transactions.advance_status(tenant, below_height)
    }

    pub fn apply_status_updates(&self, tenant: &TenantId, updates: &[Transaction]) -> Result<usize> {
        self.transactions.apply_status_updates(tenant, updates)
    }
}

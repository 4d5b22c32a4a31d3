//! Tenant partition routing.
//!
//! Every tenant owns a `transactions_<tenant>` and a `deposits_<tenant>`
//! table. SQL cannot bind identifiers, so table names are only ever produced
//! from a [`Partition`] handed out by the [`PartitionRouter`], which accepts a
//! syntactically valid [`TenantId`] that is also on its allow-list.

use crate::error::{LedgerError, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

pub const MAX_TENANT_ID_LEN: usize = 48;

/// Validated tenant (request) identifier: 1 to 48 characters of
/// `[A-Za-z0-9_]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantId(String);

impl TenantId {
    pub fn new(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        if raw.is_empty() || raw.len() > MAX_TENANT_ID_LEN {
            return Err(LedgerError::InvalidTenant(format!(
                "`{}` must be between 1 and {} characters",
                raw, MAX_TENANT_ID_LEN
            )));
        }
        if !raw.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(LedgerError::InvalidTenant(format!(
                "`{}` may only contain ASCII letters, digits and underscores",
                raw
            )));
        }
        Ok(TenantId(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TenantId {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        TenantId::new(s)
    }
}

impl TryFrom<String> for TenantId {
    type Error = LedgerError;

    fn try_from(value: String) -> Result<Self> {
        TenantId::new(value)
    }
}

impl From<TenantId> for String {
    fn from(id: TenantId) -> Self {
        id.0
    }
}

/// Handle naming the physical tables of one tenant partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    tenant: TenantId,
    transactions_table: String,
    deposits_table: String,
}

impl Partition {
    pub(crate) fn for_tenant(tenant: TenantId) -> Self {
        Partition {
            transactions_table: format!("\"transactions_{}\"", tenant.as_str()),
            deposits_table: format!("\"deposits_{}\"", tenant.as_str()),
            tenant,
        }
    }

    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    /// Quoted identifier of the tenant's transaction table.
    pub fn transactions_table(&self) -> &str {
        &self.transactions_table
    }

    /// Quoted identifier of the tenant's deposit (range-query) table.
    pub fn deposits_table(&self) -> &str {
        &self.deposits_table
    }
}

/// Maps tenant identifiers to partitions, refusing tenants that were never
/// provisioned or allowed by configuration.
#[derive(Debug, Default)]
pub struct PartitionRouter {
    allowed: RwLock<HashSet<TenantId>>,
}

impl PartitionRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_allowed(tenants: impl IntoIterator<Item = TenantId>) -> Self {
        PartitionRouter {
            allowed: RwLock::new(tenants.into_iter().collect()),
        }
    }

    /// Adds a tenant to the allow-list. Returns `false` if it was already
    /// present.
    pub fn allow(&self, tenant: TenantId) -> bool {
        debug!("Allowing tenant partition {}", tenant);
        self.allowed.write().insert(tenant)
    }

    pub fn is_allowed(&self, tenant: &TenantId) -> bool {
        self.allowed.read().contains(tenant)
    }

    pub fn route(&self, tenant: &TenantId) -> Result<Partition> {
        if !self.is_allowed(tenant) {
            return Err(LedgerError::UnknownTenant(tenant.to_string()));
        }
        Ok(Partition::for_tenant(tenant.clone()))
    }

    /// Sorted snapshot of the allow-list.
    pub fn tenants(&self) -> Vec<TenantId> {
        let mut tenants: Vec<TenantId> = self.allowed.read().iter().cloned().collect();
        tenants.sort();
        tenants
    }
}

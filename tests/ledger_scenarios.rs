//! Integration tests for header storage, transaction status paths and reorg handling

use alloy_primitives::{Address, B256, U256};
use chainledger::{
    BlockHeader, BlockStorage, Config, Database, LedgerError, Reconciler, TenantId, Transaction,
    TransactionStorage, TxStatus,
};
use std::sync::Arc;
use tempfile::TempDir;

type TestResult = Result<(), Box<dyn std::error::Error>>;

/// Helper to open a file-backed store with one provisioned tenant
fn open_store(dir: &TempDir, tenant: &str) -> Result<(Arc<Database>, TenantId), Box<dyn std::error::Error>> {
    let db = Database::open(dir.path().join("ledger.db"))?;
    let tenant = TenantId::new(tenant)?;
    db.provision_tenant(&tenant)?;
    Ok((Arc::new(db), tenant))
}

fn header(number: u64, tag: u8, parent_tag: u8) -> BlockHeader {
    BlockHeader::new(
        B256::repeat_byte(tag),
        B256::repeat_byte(parent_tag),
        number,
        1_700_000_000 + number * 12,
    )
}

fn transfer(number: u64, tag: u8) -> Transaction {
    Transaction::new(
        B256::repeat_byte(number as u8),
        number,
        B256::repeat_byte(tag),
        Address::repeat_byte(0x11),
        Address::repeat_byte(0x22),
        U256::from(10u64).pow(U256::from(18u64)),
        U256::from(21_000u64),
        1_700_000_000 + number * 12,
    )
}

fn status_of(db: &Database, tenant: &TenantId, tag: u8) -> Result<TxStatus, LedgerError> {
    db.transaction_by_hash(tenant, &B256::repeat_byte(tag))?
        .map(|tx| tx.status)
        .ok_or_else(|| LedgerError::NotFound(format!("tx {:#x}", tag)))
}

#[test]
fn test_reorg_removes_linked_headers() -> TestResult {
    let dir = TempDir::new()?;
    let (db, tenant) = open_store(&dir, "acme")?;

    let h10 = header(10, 0x10, 0x09);
    let h11 = header(11, 0x11, 0x10);
    assert!(h11.is_child_of(&h10));
    db.store_headers(&[h10, h11])?;
    assert_eq!(db.latest_header()?.map(|h| h.number), Some(11));

    let reconciler = Reconciler::new(db.clone(), db.clone());
    let report = reconciler.handle_reorg(&[tenant], 10..=11)?;

    assert_eq!(report.headers_deleted, 2);
    assert_eq!(db.latest_header()?, None);
    assert!(db.header_by_height(10).unwrap_err().is_not_found());
    assert!(db.header_by_height(11).unwrap_err().is_not_found());

    Ok(())
}

#[test]
fn test_confirm_then_fall_back() -> TestResult {
    let dir = TempDir::new()?;
    let (db, tenant) = open_store(&dir, "acme")?;
    let reconciler = Reconciler::new(db.clone(), db.clone());

    db.store_transactions(&tenant, &[transfer(10, 0xa1)])?;
    assert_eq!(status_of(&db, &tenant, 0xa1)?, TxStatus::Unconfirmed);

    reconciler.advance_confirmations(&tenant, 10)?;
    assert_eq!(status_of(&db, &tenant, 0xa1)?, TxStatus::Confirmed);

    reconciler.handle_fallback(&tenant, 10..=10)?;
    assert_eq!(status_of(&db, &tenant, 0xa1)?, TxStatus::FallenBack);

    Ok(())
}

#[test]
fn test_fallback_wins_regardless_of_order() -> TestResult {
    let dir = TempDir::new()?;
    let (db, tenant) = open_store(&dir, "acme")?;
    let reconciler = Reconciler::new(db.clone(), db.clone());

    db.store_transactions(&tenant, &[transfer(5, 0x01), transfer(5, 0x02)])?;

    // advance first, then fall back
    reconciler.advance_confirmations(&tenant, 5)?;
    reconciler.handle_fallback(&tenant, 5..=5)?;
    // and another advance afterwards must not resurrect anything
    assert_eq!(reconciler.advance_confirmations(&tenant, 100)?, 0);

    assert_eq!(status_of(&db, &tenant, 0x01)?, TxStatus::FallenBack);
    assert_eq!(status_of(&db, &tenant, 0x02)?, TxStatus::FallenBack);

    // a stale confirmation update cannot revive it either
    let stale = transfer(5, 0x01).with_status(TxStatus::Safe);
    assert_eq!(reconciler.apply_status_updates(&tenant, &[stale])?, 0);
    assert_eq!(status_of(&db, &tenant, 0x01)?, TxStatus::FallenBack);

    Ok(())
}

#[test]
fn test_range_on_empty_partition() -> TestResult {
    let dir = TempDir::new()?;
    let (db, tenant) = open_store(&dir, "acme")?;

    assert!(db.transactions_in_range(&tenant, 0, u64::MAX)?.is_empty());
    Ok(())
}

#[test]
fn test_full_height_range_operations() -> TestResult {
    let dir = TempDir::new()?;
    let (db, tenant) = open_store(&dir, "acme")?;
    let reconciler = Reconciler::new(db.clone(), db.clone());

    db.store_headers(&[header(5, 0x05, 0x04)])?;
    db.store_deposits(&tenant, &[transfer(5, 0x15)])?;
    db.store_transactions(&tenant, &[transfer(5, 0x25)])?;

    assert_eq!(db.transactions_in_range(&tenant, 0, u64::MAX)?.len(), 1);
    assert_eq!(reconciler.advance_confirmations(&tenant, u64::MAX)?, 1);
    assert!(db.header_by_height(u64::MAX).unwrap_err().is_not_found());

    let report = reconciler.handle_reorg(&[tenant.clone()], (u64::MAX - 1)..=u64::MAX)?;
    assert_eq!(report.headers_deleted, 0);
    assert_eq!(report.transactions_marked(), 0);

    let report = reconciler.handle_reorg(&[tenant.clone()], 5..=5)?;
    assert_eq!(report.headers_deleted, 1);
    assert_eq!(status_of(&db, &tenant, 0x25)?, TxStatus::FallenBack);
    Ok(())
}

#[test]
fn test_configured_tenants_are_usable_without_provisioning() -> TestResult {
    let dir = TempDir::new()?;
    let mut config = Config::default();
    config.database.path = dir.path().join("ledger.db").display().to_string();
    config.tenants.allow = vec!["acme".to_string()];

    let db = Arc::new(Database::open_with_config(&config)?);
    let tenant = TenantId::new("acme")?;
    db.store_headers(&[header(1, 0x01, 0x00)])?;

    assert_eq!(db.advance_status(&tenant, 10)?, 0);
    let reconciler = Reconciler::new(db.clone(), db.clone());
    let report = reconciler.handle_reorg(&db.router().tenants(), 1..=1)?;
    assert_eq!(report.headers_deleted, 1);
    assert_eq!(report.tenants.len(), 1);
    Ok(())
}

#[test]
fn test_hash_unique_per_partition_only() -> TestResult {
    let dir = TempDir::new()?;
    let (db, acme) = open_store(&dir, "acme")?;
    let globex = TenantId::new("globex")?;
    db.provision_tenant(&globex)?;

    db.store_transactions(&acme, &[transfer(1, 0x42)])?;
    db.store_transactions(&globex, &[transfer(1, 0x42)])?;

    let err = db.store_transactions(&acme, &[transfer(2, 0x42)]).unwrap_err();
    assert!(err.is_storage());

    assert_eq!(status_of(&db, &acme, 0x42)?, TxStatus::Unconfirmed);
    assert_eq!(status_of(&db, &globex, 0x42)?, TxStatus::Unconfirmed);
    Ok(())
}

#[test]
fn test_unprovisioned_tenant_rejected_before_sql() -> TestResult {
    let dir = TempDir::new()?;
    let (db, _) = open_store(&dir, "acme")?;
    let stranger = TenantId::new("stranger")?;

    let err = db.store_transactions(&stranger, &[transfer(1, 0x01)]).unwrap_err();
    assert!(matches!(err, LedgerError::UnknownTenant(_)));
    assert!(matches!(
        db.advance_status(&stranger, 10).unwrap_err(),
        LedgerError::UnknownTenant(_)
    ));
    Ok(())
}

#[test]
fn test_state_survives_reopen() -> TestResult {
    let dir = TempDir::new()?;
    let path = dir.path().join("ledger.db");
    let tenant = TenantId::new("acme")?;

    {
        let db = Database::open(&path)?;
        db.provision_tenant(&tenant)?;
        db.store_headers(&[header(1, 0x01, 0x00)])?;
        db.store_transactions(&tenant, &[transfer(1, 0x0a)])?;
        db.advance_status(&tenant, 1)?;
        db.close()?;
    }

    let db = Database::open(&path)?;
    assert_eq!(db.latest_header()?.map(|h| h.number), Some(1));
    assert_eq!(status_of(&db, &tenant, 0x0a)?, TxStatus::Confirmed);
    Ok(())
}

#[test]
fn test_config_driven_store() -> TestResult {
    let dir = TempDir::new()?;
    let raw = format!(
        r#"
        [database]
        path = "{}"

        [tenants]
        allow = ["acme"]

        [ingest]
        batch_size = 2
        "#,
        dir.path().join("cfg/ledger.db").display()
    );
    let config = Config::from_toml_str(&raw)?;
    let db = Database::open_with_config(&config)?;
    let tenant = TenantId::new("acme")?;
    db.provision_tenant(&tenant)?;

    // five rows over three chunks, still one atomic batch
    let batch: Vec<Transaction> = (0..5u8).map(|i| transfer(u64::from(i) + 1, 0x50 + i)).collect();
    db.store_transactions(&tenant, &batch)?;
    assert_eq!(db.advance_status(&tenant, 5)?, 5);

    let mut poisoned: Vec<Transaction> = (0..4u8).map(|i| transfer(9, 0x60 + i)).collect();
    poisoned.push(transfer(9, 0x50));
    assert!(db.store_transactions(&tenant, &poisoned).unwrap_err().is_constraint_violation());
    assert!(db.transaction_by_hash(&tenant, &B256::repeat_byte(0x60))?.is_none());
    Ok(())
}

#[test]
fn test_json_import_assigns_guid() -> TestResult {
    let dir = TempDir::new()?;
    let (db, tenant) = open_store(&dir, "acme")?;

    let mut value = serde_json::to_value(transfer(3, 0x33))?;
    value
        .as_object_mut()
        .ok_or("transaction should serialize to an object")?
        .remove("guid");
    let imported: Vec<Transaction> = serde_json::from_value(serde_json::Value::Array(vec![value]))?;

    db.store_deposits(&tenant, &imported)?;
    let found = db.transactions_in_range(&tenant, 3, 3)?;
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].guid, imported[0].guid);
    assert_eq!(found[0].amount, U256::from(10u64).pow(U256::from(18u64)));
    Ok(())
}

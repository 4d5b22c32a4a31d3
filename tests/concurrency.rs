//! Concurrent workers sharing one store context

use alloy_primitives::{Address, B256, U256};
use chainledger::{Database, Reconciler, TenantId, Transaction, TransactionStorage, TxStatus};
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;

fn transfer(number: u64, tag: u8) -> Transaction {
    Transaction::new(
        B256::repeat_byte(number as u8),
        number,
        B256::repeat_byte(tag),
        Address::repeat_byte(0x01),
        Address::repeat_byte(0x02),
        U256::from(1u64),
        U256::ZERO,
        1_700_000_000 + number,
    )
}

#[test]
fn test_concurrent_duplicate_insert_single_winner() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let db = Arc::new(Database::open(dir.path().join("ledger.db"))?);
    let tenant = TenantId::new("acme")?;
    db.provision_tenant(&tenant)?;

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let db = db.clone();
            let tenant = tenant.clone();
            thread::spawn(move || db.store_transactions(&tenant, &[transfer(7, 0x77)]))
        })
        .collect();

    let mut winners = 0;
    for handle in handles {
        match handle.join().map_err(|_| "worker panicked")? {
            Ok(()) => winners += 1,
            Err(e) => assert!(e.is_constraint_violation()),
        }
    }
    assert_eq!(winners, 1);
    Ok(())
}

#[test]
fn test_advance_and_fallback_race_never_resurrects() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let db = Arc::new(Database::open(dir.path().join("ledger.db"))?);
    let tenant = TenantId::new("acme")?;
    db.provision_tenant(&tenant)?;

    // 40 transactions over heights 1..=20
    let batch: Vec<Transaction> = (0..40u8)
        .map(|i| transfer(u64::from(i / 2) + 1, 0x80 + i))
        .collect();
    db.store_transactions(&tenant, &batch)?;

    let reconciler = Arc::new(Reconciler::new(db.clone(), db.clone()));
    let mut handles = Vec::new();
    for below in [5u64, 10, 15, 20] {
        let reconciler = reconciler.clone();
        let tenant = tenant.clone();
        handles.push(thread::spawn(move || {
            reconciler.advance_confirmations(&tenant, below).map(|_| ())
        }));
    }
    {
        let reconciler = reconciler.clone();
        let tenant = tenant.clone();
        handles.push(thread::spawn(move || {
            reconciler.handle_fallback(&tenant, 11..=20).map(|_| ())
        }));
    }
    for handle in handles {
        handle.join().map_err(|_| "worker panicked")??;
    }

    // the fallback may have run before some advances; a final pass settles it
    reconciler.handle_fallback(&tenant, 11..=20)?;
    reconciler.advance_confirmations(&tenant, 20)?;

    for tx in &batch {
        let stored = db
            .transaction_by_hash(&tenant, &tx.hash)?
            .ok_or("stored transaction missing")?;
        let expected = if tx.block_number >= 11 {
            TxStatus::FallenBack
        } else {
            TxStatus::Confirmed
        };
        assert_eq!(stored.status, expected, "height {}", tx.block_number);
    }
    Ok(())
}

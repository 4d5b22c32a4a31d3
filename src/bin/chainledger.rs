#![forbid(unsafe_code)]
//! Operator CLI for the ledger store: provisioning, imports, lookups and
//! manual reconciliation.

use alloy_primitives::B256;
use chainledger::config::DEFAULT_CONFIG_PATH;
use chainledger::{
    load_config, BlockHeader, BlockStorage, Database, Reconciler, TenantId, Transaction,
    TransactionStorage, TxStatus,
};
use clap::{Parser, Subcommand};
use colored::*;
use comfy_table::presets::UTF8_FULL;
use comfy_table::Color as TableColor;
use comfy_table::{Attribute, Cell, ContentArrangement, Table};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Overrides `database.path` from the configuration
    #[arg(long, global = true)]
    db: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Creates the partition tables for a tenant
    Provision { tenant: TenantId },
    /// Imports a JSON array of block headers
    ImportHeaders { file: PathBuf },
    /// Imports a JSON array of transactions into a tenant partition
    ImportTransactions {
        tenant: TenantId,
        file: PathBuf,
        /// Write into the deposit table instead
        #[arg(long)]
        deposits: bool,
    },
    /// Shows the highest stored block header
    Latest,
    /// Shows the block header stored at a height
    Block { height: u64 },
    /// Looks up a transaction by hash
    Tx { tenant: TenantId, hash: B256 },
    /// Lists deposits between two heights (inclusive)
    Range { tenant: TenantId, from: u64, to: u64 },
    /// Confirms unconfirmed transactions at or below a height
    Advance { tenant: TenantId, below: u64 },
    /// Rolls back headers and marks transactions fallen back over a range
    Reorg {
        from: u64,
        to: u64,
        /// Tenants to reconcile; defaults to every allowed tenant
        #[arg(long = "tenant")]
        tenants: Vec<TenantId>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = load_config(
        cli.config
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH)),
    )?;
    if let Some(db) = &cli.db {
        config.database.path = db.clone();
    }

    tracing_subscriber::fmt()
        .with_max_level(config.log_level().unwrap_or(tracing::Level::INFO))
        .init();

    let db = Arc::new(Database::open_with_config(&config)?);

    match cli.command {
        Commands::Provision { tenant } => {
            let partition = db.provision_tenant(&tenant)?;
            println!(
                "{} {} ({}, {})",
                "✅ Provisioned".bright_green(),
                tenant.as_str().bright_white().bold(),
                partition.transactions_table(),
                partition.deposits_table()
            );
        }
        Commands::ImportHeaders { file } => {
            let headers: Vec<BlockHeader> = serde_json::from_str(&std::fs::read_to_string(&file)?)?;
            db.store_headers(&headers)?;
            println!(
                "{} {} header(s) from {}",
                "✅ Imported".bright_green(),
                headers.len(),
                file.display()
            );
        }
        Commands::ImportTransactions {
            tenant,
            file,
            deposits,
        } => {
            let txs: Vec<Transaction> = serde_json::from_str(&std::fs::read_to_string(&file)?)?;
            if deposits {
                db.store_deposits(&tenant, &txs)?;
            } else {
                db.store_transactions(&tenant, &txs)?;
            }
            println!(
                "{} {} {} for tenant {}",
                "✅ Imported".bright_green(),
                txs.len(),
                if deposits { "deposit(s)" } else { "transaction(s)" },
                tenant.as_str().bright_white()
            );
        }
        Commands::Latest => match db.latest_header()? {
            Some(header) => print_header(&header),
            None => println!("{}", "📭 No block headers stored".yellow()),
        },
        Commands::Block { height } => match db.header_by_height(height) {
            Ok(header) => print_header(&header),
            Err(e) if e.is_not_found() => {
                println!("{}", format!("📭 No block at height {}", height).yellow())
            }
            Err(e) => return Err(e.into()),
        },
        Commands::Tx { tenant, hash } => match db.transaction_by_hash(&tenant, &hash)? {
            Some(tx) => println!("{}", serde_json::to_string_pretty(&tx)?),
            None => println!(
                "{}",
                format!("📭 No transaction {:#x} for tenant {}", hash, tenant).yellow()
            ),
        },
        Commands::Range { tenant, from, to } => {
            let txs = db.transactions_in_range(&tenant, from, to)?;
            if txs.is_empty() {
                println!(
                    "{}",
                    format!("📭 No deposits in [{}, {}] for tenant {}", from, to, tenant).yellow()
                );
            } else {
                println!("{}", range_table(&txs));
                println!("{} deposit(s)", txs.len().to_string().bright_white().bold());
            }
        }
        Commands::Advance { tenant, below } => {
            let reconciler = Reconciler::new(db.clone(), db.clone());
            let advanced = reconciler.advance_confirmations(&tenant, below)?;
            println!(
                "{} {} transaction(s) at or below height {}",
                "⏫ Confirmed".bright_green(),
                advanced,
                below
            );
        }
        Commands::Reorg { from, to, tenants } => {
            let tenants = if tenants.is_empty() {
                db.router().tenants()
            } else {
                tenants
            };
            let reconciler = Reconciler::new(db.clone(), db.clone());
            let report = reconciler.handle_reorg(&tenants, from..=to)?;

            println!(
                "{} [{}, {}]",
                "🔁 Reorg handled".bright_magenta().bold(),
                from,
                to
            );
            println!("  Headers deleted: {}", report.headers_deleted);
            for (tenant, fallback) in &report.tenants {
                println!(
                    "  {}: {} fallen back, {} clean height(s)",
                    tenant.as_str().bright_white(),
                    fallback.transactions_marked.to_string().red(),
                    fallback.clean_heights
                );
            }
        }
    }

    Ok(())
}

fn print_header(header: &BlockHeader) {
    println!("{}", format!("📦 Block #{}", header.number).bright_cyan().bold());
    println!("  Hash:      {:#x}", header.hash);
    println!("  Parent:    {:#x}", header.parent_hash);
    println!("  Timestamp: {}", format_timestamp(header.timestamp));
}

fn range_table(txs: &[Transaction]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(
            ["Block", "Hash", "From", "To", "Amount", "Type", "Status", "Date"].map(|title| {
                Cell::new(title)
                    .fg(TableColor::Cyan)
                    .add_attribute(Attribute::Bold)
            }),
        );

    for tx in txs {
        table.add_row(vec![
            Cell::new(format!("#{}", tx.block_number)).fg(TableColor::White),
            Cell::new(short_hex(tx.hash.as_slice())),
            Cell::new(short_hex(tx.from_address.as_slice())),
            Cell::new(short_hex(tx.to_address.as_slice())),
            Cell::new(tx.amount.to_string()),
            Cell::new(tx.tx_type.to_string()),
            Cell::new(tx.status.to_string()).fg(status_color(tx.status)),
            Cell::new(format_timestamp(tx.timestamp)).fg(TableColor::Grey),
        ]);
    }
    table
}

fn status_color(status: TxStatus) -> TableColor {
    match status {
        TxStatus::Unconfirmed => TableColor::Yellow,
        TxStatus::Confirmed | TxStatus::Safe => TableColor::Green,
        TxStatus::Finalized => TableColor::Blue,
        TxStatus::FallenBack => TableColor::Red,
    }
}

fn short_hex(bytes: &[u8]) -> String {
    let encoded = hex::encode(bytes);
    if encoded.len() > 16 {
        format!("0x{}...{}", &encoded[..6], &encoded[encoded.len() - 4..])
    } else {
        format!("0x{}", encoded)
    }
}

fn format_timestamp(timestamp: u64) -> String {
    use chrono::DateTime;

    i64::try_from(timestamp)
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "Invalid".to_string())
}

//! Transaction model stored in tenant partitions
use crate::error::LedgerError;
use alloy_primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Confirmation status of a stored transaction.
///
/// Forward order is `Unconfirmed → Confirmed → Safe → Finalized`.
/// `FallenBack` is a side exit reachable from every non-terminal state.
/// The numeric codes are what the store persists; `FallenBack` carries the
/// highest code so that a `max(status, ..)` update never displaces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxStatus {
    Unconfirmed,
    Confirmed,
    Safe,
    Finalized,
    FallenBack,
}

impl TxStatus {
    pub const fn code(self) -> i64 {
        match self {
            TxStatus::Unconfirmed => 0,
            TxStatus::Confirmed => 1,
            TxStatus::Safe => 2,
            TxStatus::Finalized => 3,
            TxStatus::FallenBack => 4,
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, TxStatus::Finalized | TxStatus::FallenBack)
    }

    /// Whether the state machine permits moving from `self` to `next`.
    /// Re-applying the current state is allowed and changes nothing.
    pub fn can_transition_to(self, next: TxStatus) -> bool {
        if self == next {
            return true;
        }
        if self.is_terminal() {
            return false;
        }
        match next {
            TxStatus::FallenBack => true,
            _ => next.code() > self.code(),
        }
    }
}

impl TryFrom<i64> for TxStatus {
    type Error = LedgerError;

    fn try_from(code: i64) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(TxStatus::Unconfirmed),
            1 => Ok(TxStatus::Confirmed),
            2 => Ok(TxStatus::Safe),
            3 => Ok(TxStatus::Finalized),
            4 => Ok(TxStatus::FallenBack),
            other => Err(LedgerError::Corrupt(format!("unknown status code {}", other))),
        }
    }
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TxStatus::Unconfirmed => "unconfirmed",
            TxStatus::Confirmed => "confirmed",
            TxStatus::Safe => "safe",
            TxStatus::Finalized => "finalized",
            TxStatus::FallenBack => "fallen-back",
        };
        f.write_str(name)
    }
}

/// Kind of value movement a transaction represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionType {
    NativeTransfer,
    TokenTransfer,
    NftTransfer,
    ContractCall,
}

impl TransactionType {
    pub const fn code(self) -> i64 {
        match self {
            TransactionType::NativeTransfer => 0,
            TransactionType::TokenTransfer => 1,
            TransactionType::NftTransfer => 2,
            TransactionType::ContractCall => 3,
        }
    }
}

impl TryFrom<i64> for TransactionType {
    type Error = LedgerError;

    fn try_from(code: i64) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(TransactionType::NativeTransfer),
            1 => Ok(TransactionType::TokenTransfer),
            2 => Ok(TransactionType::NftTransfer),
            3 => Ok(TransactionType::ContractCall),
            other => Err(LedgerError::Corrupt(format!(
                "unknown transaction type code {}",
                other
            ))),
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionType::NativeTransfer => "native",
            TransactionType::TokenTransfer => "token",
            TransactionType::NftTransfer => "nft",
            TransactionType::ContractCall => "call",
        };
        f.write_str(name)
    }
}

/// Token metadata attached to token and NFT transfers.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenInfo {
    pub address: Option<Address>,
    pub id: Option<String>,
    pub meta: Option<String>,
}

/// One account transaction as stored in a tenant partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Globally unique record identifier (partition primary key). Imported
    /// records without one are given a fresh identifier.
    #[serde(default = "Uuid::new_v4")]
    pub guid: Uuid,
    pub block_hash: B256,
    pub block_number: u64,
    /// Transaction hash, unique within a partition.
    pub hash: B256,
    pub from_address: Address,
    pub to_address: Address,
    #[serde(default)]
    pub token: TokenInfo,
    pub fee: U256,
    pub amount: U256,
    pub status: TxStatus,
    pub tx_type: TransactionType,
    pub timestamp: u64,
}

impl Transaction {
    /// Creates an unconfirmed native transfer with a fresh record identifier.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        block_hash: B256,
        block_number: u64,
        hash: B256,
        from_address: Address,
        to_address: Address,
        amount: U256,
        fee: U256,
        timestamp: u64,
    ) -> Self {
        Transaction {
            guid: Uuid::new_v4(),
            block_hash,
            block_number,
            hash,
            from_address,
            to_address,
            token: TokenInfo::default(),
            fee,
            amount,
            status: TxStatus::Unconfirmed,
            tx_type: TransactionType::NativeTransfer,
            timestamp,
        }
    }

    pub fn with_token(mut self, tx_type: TransactionType, token: TokenInfo) -> Self {
        self.tx_type = tx_type;
        self.token = token;
        self
    }

    pub fn with_status(mut self, status: TxStatus) -> Self {
        self.status = status;
        self
    }

    pub fn hash_str(&self) -> String {
        format!("{:#x}", self.hash)
    }
}

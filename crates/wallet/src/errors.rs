use hdsync_storage::StoreError;
use hdsync_types::{HdAccountId, SlotId, WalletId};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WalletError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Keystore error: {0}")]
    Keystore(#[from] KeystoreError),

    #[error(transparent)]
    Apply(#[from] ApplyBlockError),

    #[error(transparent)]
    ApplyBlocks(#[from] ApplyBlocksError),

    #[error("Invalid private key: {0}")]
    InvalidPrivateKey(String),

    #[error("Encryption error: {0}")]
    EncryptionError(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Logging setup failed: {0}")]
    Logging(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, WalletError>;

/// Failure of a single block application or fork switch.
#[derive(Error, Debug)]
pub enum ApplyBlockError {
    /// Two wallets claimed the same account in one block.
    #[error("account {account} claimed by wallet {first} and wallet {second}")]
    DuplicateAccount {
        account: HdAccountId,
        first: WalletId,
        second: WalletId,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ApplyBlockError {
    /// Whether the store refused the command and left its state untouched.
    pub fn is_rejection(&self) -> bool {
        match self {
            ApplyBlockError::DuplicateAccount { .. } => true,
            ApplyBlockError::Store(err) => err.is_rejection(),
        }
    }
}

/// A sequence of blocks stopped part way.
#[derive(Error, Debug)]
#[error("{}: {cause}", progress(.applied_up_to))]
pub struct ApplyBlocksError {
    /// Slot of the last block that was applied, if any.
    pub applied_up_to: Option<SlotId>,
    #[source]
    pub cause: ApplyBlockError,
}

fn progress(applied_up_to: &Option<SlotId>) -> String {
    match applied_up_to {
        Some(slot) => format!("applied up to slot {slot}"),
        None => "no block applied".to_string(),
    }
}

#[derive(Error, Debug)]
pub enum KeystoreError {
    #[error("key file {} already exists", .0.display())]
    AlreadyExists(PathBuf),

    #[error("unsupported key file version {found} (expected {expected})")]
    UnsupportedVersion { found: u8, expected: u8 },

    #[error("Invalid private key: {0}")]
    InvalidKey(String),

    #[error("key file names wallet {stored} but its key belongs to {derived}")]
    WalletMismatch { stored: WalletId, derived: WalletId },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

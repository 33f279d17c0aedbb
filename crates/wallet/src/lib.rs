//! HD wallet block application and chain reorganisation.
//!
//! Resolves the credentials of every registered wallet, projects each
//! resolved block onto the accounts those credentials recognise and hands
//! the result to the checkpointing store as one atomic command.

pub mod applier;
pub mod cli;
pub mod config;
pub mod credentials;
pub mod crypto;
pub mod errors;
pub mod keystore;
pub mod prefilter;
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use applier::BlockApplier;
pub use config::{init_logging, LogFormat, StoreBackend, SyncConfig};
pub use credentials::{resolve_credentials, ResolvedCredentials};
pub use crypto::{address_owner, derive_address, Credential};
pub use errors::*;
pub use keystore::{FileKeystore, KeyFile, Keystore, MemoryKeystore};
pub use prefilter::{prefilter_block, BlockFilter, HdPayloadFilter};
#[cfg(any(test, feature = "test-utils"))]
pub use testing::TestApplier;

//! Shared data types for hdsync: chain positions, wallet and account identifiers,
//! resolved blocks as delivered by the node layer, and the per-account
//! prefiltered views the wallet store consumes.

pub mod address;
pub mod amount;
pub mod block;
pub mod ids;
pub mod prefiltered;
pub mod transaction;

pub use address::{
    decode_address, encode_address, Address, AddressError, HdPayload, PAYLOAD_NONCE_BYTES,
    SPENDING_KEY_BYTES,
};
pub use amount::Amount;
pub use block::{BlockHash, ResolvedBlock};
pub use ids::{
    HdAccountId, HdAccountIx, HdAddressIx, IdError, SlotId, WalletId, ACCOUNT_KEY_BYTES, ID_BYTES,
};
pub use prefiltered::{AccountMap, AddressMeta, BlockMeta, PrefilteredBlock, PrefilteredSlot};
pub use transaction::{ResolvedInput, ResolvedTx, TxId, TxIn, TxOut};

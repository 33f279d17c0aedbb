use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Errors produced when parsing identifiers from their text form.
#[derive(Debug, thiserror::Error)]
pub enum IdError {
    #[error("identifier is not valid hexadecimal")]
    InvalidHex(#[from] hex::FromHexError),
    #[error("identifier must be {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("account identifier must look like <wallet-hex>/<index>, got {0:?}")]
    InvalidAccountId(String),
    #[error("outpoint must look like <tx-hex>#<index>, got {0:?}")]
    InvalidOutPoint(String),
}

/// Length of every digest-backed identifier.
pub const ID_BYTES: usize = 32;

pub(crate) fn decode_digest(value: &str) -> Result<[u8; ID_BYTES], IdError> {
    let decoded = hex::decode(value)?;
    let actual = decoded.len();
    decoded.try_into().map_err(|_| IdError::InvalidLength {
        expected: ID_BYTES,
        actual,
    })
}

/// Declares a 32-byte identifier that serialises as lowercase hex.
macro_rules! digest_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, ::serde::Serialize, ::serde::Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(pub [u8; $crate::ids::ID_BYTES]);

        impl $name {
            pub fn as_bytes(&self) -> &[u8; $crate::ids::ID_BYTES] {
                &self.0
            }

            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }

            pub fn from_hex(value: &str) -> Result<Self, $crate::ids::IdError> {
                $crate::ids::decode_digest(value).map(Self)
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_str(&self.to_hex())
            }
        }

        impl ::std::fmt::Debug for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), &self.to_hex()[..12])
            }
        }

        impl ::std::str::FromStr for $name {
            type Err = $crate::ids::IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::from_hex(s)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.to_hex()
            }
        }

        impl TryFrom<String> for $name {
            type Error = $crate::ids::IdError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::from_hex(&value)
            }
        }
    };
}

pub(crate) use digest_id;

digest_id!(
    /// Identifier of a wallet root: the blake3 digest of the root verifying key.
    WalletId
);

impl WalletId {
    /// Derive the wallet identifier for a root verifying key.
    pub fn from_public_key(public_key: &[u8; 32]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"hdsync-wallet-id");
        hasher.update(public_key);
        WalletId(*hasher.finalize().as_bytes())
    }
}

/// Position of a block on the chain. Strictly increasing along a fork.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SlotId(pub u64);

impl SlotId {
    pub const GENESIS: SlotId = SlotId(0);

    pub const fn new(slot: u64) -> Self {
        SlotId(slot)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// The slot immediately after this one.
    pub fn next(self) -> SlotId {
        SlotId(self.0.saturating_add(1))
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Index of an account beneath a wallet root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HdAccountIx(pub u32);

/// Index of an address beneath an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HdAddressIx(pub u32);

/// Fully qualified account: wallet root plus account index.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HdAccountId {
    pub wallet: WalletId,
    pub ix: HdAccountIx,
}

/// Length of the binary key form of [`HdAccountId`].
pub const ACCOUNT_KEY_BYTES: usize = ID_BYTES + 4;

impl HdAccountId {
    pub fn new(wallet: WalletId, ix: u32) -> Self {
        Self {
            wallet,
            ix: HdAccountIx(ix),
        }
    }

    /// Big-endian key form; sorts by wallet then index.
    pub fn to_key_bytes(&self) -> [u8; ACCOUNT_KEY_BYTES] {
        let mut key = [0u8; ACCOUNT_KEY_BYTES];
        key[..ID_BYTES].copy_from_slice(&self.wallet.0);
        key[ID_BYTES..].copy_from_slice(&self.ix.0.to_be_bytes());
        key
    }

    pub fn from_key_bytes(bytes: &[u8]) -> Result<Self, IdError> {
        if bytes.len() != ACCOUNT_KEY_BYTES {
            return Err(IdError::InvalidLength {
                expected: ACCOUNT_KEY_BYTES,
                actual: bytes.len(),
            });
        }
        let mut wallet = [0u8; ID_BYTES];
        wallet.copy_from_slice(&bytes[..ID_BYTES]);
        let mut ix = [0u8; 4];
        ix.copy_from_slice(&bytes[ID_BYTES..]);
        Ok(Self::new(WalletId(wallet), u32::from_be_bytes(ix)))
    }
}

impl fmt::Display for HdAccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.wallet, self.ix.0)
    }
}

impl fmt::Debug for HdAccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HdAccountId({:?}/{})", self.wallet, self.ix.0)
    }
}

impl FromStr for HdAccountId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (wallet, ix) = s
            .split_once('/')
            .ok_or_else(|| IdError::InvalidAccountId(s.to_string()))?;
        let ix = ix
            .parse::<u32>()
            .map_err(|_| IdError::InvalidAccountId(s.to_string()))?;
        Ok(Self::new(WalletId::from_hex(wallet)?, ix))
    }
}

impl From<HdAccountId> for String {
    fn from(value: HdAccountId) -> Self {
        value.to_string()
    }
}

impl TryFrom<String> for HdAccountId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

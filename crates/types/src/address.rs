use serde::{Deserialize, Serialize};
use std::fmt;

/// Errors that can occur when parsing an address string.
#[derive(Debug, thiserror::Error)]
pub enum AddressError {
    #[error("address must start with 'a'")]
    InvalidPrefix,
    #[error("address spending key must be {expected} hex characters, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("address is not valid hexadecimal")]
    InvalidHex(#[from] hex::FromHexError),
    #[error("address payload must carry a 12-byte nonce and a ciphertext")]
    InvalidPayload,
}

/// Number of raw bytes in the spending key part of an address.
pub const SPENDING_KEY_BYTES: usize = 32;
/// Nonce length of an encrypted derivation payload.
pub const PAYLOAD_NONCE_BYTES: usize = 12;

/// Encrypted derivation path attached to an HD address.
///
/// Only the owner of the wallet root credential can decrypt it; everyone
/// else sees opaque bytes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HdPayload {
    pub nonce: [u8; PAYLOAD_NONCE_BYTES],
    pub ciphertext: Vec<u8>,
}

/// Destination of a transaction output.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address {
    pub spending_key: [u8; SPENDING_KEY_BYTES],
    pub payload: Option<HdPayload>,
}

impl Address {
    pub fn new(spending_key: [u8; SPENDING_KEY_BYTES], payload: Option<HdPayload>) -> Self {
        Self {
            spending_key,
            payload,
        }
    }

    /// Address without a derivation payload (not recognisable by any HD wallet).
    pub fn plain(spending_key: [u8; SPENDING_KEY_BYTES]) -> Self {
        Self::new(spending_key, None)
    }

    pub(crate) fn hash_into(&self, hasher: &mut blake3::Hasher) {
        hasher.update(&self.spending_key);
        match &self.payload {
            Some(payload) => {
                hasher.update(&[1]);
                hasher.update(&payload.nonce);
                hasher.update(&(payload.ciphertext.len() as u32).to_be_bytes());
                hasher.update(&payload.ciphertext);
            }
            None => {
                hasher.update(&[0]);
            }
        }
    }
}

/// Encode an address into its text form: `a<spending-key-hex>[.<nonce-hex><ciphertext-hex>]`.
pub fn encode_address(address: &Address) -> String {
    let mut encoded = String::with_capacity(1 + SPENDING_KEY_BYTES * 2);
    encoded.push('a');
    encoded.push_str(&hex::encode(address.spending_key));
    if let Some(payload) = &address.payload {
        encoded.push('.');
        encoded.push_str(&hex::encode(payload.nonce));
        encoded.push_str(&hex::encode(&payload.ciphertext));
    }
    encoded
}

/// Decode the text form produced by [`encode_address`].
pub fn decode_address(address: &str) -> Result<Address, AddressError> {
    let body = address
        .strip_prefix('a')
        .ok_or(AddressError::InvalidPrefix)?;
    let (key_hex, payload_hex) = match body.split_once('.') {
        Some((key, payload)) => (key, Some(payload)),
        None => (body, None),
    };

    if key_hex.len() != SPENDING_KEY_BYTES * 2 {
        return Err(AddressError::InvalidLength {
            expected: SPENDING_KEY_BYTES * 2,
            actual: key_hex.len(),
        });
    }
    let mut spending_key = [0u8; SPENDING_KEY_BYTES];
    hex::decode_to_slice(key_hex, &mut spending_key)?;

    let payload = match payload_hex {
        Some(payload_hex) => {
            let bytes = hex::decode(payload_hex)?;
            if bytes.len() <= PAYLOAD_NONCE_BYTES {
                return Err(AddressError::InvalidPayload);
            }
            let mut nonce = [0u8; PAYLOAD_NONCE_BYTES];
            nonce.copy_from_slice(&bytes[..PAYLOAD_NONCE_BYTES]);
            Some(HdPayload {
                nonce,
                ciphertext: bytes[PAYLOAD_NONCE_BYTES..].to_vec(),
            })
        }
        None => None,
    };

    Ok(Address::new(spending_key, payload))
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&encode_address(self))
    }
}

impl From<Address> for String {
    fn from(value: Address) -> Self {
        encode_address(&value)
    }
}

impl TryFrom<String> for Address {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        decode_address(&value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_survives_text_form() {
        let address = Address::new(
            [0xABu8; SPENDING_KEY_BYTES],
            Some(HdPayload {
                nonce: [7u8; PAYLOAD_NONCE_BYTES],
                ciphertext: vec![1, 2, 3, 4],
            }),
        );
        let encoded = encode_address(&address);
        assert!(encoded.starts_with('a'));
        assert!(encoded.contains('.'));
        assert_eq!(decode_address(&encoded).unwrap(), address);
    }

    #[test]
    fn invalid_prefix_rejected() {
        let bad = "x".to_string() + &"00".repeat(SPENDING_KEY_BYTES);
        let err = decode_address(&bad).unwrap_err();
        assert!(matches!(err, AddressError::InvalidPrefix));
    }

    #[test]
    fn short_key_rejected() {
        let bad = "a".to_string() + &"00".repeat(SPENDING_KEY_BYTES - 1);
        let err = decode_address(&bad).unwrap_err();
        assert!(matches!(err, AddressError::InvalidLength { .. }));
    }

    #[test]
    fn payload_without_ciphertext_rejected() {
        let bad = format!(
            "a{}.{}",
            "00".repeat(SPENDING_KEY_BYTES),
            "11".repeat(PAYLOAD_NONCE_BYTES)
        );
        let err = decode_address(&bad).unwrap_err();
        assert!(matches!(err, AddressError::InvalidPayload));
    }
}

//! Wallet root keys and HD address derivation.
//!
//! A wallet root is an ed25519 seed. Addresses carry an AES-256-GCM encrypted
//! payload holding their (account, address) indices, so that only the root
//! owner can recognise them on chain.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use ed25519_dalek::SigningKey;
use hdsync_types::{Address, HdAccountIx, HdAddressIx, HdPayload, WalletId, PAYLOAD_NONCE_BYTES};
use rand_core::{OsRng, RngCore};
use std::fmt;
use zeroize::Zeroizing;

use crate::errors::{Result, WalletError};

const PAYLOAD_KEY_CONTEXT: &str = "hdsync 2024-06-01 hd payload key";
const DERIVATION_LABEL: &[u8] = b"hdsync_address_derivation";
const PAYLOAD_PLAINTEXT_BYTES: usize = 8;

/// Generate a fresh 32-byte root seed
pub fn generate_master_seed() -> Zeroizing<[u8; 32]> {
    let mut seed = Zeroizing::new([0u8; 32]);
    OsRng.fill_bytes(&mut seed[..]);
    seed
}

/// Key material for one wallet root.
///
/// The seed is wiped on drop and never shows up in `Debug` output.
#[derive(Clone)]
pub struct Credential {
    seed: Zeroizing<[u8; 32]>,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("wallet", &self.wallet_id())
            .field("seed", &"<redacted>")
            .finish()
    }
}

impl Credential {
    pub fn generate() -> Self {
        Self {
            seed: generate_master_seed(),
        }
    }

    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self {
            seed: Zeroizing::new(seed),
        }
    }

    pub fn from_seed_hex(seed_hex: &str) -> Result<Self> {
        let bytes = Zeroizing::new(
            hex::decode(seed_hex).map_err(|err| WalletError::InvalidPrivateKey(err.to_string()))?,
        );
        let seed: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            WalletError::InvalidPrivateKey(format!("expected 32 bytes, got {}", bytes.len()))
        })?;
        Ok(Self::from_seed(seed))
    }

    pub(crate) fn seed(&self) -> &[u8; 32] {
        &self.seed
    }

    pub fn verifying_key(&self) -> [u8; 32] {
        SigningKey::from_bytes(&self.seed).verifying_key().to_bytes()
    }

    pub fn wallet_id(&self) -> WalletId {
        WalletId::from_public_key(&self.verifying_key())
    }

    fn payload_key(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(blake3::derive_key(PAYLOAD_KEY_CONTEXT, &self.seed[..]))
    }

    fn cipher(&self) -> Result<Aes256Gcm> {
        Aes256Gcm::new_from_slice(&self.payload_key()[..])
            .map_err(|err| WalletError::EncryptionError(format!("cipher init failed: {err}")))
    }

    /// Spending key of the address at `account`/`address`.
    ///
    /// Follows the same hash-then-sign-key construction for every index pair.
    pub fn spending_key(&self, account: HdAccountIx, address: HdAddressIx) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.seed[..]);
        hasher.update(&account.0.to_be_bytes());
        hasher.update(&address.0.to_be_bytes());
        hasher.update(DERIVATION_LABEL);

        let derived = Zeroizing::new(*hasher.finalize().as_bytes());
        SigningKey::from_bytes(&derived).verifying_key().to_bytes()
    }

    /// Encrypt the derivation path into an address payload.
    ///
    /// The nonce is a keyed hash of the path, so derivation is deterministic.
    pub fn encrypt_payload(&self, account: HdAccountIx, address: HdAddressIx) -> Result<HdPayload> {
        let plaintext = path_bytes(account, address);
        let digest = blake3::keyed_hash(&self.payload_key(), &plaintext);
        let mut nonce = [0u8; PAYLOAD_NONCE_BYTES];
        nonce.copy_from_slice(&digest.as_bytes()[..PAYLOAD_NONCE_BYTES]);

        let ciphertext = self
            .cipher()?
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_slice())
            .map_err(|err| WalletError::EncryptionError(format!("encryption failed: {err}")))?;
        Ok(HdPayload { nonce, ciphertext })
    }

    /// Recover the derivation path, or `None` when the payload belongs to someone else.
    pub fn decrypt_payload(&self, payload: &HdPayload) -> Option<(HdAccountIx, HdAddressIx)> {
        let cipher = self.cipher().ok()?;
        let plaintext = cipher
            .decrypt(Nonce::from_slice(&payload.nonce), payload.ciphertext.as_slice())
            .ok()?;
        if plaintext.len() != PAYLOAD_PLAINTEXT_BYTES {
            return None;
        }
        let mut account = [0u8; 4];
        let mut address = [0u8; 4];
        account.copy_from_slice(&plaintext[..4]);
        address.copy_from_slice(&plaintext[4..]);
        Some((
            HdAccountIx(u32::from_be_bytes(account)),
            HdAddressIx(u32::from_be_bytes(address)),
        ))
    }
}

fn path_bytes(account: HdAccountIx, address: HdAddressIx) -> [u8; PAYLOAD_PLAINTEXT_BYTES] {
    let mut out = [0u8; PAYLOAD_PLAINTEXT_BYTES];
    out[..4].copy_from_slice(&account.0.to_be_bytes());
    out[4..].copy_from_slice(&address.0.to_be_bytes());
    out
}

/// Derive the HD address at `account`/`address` for a wallet root.
pub fn derive_address(
    credential: &Credential,
    account: HdAccountIx,
    address: HdAddressIx,
) -> Result<Address> {
    let payload = credential.encrypt_payload(account, address)?;
    Ok(Address::new(
        credential.spending_key(account, address),
        Some(payload),
    ))
}

/// The account index an address belongs to under `credential`, if any.
pub fn address_owner(credential: &Credential, address: &Address) -> Option<HdAccountIx> {
    let payload = address.payload.as_ref()?;
    let (account, index) = credential.decrypt_payload(payload)?;
    // A payload copied onto a foreign spending key is not ours.
    (credential.spending_key(account, index) == address.spending_key).then_some(account)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wallet_id_is_stable() {
        let credential = Credential::from_seed([4u8; 32]);
        assert_eq!(credential.wallet_id(), Credential::from_seed([4u8; 32]).wallet_id());
        assert_ne!(credential.wallet_id(), Credential::from_seed([5u8; 32]).wallet_id());
    }

    #[test]
    fn test_derived_address_is_recognised_by_owner_only() {
        let owner = Credential::from_seed([1u8; 32]);
        let stranger = Credential::from_seed([2u8; 32]);
        let address = derive_address(&owner, HdAccountIx(3), HdAddressIx(17)).unwrap();

        assert_eq!(address_owner(&owner, &address), Some(HdAccountIx(3)));
        assert_eq!(address_owner(&stranger, &address), None);
        assert_eq!(
            owner.decrypt_payload(address.payload.as_ref().unwrap()),
            Some((HdAccountIx(3), HdAddressIx(17)))
        );
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let credential = Credential::from_seed([9u8; 32]);
        let a = derive_address(&credential, HdAccountIx(0), HdAddressIx(0)).unwrap();
        let b = derive_address(&credential, HdAccountIx(0), HdAddressIx(0)).unwrap();
        let c = derive_address(&credential, HdAccountIx(0), HdAddressIx(1)).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_plain_and_grafted_addresses_are_not_owned() {
        let credential = Credential::from_seed([6u8; 32]);
        assert_eq!(address_owner(&credential, &Address::plain([6u8; 32])), None);

        let mut grafted = derive_address(&credential, HdAccountIx(1), HdAddressIx(1)).unwrap();
        grafted.spending_key = [0u8; 32];
        assert_eq!(address_owner(&credential, &grafted), None);
    }

    #[test]
    fn test_debug_output_is_redacted() {
        let credential = Credential::from_seed([0xAB; 32]);
        let rendered = format!("{credential:?}");
        assert!(rendered.contains("<redacted>"));
        assert!(!rendered.contains(&hex::encode([0xABu8; 32])));
    }

    #[test]
    fn test_seed_hex_round_trip() {
        let credential = Credential::generate();
        let restored = Credential::from_seed_hex(&hex::encode(credential.seed())).unwrap();
        assert_eq!(restored.wallet_id(), credential.wallet_id());
        assert!(Credential::from_seed_hex("abcd").is_err());
    }
}

//! Credential lookup services.
//!
//! The block applier only ever asks "which credential belongs to this
//! wallet?"; a missing answer is normal (the wallet was imported watch-only,
//! or its key was removed) and is never an error.

use chrono::{serde::ts_seconds, DateTime, Utc};
use hdsync_types::WalletId;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;
use zeroize::Zeroize;

use crate::crypto::Credential;
use crate::errors::KeystoreError;

/// Current on-disk key file schema version.
const KEYFILE_VERSION: u8 = 1;
const KEYFILE_EXTENSION: &str = "key";

pub trait Keystore: Send + Sync {
    /// Credential for `wallet`, or `None` when this keystore does not hold it.
    fn lookup(&self, wallet: &WalletId) -> Option<Credential>;

    /// Store a credential under the wallet id derived from it.
    fn insert(&self, credential: &Credential) -> Result<WalletId, KeystoreError>;

    /// Forget a credential. Returns whether one was stored.
    fn remove(&self, wallet: &WalletId) -> Result<bool, KeystoreError>;
}

/// Keystore holding credentials in process memory only.
#[derive(Default)]
pub struct MemoryKeystore {
    keys: RwLock<HashMap<WalletId, Credential>>,
}

impl MemoryKeystore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.keys.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.read().is_empty()
    }
}

impl Keystore for MemoryKeystore {
    fn lookup(&self, wallet: &WalletId) -> Option<Credential> {
        self.keys.read().get(wallet).cloned()
    }

    fn insert(&self, credential: &Credential) -> Result<WalletId, KeystoreError> {
        let wallet = credential.wallet_id();
        self.keys.write().insert(wallet, credential.clone());
        Ok(wallet)
    }

    fn remove(&self, wallet: &WalletId) -> Result<bool, KeystoreError> {
        Ok(self.keys.write().remove(wallet).is_some())
    }
}

/// Serialized key file written to disk.
#[derive(Debug, Serialize, Deserialize)]
pub struct KeyFile {
    pub version: u8,
    pub wallet_id: WalletId,
    pub public_key_hex: String,
    #[serde(default)]
    pub metadata: KeyMetadata,
    seed_hex: String,
}

/// Metadata describing when the key was created.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct KeyMetadata {
    #[serde(with = "ts_seconds")]
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Default for KeyMetadata {
    fn default() -> Self {
        Self {
            created_at: Utc::now(),
            notes: None,
        }
    }
}

impl Drop for KeyFile {
    fn drop(&mut self) {
        self.seed_hex.zeroize();
    }
}

impl KeyFile {
    pub fn from_credential(credential: &Credential, notes: Option<String>) -> Self {
        Self {
            version: KEYFILE_VERSION,
            wallet_id: credential.wallet_id(),
            public_key_hex: hex::encode(credential.verifying_key()),
            metadata: KeyMetadata {
                created_at: Utc::now(),
                notes,
            },
            seed_hex: hex::encode(credential.seed()),
        }
    }

    /// Persist the key file to disk atomically.
    pub fn save(&self, path: &Path, force: bool) -> Result<(), KeystoreError> {
        if path.exists() && !force {
            return Err(KeystoreError::AlreadyExists(path.to_path_buf()));
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp_path = tmp_path(path);
        let data = serde_json::to_vec_pretty(self)?;
        fs::write(&tmp_path, data)?;
        fs::rename(tmp_path, path)?;
        Ok(())
    }

    /// Load a key file from disk.
    pub fn load(path: &Path) -> Result<Self, KeystoreError> {
        let data = fs::read(path)?;
        let keyfile: KeyFile = serde_json::from_slice(&data)?;
        if keyfile.version != KEYFILE_VERSION {
            return Err(KeystoreError::UnsupportedVersion {
                found: keyfile.version,
                expected: KEYFILE_VERSION,
            });
        }
        Ok(keyfile)
    }

    /// Rebuild the credential and check it matches the recorded wallet.
    pub fn unlock(&self) -> Result<Credential, KeystoreError> {
        let credential = Credential::from_seed_hex(&self.seed_hex)
            .map_err(|err| KeystoreError::InvalidKey(err.to_string()))?;
        let derived = credential.wallet_id();
        if derived != self.wallet_id {
            return Err(KeystoreError::WalletMismatch {
                stored: self.wallet_id,
                derived,
            });
        }
        Ok(credential)
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_os_string();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

/// Keystore backed by a directory of `<wallet-id>.key` JSON files.
pub struct FileKeystore {
    dir: PathBuf,
}

impl FileKeystore {
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, KeystoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn key_path(&self, wallet: &WalletId) -> PathBuf {
        self.dir
            .join(wallet.to_hex())
            .with_extension(KEYFILE_EXTENSION)
    }

    /// Like [`Keystore::lookup`] but surfaces I/O and format problems.
    pub fn load(&self, wallet: &WalletId) -> Result<Option<Credential>, KeystoreError> {
        let path = self.key_path(wallet);
        if !path.exists() {
            return Ok(None);
        }
        let credential = KeyFile::load(&path)?.unlock()?;
        if credential.wallet_id() != *wallet {
            return Err(KeystoreError::WalletMismatch {
                stored: *wallet,
                derived: credential.wallet_id(),
            });
        }
        Ok(Some(credential))
    }

    /// Wallet ids of every key file in the directory.
    pub fn wallet_ids(&self) -> Result<Vec<WalletId>, KeystoreError> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(KEYFILE_EXTENSION) {
                continue;
            }
            let parsed = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(|stem| WalletId::from_hex(stem).ok());
            if let Some(id) = parsed {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }
}

impl Keystore for FileKeystore {
    fn lookup(&self, wallet: &WalletId) -> Option<Credential> {
        match self.load(wallet) {
            Ok(credential) => credential,
            Err(err) => {
                warn!(wallet = %wallet, error = %err, "unreadable key file treated as missing");
                None
            }
        }
    }

    fn insert(&self, credential: &Credential) -> Result<WalletId, KeystoreError> {
        let wallet = credential.wallet_id();
        KeyFile::from_credential(credential, None).save(&self.key_path(&wallet), true)?;
        Ok(wallet)
    }

    fn remove(&self, wallet: &WalletId) -> Result<bool, KeystoreError> {
        let path = self.key_path(wallet);
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(path)?;
        Ok(true)
    }
}

//! Stratum wallets: persisted node keypairs and the genesis balance ledger.
//!
//! Wallet `i` lives at `<dir>/wallet<i>.txt` as 128 lowercase hex characters
//! encoding the 64-byte ed25519 keypair (secret followed by public key).
//! Generation is idempotent: a correctly sized file is always reused.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use ed25519_dalek::{SigningKey, KEYPAIR_LENGTH, SECRET_KEY_LENGTH};
use metrics::counter;
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use stratum_core::{Error, Result};
use tracing::{debug, info};

/// Balance credited to every rich wallet in the genesis ledger.
pub const GENESIS_BALANCE: u64 = 10_000_000_000_000_000_000;

/// Length of a wallet file on disk.
pub const ENCODED_LEN: usize = KEYPAIR_LENGTH * 2;

/// One keypair bound to its wallet index.
#[derive(Debug, Clone)]
pub struct Wallet {
    pub index: u32,
    key: SigningKey,
}

impl Wallet {
    /// Fresh keypair from the OS entropy source.
    pub fn generate(index: u32) -> Result<Self> {
        let mut seed = [0u8; SECRET_KEY_LENGTH];
        OsRng
            .try_fill_bytes(&mut seed)
            .map_err(|e| Error::CryptoFailure(format!("entropy source failed: {}", e)))?;
        Ok(Self { index, key: SigningKey::from_bytes(&seed) })
    }

    /// Decode the hex keypair form produced by [`Wallet::encode`].
    pub fn decode(index: u32, encoded: &[u8]) -> Result<Self> {
        let mut keypair = [0u8; KEYPAIR_LENGTH];
        hex::decode_to_slice(encoded, &mut keypair)
            .map_err(|e| Error::CryptoFailure(format!("wallet {} is not valid hex: {}", index, e)))?;
        let key = SigningKey::from_keypair_bytes(&keypair)
            .map_err(|e| Error::CryptoFailure(format!("wallet {} holds an inconsistent keypair: {}", index, e)))?;
        Ok(Self { index, key })
    }

    pub fn encode(&self) -> String {
        hex::encode(self.key.to_keypair_bytes())
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.key.verifying_key().as_bytes())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Balance {
    pub balance: u64,
}

/// Public key (hex) to balance, ordered so the serialized form is stable.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct GenesisLedger(pub BTreeMap<String, Balance>);

impl GenesisLedger {
    pub fn credit(&mut self, public_key: String) {
        self.0.insert(public_key, Balance { balance: GENESIS_BALANCE });
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_document(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::CryptoFailure(format!("encoding genesis ledger: {}", e)))
    }
}

/// Produces and persists wallets under a single directory.
#[derive(Debug, Clone)]
pub struct Generator {
    dir: PathBuf,
}

impl Generator {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn wallet_path(&self, index: u32) -> PathBuf {
        self.dir.join(format!("wallet{}.txt", index))
    }

    /// Build the genesis ledger for `rich_wallets` funded wallets and return
    /// its serialized form. Index 0 belongs to the bootstrap node and is not
    /// generated here.
    pub fn generate_genesis(&self, rich_wallets: u32) -> Result<String> {
        self.build_ledger(rich_wallets)?.to_document()
    }

    pub fn build_ledger(&self, rich_wallets: u32) -> Result<GenesisLedger> {
        self.ensure_dir()?;
        let mut ledger = GenesisLedger::default();
        for index in 1..rich_wallets {
            let wallet = self.ensure_wallet(index)?;
            ledger.credit(wallet.public_key_hex());
        }
        debug!(dir = %self.dir.display(), wallets = ledger.len(), "genesis ledger built");
        Ok(ledger)
    }

    /// Read wallet `index` if it is present and well formed.
    pub fn load_wallet(&self, index: u32) -> Result<Option<Wallet>> {
        let path = self.wallet_path(index);
        match fs::read(&path) {
            Ok(buf) if buf.len() == ENCODED_LEN => Wallet::decode(index, &buf).map(Some),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(Error::StorageFailure { path, source }),
        }
    }

    fn ensure_dir(&self) -> Result<()> {
        match fs::create_dir_all(&self.dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::PermissionDenied => Err(Error::PermissionDenied { path: self.dir.clone() }),
            Err(source) => Err(Error::StorageUnavailable { path: self.dir.clone(), source }),
        }
    }

    fn ensure_wallet(&self, index: u32) -> Result<Wallet> {
        if let Some(wallet) = self.load_wallet(index)? {
            return Ok(wallet);
        }
        let path = self.wallet_path(index);
        // A wrong-length file is replaced; an absent one is only created if
        // nobody else got there first.
        let replace = path.exists();
        let wallet = Wallet::generate(index)?;
        match self.persist(&path, &wallet, replace) {
            Ok(()) => {
                counter!("wallets_generated_total", 1u64);
                info!(path = %path.display(), "generated wallet");
                Ok(wallet)
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                debug!(path = %path.display(), "wallet written concurrently; reusing it");
                self.load_wallet(index)?.ok_or(Error::StorageFailure { path, source: e })
            }
            Err(source) => Err(Error::StorageFailure { path, source }),
        }
    }

    /// Write through a sibling temp file so readers never see a partial key.
    fn persist(&self, path: &Path, wallet: &Wallet, replace: bool) -> std::io::Result<()> {
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(wallet.encode().as_bytes())?;
        tmp.as_file().sync_all()?;
        if replace {
            tmp.persist(path).map_err(|e| e.error)?;
        } else {
            tmp.persist_noclobber(path).map_err(|e| e.error)?;
        }
        Ok(())
    }
}

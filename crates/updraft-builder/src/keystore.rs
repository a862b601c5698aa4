//! Signing keypairs with rotation support.
//!
//! The store is an append-only list of Ed25519 keypair records persisted as
//! JSON. Records get a dense monotonic index at insertion and are never
//! removed; retiring a key means marking it revoked, which is sticky.
//! Rotation mints replacements so that at least two non-revoked keys exist
//! before any manifest is signed — revoking the newest key must always
//! leave a working fallback.
//!
//! Readers share the lock; writers take it exclusively and persist before
//! releasing, so the on-disk file never interleaves two writers.

use crate::error::{BuilderError, Result};
use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info};
use updraft_core::sign;

/// Key algorithm tag stored on every record.
pub const KEY_TYPE_ED25519: &str = "ed25519";

/// One signing keypair and its audit metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyRecord {
    /// Dense insertion index, starting at 1; defines audit order.
    pub index: u64,
    /// Unix timestamp (seconds) of insertion.
    pub created_at: u64,
    /// Base64 public key.
    pub public: String,
    /// Base64 private key.
    pub private: String,
    /// Sticky revocation flag.
    pub revoked: bool,
    /// Key algorithm, currently always [`KEY_TYPE_ED25519`].
    pub key_type: String,
}

/// Persistent append-only keypair collection.
#[derive(Debug)]
pub struct KeyStore {
    path: PathBuf,
    records: RwLock<Vec<KeyRecord>>,
}

impl KeyStore {
    /// Open the store at `path`, loading existing records if present.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let records = if path.exists() {
            let raw = fs::read(&path)?;
            serde_json::from_slice(&raw)?
        } else {
            Vec::new()
        };
        Ok(KeyStore {
            path,
            records: RwLock::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a keypair and return its index.
    pub fn add(&self, public: String, private: String, key_type: &str) -> Result<u64> {
        let mut records = self.write()?;
        let index = records.len() as u64 + 1;
        info!(index, %public, "adding key to store");
        records.push(KeyRecord {
            index,
            created_at: unix_now(),
            public,
            private,
            revoked: false,
            key_type: key_type.to_string(),
        });
        self.persist(&records)?;
        Ok(index)
    }

    /// Mint `count` fresh Ed25519 keypairs.
    pub fn make_keys(&self, count: usize) -> Result<()> {
        info!(count, "creating signing keys");
        for _ in 0..count {
            let signing = SigningKey::generate(&mut OsRng);
            self.add(
                sign::encode_verifying_key(&signing.verifying_key()),
                sign::encode_signing_key(&signing),
                KEY_TYPE_ED25519,
            )?;
        }
        Ok(())
    }

    /// Base64 public keys of all live records, oldest first.
    pub fn public_keys(&self) -> Result<Vec<String>> {
        Ok(self.live_records(|record| record.public.clone())?)
    }

    /// Base64 private keys of all live records, oldest first.
    pub fn private_keys(&self) -> Result<Vec<String>> {
        Ok(self.live_records(|record| record.private.clone())?)
    }

    /// Decoded signing keys for manifest signing, oldest first.
    ///
    /// Refuses to emit a signer set smaller than two; callers that revoked
    /// down to one live key must mint replacements first.
    pub fn signing_keys(&self) -> Result<Vec<SigningKey>> {
        let encoded = self.private_keys()?;
        if encoded.len() < 2 {
            return Err(BuilderError::NotEnoughSigningKeys {
                have: encoded.len(),
            });
        }
        encoded
            .iter()
            .map(|raw| sign::decode_signing_key(raw).map_err(BuilderError::from))
            .collect()
    }

    /// Number of non-revoked records.
    pub fn live_count(&self) -> Result<usize> {
        Ok(self.read()?.iter().filter(|r| !r.revoked).count())
    }

    /// Mark the `count` oldest non-revoked records revoked. Returns how many
    /// records actually changed.
    pub fn revoke(&self, count: usize) -> Result<usize> {
        let mut records = self.write()?;
        let mut changed = 0;
        for record in records.iter_mut() {
            if changed == count {
                break;
            }
            if !record.revoked {
                record.revoked = true;
                changed += 1;
                debug!(index = record.index, "revoked key");
            }
        }
        self.persist(&records)?;
        Ok(changed)
    }

    /// The most recently revoked record, if any.
    pub fn last_revoked(&self) -> Result<Option<KeyRecord>> {
        Ok(self
            .read()?
            .iter()
            .filter(|record| record.revoked)
            .max_by_key(|record| record.index)
            .cloned())
    }

    fn live_records<T>(&self, project: impl Fn(&KeyRecord) -> T) -> Result<Vec<T>> {
        Ok(self
            .read()?
            .iter()
            .filter(|record| !record.revoked)
            .map(project)
            .collect())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Vec<KeyRecord>>> {
        self.records.read().map_err(|_| BuilderError::KeyStoreLock)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Vec<KeyRecord>>> {
        self.records.write().map_err(|_| BuilderError::KeyStoreLock)
    }

    fn persist(&self, records: &[KeyRecord]) -> Result<()> {
        fs::write(&self.path, serde_json::to_vec_pretty(records)?)?;
        Ok(())
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, KeyStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::open(dir.path().join("keys.json")).unwrap();
        (dir, store)
    }

    #[test]
    fn indices_are_dense_and_ordered() {
        let (_dir, store) = store();
        store.make_keys(3).unwrap();
        let publics = store.public_keys().unwrap();
        assert_eq!(publics.len(), 3);
        // All distinct keys.
        assert_ne!(publics[0], publics[1]);
        assert_ne!(publics[1], publics[2]);
    }

    #[test]
    fn revocation_is_oldest_first_and_sticky() {
        let (_dir, store) = store();
        store.make_keys(3).unwrap();
        let before = store.public_keys().unwrap();

        assert_eq!(store.revoke(1).unwrap(), 1);
        let after = store.public_keys().unwrap();
        assert_eq!(after, before[1..].to_vec());

        let revoked = store.last_revoked().unwrap().unwrap();
        assert_eq!(revoked.public, before[0]);
        assert_eq!(revoked.index, 1);

        // Revoking again moves to the next-oldest, never resurrects.
        assert_eq!(store.revoke(1).unwrap(), 1);
        assert_eq!(store.last_revoked().unwrap().unwrap().index, 2);
        assert_eq!(store.live_count().unwrap(), 1);
    }

    #[test]
    fn rotation_keeps_live_count_stable() {
        let (_dir, store) = store();
        store.make_keys(3).unwrap();
        store.revoke(1).unwrap();
        store.make_keys(1).unwrap();
        assert_eq!(store.live_count().unwrap(), 3);
        assert!(store.live_count().unwrap() >= 2);
    }

    #[test]
    fn refuses_signer_set_below_two() {
        let (_dir, store) = store();
        store.make_keys(2).unwrap();
        assert_eq!(store.signing_keys().unwrap().len(), 2);

        store.revoke(1).unwrap();
        assert!(matches!(
            store.signing_keys(),
            Err(BuilderError::NotEnoughSigningKeys { have: 1 })
        ));
    }

    #[test]
    fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.json");
        {
            let store = KeyStore::open(&path).unwrap();
            store.make_keys(2).unwrap();
            store.revoke(1).unwrap();
        }
        let store = KeyStore::open(&path).unwrap();
        assert_eq!(store.live_count().unwrap(), 1);
        assert_eq!(store.last_revoked().unwrap().unwrap().index, 1);
        // Fresh indices continue densely after reload.
        store.make_keys(1).unwrap();
        assert_eq!(store.public_keys().unwrap().len(), 2);
    }
}

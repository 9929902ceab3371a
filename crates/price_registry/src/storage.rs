//! Artifact store backends
//!
//! Both backends are append-only: a publish allocates the next version of its
//! kind and never replaces an existing one.

use crate::errors::{RegistryError, Result};
use crate::types::{ArtifactKind, ArtifactRecord, ArtifactVersion};
use parking_lot::RwLock;
use sled::{Db, Tree};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Versioned blob store
pub trait ArtifactStore: Send + Sync {
    /// Store `payload` as the next version of `kind`
    fn publish(&self, kind: ArtifactKind, payload: Vec<u8>) -> Result<ArtifactVersion>;

    /// Fetch and integrity-check one version
    fn fetch(&self, version: ArtifactVersion) -> Result<ArtifactRecord>;

    fn latest(&self, kind: ArtifactKind) -> Result<Option<ArtifactVersion>>;

    /// All versions of `kind`, oldest first
    fn versions(&self, kind: ArtifactKind) -> Result<Vec<ArtifactVersion>>;
}

/// In-memory backend for tests and one-shot runs
#[derive(Default, Clone)]
pub struct MemoryArtifactStore {
    records: Arc<RwLock<BTreeMap<ArtifactKind, BTreeMap<u64, ArtifactRecord>>>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace a stored payload without updating its digest
    #[cfg(test)]
    pub(crate) fn tamper(&self, version: ArtifactVersion, payload: Vec<u8>) {
        if let Some(record) = self
            .records
            .write()
            .get_mut(&version.kind)
            .and_then(|v| v.get_mut(&version.number))
        {
            record.payload = payload;
        }
    }
}

impl ArtifactStore for MemoryArtifactStore {
    fn publish(&self, kind: ArtifactKind, payload: Vec<u8>) -> Result<ArtifactVersion> {
        let mut records = self.records.write();
        let versions = records.entry(kind).or_default();
        let number = versions.keys().next_back().map_or(1, |n| n + 1);
        let version = ArtifactVersion::new(kind, number);
        versions.insert(number, ArtifactRecord::new(version, payload));
        debug!("Published {}", version);
        Ok(version)
    }

    fn fetch(&self, version: ArtifactVersion) -> Result<ArtifactRecord> {
        let record = self
            .records
            .read()
            .get(&version.kind)
            .and_then(|v| v.get(&version.number))
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(version.to_string()))?;
        record.verify()?;
        Ok(record)
    }

    fn latest(&self, kind: ArtifactKind) -> Result<Option<ArtifactVersion>> {
        Ok(self
            .records
            .read()
            .get(&kind)
            .and_then(|v| v.keys().next_back())
            .map(|n| ArtifactVersion::new(kind, *n)))
    }

    fn versions(&self, kind: ArtifactKind) -> Result<Vec<ArtifactVersion>> {
        Ok(self
            .records
            .read()
            .get(&kind)
            .map(|v| v.keys().map(|n| ArtifactVersion::new(kind, *n)).collect())
            .unwrap_or_default())
    }
}

/// Persistent backend: one sled tree per kind, keyed by big-endian version number
pub struct SledArtifactStore {
    db: Db,
    schemas: Tree,
    encoder_sets: Tree,
    models: Tree,
}

impl SledArtifactStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path.as_ref())?;
        let schemas = db.open_tree("schemas")?;
        let encoder_sets = db.open_tree("encoder_sets")?;
        let models = db.open_tree("models")?;
        info!("Artifact store opened at {}", path.as_ref().display());
        Ok(Self {
            db,
            schemas,
            encoder_sets,
            models,
        })
    }

    fn tree(&self, kind: ArtifactKind) -> &Tree {
        match kind {
            ArtifactKind::Schema => &self.schemas,
            ArtifactKind::EncoderSet => &self.encoder_sets,
            ArtifactKind::Model => &self.models,
        }
    }

    fn decode_key(kind: ArtifactKind, key: &[u8]) -> Result<u64> {
        let bytes: [u8; 8] = key.try_into().map_err(|_| RegistryError::Corrupted {
            version: kind.to_string(),
            detail: format!("key of {} bytes", key.len()),
        })?;
        Ok(u64::from_be_bytes(bytes))
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    /// Overwrite raw stored bytes
    #[cfg(test)]
    pub(crate) fn tamper(&self, version: ArtifactVersion, bytes: &[u8]) -> Result<()> {
        self.tree(version.kind).insert(version.number.to_be_bytes(), bytes)?;
        Ok(())
    }
}

impl ArtifactStore for SledArtifactStore {
    fn publish(&self, kind: ArtifactKind, payload: Vec<u8>) -> Result<ArtifactVersion> {
        let tree = self.tree(kind);
        loop {
            let number = match tree.last()? {
                Some((key, _)) => Self::decode_key(kind, &key)? + 1,
                None => 1,
            };
            let version = ArtifactVersion::new(kind, number);
            let bytes = bincode::serialize(&ArtifactRecord::new(version, payload.clone()))?;

            // only succeeds if no other writer took `number` in the meantime
            match tree.compare_and_swap(number.to_be_bytes(), None as Option<&[u8]>, Some(bytes))? {
                Ok(()) => {
                    tree.flush()?;
                    debug!("Published {}", version);
                    return Ok(version);
                }
                Err(_) => continue,
            }
        }
    }

    fn fetch(&self, version: ArtifactVersion) -> Result<ArtifactRecord> {
        let bytes = self
            .tree(version.kind)
            .get(version.number.to_be_bytes())?
            .ok_or_else(|| RegistryError::NotFound(version.to_string()))?;
        let record: ArtifactRecord = bincode::deserialize(&bytes).map_err(|e| RegistryError::Corrupted {
            version: version.to_string(),
            detail: e.to_string(),
        })?;
        if record.version != version {
            return Err(RegistryError::Corrupted {
                version: version.to_string(),
                detail: format!("record claims to be {}", record.version),
            });
        }
        record.verify()?;
        Ok(record)
    }

    fn latest(&self, kind: ArtifactKind) -> Result<Option<ArtifactVersion>> {
        self.tree(kind)
            .last()?
            .map(|(key, _)| Ok(ArtifactVersion::new(kind, Self::decode_key(kind, &key)?)))
            .transpose()
    }

    fn versions(&self, kind: ArtifactKind) -> Result<Vec<ArtifactVersion>> {
        self.tree(kind)
            .iter()
            .keys()
            .map(|key| Ok(ArtifactVersion::new(kind, Self::decode_key(kind, &key?)?)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn exercise(store: &dyn ArtifactStore) {
        assert_eq!(store.latest(ArtifactKind::Model).unwrap(), None);

        let a = store.publish(ArtifactKind::EncoderSet, b"first".to_vec()).unwrap();
        let b = store.publish(ArtifactKind::EncoderSet, b"second".to_vec()).unwrap();
        let m = store.publish(ArtifactKind::Model, b"model".to_vec()).unwrap();

        assert_eq!(a.number, 1);
        assert_eq!(b.number, 2);
        assert_eq!(m, ArtifactVersion::new(ArtifactKind::Model, 1));
        assert_eq!(store.latest(ArtifactKind::EncoderSet).unwrap(), Some(b));
        assert_eq!(store.versions(ArtifactKind::EncoderSet).unwrap(), vec![a, b]);

        assert_eq!(store.fetch(a).unwrap().payload, b"first");
        assert_eq!(store.fetch(b).unwrap().payload, b"second");
        assert!(matches!(
            store.fetch(ArtifactVersion::new(ArtifactKind::Schema, 1)),
            Err(RegistryError::NotFound(_))
        ));
    }

    #[test]
    fn memory_store_appends_versions() {
        exercise(&MemoryArtifactStore::new());
    }

    #[test]
    fn sled_store_appends_versions() {
        let dir = tempdir().unwrap();
        exercise(&SledArtifactStore::open(dir.path()).unwrap());
    }

    #[test]
    fn sled_store_survives_reopen() {
        let dir = tempdir().unwrap();
        let version = {
            let store = SledArtifactStore::open(dir.path()).unwrap();
            let v = store.publish(ArtifactKind::Schema, b"schema".to_vec()).unwrap();
            store.flush().unwrap();
            v
        };
        let store = SledArtifactStore::open(dir.path()).unwrap();
        assert_eq!(store.fetch(version).unwrap().payload, b"schema");
        assert_eq!(store.publish(ArtifactKind::Schema, b"next".to_vec()).unwrap().number, 2);
    }

    #[test]
    fn corrupted_records_are_detected() {
        let memory = MemoryArtifactStore::new();
        let v = memory.publish(ArtifactKind::Model, b"weights".to_vec()).unwrap();
        memory.tamper(v, b"other".to_vec());
        assert!(matches!(memory.fetch(v), Err(RegistryError::Corrupted { .. })));

        let dir = tempdir().unwrap();
        let sled_store = SledArtifactStore::open(dir.path()).unwrap();
        let v = sled_store.publish(ArtifactKind::Model, b"weights".to_vec()).unwrap();
        sled_store.tamper(v, b"not bincode").unwrap();
        assert!(matches!(sled_store.fetch(v), Err(RegistryError::Corrupted { .. })));
    }

    #[test]
    fn concurrent_publishes_get_distinct_versions() {
        let store = MemoryArtifactStore::new();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || store.publish(ArtifactKind::EncoderSet, vec![i]).unwrap())
            })
            .collect();
        let mut numbers: Vec<u64> = handles.into_iter().map(|h| h.join().unwrap().number).collect();
        numbers.sort_unstable();
        assert_eq!(numbers, (1..=8).collect::<Vec<_>>());
    }
}

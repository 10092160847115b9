//! File metadata registry: FileId → where the ciphertext lives and how to open it.
//!
//! Records never hold the passphrase, the derived key or the plaintext
//! access password. Records are immutable once created.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::SystemTime;

use sealdrop_core::{BlobRef, FileId, SealdropError, SealdropResult};
use sealdrop_crypto::{AccessHash, Iv, Salt};

/// Everything a recipient needs, besides the passphrase, to decrypt a file
#[derive(Debug, Clone)]
pub struct MetadataRecord {
    pub blob: BlobRef,
    pub iv: Iv,
    pub salt: Option<Salt>,
    /// Display-only, already sanitized
    pub filename: String,
    /// Present when the uploader was issued an access password
    pub access: Option<AccessHash>,
    /// Plaintext bytes (ciphertext bytes for sealed uploads)
    pub size_hint: u64,
    pub created_at: SystemTime,
}

pub trait MetadataRegistry: Send + Sync + 'static {
    /// Insert a record. Fails with `DuplicateId` if `id` is already taken.
    fn create(&self, id: FileId, record: MetadataRecord) -> SealdropResult<()>;

    /// Fetch a record. Unknown ids are `NotFound`.
    fn lookup(&self, id: &FileId) -> SealdropResult<MetadataRecord>;

    fn len(&self) -> SealdropResult<usize>;

    fn is_empty(&self) -> SealdropResult<bool> {
        Ok(self.len()? == 0)
    }
}

/// Process-local registry
#[derive(Default)]
pub struct MemoryRegistry {
    records: RwLock<HashMap<FileId, MetadataRecord>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> SealdropError {
    SealdropError::Storage("metadata registry lock poisoned".into())
}

impl MetadataRegistry for MemoryRegistry {
    fn create(&self, id: FileId, record: MetadataRecord) -> SealdropResult<()> {
        let mut records = self.records.write().map_err(|_| poisoned())?;
        if records.contains_key(&id) {
            return Err(SealdropError::DuplicateId(id.to_string()));
        }
        records.insert(id, record);
        Ok(())
    }

    fn lookup(&self, id: &FileId) -> SealdropResult<MetadataRecord> {
        let records = self.records.read().map_err(|_| poisoned())?;
        records
            .get(id)
            .cloned()
            .ok_or_else(|| SealdropError::NotFound(format!("file {id}")))
    }

    fn len(&self) -> SealdropResult<usize> {
        let records = self.records.read().map_err(|_| poisoned())?;
        Ok(records.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use sealdrop_core::ErrorKind;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn record(name: &str) -> MetadataRecord {
        MetadataRecord {
            blob: BlobRef::generate(),
            iv: Iv::generate().unwrap(),
            salt: Some(Salt::generate().unwrap()),
            filename: name.into(),
            access: None,
            size_hint: 42,
            created_at: SystemTime::now(),
        }
    }

    #[test]
    fn test_create_then_lookup() {
        let reg = MemoryRegistry::new();
        let id = FileId::generate();
        let rec = record("report.pdf");
        let blob = rec.blob.clone();

        reg.create(id, rec).unwrap();
        let found = reg.lookup(&id).unwrap();
        assert_eq!(found.blob, blob);
        assert_eq!(found.filename, "report.pdf");
        assert_eq!(found.size_hint, 42);
        assert_eq!(reg.len().unwrap(), 1);
    }

    #[test]
    fn test_unknown_id_is_not_found() {
        let reg = MemoryRegistry::new();
        let err = reg.lookup(&FileId::generate()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(reg.is_empty().unwrap());
    }

    #[test]
    fn test_duplicate_id_rejected_and_first_kept() {
        let reg = MemoryRegistry::new();
        let id = FileId::generate();
        reg.create(id, record("first")).unwrap();

        let err = reg.create(id, record("second")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DuplicateId);
        assert_eq!(reg.lookup(&id).unwrap().filename, "first");
        assert_eq!(reg.len().unwrap(), 1);
    }

    #[test]
    fn test_concurrent_creates_do_not_interfere() {
        let reg = Arc::new(MemoryRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let reg = Arc::clone(&reg);
                std::thread::spawn(move || {
                    (0..100)
                        .map(|i| {
                            let id = FileId::generate();
                            reg.create(id, record(&format!("t{t}-{i}"))).unwrap();
                            (id, format!("t{t}-{i}"))
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut all = Vec::new();
        for h in handles {
            all.extend(h.join().unwrap());
        }
        assert_eq!(reg.len().unwrap(), 800);
        for (id, name) in all {
            assert_eq!(reg.lookup(&id).unwrap().filename, name);
        }
    }

    #[test]
    fn test_poisoned_lock_surfaces_as_storage_error() {
        let reg = Arc::new(MemoryRegistry::new());
        let poisoner = Arc::clone(&reg);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.records.write().unwrap();
            panic!("writer died holding the lock");
        })
        .join();

        assert_eq!(reg.len().unwrap_err().kind(), ErrorKind::Storage);
        assert_eq!(reg.is_empty().unwrap_err().kind(), ErrorKind::Storage);
        let err = reg.create(FileId::generate(), record("late")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Storage);
        let err = reg.lookup(&FileId::generate()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Storage);
    }

    proptest! {
        #[test]
        fn prop_generated_ids_are_distinct(n in 1usize..2000) {
            let ids: HashSet<FileId> = (0..n).map(|_| FileId::generate()).collect();
            prop_assert_eq!(ids.len(), n);
        }
    }
}

use std::collections::HashMap;

use parking_lot::RwLock;

use super::merge::{MergeOperand, MetadataMergeOperator};
use super::{MetadataError, MetadataResult};

/// Key-value store holding one serialized metadata record per path
///
/// `merge` must fold the operand into the stored value atomically with respect
/// to every other operation on the same key and return the folded value.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> MetadataResult<String>;

    fn put(&self, key: &str, value: String) -> MetadataResult<()>;

    /// Put only if the key is absent (`AlreadyExists` otherwise)
    fn put_no_exist(&self, key: &str, value: String) -> MetadataResult<()>;

    /// Remove a key (`NotFound` if absent)
    fn remove(&self, key: &str) -> MetadataResult<()>;

    fn exists(&self, key: &str) -> bool;

    /// Fold a serialized operand into the stored value and return the result
    fn merge(&self, key: &str, operand: &str) -> MetadataResult<String>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory store with the metadata merge operator attached
pub struct MemoryKvStore {
    entries: RwLock<HashMap<String, String>>,
    operator: MetadataMergeOperator,
}

impl MemoryKvStore {
    pub fn new(operator: MetadataMergeOperator) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            operator,
        }
    }
}

impl KvStore for MemoryKvStore {
    fn get(&self, key: &str) -> MetadataResult<String> {
        self.entries
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| MetadataError::NotFound(key.to_string()))
    }

    fn put(&self, key: &str, value: String) -> MetadataResult<()> {
        self.entries.write().insert(key.to_string(), value);
        Ok(())
    }

    fn put_no_exist(&self, key: &str, value: String) -> MetadataResult<()> {
        let mut entries = self.entries.write();
        if entries.contains_key(key) {
            return Err(MetadataError::AlreadyExists(key.to_string()));
        }
        entries.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> MetadataResult<()> {
        self.entries
            .write()
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| MetadataError::NotFound(key.to_string()))
    }

    fn exists(&self, key: &str) -> bool {
        self.entries.read().contains_key(key)
    }

    fn merge(&self, key: &str, operand: &str) -> MetadataResult<String> {
        let operand = MergeOperand::deserialize(operand)?;

        let mut entries = self.entries.write();
        let merged = self.operator.full_merge(
            key,
            entries.get(key).map(String::as_str),
            std::slice::from_ref(&operand),
        )?;
        entries.insert(key.to_string(), merged.clone());
        Ok(merged)
    }

    fn len(&self) -> usize {
        self.entries.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::types::{Metadata, MetadataFields};
    use std::sync::Arc;

    fn store() -> MemoryKvStore {
        MemoryKvStore::new(MetadataMergeOperator::new(MetadataFields::default()))
    }

    #[test]
    fn test_basic_operations() {
        let kv = store();
        assert!(kv.is_empty());
        assert!(matches!(kv.get("/a"), Err(MetadataError::NotFound(_))));

        kv.put("/a", "1|2".to_string()).unwrap();
        assert_eq!(kv.get("/a").unwrap(), "1|2");
        assert!(kv.exists("/a"));

        assert!(matches!(
            kv.put_no_exist("/a", "1|3".to_string()),
            Err(MetadataError::AlreadyExists(_))
        ));
        assert_eq!(kv.get("/a").unwrap(), "1|2");

        kv.remove("/a").unwrap();
        assert!(matches!(kv.remove("/a"), Err(MetadataError::NotFound(_))));
    }

    #[test]
    fn test_merge_returns_folded_value() {
        let kv = store();
        kv.put("/f", "33188|0".to_string()).unwrap();
        assert_eq!(kv.merge("/f", "i:100,t").unwrap(), "33188|100");
        assert_eq!(kv.merge("/f", "i:50,f").unwrap(), "33188|100");
        assert_eq!(kv.merge("/f", "d:10").unwrap(), "33188|10");
        assert!(kv.merge("/f", "garbage").is_err());
        assert!(matches!(kv.merge("/nope", "i:1,t"), Err(MetadataError::NotFound(_))));
    }

    #[test]
    fn test_concurrent_appends_get_distinct_offsets() {
        let kv = Arc::new(store());
        kv.put("/log", "33188|0".to_string()).unwrap();

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let kv = kv.clone();
                std::thread::spawn(move || {
                    (0..50)
                        .map(|_| {
                            let record = kv.merge("/log", "i:10,t").unwrap();
                            Metadata::deserialize(&record, &MetadataFields::default())
                                .unwrap()
                                .size
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut sizes: Vec<u64> = threads.into_iter().flat_map(|t| t.join().unwrap()).collect();
        sizes.sort_unstable();
        sizes.dedup();
        assert_eq!(sizes.len(), 400);
        assert_eq!(*sizes.last().unwrap(), 4000);
    }
}

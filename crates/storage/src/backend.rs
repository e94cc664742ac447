//! The sealed storage backend enum.
//!
//! Storage is polymorphic over exactly three shapes, chosen once at
//! `TxnProcessor` construction and never again. A `dyn Storage` trait object
//! would force every backend through one interface even though each
//! protocol only ever calls the methods its own backend exposes; a sealed
//! enum lets each variant keep its own inherent API while giving callers a
//! single type to hold and match on.

use crate::{ClusteredStore, MvccStore, SingleVersionStore};

/// One of the three storage shapes a `TxnProcessor` can be built over.
pub enum StorageBackend {
    /// Backs Serial, 2PL-X, and 2PL-SX.
    Single(SingleVersionStore),
    /// Backs MVCC-TO.
    Mvcc(MvccStore),
    /// Backs Strife.
    Clustered(ClusteredStore),
}

impl StorageBackend {
    /// A single-version store sized for `keyspace_size` keys.
    pub fn single(keyspace_size: u64) -> Self {
        StorageBackend::Single(SingleVersionStore::new(keyspace_size))
    }

    /// An MVCC store sized for `keyspace_size` keys.
    pub fn mvcc(keyspace_size: u64) -> Self {
        StorageBackend::Mvcc(MvccStore::new(keyspace_size))
    }

    /// A clustered store sized for `keyspace_size` keys with `strife_k`
    /// special cluster slots.
    pub fn clustered(keyspace_size: u64, strife_k: usize) -> Self {
        StorageBackend::Clustered(ClusteredStore::new(keyspace_size, strife_k))
    }

    /// Borrow the single-version store, if this is that variant.
    pub fn as_single(&self) -> Option<&SingleVersionStore> {
        match self {
            StorageBackend::Single(s) => Some(s),
            _ => None,
        }
    }

    /// Borrow the MVCC store, if this is that variant.
    pub fn as_mvcc(&self) -> Option<&MvccStore> {
        match self {
            StorageBackend::Mvcc(s) => Some(s),
            _ => None,
        }
    }

    /// Borrow the clustered store, if this is that variant.
    pub fn as_clustered(&self) -> Option<&ClusteredStore> {
        match self {
            StorageBackend::Clustered(s) => Some(s),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variant_accessors_are_mutually_exclusive() {
        let single = StorageBackend::single(4);
        assert!(single.as_single().is_some());
        assert!(single.as_mvcc().is_none());
        assert!(single.as_clustered().is_none());

        let mvcc = StorageBackend::mvcc(4);
        assert!(mvcc.as_mvcc().is_some());
        assert!(mvcc.as_single().is_none());

        let clustered = StorageBackend::clustered(4, 2);
        assert!(clustered.as_clustered().is_some());
        assert!(clustered.as_single().is_none());
    }
}

//! Persistence gateway seam between the session logic and SQLite.

use rollcall_store::{Store, StoreError, StoredIdentity};

pub trait Gateway: Send + Sync {
    fn load_identities(&self) -> Result<Vec<StoredIdentity>, StoreError>;

    fn upsert_identity(&self, identity: &StoredIdentity) -> Result<(), StoreError>;

    /// All rows in one transaction sharing one timestamp.
    fn record_attendance(&self, names: &[String], timestamp: &str) -> Result<usize, StoreError>;
}

impl Gateway for Store {
    fn load_identities(&self) -> Result<Vec<StoredIdentity>, StoreError> {
        Store::load_identities(self)
    }

    fn upsert_identity(&self, identity: &StoredIdentity) -> Result<(), StoreError> {
        Store::upsert_identity(self, identity)
    }

    fn record_attendance(&self, names: &[String], timestamp: &str) -> Result<usize, StoreError> {
        Store::record_attendance(self, names, timestamp)
    }
}

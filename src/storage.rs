//! Persistent service and profile state
//!
//! Storage is an external collaborator keyed by address pair: a text entry
//! mapping each peer to its comma-separated UUID list, plus serialized SDP
//! record blobs keyed by record handle. Last-write-wins is the only
//! guarantee the core relies on. [`MemoryStore`] is the in-memory
//! implementation used by tests and simulation targets.

use crate::{
    address::AddressPair,
    constants::{MAX_SESSION_RECORDS, MAX_STORED_PEERS, MAX_UUID_CSV},
    sdp::{RecordHandle, ServiceRecord},
    uuid::ProfileUuid,
};
use heapless::{FnvIndexMap, String, Vec};

/// Errors surfaced by the storage collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StorageError {
    /// The backend has no room left for the entry
    Full,
    /// The write could not be completed
    WriteFailed,
}

/// Persistent service/profile state collaborator
pub trait ServiceStore {
    /// Persist a serialized service record for a peer
    ///
    /// # Errors
    /// Returns an error if the record could not be written
    async fn store_record(
        &mut self,
        pair: AddressPair,
        record: &ServiceRecord,
    ) -> Result<(), StorageError>;

    /// Delete the stored record with the given handle; absence is not an error
    ///
    /// # Errors
    /// Returns an error if the deletion could not be performed
    async fn delete_record(
        &mut self,
        pair: AddressPair,
        handle: RecordHandle,
    ) -> Result<(), StorageError>;

    /// Look up the stored record handle for a service-class UUID
    async fn record_handle(&self, pair: AddressPair, uuid: &ProfileUuid) -> Option<RecordHandle>;

    /// Persist the canonical UUID list for a peer, replacing any previous one
    ///
    /// # Errors
    /// Returns an error if the list could not be written
    async fn write_device_profiles(
        &mut self,
        pair: AddressPair,
        uuid_csv: &str,
    ) -> Result<(), StorageError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct StoredRecord {
    handle: RecordHandle,
    class: Option<ProfileUuid>,
    data: String<{ crate::constants::MAX_RECORD_DATA }>,
}

/// In-memory [`ServiceStore`] implementation
#[derive(Debug, Default)]
pub struct MemoryStore {
    profiles: FnvIndexMap<AddressPair, String<MAX_UUID_CSV>, MAX_STORED_PEERS>,
    records: FnvIndexMap<AddressPair, Vec<StoredRecord, MAX_SESSION_RECORDS>, MAX_STORED_PEERS>,
}

impl MemoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The persisted UUID list for a peer, if any
    #[must_use]
    pub fn profiles(&self, pair: AddressPair) -> Option<&str> {
        self.profiles.get(&pair).map(String::as_str)
    }

    /// Number of records stored for a peer
    #[must_use]
    pub fn record_count(&self, pair: AddressPair) -> usize {
        self.records.get(&pair).map_or(0, |entries| entries.len())
    }
}

impl ServiceStore for MemoryStore {
    async fn store_record(
        &mut self,
        pair: AddressPair,
        record: &ServiceRecord,
    ) -> Result<(), StorageError> {
        if !self.records.contains_key(&pair) {
            self.records
                .insert(pair, Vec::new())
                .map_err(|_| StorageError::Full)?;
        }
        let entries = self.records.get_mut(&pair).ok_or(StorageError::WriteFailed)?;
        let stored = StoredRecord {
            handle: record.handle,
            class: record.primary_service_class().cloned(),
            data: record.data.clone(),
        };
        if let Some(existing) = entries.iter_mut().find(|e| e.handle == record.handle) {
            *existing = stored;
            return Ok(());
        }
        entries.push(stored).map_err(|_| StorageError::Full)
    }

    async fn delete_record(
        &mut self,
        pair: AddressPair,
        handle: RecordHandle,
    ) -> Result<(), StorageError> {
        if let Some(entries) = self.records.get_mut(&pair)
            && let Some(pos) = entries.iter().position(|e| e.handle == handle)
        {
            entries.remove(pos);
        }
        Ok(())
    }

    async fn record_handle(&self, pair: AddressPair, uuid: &ProfileUuid) -> Option<RecordHandle> {
        self.records.get(&pair)?.iter().find_map(|e| {
            e.class
                .as_ref()
                .filter(|class| *class == uuid)
                .map(|_| e.handle)
        })
    }

    async fn write_device_profiles(
        &mut self,
        pair: AddressPair,
        uuid_csv: &str,
    ) -> Result<(), StorageError> {
        let csv = String::try_from(uuid_csv).map_err(|()| StorageError::WriteFailed)?;
        if let Some(existing) = self.profiles.get_mut(&pair) {
            *existing = csv;
            return Ok(());
        }
        self.profiles
            .insert(pair, csv)
            .map(|_| ())
            .map_err(|_| StorageError::Full)
    }
}

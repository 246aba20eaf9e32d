//! SDP service records and the discovery client interface
//!
//! The SDP wire protocol itself lives behind the [`SdpClient`] trait: the
//! engine hands it one service-class UUID at a time and consumes parsed
//! [`ServiceRecord`]s delivered back as search-result events. A record keeps
//! its service-class list (first entry is the primary class used for
//! reconciliation and driver matching) plus its serialized text form for
//! replies and persistence.

use crate::{
    address::DeviceAddress,
    constants::{MAX_RECORD_CLASSES, MAX_RECORD_DATA},
    uuid::ProfileUuid,
};
use heapless::{String, Vec};

/// Service record handle assigned by the peer's SDP server
pub type RecordHandle = u32;

/// Parsed service record returned by the SDP client
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ServiceRecord {
    /// Record handle on the peer
    pub handle: RecordHandle,
    /// Service classes declared by the record, most specific first
    pub service_classes: Vec<ProfileUuid, MAX_RECORD_CLASSES>,
    /// Serialized record text kept for replies and storage
    pub data: String<MAX_RECORD_DATA>,
}

impl ServiceRecord {
    /// Create a record with no service classes
    #[must_use]
    pub fn new(handle: RecordHandle) -> Self {
        Self {
            handle,
            service_classes: Vec::new(),
            data: String::new(),
        }
    }

    /// Append a service class
    #[must_use]
    pub fn with_class(mut self, class: ProfileUuid) -> Self {
        self.service_classes.push(class).ok();
        self
    }

    /// Attach the serialized record text
    #[must_use]
    pub fn with_data(mut self, data: &str) -> Self {
        self.data = String::try_from(data).unwrap_or_default();
        self
    }

    /// The record's primary service class, if it declares any
    ///
    /// Reconciliation and driver matching key off the primary class only;
    /// secondary classes are deliberately ignored.
    #[must_use]
    pub fn primary_service_class(&self) -> Option<&ProfileUuid> {
        self.service_classes.first()
    }
}

/// A `{handle, serialized record}` pair listed in a discovery reply
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RecordEntry {
    /// Record handle on the peer
    pub handle: RecordHandle,
    /// Serialized record text
    pub record: String<MAX_RECORD_DATA>,
}

impl From<&ServiceRecord> for RecordEntry {
    fn from(record: &ServiceRecord) -> Self {
        Self {
            handle: record.handle,
            record: record.data.clone(),
        }
    }
}

/// Errors surfaced by the SDP client collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SdpError {
    /// The peer rejected the query or the link failed mid-search
    ConnectionFailed,
    /// The query timed out
    Timeout,
    /// No search is outstanding for the address pair
    NotOutstanding,
    /// The response payload could not be parsed
    InvalidResponse,
}

/// Asynchronous SDP client collaborator
///
/// `search` initiates exactly one query; its outcome is delivered exactly
/// once as an [`Event::SearchResult`](crate::Event::SearchResult) for the
/// same address pair. After a successful `cancel` no result event follows.
pub trait SdpClient {
    /// Start a service search for one UUID against a peer
    ///
    /// # Errors
    /// Returns an error if the query could not be issued
    async fn search(
        &mut self,
        local: DeviceAddress,
        remote: DeviceAddress,
        uuid: &ProfileUuid,
    ) -> Result<(), SdpError>;

    /// Abort the outstanding search for an address pair, best effort
    ///
    /// # Errors
    /// Returns `SdpError::NotOutstanding` if no search is in flight
    async fn cancel(
        &mut self,
        local: DeviceAddress,
        remote: DeviceAddress,
    ) -> Result<(), SdpError>;
}

//! Service authorization
//!
//! Incoming transport connections for a service must be authorized before
//! data flows. The collaborator only starts or cancels a request here; the
//! verdict arrives later as an [`Event::Authorization`](crate::Event)
//! carrying an [`AuthVerdict`].

use crate::address::AddressPair;
use crate::uuid::ProfileUuid;

/// Outcome of an authorization request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AuthVerdict {
    /// The peer may use the service
    Granted,
    /// The peer was refused
    Denied,
    /// The authorizing party disappeared before answering
    Vanished,
}

/// Errors starting an authorization request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AccessError {
    /// No agent is available to answer for this device
    NoAgent,
    /// The backend already has a request outstanding for this pair
    Busy,
}

/// Authorization collaborator
pub trait AccessControl {
    /// Ask whether `pair.remote` may use the service identified by `uuid`
    ///
    /// A successful return only means the question was posed. The answer is
    /// delivered as an authorization event for the same pair, exactly once,
    /// unless the request is cancelled first.
    ///
    /// # Errors
    /// Returns an error if the request could not be started
    async fn request_authorization(
        &mut self,
        pair: AddressPair,
        uuid: &ProfileUuid,
    ) -> Result<(), AccessError>;

    /// Withdraw an outstanding request for `pair`; absence is not an error
    ///
    /// After this returns no verdict will be delivered for the withdrawn
    /// request.
    async fn cancel_authorization(&mut self, pair: AddressPair);
}

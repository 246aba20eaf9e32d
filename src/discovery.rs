//! Service discovery engine
//!
//! One browse session per device, advanced strictly one SDP query at a time
//! by search-result events. A full browse seeds `removed` with everything
//! the device currently claims and walks the well-known service-class
//! sequence; a device answering the opening public-browse-group query with
//! records short-circuits the rest. Each response reconciles record classes
//! against the device's current set into added/removed diffs; completion
//! hands the diffs to the driver binder and emits exactly one terminal
//! notification per session.

use crate::{
    DeviceHost, HostError, Notification, Requestor,
    access::AccessControl,
    adapter::AdapterId,
    address::{AddressPair, DeviceAddress},
    binder,
    constants::{MAX_DEVICES, MAX_SESSION_RECORDS, MAX_WATCHES},
    device::DiscoveryState,
    sdp::{RecordEntry, SdpClient, SdpError, ServiceRecord},
    storage::ServiceStore,
    transport::ChannelTransport,
    uuid::{BROWSE_SEQUENCE, ProfileUuid, UuidSet},
};
use heapless::Vec;

/// Identifier of a requestor-liveness watch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct WatchId(u32);

/// What a browse session queries for
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BrowseTarget {
    /// Walk the well-known service-class sequence
    FullBrowse,
    /// Query exactly one UUID
    Targeted(ProfileUuid),
}

/// Why a session was started, deciding its terminal notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BrowseOrigin {
    /// An explicit service-discovery request
    Discovery,
    /// The bootstrap browse of a newly created device
    DeviceCreated,
}

/// One in-flight browse session, keyed by address pair in the host
#[derive(Debug, Clone)]
pub struct BrowseSession {
    pub pair: AddressPair,
    pub adapter: AdapterId,
    pub origin: BrowseOrigin,
    pub requestor: Requestor,
    pub target: BrowseTarget,
    /// UUIDs seen in responses but absent from the device's set
    pub added: UuidSet,
    /// UUIDs of the device not re-confirmed by any response yet
    pub removed: UuidSet,
    /// Records retained for the terminal reply and driver probing
    pub records: Vec<ServiceRecord, MAX_SESSION_RECORDS>,
    /// Position in the well-known sequence of the outstanding query
    pub search_index: usize,
    /// Set by cancellation; completion then replies with no records
    pub cancelled: bool,
}

#[derive(Debug, Clone)]
struct WatchEntry {
    id: WatchId,
    requestor: Requestor,
    pair: AddressPair,
}

/// Requestor-liveness watches for in-flight browse sessions
#[derive(Debug, Default)]
pub struct WatchTable {
    entries: Vec<WatchEntry, MAX_WATCHES>,
    next_id: u32,
}

impl WatchTable {
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_id: 0,
        }
    }

    /// Register a watch tying `pair`'s session to `requestor`'s liveness
    pub fn add(&mut self, requestor: &Requestor, pair: AddressPair) -> Result<WatchId, HostError> {
        self.next_id = self.next_id.wrapping_add(1);
        let id = WatchId(self.next_id);
        self.entries
            .push(WatchEntry {
                id,
                requestor: requestor.clone(),
                pair,
            })
            .map_err(|_| HostError::Failed)?;
        Ok(id)
    }

    /// Drop a watch; releasing twice is harmless
    pub fn release(&mut self, id: WatchId) -> bool {
        if let Some(pos) = self.entries.iter().position(|e| e.id == id) {
            self.entries.remove(pos);
            true
        } else {
            false
        }
    }

    /// Pairs whose sessions are watched for `requestor`
    pub fn pairs_for(&self, requestor: &Requestor) -> Vec<AddressPair, MAX_WATCHES> {
        self.entries
            .iter()
            .filter(|e| &e.requestor == requestor)
            .map(|e| e.pair)
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl DeviceHost {
    /// Create a device on `adapter` and bootstrap it with a full browse
    ///
    /// The device is removed again if the opening query cannot be issued.
    pub(crate) async fn create_device<S: SdpClient>(
        &mut self,
        sdp: &mut S,
        requestor: &Requestor,
        adapter: AdapterId,
        address: DeviceAddress,
    ) -> Result<(), HostError> {
        let owner = self.adapters.get_mut(&adapter).ok_or(HostError::NotFound)?;
        owner.create_device(address)?;
        match self
            .start_browse(
                sdp,
                requestor,
                adapter,
                address,
                BrowseTarget::FullBrowse,
                BrowseOrigin::DeviceCreated,
            )
            .await
        {
            Ok(()) => Ok(()),
            Err(e) => {
                if let Some(owner) = self.adapters.get_mut(&adapter) {
                    owner.remove_device(address).ok();
                }
                Err(e)
            }
        }
    }

    /// Remove a device: cancel its browse, tear down its HID session,
    /// release its drivers
    pub(crate) async fn remove_device<S, T, A>(
        &mut self,
        sdp: &mut S,
        transport: &mut T,
        access: &mut A,
        adapter: AdapterId,
        address: DeviceAddress,
    ) -> Result<(), HostError>
    where
        S: SdpClient,
        T: ChannelTransport,
        A: AccessControl,
    {
        let pair = self.pair_for(adapter, address).ok_or(HostError::NotFound)?;
        if self.browses.remove(&pair).is_some() {
            sdp.cancel(pair.local, pair.remote).await.ok();
        }
        self.drop_hid_session(transport, access, pair).await;

        let owner = self.adapters.get_mut(&adapter).ok_or(HostError::NotFound)?;
        let mut device = owner.remove_device(address)?;
        if let Some(watch) = device.discovery.watch.take() {
            self.watches.release(watch);
        }
        device.release_bindings();
        debug!("[DISCOVERY] removed device {}", device.path);
        Ok(())
    }

    /// Remove an adapter: every device, then its HID server
    pub(crate) async fn remove_adapter<S, T, A>(
        &mut self,
        sdp: &mut S,
        transport: &mut T,
        access: &mut A,
        id: AdapterId,
    ) -> Result<(), HostError>
    where
        S: SdpClient,
        T: ChannelTransport,
        A: AccessControl,
    {
        let (local, addresses) = {
            let adapter = self.adapters.get(&id).ok_or(HostError::NotFound)?;
            let mut addresses: Vec<DeviceAddress, MAX_DEVICES> = Vec::new();
            for address in adapter.device_addresses() {
                addresses.push(address).ok();
            }
            (adapter.address, addresses)
        };
        for address in &addresses {
            self.remove_device(sdp, transport, access, id, *address)
                .await
                .ok();
        }
        self.stop_hid_server(transport, access, local).await.ok();
        self.adapters.remove(&id);
        Ok(())
    }

    /// Start a browse session on a device
    pub(crate) async fn start_browse<S: SdpClient>(
        &mut self,
        sdp: &mut S,
        requestor: &Requestor,
        adapter: AdapterId,
        address: DeviceAddress,
        target: BrowseTarget,
        origin: BrowseOrigin,
    ) -> Result<(), HostError> {
        let pair = self.pair_for(adapter, address).ok_or(HostError::NotFound)?;
        let device = self
            .adapters
            .get_mut(&adapter)
            .and_then(|a| a.device_mut(address))
            .ok_or(HostError::NotFound)?;
        if device.discovery.active {
            return Err(HostError::Busy);
        }
        if self.browses.len() >= self.browses.capacity() {
            return Err(HostError::Failed);
        }

        let watch = self.watches.add(requestor, pair)?;
        let removed = match &target {
            BrowseTarget::FullBrowse => device.uuids.clone(),
            BrowseTarget::Targeted(_) => UuidSet::new(),
        };
        let first = match &target {
            BrowseTarget::FullBrowse => ProfileUuid::from_u16(BROWSE_SEQUENCE[0]),
            BrowseTarget::Targeted(uuid) => uuid.clone(),
        };

        device.discovery.active = true;
        device.discovery.requestor = Some(requestor.clone());
        device.discovery.watch = Some(watch);

        if let Err(e) = sdp.search(pair.local, pair.remote, &first).await {
            warn!(
                "[DISCOVERY] could not start browse for {}: {:?}",
                device.path, e
            );
            device.discovery = DiscoveryState::default();
            self.watches.release(watch);
            return Err(HostError::Failed);
        }
        debug!("[DISCOVERY] browse started for {}", device.path);

        let session = BrowseSession {
            pair,
            adapter,
            origin,
            requestor: requestor.clone(),
            target,
            added: UuidSet::new(),
            removed,
            records: Vec::new(),
            search_index: 0,
            cancelled: false,
        };
        self.browses
            .insert(pair, session)
            .map(|_| ())
            .map_err(|_| HostError::Failed)
    }

    /// Feed one search result to the session it belongs to
    ///
    /// Late results for sessions or devices that no longer exist are
    /// discarded.
    pub(crate) async fn handle_search_result<S: SdpClient, St: ServiceStore>(
        &mut self,
        sdp: &mut S,
        store: &mut St,
        pair: AddressPair,
        records: &[ServiceRecord],
        error: Option<SdpError>,
    ) {
        let Some(mut session) = self.browses.remove(&pair) else {
            debug!("[DISCOVERY] stale search result for {:?}", pair);
            return;
        };
        let Some(current) = self
            .adapters
            .get(&session.adapter)
            .and_then(|a| a.device(pair.remote))
            .map(|d| d.uuids.clone())
        else {
            debug!("[DISCOVERY] device gone, dropping session for {:?}", pair);
            return;
        };

        if let Some(e) = error {
            warn!("[DISCOVERY] search failed for {:?}: {:?}", pair, e);
            self.complete_browse(store, session).await;
            return;
        }

        reconcile(&mut session, &current, records, store).await;

        match &session.target {
            BrowseTarget::Targeted(_) => {
                self.complete_browse(store, session).await;
            }
            BrowseTarget::FullBrowse => {
                // a device answering the public-browse-group query makes the
                // per-profile queries redundant
                if session.search_index == 0 && !records.is_empty() {
                    self.complete_browse(store, session).await;
                    return;
                }
                session.search_index += 1;
                if session.search_index >= BROWSE_SEQUENCE.len() {
                    self.complete_browse(store, session).await;
                    return;
                }
                let next = ProfileUuid::from_u16(BROWSE_SEQUENCE[session.search_index]);
                if let Err(e) = sdp.search(pair.local, pair.remote, &next).await {
                    warn!("[DISCOVERY] search failed for {:?}: {:?}", pair, e);
                    self.complete_browse(store, session).await;
                    return;
                }
                if let Err((_, session)) = self.browses.insert(pair, session) {
                    self.complete_browse(store, session).await;
                }
            }
        }
    }

    /// Cancel an in-flight browse on behalf of its owner
    pub(crate) async fn cancel_browse<S: SdpClient, St: ServiceStore>(
        &mut self,
        sdp: &mut S,
        store: &mut St,
        requestor: &Requestor,
        adapter: AdapterId,
        address: DeviceAddress,
    ) -> Result<(), HostError> {
        let pair = self.pair_for(adapter, address).ok_or(HostError::NotFound)?;
        let device = self
            .adapters
            .get(&adapter)
            .and_then(|a| a.device(address))
            .ok_or(HostError::NotFound)?;
        if !device.discovery.active {
            return Err(HostError::Failed);
        }
        if device.discovery.requestor.as_ref() != Some(requestor) {
            return Err(HostError::NotAuthorized);
        }
        if sdp.cancel(pair.local, pair.remote).await.is_err() {
            return Err(HostError::Failed);
        }
        let Some(mut session) = self.browses.remove(&pair) else {
            return Err(HostError::Failed);
        };
        session.cancelled = true;
        debug!("[DISCOVERY] browse cancelled for {:?}", pair);
        self.complete_browse(store, session).await;
        Ok(())
    }

    /// Cancel every browse watched for a vanished requestor
    ///
    /// A session whose query refuses cancellation keeps running and
    /// completes when its result lands; only its watch is dropped.
    pub(crate) async fn handle_requestor_lost<S: SdpClient, St: ServiceStore>(
        &mut self,
        sdp: &mut S,
        store: &mut St,
        requestor: &Requestor,
    ) {
        let pairs = self.watches.pairs_for(requestor);
        for pair in pairs {
            debug!("[DISCOVERY] requestor lost, cancelling browse for {:?}", pair);
            if sdp.cancel(pair.local, pair.remote).await.is_ok() {
                if let Some(mut session) = self.browses.remove(&pair) {
                    session.cancelled = true;
                    self.complete_browse(store, session).await;
                }
            } else if let Some(session) = self.browses.get(&pair) {
                let adapter = session.adapter;
                if let Some(device) = self
                    .adapters
                    .get_mut(&adapter)
                    .and_then(|a| a.device_mut(pair.remote))
                    && let Some(watch) = device.discovery.watch.take()
                {
                    self.watches.release(watch);
                }
            }
        }
    }

    /// Completion handling shared by every exit path: run the binder on
    /// non-empty diffs, clear discovery state, release the watch, emit the
    /// terminal notification
    async fn complete_browse<St: ServiceStore>(&mut self, store: &mut St, session: BrowseSession) {
        let BrowseSession {
            pair,
            adapter,
            origin,
            requestor,
            added,
            removed,
            records,
            cancelled,
            ..
        } = session;

        let DeviceHost {
            adapters,
            drivers,
            watches,
            notifications,
            ..
        } = self;
        let Some(device) = adapters
            .get_mut(&adapter)
            .and_then(|a| a.device_mut(pair.remote))
        else {
            debug!("[DISCOVERY] device gone before completion for {:?}", pair);
            return;
        };

        if !added.is_empty() || !removed.is_empty() {
            binder::apply(
                device,
                drivers,
                &added,
                &removed,
                &records,
                pair,
                store,
                notifications,
            )
            .await;
        }

        device.discovery.active = false;
        device.discovery.requestor = None;
        if let Some(watch) = device.discovery.watch.take() {
            watches.release(watch);
        }

        let terminal = match origin {
            BrowseOrigin::Discovery => {
                let entries = if cancelled {
                    Vec::new()
                } else {
                    records.iter().map(RecordEntry::from).collect()
                };
                Notification::DiscoveryComplete {
                    requestor,
                    records: entries,
                }
            }
            BrowseOrigin::DeviceCreated => Notification::DeviceCreated {
                requestor,
                path: device.path.clone(),
            },
        };
        if notifications.push(terminal).is_err() {
            warn!("[DISCOVERY] notification queue full, dropping");
        }
        debug!("[DISCOVERY] browse complete for {}", device.path);
    }
}

/// Fold one response into the session: persist and retain class-bearing
/// records, grow `added` with unknown classes, shrink `removed` for
/// re-confirmed ones
async fn reconcile<St: ServiceStore>(
    session: &mut BrowseSession,
    current: &UuidSet,
    records: &[ServiceRecord],
    store: &mut St,
) {
    for record in records {
        let Some(class) = record.primary_service_class() else {
            continue;
        };
        if store.store_record(session.pair, record).await.is_err() {
            warn!(
                "[DISCOVERY] failed to store record {:#x} for {:?}",
                record.handle, session.pair
            );
        }
        if !session.records.iter().any(|r| r.handle == record.handle)
            && session.records.push(record.clone()).is_err()
        {
            warn!("[DISCOVERY] record table full for {:?}", session.pair);
        }
        if current.contains(class) {
            session.removed.remove(class);
        } else if session.added.insert(class.clone()).is_err() {
            warn!("[DISCOVERY] added set full for {:?}", session.pair);
        }
    }
}

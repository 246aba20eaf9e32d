//! Mock collaborators and fixture builders shared by the unit tests.

use crate::{
    access::{AccessControl, AccessError},
    address::{AddressPair, DeviceAddress},
    device::Device,
    driver::{DeviceDriver, DriverData, DriverError},
    sdp::{RecordHandle, SdpClient, SdpError, ServiceRecord},
    transport::{ChannelTransport, LinkControl, Psm, SocketId, TransportError},
    uuid::ProfileUuid,
};
use bt_hci::param::{ConnHandle, DisconnectReason};
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use heapless::Vec;

/// Canonical HID service-class UUID, as a driver would declare it
pub const HID_UUID: &str = "00001124-0000-1000-8000-00805f9b34fb";
/// Canonical generic-audio service-class UUID
pub const AUDIO_UUID: &str = "00001203-0000-1000-8000-00805f9b34fb";

pub fn local_addr() -> DeviceAddress {
    DeviceAddress::new([0x00, 0x11, 0x22, 0x33, 0x44, 0x55])
}

pub fn remote_addr() -> DeviceAddress {
    DeviceAddress::new([0x66, 0x77, 0x88, 0x99, 0xAA, 0xBB])
}

pub fn test_pair() -> AddressPair {
    AddressPair::new(local_addr(), remote_addr())
}

pub fn record(handle: RecordHandle, class: u16) -> ServiceRecord {
    ServiceRecord::new(handle)
        .with_class(ProfileUuid::from_u16(class))
        .with_data("<record/>")
}

pub fn classless_record(handle: RecordHandle) -> ServiceRecord {
    ServiceRecord::new(handle).with_data("<record/>")
}

/// Driver double counting probe/remove calls through atomics, so each test
/// can hold one in a function-local `static`.
pub struct TestDriver {
    name: &'static str,
    uuids: &'static [&'static str],
    probes: AtomicU32,
    removes: AtomicU32,
    last_matched: AtomicUsize,
    reject: AtomicBool,
    token: AtomicU32,
}

impl TestDriver {
    pub const fn new(name: &'static str, uuids: &'static [&'static str]) -> Self {
        Self {
            name,
            uuids,
            probes: AtomicU32::new(0),
            removes: AtomicU32::new(0),
            last_matched: AtomicUsize::new(0),
            reject: AtomicBool::new(false),
            token: AtomicU32::new(1),
        }
    }

    pub fn probes(&self) -> u32 {
        self.probes.load(Ordering::Relaxed)
    }

    pub fn removes(&self) -> u32 {
        self.removes.load(Ordering::Relaxed)
    }

    pub fn last_matched(&self) -> usize {
        self.last_matched.load(Ordering::Relaxed)
    }

    pub fn set_reject(&self, reject: bool) {
        self.reject.store(reject, Ordering::Relaxed);
    }
}

impl DeviceDriver for TestDriver {
    fn name(&self) -> &'static str {
        self.name
    }

    fn uuids(&self) -> &'static [&'static str] {
        self.uuids
    }

    fn probe(&self, _device: &Device, records: &[ServiceRecord]) -> Result<DriverData, DriverError> {
        self.probes.fetch_add(1, Ordering::Relaxed);
        self.last_matched.store(records.len(), Ordering::Relaxed);
        if self.reject.load(Ordering::Relaxed) {
            return Err(DriverError::Rejected);
        }
        Ok(DriverData(self.token.fetch_add(1, Ordering::Relaxed)))
    }

    fn remove(&self, _device: &Device, _data: DriverData) {
        self.removes.fetch_add(1, Ordering::Relaxed);
    }
}

/// SDP client double recording every search/cancel and replaying scripted
/// outcomes (default `Ok`).
pub struct ScriptedSdp {
    pub searches: Vec<(AddressPair, ProfileUuid), 16>,
    pub cancels: Vec<AddressPair, 8>,
    outcomes: Vec<Result<(), SdpError>, 8>,
    next_outcome: usize,
    pub cancel_outcome: Result<(), SdpError>,
}

impl ScriptedSdp {
    pub fn new() -> Self {
        Self {
            searches: Vec::new(),
            cancels: Vec::new(),
            outcomes: Vec::new(),
            next_outcome: 0,
            cancel_outcome: Ok(()),
        }
    }

    /// Queue the outcome for the next unscripted `search` call
    pub fn script_search(&mut self, outcome: Result<(), SdpError>) {
        self.outcomes.push(outcome).unwrap();
    }
}

impl SdpClient for ScriptedSdp {
    async fn search(
        &mut self,
        local: DeviceAddress,
        remote: DeviceAddress,
        uuid: &ProfileUuid,
    ) -> Result<(), SdpError> {
        self.searches
            .push((AddressPair::new(local, remote), uuid.clone()))
            .unwrap();
        let outcome = self
            .outcomes
            .get(self.next_outcome)
            .copied()
            .unwrap_or(Ok(()));
        self.next_outcome += 1;
        outcome
    }

    async fn cancel(
        &mut self,
        local: DeviceAddress,
        remote: DeviceAddress,
    ) -> Result<(), SdpError> {
        self.cancels
            .push(AddressPair::new(local, remote))
            .unwrap();
        self.cancel_outcome
    }
}

/// Channel transport double recording listeners, sends, and closes.
pub struct RecordingTransport {
    pub listeners: Vec<(DeviceAddress, Psm), 8>,
    pub closed_listeners: Vec<(DeviceAddress, Psm), 8>,
    pub sends: Vec<(SocketId, Vec<u8, 16>), 8>,
    pub closed: Vec<SocketId, 8>,
    listen_outcomes: Vec<Result<(), TransportError>, 4>,
    next_listen: usize,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self {
            listeners: Vec::new(),
            closed_listeners: Vec::new(),
            sends: Vec::new(),
            closed: Vec::new(),
            listen_outcomes: Vec::new(),
            next_listen: 0,
        }
    }

    /// Queue the outcome for the next unscripted `listen` call
    pub fn script_listen(&mut self, outcome: Result<(), TransportError>) {
        self.listen_outcomes.push(outcome).unwrap();
    }

    pub fn is_listening(&self, local: DeviceAddress, psm: Psm) -> bool {
        self.listeners.contains(&(local, psm))
    }
}

impl ChannelTransport for RecordingTransport {
    async fn listen(&mut self, local: DeviceAddress, psm: Psm) -> Result<(), TransportError> {
        let outcome = self
            .listen_outcomes
            .get(self.next_listen)
            .copied()
            .unwrap_or(Ok(()));
        self.next_listen += 1;
        if outcome.is_ok() {
            self.listeners.push((local, psm)).unwrap();
        }
        outcome
    }

    async fn close_listener(&mut self, local: DeviceAddress, psm: Psm) {
        if let Some(pos) = self.listeners.iter().position(|l| *l == (local, psm)) {
            self.listeners.remove(pos);
        }
        self.closed_listeners.push((local, psm)).unwrap();
    }

    async fn send(&mut self, socket: SocketId, data: &[u8]) -> Result<(), TransportError> {
        let bytes = Vec::from_slice(data).map_err(|()| TransportError::SendFailed)?;
        self.sends.push((socket, bytes)).unwrap();
        Ok(())
    }

    async fn close(&mut self, socket: SocketId) {
        self.closed.push(socket).unwrap();
    }
}

/// Access-control double recording requests and cancellations.
pub struct RecordingAccess {
    pub requests: Vec<(AddressPair, ProfileUuid), 8>,
    pub cancels: Vec<AddressPair, 8>,
    pub request_outcome: Result<(), AccessError>,
}

impl RecordingAccess {
    pub fn new() -> Self {
        Self {
            requests: Vec::new(),
            cancels: Vec::new(),
            request_outcome: Ok(()),
        }
    }
}

impl AccessControl for RecordingAccess {
    async fn request_authorization(
        &mut self,
        pair: AddressPair,
        uuid: &ProfileUuid,
    ) -> Result<(), AccessError> {
        self.requests.push((pair, uuid.clone())).unwrap();
        self.request_outcome
    }

    async fn cancel_authorization(&mut self, pair: AddressPair) {
        self.cancels.push(pair).unwrap();
    }
}

/// Link-control double recording disconnect commands.
pub struct RecordingLink {
    pub disconnects: Vec<(ConnHandle, DisconnectReason), 4>,
    pub outcome: Result<(), TransportError>,
}

impl RecordingLink {
    pub fn new() -> Self {
        Self {
            disconnects: Vec::new(),
            outcome: Ok(()),
        }
    }
}

impl LinkControl for RecordingLink {
    async fn disconnect(
        &mut self,
        handle: ConnHandle,
        reason: DisconnectReason,
    ) -> Result<(), TransportError> {
        self.disconnects.push((handle, reason)).unwrap();
        self.outcome
    }
}

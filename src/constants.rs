//! Wagtail Constants
//!
//! This module contains all the constants used throughout the Wagtail library.
//! These constants define capacity limits for the heapless data structures,
//! well-known Bluetooth identifiers, and timing parameters used in the
//! implementation.

/// Maximum number of local adapters
pub const MAX_ADAPTERS: usize = 2;

/// Maximum number of peer devices tracked per adapter
pub const MAX_DEVICES: usize = 8;

/// Maximum number of simultaneous ACL connections per adapter
pub const MAX_CONNECTIONS: usize = 8;

/// Maximum number of registered profile drivers
pub const MAX_DRIVERS: usize = 8;

/// Maximum number of driver bindings per device
pub const MAX_BINDINGS: usize = 8;

/// Maximum number of service-class UUIDs retained per device
pub const MAX_DEVICE_UUIDS: usize = 8;

/// Maximum number of service records retained per browse session
pub const MAX_SESSION_RECORDS: usize = 8;

/// Maximum number of service classes parsed out of a single record
pub const MAX_RECORD_CLASSES: usize = 4;

/// Maximum length of a serialized service record in bytes
pub const MAX_RECORD_DATA: usize = 128;

/// Maximum number of in-flight browse sessions across all adapters
pub const MAX_BROWSES: usize = 4;

/// Maximum number of requestor liveness watches
pub const MAX_WATCHES: usize = 8;

/// Maximum number of HID sessions per transport server
pub const MAX_HID_SESSIONS: usize = 4;

/// Maximum number of armed disconnect grace timers
pub const MAX_DISCONNECT_TIMERS: usize = 8;

/// Maximum number of queued outbound notifications
pub const MAX_PENDING_NOTIFICATIONS: usize = 8;

/// Depth of the request/response/event channels
pub const MAX_CHANNELS: usize = 8;

/// Maximum length of a requestor identity string
pub const MAX_REQUESTOR_LEN: usize = 32;

/// Maximum length of a device object path
pub const MAX_PATH_LEN: usize = 32;

/// Maximum length of a comma-separated UUID list
pub const MAX_UUID_CSV: usize = 320;

/// Maximum number of peers retained by the in-memory service store
pub const MAX_STORED_PEERS: usize = 8;

/// L2CAP PSM of the HID control channel
pub const HID_CONTROL_PSM: u16 = 0x0011;

/// L2CAP PSM of the HID interrupt channel
pub const HID_INTERRUPT_PSM: u16 = 0x0013;

/// HID control message sent to unrecognized peers before closing (`HID_CONTROL` | `VIRTUAL_CABLE_UNPLUG`)
pub const HID_VIRTUAL_CABLE_UNPLUG: u8 = 0x15;

/// Grace period between a disconnect request and the low-level disconnect, in seconds
pub const DISCONNECT_GRACE_SECS: u64 = 2;

//! Service-class UUID handling
//!
//! Service classes are carried in their canonical 36-character textual form
//! and compared case-insensitively throughout: peers and storage backends
//! disagree on hex casing, so equality and ordering must not. Devices cache
//! their known service classes in a [`UuidSet`], a sorted de-duplicated
//! container rewritten only by the driver binder after a completed discovery
//! session.

use crate::{
    HostError,
    constants::{MAX_DEVICE_UUIDS, MAX_UUID_CSV},
};
use core::cmp::Ordering;
use core::fmt::Write as _;
use heapless::{String, Vec};

/// Length of a canonical textual UUID
pub const UUID_STR_LEN: usize = 36;

/// Public browse group descriptor
pub const PUBLIC_BROWSE_GROUP: u16 = 0x1002;

/// Human Interface Device service class
pub const HID_SVCLASS: u16 = 0x1124;

/// Generic Audio service class
pub const GENERIC_AUDIO_SVCLASS: u16 = 0x1203;

/// Advanced Audio Distribution service class
pub const ADVANCED_AUDIO_SVCLASS: u16 = 0x110D;

/// A/V Remote Control service class
pub const AV_REMOTE_SVCLASS: u16 = 0x110E;

/// Fixed query order of a full browse: the public browse group first (peers
/// answering it short-circuit the rest), then the per-profile classes.
pub const BROWSE_SEQUENCE: [u16; 5] = [
    PUBLIC_BROWSE_GROUP,
    HID_SVCLASS,
    GENERIC_AUDIO_SVCLASS,
    ADVANCED_AUDIO_SVCLASS,
    AV_REMOTE_SVCLASS,
];

/// Bluetooth base UUID tail shared by every 16-bit service class
const BASE_UUID_TAIL: &str = "-0000-1000-8000-00805f9b34fb";

/// A service-class UUID in canonical textual form
///
/// Equality and ordering are case-insensitive; the original casing is kept
/// for display and persistence.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ProfileUuid(String<UUID_STR_LEN>);

impl ProfileUuid {
    /// Parse a canonical `xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx` UUID string
    ///
    /// # Errors
    /// Returns `HostError::InvalidArgument` if the layout or characters are
    /// not a valid textual UUID
    pub fn parse(s: &str) -> Result<Self, HostError> {
        if s.len() != UUID_STR_LEN {
            return Err(HostError::InvalidArgument);
        }
        for (i, c) in s.chars().enumerate() {
            let valid = match i {
                8 | 13 | 18 | 23 => c == '-',
                _ => c.is_ascii_hexdigit(),
            };
            if !valid {
                return Err(HostError::InvalidArgument);
            }
        }
        Ok(Self(String::try_from(s).map_err(|()| HostError::InvalidArgument)?))
    }

    /// Expand a 16-bit service class through the Bluetooth base UUID
    #[must_use]
    pub fn from_u16(class: u16) -> Self {
        let mut s: String<UUID_STR_LEN> = String::new();
        write!(s, "0000{class:04x}{BASE_UUID_TAIL}").ok();
        Self(s)
    }

    /// Parse a browse pattern: a full textual UUID, or a 16-bit service
    /// class as four hex digits with an optional `0x` prefix
    ///
    /// # Errors
    /// Returns `HostError::InvalidArgument` for anything else
    pub fn parse_pattern(pattern: &str) -> Result<Self, HostError> {
        let hex = pattern.strip_prefix("0x").unwrap_or(pattern);
        if hex.len() == 4 && hex.chars().all(|c| c.is_ascii_hexdigit()) {
            let class = u16::from_str_radix(hex, 16).map_err(|_| HostError::InvalidArgument)?;
            return Ok(Self::from_u16(class));
        }
        Self::parse(pattern)
    }

    /// Get the textual form
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Case-insensitive comparison against a raw UUID string
    #[must_use]
    pub fn matches(&self, other: &str) -> bool {
        self.0.as_str().eq_ignore_ascii_case(other)
    }
}

impl PartialEq for ProfileUuid {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_str().eq_ignore_ascii_case(other.0.as_str())
    }
}

impl Eq for ProfileUuid {}

impl Ord for ProfileUuid {
    fn cmp(&self, other: &Self) -> Ordering {
        let a = self.0.as_bytes().iter().map(u8::to_ascii_lowercase);
        let b = other.0.as_bytes().iter().map(u8::to_ascii_lowercase);
        a.cmp(b)
    }
}

impl PartialOrd for ProfileUuid {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl TryFrom<&str> for ProfileUuid {
    type Error = HostError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        ProfileUuid::parse(s)
    }
}

/// Sorted, de-duplicated set of service-class UUIDs
///
/// Insertion keeps the set lexicographically sorted under case-insensitive
/// comparison; duplicates are rejected. Iteration is always in sorted order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct UuidSet(Vec<ProfileUuid, MAX_DEVICE_UUIDS>);

impl UuidSet {
    /// Create an empty set
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Insert a UUID, keeping the set sorted
    ///
    /// Returns `Ok(true)` if the UUID was inserted, `Ok(false)` if an equal
    /// UUID was already present.
    ///
    /// # Errors
    /// Returns `HostError::Failed` if the set is full
    pub fn insert(&mut self, uuid: ProfileUuid) -> Result<bool, HostError> {
        match self.0.binary_search(&uuid) {
            Ok(_) => Ok(false),
            Err(pos) => {
                self.0.insert(pos, uuid).map_err(|_| HostError::Failed)?;
                Ok(true)
            }
        }
    }

    /// Remove a UUID; returns whether it was present
    pub fn remove(&mut self, uuid: &ProfileUuid) -> bool {
        match self.0.binary_search(uuid) {
            Ok(pos) => {
                self.0.remove(pos);
                true
            }
            Err(_) => false,
        }
    }

    /// Check whether a UUID is present
    #[must_use]
    pub fn contains(&self, uuid: &ProfileUuid) -> bool {
        self.0.binary_search(uuid).is_ok()
    }

    /// Iterate the set in sorted order
    pub fn iter(&self) -> core::slice::Iter<'_, ProfileUuid> {
        self.0.iter()
    }

    /// UUIDs present in `self` but not in `other`
    pub fn difference<'a>(&'a self, other: &'a UuidSet) -> impl Iterator<Item = &'a ProfileUuid> {
        self.0.iter().filter(|u| !other.contains(u))
    }

    /// Number of UUIDs in the set
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check whether the set is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Remove all UUIDs
    pub fn clear(&mut self) {
        self.0.clear();
    }

    /// Render the set as a comma-separated list for persistence
    #[must_use]
    pub fn to_csv(&self) -> String<MAX_UUID_CSV> {
        let mut csv = String::new();
        for (i, uuid) in self.0.iter().enumerate() {
            if i > 0 {
                csv.push(',').ok();
            }
            csv.push_str(uuid.as_str()).ok();
        }
        csv
    }
}

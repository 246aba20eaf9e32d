use crate::HostError;

/// A Bluetooth Device Address (`BD_ADDR`) wrapper for type safety
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceAddress(pub [u8; 6]);

impl DeviceAddress {
    /// Create a new device address from bytes
    #[must_use]
    pub const fn new(addr: [u8; 6]) -> Self {
        Self(addr)
    }

    /// Get the raw address bytes
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }

    /// Format the address as a colon-separated hex string
    #[must_use]
    pub fn format_hex(&self) -> heapless::String<17> {
        let mut result = heapless::String::new();
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 {
                result.push(':').ok();
            }
            let hex_chars = [
                '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', 'A', 'B', 'C', 'D', 'E', 'F',
            ];
            result.push(hex_chars[(byte >> 4) as usize]).ok();
            result.push(hex_chars[(byte & 0x0F) as usize]).ok();
        }
        result
    }

    /// Parse a device address from a colon-separated hex string
    ///
    /// # Errors
    /// Returns `HostError::InvalidArgument` if the string is not exactly 17
    /// characters long or contains invalid characters
    pub fn from_hex(hex: &str) -> Result<Self, HostError> {
        if hex.len() != 17 || !hex.chars().all(|c| c.is_ascii_hexdigit() || c == ':') {
            return Err(HostError::InvalidArgument);
        }

        let mut bytes = [0u8; 6];
        for (i, byte) in hex.split(':').enumerate() {
            if i >= 6 || byte.len() != 2 {
                return Err(HostError::InvalidArgument);
            }
            bytes[i] = u8::from_str_radix(byte, 16).map_err(|_| HostError::InvalidArgument)?;
        }
        Ok(Self(bytes))
    }
}

impl From<[u8; 6]> for DeviceAddress {
    fn from(addr: [u8; 6]) -> Self {
        Self(addr)
    }
}

impl From<DeviceAddress> for [u8; 6] {
    fn from(addr: DeviceAddress) -> Self {
        addr.0
    }
}

impl From<DeviceAddress> for bt_hci::param::BdAddr {
    fn from(addr: DeviceAddress) -> Self {
        bt_hci::param::BdAddr::new(addr.0)
    }
}

impl From<DeviceAddress> for heapless::String<17> {
    fn from(addr: DeviceAddress) -> Self {
        addr.format_hex()
    }
}

impl TryFrom<&str> for DeviceAddress {
    type Error = HostError;

    fn try_from(hex: &str) -> Result<Self, Self::Error> {
        DeviceAddress::from_hex(hex)
    }
}

impl TryFrom<&[u8]> for DeviceAddress {
    type Error = HostError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        if bytes.len() == 6 {
            let mut addr = [0u8; 6];
            addr.copy_from_slice(bytes);
            Ok(DeviceAddress(addr))
        } else {
            Err(HostError::InvalidArgument)
        }
    }
}

impl TryFrom<bt_hci::param::BdAddr> for DeviceAddress {
    type Error = HostError;

    fn try_from(bd_addr: bt_hci::param::BdAddr) -> Result<Self, Self::Error> {
        bd_addr.raw().try_into()
    }
}

/// A (local adapter, remote device) address pair
///
/// Browse sessions, HID sessions and persisted service state are all keyed
/// by the pair of addresses involved, never by a live object reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AddressPair {
    /// Address of the local adapter
    pub local: DeviceAddress,
    /// Address of the remote device
    pub remote: DeviceAddress,
}

impl AddressPair {
    /// Create a new address pair
    #[must_use]
    pub const fn new(local: DeviceAddress, remote: DeviceAddress) -> Self {
        Self { local, remote }
    }
}

//! Table entries of the security PIB, IEEE 802.15.4-2006 section 7.6.1.

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::{
    MAX_KEY_DEVICE_TABLE_ENTRIES, MAX_KEY_ID_LOOKUP_ENTRIES, MAX_KEY_TABLE_ENTRIES, MAX_KEY_USAGE_TABLE_ENTRIES,
};

/// Length of a key.
pub const KEY_LEN: usize = 16;

/// Longest key lookup data.
pub const LOOKUP_DATA_MAX_LEN: usize = 9;

/// MAC frame type field values.
pub mod frame_type {
    pub const BEACON: u8 = 0x00;
    pub const DATA: u8 = 0x01;
    pub const ACK: u8 = 0x02;
    pub const COMMAND: u8 = 0x03;
}

/// Command frame identifier of a data request.
pub const DATA_REQUEST: u8 = 0x04;

/// Security level, the encryption flag and the MIC length in one value.
#[derive(Debug, PartialEq, Eq, Clone, Copy, PartialOrd, Ord, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum SecurityLevel {
    None = 0,
    Mic32 = 1,
    Mic64 = 2,
    Mic128 = 3,
    Enc = 4,
    EncMic32 = 5,
    EncMic64 = 6,
    EncMic128 = 7,
}

impl SecurityLevel {
    pub fn encrypts(self) -> bool {
        u8::from(self) & 0b100 != 0
    }

    /// MIC length in bytes.
    pub fn mic_len(self) -> usize {
        match u8::from(self) & 0b11 {
            0 => 0,
            1 => 4,
            2 => 8,
            _ => 16,
        }
    }

    /// Whether this level offers at least the protection of `other`.
    ///
    /// Levels are only partially ordered: neither of MIC-128 and ENC satisfies the other.
    pub fn satisfies(self, other: SecurityLevel) -> bool {
        self.encrypts() >= other.encrypts() && self.mic_len() >= other.mic_len()
    }
}

/// Size of the lookup data of a [KeyIdLookupDescriptor].
#[derive(Debug, PartialEq, Eq, Clone, Copy, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum LookupDataSize {
    /// Key source of 4 bytes and key index.
    Five = 0,
    /// Key source of 8 bytes and key index.
    Nine = 1,
}

impl LookupDataSize {
    pub fn octets(self) -> usize {
        match self {
            LookupDataSize::Five => 5,
            LookupDataSize::Nine => 9,
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct KeyIdLookupDescriptor {
    pub lookup_data: [u8; LOOKUP_DATA_MAX_LEN],
    pub lookup_data_size: LookupDataSize,
}

impl KeyIdLookupDescriptor {
    pub const DEFAULT: Self = Self {
        lookup_data: [0; LOOKUP_DATA_MAX_LEN],
        lookup_data_size: LookupDataSize::Five,
    };

    /// Significant part of the lookup data.
    pub fn data(&self) -> &[u8] {
        &self.lookup_data[..self.lookup_data_size.octets()]
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct KeyDeviceDescriptor {
    /// Index into the device table.
    pub device_descriptor_handle: u8,
    pub unique_device: bool,
    pub blacklisted: bool,
}

impl KeyDeviceDescriptor {
    pub const DEFAULT: Self = Self {
        device_descriptor_handle: 0,
        unique_device: false,
        blacklisted: false,
    };
}

/// Frame a key may be used for; `command_frame_identifier` only matters for command frames.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct KeyUsageDescriptor {
    pub frame_type: u8,
    pub command_frame_identifier: u8,
}

impl KeyUsageDescriptor {
    pub const DEFAULT: Self = Self {
        frame_type: frame_type::DATA,
        command_frame_identifier: DATA_REQUEST,
    };

    pub fn matches(&self, frame_type: u8, command_frame_identifier: u8) -> bool {
        self.frame_type == frame_type
            && (frame_type != frame_type::COMMAND || self.command_frame_identifier == command_frame_identifier)
    }
}

/// A key along with the lists describing how it may be used.
///
/// Each list holds up to its capacity in entries, of which only the first `*_entries` are in use.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct KeyTableEntry {
    pub key: [u8; KEY_LEN],
    /// Outgoing frame counter for this key.
    pub frame_counter: u32,
    pub key_id_lookup_list: [KeyIdLookupDescriptor; MAX_KEY_ID_LOOKUP_ENTRIES],
    pub key_id_lookup_entries: u8,
    pub key_device_list: [KeyDeviceDescriptor; MAX_KEY_DEVICE_TABLE_ENTRIES],
    pub key_device_list_entries: u8,
    pub key_usage_list: [KeyUsageDescriptor; MAX_KEY_USAGE_TABLE_ENTRIES],
    pub key_usage_list_entries: u8,
}

impl KeyTableEntry {
    pub const DEFAULT: Self = Self {
        key: [0; KEY_LEN],
        frame_counter: 0,
        key_id_lookup_list: [KeyIdLookupDescriptor::DEFAULT; MAX_KEY_ID_LOOKUP_ENTRIES],
        key_id_lookup_entries: 0,
        key_device_list: [KeyDeviceDescriptor::DEFAULT; MAX_KEY_DEVICE_TABLE_ENTRIES],
        key_device_list_entries: 0,
        key_usage_list: [KeyUsageDescriptor::DEFAULT; MAX_KEY_USAGE_TABLE_ENTRIES],
        key_usage_list_entries: 0,
    };

    /// All entry counts are within the capacity of their lists.
    pub fn is_consistent(&self) -> bool {
        (self.key_id_lookup_entries as usize) <= MAX_KEY_ID_LOOKUP_ENTRIES
            && (self.key_device_list_entries as usize) <= MAX_KEY_DEVICE_TABLE_ENTRIES
            && (self.key_usage_list_entries as usize) <= MAX_KEY_USAGE_TABLE_ENTRIES
    }

    pub fn key_id_lookups(&self) -> &[KeyIdLookupDescriptor] {
        &self.key_id_lookup_list[..(self.key_id_lookup_entries as usize).min(MAX_KEY_ID_LOOKUP_ENTRIES)]
    }

    pub fn key_devices(&self) -> &[KeyDeviceDescriptor] {
        &self.key_device_list[..(self.key_device_list_entries as usize).min(MAX_KEY_DEVICE_TABLE_ENTRIES)]
    }

    pub fn key_usages(&self) -> &[KeyUsageDescriptor] {
        &self.key_usage_list[..(self.key_usage_list_entries as usize).min(MAX_KEY_USAGE_TABLE_ENTRIES)]
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceDescriptor {
    pub pan_id: u16,
    pub short_address: u16,
    pub ext_address: [u8; 8],
    /// Next acceptable incoming frame counter, per key.
    pub frame_counter: [u32; MAX_KEY_TABLE_ENTRIES],
    /// May send frames below the minimum security level where the table allows an override.
    pub exempt: bool,
}

impl DeviceDescriptor {
    pub const DEFAULT: Self = Self {
        pan_id: 0x0000,
        short_address: 0xFFFF,
        ext_address: [0; 8],
        frame_counter: [0; MAX_KEY_TABLE_ENTRIES],
        exempt: false,
    };
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SecurityLevelDescriptor {
    pub frame_type: u8,
    pub command_frame_identifier: u8,
    pub security_minimum: SecurityLevel,
    pub device_override_security_minimum: bool,
}

impl SecurityLevelDescriptor {
    pub const DEFAULT: Self = Self {
        frame_type: frame_type::DATA,
        command_frame_identifier: DATA_REQUEST,
        security_minimum: SecurityLevel::EncMic32,
        device_override_security_minimum: true,
    };

    pub fn matches(&self, frame_type: u8, command_frame_identifier: u8) -> bool {
        self.frame_type == frame_type
            && (frame_type != frame_type::COMMAND || self.command_frame_identifier == command_frame_identifier)
    }
}

/// Argument of a `KEY_ID_LOOKUP_ENTRY` get or set.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct KeyIdLookupEntry {
    pub key_index: u8,
    pub key_id_lookup_index: u8,
    pub descriptor: KeyIdLookupDescriptor,
}

/// Argument of a `KEY_DEVICE_ENTRY` get or set.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct KeyDeviceEntry {
    pub key_index: u8,
    pub key_device_index: u8,
    pub descriptor: KeyDeviceDescriptor,
}

/// Argument of a `KEY_USAGE_ENTRY` get or set.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct KeyUsageEntry {
    pub key_index: u8,
    pub key_usage_index: u8,
    pub descriptor: KeyUsageDescriptor,
}

/// Argument of a `KEY_ENTRY` get or set, the key material and its outgoing frame counter.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct KeyEntry {
    pub key_index: u8,
    pub key: [u8; KEY_LEN],
    pub frame_counter: u32,
}

/// Argument of a `DEVICE_ENTRY` get or set.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct DeviceEntry {
    pub device_index: u8,
    pub descriptor: DeviceDescriptor,
}

/// Argument of a `SECURITY_LEVEL_ENTRY` get or set.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct SecurityLevelEntry {
    pub security_level_index: u8,
    pub descriptor: SecurityLevelDescriptor,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn security_level_ordering() {
        use SecurityLevel::*;

        assert!(EncMic32.satisfies(EncMic32));
        assert!(EncMic64.satisfies(Mic32));
        assert!(EncMic128.satisfies(Enc));
        assert!(Mic32.satisfies(None));
        assert!(!Mic128.satisfies(Enc));
        assert!(!Enc.satisfies(Mic32));
        assert!(!EncMic32.satisfies(Mic64));
        assert!(!None.satisfies(Mic32));

        assert_eq!(EncMic64.mic_len(), 8);
        assert!(!Mic128.encrypts());
    }

    #[test]
    fn usage_matching() {
        let data = KeyUsageDescriptor::DEFAULT;
        // Command id is ignored for non-command frames.
        assert!(data.matches(frame_type::DATA, 0x00));
        assert!(!data.matches(frame_type::COMMAND, DATA_REQUEST));

        let command = KeyUsageDescriptor {
            frame_type: frame_type::COMMAND,
            command_frame_identifier: DATA_REQUEST,
        };
        assert!(command.matches(frame_type::COMMAND, DATA_REQUEST));
        assert!(!command.matches(frame_type::COMMAND, 0x01));
    }

    #[test]
    fn lists_are_bounded_by_counts() {
        let mut entry = KeyTableEntry::DEFAULT;
        assert!(entry.key_devices().is_empty());

        entry.key_device_list_entries = 3;
        entry.key_usage_list_entries = 1;
        assert_eq!(entry.key_devices().len(), 3);
        assert_eq!(entry.key_usages(), &[KeyUsageDescriptor::DEFAULT]);
        assert!(entry.is_consistent());

        entry.key_id_lookup_entries = 2;
        assert!(!entry.is_consistent());
        assert_eq!(entry.key_id_lookups().len(), 1);
    }
}

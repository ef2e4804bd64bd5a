use core::cell::Cell;

use critical_section::Mutex;
use defmt_or_log::debug;

use crate::attribute::{offset, Attribute, PibError, SCALAR_BLOCK_SIZE};
use crate::descriptor::{
    DeviceDescriptor, DeviceEntry, KeyDeviceEntry, KeyEntry, KeyIdLookupEntry, KeyTableEntry, KeyUsageEntry,
    SecurityLevel, SecurityLevelDescriptor, SecurityLevelEntry,
};
use crate::{
    MAX_DEVICE_TABLE_ENTRIES, MAX_KEY_DEVICE_TABLE_ENTRIES, MAX_KEY_ID_LOOKUP_ENTRIES, MAX_KEY_TABLE_ENTRIES,
    MAX_KEY_USAGE_TABLE_ENTRIES, MAX_SECURITY_LEVEL_TABLE_ENTRIES,
};

/// Destination of a get, matching the attribute being read.
///
/// Entry queries carry their indices in and the descriptor out.
#[derive(Debug)]
pub enum Query<'a> {
    /// Scalar attributes, sized exactly to [Attribute::scalar_len].
    Scalar(&'a mut [u8]),
    KeyIdLookupEntry(&'a mut KeyIdLookupEntry),
    KeyDeviceEntry(&'a mut KeyDeviceEntry),
    KeyUsageEntry(&'a mut KeyUsageEntry),
    KeyEntry(&'a mut KeyEntry),
    DeviceEntry(&'a mut DeviceEntry),
    SecurityLevelEntry(&'a mut SecurityLevelEntry),
}

/// Value of a set, matching the attribute being written.
#[derive(Debug, Clone, Copy)]
pub enum Update<'a> {
    Scalar(&'a [u8]),
    /// `None` links the lists populated through the entry attributes to their keys.
    KeyTable(Option<&'a [KeyTableEntry]>),
    /// `None` leaves the individually written entries as they are.
    DeviceTable(Option<&'a [DeviceDescriptor]>),
    /// `None` leaves the individually written entries as they are.
    SecurityLevelTable(Option<&'a [SecurityLevelDescriptor]>),
    KeyIdLookupEntry(&'a KeyIdLookupEntry),
    KeyDeviceEntry(&'a KeyDeviceEntry),
    KeyUsageEntry(&'a KeyUsageEntry),
    KeyEntry(&'a KeyEntry),
    DeviceEntry(&'a DeviceEntry),
    SecurityLevelEntry(&'a SecurityLevelEntry),
}

const DEFAULT_SCALARS: [u8; SCALAR_BLOCK_SIZE] = {
    let mut block = [0u8; SCALAR_BLOCK_SIZE];
    block[offset::SECURITY_LEVEL_TABLE_ENTRIES as usize] = MAX_SECURITY_LEVEL_TABLE_ENTRIES as u8;
    block[offset::AUTO_REQUEST_SECURITY_LEVEL as usize] = SecurityLevel::EncMic64 as u8;

    let mut i = offset::AUTO_REQUEST_KEY_SOURCE as usize;
    while i < offset::PAN_COORD_EXTENDED_ADDRESS as usize {
        // Both key sources and the key index in between.
        block[i] = 0xFF;
        i += 1;
    }

    let short = 0xFFFEu16.to_le_bytes();
    block[offset::PAN_COORD_SHORT_ADDRESS as usize] = short[0];
    block[offset::PAN_COORD_SHORT_ADDRESS as usize + 1] = short[1];
    block
};

/// The security attributes of one MAC instance.
///
/// Scalar attributes may be read from interrupt context through a shared reference while the
/// owner updates them, so their copies in and out happen inside a critical section.
pub struct SecurityPib {
    scalars: Mutex<Cell<[u8; SCALAR_BLOCK_SIZE]>>,
    pub(crate) key_table: [KeyTableEntry; MAX_KEY_TABLE_ENTRIES],
    /// Whether the owned lists of a key are wired up and visible to frame processing.
    pub(crate) linked: [bool; MAX_KEY_TABLE_ENTRIES],
    pub(crate) device_table: [DeviceDescriptor; MAX_DEVICE_TABLE_ENTRIES],
    pub(crate) security_level_table: [SecurityLevelDescriptor; MAX_SECURITY_LEVEL_TABLE_ENTRIES],
}

impl Default for SecurityPib {
    fn default() -> Self {
        Self::new()
    }
}

impl SecurityPib {
    /// PIB holding the reset defaults.
    pub const fn new() -> Self {
        Self {
            scalars: Mutex::new(Cell::new(DEFAULT_SCALARS)),
            key_table: [KeyTableEntry::DEFAULT; MAX_KEY_TABLE_ENTRIES],
            linked: [false; MAX_KEY_TABLE_ENTRIES],
            device_table: [DeviceDescriptor::DEFAULT; MAX_DEVICE_TABLE_ENTRIES],
            security_level_table: [SecurityLevelDescriptor::DEFAULT; MAX_SECURITY_LEVEL_TABLE_ENTRIES],
        }
    }

    /// Restore the defaults, as on a MAC reset.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    fn scalar_byte(&self, offset: u8) -> u8 {
        critical_section::with(|cs| self.scalars.borrow(cs).get()[offset as usize])
    }

    pub fn key_table_entries(&self) -> usize {
        self.scalar_byte(offset::KEY_TABLE_ENTRIES) as usize
    }

    pub fn device_table_entries(&self) -> usize {
        self.scalar_byte(offset::DEVICE_TABLE_ENTRIES) as usize
    }

    pub fn security_level_table_entries(&self) -> usize {
        self.scalar_byte(offset::SECURITY_LEVEL_TABLE_ENTRIES) as usize
    }

    /// Read attribute `id` into `query`.
    pub fn get(&self, id: u8, query: Query<'_>) -> Result<(), PibError> {
        let attribute = Attribute::try_from(id).map_err(|_| {
            debug!("Get of unknown attribute {:#x}", id);
            PibError::UnsupportedAttribute
        })?;

        match (attribute, query) {
            (Attribute::FrameCounter, _) => Err(PibError::UnsupportedAttribute),
            (Attribute::KeyTable | Attribute::DeviceTable | Attribute::SecurityLevelTable, _) => {
                debug!("Tables can only be read entry by entry");
                Err(PibError::InvalidParameter)
            }
            (Attribute::KeyIdLookupEntry, Query::KeyIdLookupEntry(out)) => {
                let key = self.key(out.key_index)?;
                out.descriptor = *in_use(key.key_id_lookups(), out.key_id_lookup_index)?;
                Ok(())
            }
            (Attribute::KeyDeviceEntry, Query::KeyDeviceEntry(out)) => {
                let key = self.key(out.key_index)?;
                out.descriptor = *in_use(key.key_devices(), out.key_device_index)?;
                Ok(())
            }
            (Attribute::KeyUsageEntry, Query::KeyUsageEntry(out)) => {
                let key = self.key(out.key_index)?;
                out.descriptor = *in_use(key.key_usages(), out.key_usage_index)?;
                Ok(())
            }
            (Attribute::KeyEntry, Query::KeyEntry(out)) => {
                let key = in_use(self.keys(), out.key_index)?;
                out.key = key.key;
                out.frame_counter = key.frame_counter;
                Ok(())
            }
            (Attribute::DeviceEntry, Query::DeviceEntry(out)) => {
                out.descriptor = *in_use(self.devices(), out.device_index)?;
                Ok(())
            }
            (Attribute::SecurityLevelEntry, Query::SecurityLevelEntry(out)) => {
                out.descriptor = *in_use(self.security_levels(), out.security_level_index)?;
                Ok(())
            }
            (attribute, Query::Scalar(out)) => {
                let scalar = attribute.scalar().ok_or(PibError::InvalidParameter)?;
                if out.len() != scalar.len as usize {
                    debug!("Get of {:?} into {} bytes", attribute, out.len());
                    return Err(PibError::InvalidParameter);
                }

                critical_section::with(|cs| out.copy_from_slice(&self.scalars.borrow(cs).get()[scalar.range()]));
                Ok(())
            }
            (attribute, _) => {
                debug!("Get of {:?} with mismatched value", attribute);
                Err(PibError::InvalidParameter)
            }
        }
    }

    /// Write `update` to attribute `id`.
    ///
    /// Either the whole update is applied or, on error, nothing is.
    pub fn set(&mut self, id: u8, update: Update<'_>) -> Result<(), PibError> {
        let attribute = Attribute::try_from(id).map_err(|_| {
            debug!("Set of unknown attribute {:#x}", id);
            PibError::UnsupportedAttribute
        })?;

        match (attribute, update) {
            (Attribute::FrameCounter, _) => Err(PibError::UnsupportedAttribute),
            (Attribute::KeyTable, Update::KeyTable(None)) => {
                self.linked = [true; MAX_KEY_TABLE_ENTRIES];
                Ok(())
            }
            (Attribute::KeyTable, Update::KeyTable(Some(table))) => {
                if table.len() > MAX_KEY_TABLE_ENTRIES || !table.iter().all(KeyTableEntry::is_consistent) {
                    debug!("Key table of {} entries rejected", table.len());
                    return Err(PibError::InvalidParameter);
                }

                self.key_table[..table.len()].copy_from_slice(table);
                self.linked[..table.len()].fill(true);
                Ok(())
            }
            (Attribute::DeviceTable, Update::DeviceTable(table)) => {
                copy_table(&mut self.device_table, table)
            }
            (Attribute::SecurityLevelTable, Update::SecurityLevelTable(table)) => {
                copy_table(&mut self.security_level_table, table)
            }
            (Attribute::KeyIdLookupEntry, Update::KeyIdLookupEntry(entry)) => {
                let index = checked(entry.key_id_lookup_index, MAX_KEY_ID_LOOKUP_ENTRIES)?;
                let key = self.key_mut(entry.key_index)?;
                key.key_id_lookup_list[index] = entry.descriptor;
                key.key_id_lookup_entries = key.key_id_lookup_entries.max(entry.key_id_lookup_index + 1);
                Ok(())
            }
            (Attribute::KeyDeviceEntry, Update::KeyDeviceEntry(entry)) => {
                let index = checked(entry.key_device_index, MAX_KEY_DEVICE_TABLE_ENTRIES)?;
                let key = self.key_mut(entry.key_index)?;
                // Entries are rewritten out of order, so an overwrite never moves the count.
                key.key_device_list[index] = entry.descriptor;
                key.key_device_list_entries = key.key_device_list_entries.max(entry.key_device_index + 1);
                Ok(())
            }
            (Attribute::KeyUsageEntry, Update::KeyUsageEntry(entry)) => {
                let index = checked(entry.key_usage_index, MAX_KEY_USAGE_TABLE_ENTRIES)?;
                let key = self.key_mut(entry.key_index)?;
                key.key_usage_list[index] = entry.descriptor;
                key.key_usage_list_entries = key.key_usage_list_entries.max(entry.key_usage_index + 1);
                Ok(())
            }
            (Attribute::KeyEntry, Update::KeyEntry(entry)) => {
                let key = self.key_mut(entry.key_index)?;
                key.key = entry.key;
                key.frame_counter = entry.frame_counter;
                Ok(())
            }
            (Attribute::DeviceEntry, Update::DeviceEntry(entry)) => {
                let index = checked(entry.device_index, MAX_DEVICE_TABLE_ENTRIES)?;
                self.device_table[index] = entry.descriptor;
                Ok(())
            }
            (Attribute::SecurityLevelEntry, Update::SecurityLevelEntry(entry)) => {
                let index = checked(entry.security_level_index, MAX_SECURITY_LEVEL_TABLE_ENTRIES)?;
                self.security_level_table[index] = entry.descriptor;
                Ok(())
            }
            (attribute, Update::Scalar(value)) => {
                let scalar = attribute.scalar().ok_or(PibError::InvalidParameter)?;
                scalar.check(value).inspect_err(|e| debug!("Set of {:?} rejected: {:?}", attribute, e))?;

                critical_section::with(|cs| {
                    let cell = self.scalars.borrow(cs);
                    let mut block = cell.get();
                    block[scalar.range()].copy_from_slice(value);
                    cell.set(block);
                });
                Ok(())
            }
            (attribute, _) => {
                debug!("Set of {:?} with mismatched value", attribute);
                Err(PibError::InvalidParameter)
            }
        }
    }

    fn key(&self, key_index: u8) -> Result<&KeyTableEntry, PibError> {
        self.key_table.get(key_index as usize).ok_or(PibError::InvalidParameter)
    }

    fn key_mut(&mut self, key_index: u8) -> Result<&mut KeyTableEntry, PibError> {
        self.key_table.get_mut(key_index as usize).ok_or(PibError::InvalidParameter)
    }

    /// Keys counted in by `keyTableEntries`.
    pub(crate) fn keys(&self) -> &[KeyTableEntry] {
        &self.key_table[..self.key_table_entries().min(MAX_KEY_TABLE_ENTRIES)]
    }

    /// Devices counted in by `deviceTableEntries`.
    pub(crate) fn devices(&self) -> &[DeviceDescriptor] {
        &self.device_table[..self.device_table_entries().min(MAX_DEVICE_TABLE_ENTRIES)]
    }

    /// Descriptors counted in by `securityLevelTableEntries`.
    pub(crate) fn security_levels(&self) -> &[SecurityLevelDescriptor] {
        &self.security_level_table[..self.security_level_table_entries().min(MAX_SECURITY_LEVEL_TABLE_ENTRIES)]
    }
}

fn checked(index: u8, capacity: usize) -> Result<usize, PibError> {
    let index = index as usize;
    if index < capacity {
        Ok(index)
    } else {
        debug!("Entry index {} beyond capacity {}", index, capacity);
        Err(PibError::InvalidParameter)
    }
}

fn in_use<T>(entries: &[T], index: u8) -> Result<&T, PibError> {
    entries.get(index as usize).ok_or_else(|| {
        debug!("Entry index {} beyond the {} in use", index, entries.len());
        PibError::InvalidParameter
    })
}

fn copy_table<T: Copy>(table: &mut [T], value: Option<&[T]>) -> Result<(), PibError> {
    let Some(value) = value else {
        return Ok(());
    };

    let dst = table.get_mut(..value.len()).ok_or(PibError::InvalidParameter)?;
    dst.copy_from_slice(value);
    Ok(())
}

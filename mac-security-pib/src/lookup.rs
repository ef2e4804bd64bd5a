//! Frame security procedures run against the PIB, IEEE 802.15.4-2006 section 7.5.8.2.

use defmt_or_log::{debug, warn};
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::descriptor::{KeyTableEntry, SecurityLevel};
use crate::pib::SecurityPib;

/// Highest value a frame counter can take, never valid on air.
const COUNTER_EXHAUSTED: u32 = u32::MAX;

/// Why a secured frame cannot be processed, carrying its MAC status code.
#[derive(Debug, PartialEq, Eq, Clone, Copy, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum FrameSecurityError {
    CounterError = 0xDB,
    ImproperKeyType = 0xDC,
    ImproperSecurityLevel = 0xDD,
    SecurityError = 0xE4,
    UnavailableKey = 0xF3,
}

/// Address a secured frame was sent from.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DeviceAddress {
    Short { pan_id: u16, short_address: u16 },
    Extended([u8; 8]),
}

/// Outcome of the incoming security level check.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SecurityLevelCheck {
    Passed,
    /// An unsecured frame that only passes if the sending device is exempt.
    Conditional,
    Failed,
}

impl SecurityPib {
    /// Keys in use whose lists have been linked, with their index in the key table.
    fn visible_keys(&self) -> impl Iterator<Item = (usize, &KeyTableEntry)> {
        self.keys()
            .iter()
            .enumerate()
            .filter(|(i, _)| self.linked.get(*i).copied().unwrap_or(false))
    }

    fn visible_key(&self, key_index: usize) -> Result<&KeyTableEntry, FrameSecurityError> {
        self.visible_keys()
            .find(|(i, _)| *i == key_index)
            .map(|(_, key)| key)
            .ok_or(FrameSecurityError::UnavailableKey)
    }

    /// Find the key identified by `lookup_data`, 5 or 9 octets of key source and key index.
    pub fn key_descriptor_lookup(&self, lookup_data: &[u8]) -> Result<usize, FrameSecurityError> {
        self.visible_keys()
            .find(|(_, key)| key.key_id_lookups().iter().any(|d| d.data() == lookup_data))
            .map(|(i, _)| i)
            .ok_or_else(|| {
                debug!("No key for lookup data {:?}", lookup_data);
                FrameSecurityError::UnavailableKey
            })
    }

    /// Resolve the device table index of the sender of a frame secured with key `key_index`.
    pub fn device_descriptor_lookup(
        &self,
        key_index: usize,
        address: &DeviceAddress,
    ) -> Result<usize, FrameSecurityError> {
        let key = self.visible_key(key_index)?;
        let devices = self.devices();

        key.key_devices()
            .iter()
            .filter(|d| !d.blacklisted)
            .map(|d| d.device_descriptor_handle as usize)
            .find(|handle| {
                devices.get(*handle).is_some_and(|device| match address {
                    DeviceAddress::Short { pan_id, short_address } => {
                        device.pan_id == *pan_id && device.short_address == *short_address
                    }
                    DeviceAddress::Extended(ext) => device.ext_address == *ext,
                })
            })
            .ok_or_else(|| {
                debug!("Sender {:?} unknown to key {}", address, key_index);
                FrameSecurityError::UnavailableKey
            })
    }

    /// Compare the security level of an incoming frame with the minimum the table requires.
    pub fn incoming_security_level_check(
        &self,
        frame_type: u8,
        command_frame_identifier: u8,
        level: SecurityLevel,
    ) -> SecurityLevelCheck {
        let Some(descriptor) = self
            .security_levels()
            .iter()
            .find(|d| d.matches(frame_type, command_frame_identifier))
        else {
            return SecurityLevelCheck::Passed;
        };

        if level.satisfies(descriptor.security_minimum) {
            SecurityLevelCheck::Passed
        } else if level == SecurityLevel::None && descriptor.device_override_security_minimum {
            SecurityLevelCheck::Conditional
        } else {
            debug!("Security level {:?} below {:?}", level, descriptor.security_minimum);
            SecurityLevelCheck::Failed
        }
    }

    /// Whether key `key_index` may secure frames of the given type.
    pub fn key_usage_allowed(
        &self,
        key_index: usize,
        frame_type: u8,
        command_frame_identifier: u8,
    ) -> Result<(), FrameSecurityError> {
        let key = self.visible_key(key_index)?;
        if key
            .key_usages()
            .iter()
            .any(|u| u.matches(frame_type, command_frame_identifier))
        {
            Ok(())
        } else {
            Err(FrameSecurityError::ImproperKeyType)
        }
    }

    /// Whether the device at `device_index` may send below the minimum security level.
    pub fn device_exempt(&self, device_index: usize) -> bool {
        self.devices().get(device_index).is_some_and(|d| d.exempt)
    }

    /// Accept `counter` from the device at `device_index` for key `key_index`, rejecting replays.
    pub fn accept_incoming_frame_counter(
        &mut self,
        device_index: usize,
        key_index: usize,
        counter: u32,
    ) -> Result<(), FrameSecurityError> {
        if counter == COUNTER_EXHAUSTED {
            return Err(FrameSecurityError::CounterError);
        }
        self.visible_key(key_index)?;
        if device_index >= self.devices().len() {
            return Err(FrameSecurityError::UnavailableKey);
        }

        let expected = &mut self.device_table[device_index].frame_counter[key_index];
        if counter < *expected {
            debug!("Replayed frame counter {} from device {}", counter, device_index);
            return Err(FrameSecurityError::CounterError);
        }

        *expected = counter + 1;
        Ok(())
    }

    /// Frame counter for the next frame secured with key `key_index`.
    pub fn next_outgoing_frame_counter(&mut self, key_index: usize) -> Result<u32, FrameSecurityError> {
        self.visible_key(key_index)?;

        let key = &mut self.key_table[key_index];
        if key.frame_counter == COUNTER_EXHAUSTED {
            warn!("Frame counter of key {} exhausted", key_index);
            return Err(FrameSecurityError::CounterError);
        }

        let counter = key.frame_counter;
        key.frame_counter += 1;
        Ok(counter)
    }
}

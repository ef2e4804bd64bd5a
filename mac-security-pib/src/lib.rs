//! Security related part of the IEEE 802.15.4 MAC PAN information base.
#![cfg_attr(not(test), no_std)]

pub mod attribute;
pub mod descriptor;
pub mod lookup;
pub mod pib;

pub use attribute::{status, Attribute, PibError, SUCCESS};
pub use lookup::{DeviceAddress, FrameSecurityError, SecurityLevelCheck};
pub use pib::{Query, SecurityPib, Update};

/// Keys the key table holds.
pub const MAX_KEY_TABLE_ENTRIES: usize = 2;

/// Lookup descriptors per key.
pub const MAX_KEY_ID_LOOKUP_ENTRIES: usize = 1;

/// Device descriptors per key.
pub const MAX_KEY_DEVICE_TABLE_ENTRIES: usize = 8;

/// Usage descriptors per key.
pub const MAX_KEY_USAGE_TABLE_ENTRIES: usize = 1;

pub const MAX_DEVICE_TABLE_ENTRIES: usize = 8;

pub const MAX_SECURITY_LEVEL_TABLE_ENTRIES: usize = 1;

//! Flash controller cache mode.
//!
//! The ROM CRC routine reconfigures the flash cache and does not put it back, so every call
//! into it happens under a [CacheModeGuard].

use core::ptr::{read_volatile, write_volatile};

use defmt_or_log::trace;

/// FLASH_CTRL_FCTL, flash control register.
const FCTL: *mut u32 = 0x400D_3008 as *mut u32;

const FCTL_CM_SHIFT: u32 = 2;
const FCTL_CM_MASK: u32 = 0b11 << FCTL_CM_SHIFT;
const FCTL_BUSY: u32 = 1 << 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CacheMode {
    Disabled = 0,
    Enabled = 1,
    Prefetch = 2,
    Realtime = 3,
}

impl CacheMode {
    fn from_fctl(fctl: u32) -> Self {
        match (fctl & FCTL_CM_MASK) >> FCTL_CM_SHIFT {
            0 => CacheMode::Disabled,
            1 => CacheMode::Enabled,
            2 => CacheMode::Prefetch,
            _ => CacheMode::Realtime,
        }
    }

    fn apply(self, fctl: u32) -> u32 {
        (fctl & !FCTL_CM_MASK) | ((self as u32) << FCTL_CM_SHIFT)
    }
}

pub fn cache_mode() -> CacheMode {
    // Note(unsafe): FCTL is a valid, always mapped peripheral register, reading it has no side effects.
    CacheMode::from_fctl(unsafe { read_volatile(FCTL) })
}

/// Set the cache mode, after any ongoing flash operation has finished.
pub fn set_cache_mode(mode: CacheMode) {
    // Note(unsafe): FCTL is a valid, always mapped peripheral register. Only the cache mode bits change.
    unsafe {
        while read_volatile(FCTL) & FCTL_BUSY != 0 {}
        write_volatile(FCTL, mode.apply(read_volatile(FCTL)));
    }
}

/// Restores the cache mode that was active at its creation when dropped.
pub struct CacheModeGuard {
    saved: CacheMode,
}

impl CacheModeGuard {
    pub fn new() -> Self {
        let saved = cache_mode();
        trace!("Saved flash cache mode {:?}", saved);
        Self { saved }
    }
}

impl Default for CacheModeGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CacheModeGuard {
    fn drop(&mut self) {
        set_cache_mode(self.saved);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_mode_field() {
        // Busy and upper bits are left untouched.
        let fctl = 0xFFFF_FF80 | 0b0100;
        assert_eq!(CacheMode::from_fctl(fctl), CacheMode::Enabled);
        assert_eq!(CacheMode::Realtime.apply(fctl), 0xFFFF_FF80 | 0b1100);
        assert_eq!(CacheMode::Disabled.apply(fctl), 0xFFFF_FF80);

        for mode in [CacheMode::Disabled, CacheMode::Enabled, CacheMode::Prefetch, CacheMode::Realtime] {
            assert_eq!(CacheMode::from_fctl(mode.apply(0x0000_0003)), mode);
        }
    }
}

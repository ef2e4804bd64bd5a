//! CC2538 binding of the OTA manager: internal flash layout, ROM flash routines and ROM CRC.
#![cfg_attr(not(test), no_std)]

use core::sync::atomic::{AtomicBool, Ordering};

use ota_ledger::entry::VectorBounds;
use ota_ledger::flash::{Error, Ledger};
use ota_manager::image::ImageLayout;
use ota_manager::Ota;

pub mod crc;
pub mod flash;
pub mod flash_ctrl;
pub mod rom;

use crate::crc::RomCrc32;
use crate::flash::{FlashError, InternalFlash, PAGE_SIZE};

/// Start of the internal flash in the memory map.
pub const FLASH_BASE: u32 = 0x0020_0000;

/// Image the device runs, behind the boot manager.
pub const RUNNING_IMAGE: (u32, u32) = (0x0020_2000, 0x0003_E000);

/// Where downloaded images are stored.
pub const DOWNLOAD_IMAGE: (u32, u32) = (0x0024_0000, 0x0003_E000);

/// Page reserved for the ledger.
pub const LEDGER_PAGE: u32 = 254;
pub const LEDGER_ADDR: u32 = FLASH_BASE + LEDGER_PAGE * PAGE_SIZE as u32;

/// Metadata placement in every image built for this platform.
pub const IMAGE_LAYOUT: ImageLayout = ImageLayout {
    crc_offset: 0x290,
    vector_offset: 0,
};

/// Stack pointer in SRAM, reset handler in the image part of the flash.
pub const VECTOR_BOUNDS: VectorBounds = VectorBounds {
    stack_pointer: 0x2000_4001..0x2700_7FFF,
    reset_vector: 0x0020_0001..0x0027_EFFF,
};

pub type Cc2538Ota = Ota<InternalFlash, InternalFlash, RomCrc32>;

/// Whether the flash regions have been handed out.
static TAKEN: AtomicBool = AtomicBool::new(false);

#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TakeError {
    /// [take] was called before.
    AlreadyTaken,
    Ledger(Error<FlashError>),
}

/// Hand out the OTA manager owning the ledger page and both image regions.
///
/// Succeeds only once.
pub fn take() -> Result<Cc2538Ota, TakeError> {
    if TAKEN
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        return Err(TakeError::AlreadyTaken);
    }

    let ledger = Ledger::new(InternalFlash::new(LEDGER_ADDR, PAGE_SIZE as u32), VECTOR_BOUNDS)
        .map_err(TakeError::Ledger)?;

    Ok(Ota::new(
        ledger,
        InternalFlash::new(RUNNING_IMAGE.0, RUNNING_IMAGE.1),
        InternalFlash::new(DOWNLOAD_IMAGE.0, DOWNLOAD_IMAGE.1),
        RomCrc32::new(),
        IMAGE_LAYOUT,
    ))
}

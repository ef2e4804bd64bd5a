use core::ops::Range;

use ota_manager::crc::ImageCrc;

use crate::flash::{FlashError, InternalFlash};
use crate::flash_ctrl::CacheModeGuard;
use crate::rom::api_table;

/// Image CRC computed by the ROM routine, straight from the memory-mapped flash.
#[derive(Debug)]
pub struct RomCrc32 {
    _private: (),
}

impl RomCrc32 {
    pub(crate) const fn new() -> Self {
        Self { _private: () }
    }
}

impl ImageCrc<InternalFlash> for RomCrc32 {
    async fn crc32(&mut self, image: &mut InternalFlash, range: Range<u32>) -> Result<u32, FlashError> {
        let len = range.end.checked_sub(range.start).ok_or(FlashError::OutOfBounds)?;
        image.check(range.start, len as usize, 1)?;

        let _cache = CacheModeGuard::new();
        // Note(unsafe): range checked above, the ROM only reads from it.
        let crc = unsafe { (api_table().crc32)((image.base() + range.start) as *const u8, len) };
        Ok(crc)
    }
}

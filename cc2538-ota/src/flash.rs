//! Internal flash regions, programmed and erased through the ROM.

use embedded_storage_async::nor_flash::{
    ErrorType, MultiwriteNorFlash, NorFlash, NorFlashError, NorFlashErrorKind, ReadNorFlash,
};

use crate::rom::{self, api_table, RomError};

/// Erase page size of the internal flash.
pub const PAGE_SIZE: usize = 2048;

/// Programming granularity of the internal flash.
pub const WORD_SIZE: usize = 4;

/// Words staged in RAM per ROM program call.
const STAGING_WORDS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FlashError {
    OutOfBounds,
    NotAligned,
    Rom(RomError),
}

impl From<RomError> for FlashError {
    fn from(value: RomError) -> Self {
        FlashError::Rom(value)
    }
}

impl NorFlashError for FlashError {
    fn kind(&self) -> NorFlashErrorKind {
        match self {
            FlashError::OutOfBounds => NorFlashErrorKind::OutOfBounds,
            FlashError::NotAligned => NorFlashErrorKind::NotAligned,
            FlashError::Rom(_) => NorFlashErrorKind::Other,
        }
    }
}

/// Region of the memory-mapped internal flash, addressed relative to its base.
#[derive(Debug)]
pub struct InternalFlash {
    base: u32,
    size: u32,
}

impl InternalFlash {
    /// Only one [InternalFlash] may ever cover a given address, see [crate::take].
    pub(crate) const fn new(base: u32, size: u32) -> Self {
        Self { base, size }
    }

    /// Absolute address of the start of the region.
    pub fn base(&self) -> u32 {
        self.base
    }

    /// Validate an access of `len` bytes at `offset`, aligned to `align`.
    pub(crate) fn check(&self, offset: u32, len: usize, align: usize) -> Result<(), FlashError> {
        let end = (offset as usize).checked_add(len).ok_or(FlashError::OutOfBounds)?;
        if end > self.size as usize {
            return Err(FlashError::OutOfBounds);
        }
        if !(offset as usize).is_multiple_of(align) || !len.is_multiple_of(align) {
            return Err(FlashError::NotAligned);
        }
        Ok(())
    }
}

impl ErrorType for InternalFlash {
    type Error = FlashError;
}

impl ReadNorFlash for InternalFlash {
    const READ_SIZE: usize = 1;

    async fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        self.check(offset, bytes.len(), Self::READ_SIZE)?;

        // Note(unsafe): range checked above and this region is exclusively ours.
        let src = unsafe { core::slice::from_raw_parts((self.base + offset) as *const u8, bytes.len()) };
        bytes.copy_from_slice(src);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.size as usize
    }
}

impl NorFlash for InternalFlash {
    const WRITE_SIZE: usize = WORD_SIZE;

    const ERASE_SIZE: usize = PAGE_SIZE;

    async fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        if from > to {
            return Err(FlashError::OutOfBounds);
        }
        self.check(from, (to - from) as usize, Self::ERASE_SIZE)?;

        for page in (from..to).step_by(Self::ERASE_SIZE) {
            // Note(unsafe): page checked to lie within our region, the ROM erases nothing else.
            rom::status(unsafe { (api_table().page_erase)(self.base + page, PAGE_SIZE as u32) })?;
        }
        Ok(())
    }

    async fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        self.check(offset, bytes.len(), Self::WRITE_SIZE)?;

        // The ROM programs from word-aligned RAM only, so stage the data.
        let mut staging = [0u32; STAGING_WORDS];
        let mut address = self.base + offset;
        for chunk in bytes.chunks(STAGING_WORDS * WORD_SIZE) {
            for (word, src) in staging.iter_mut().zip(chunk.chunks_exact(WORD_SIZE)) {
                *word = u32::from_le_bytes([src[0], src[1], src[2], src[3]]);
            }

            // Note(unsafe): destination checked above, the staging buffer holds at least `chunk.len()` bytes.
            rom::status(unsafe { (api_table().program_flash)(staging.as_ptr(), address, chunk.len() as u32) })?;
            address += chunk.len() as u32;
        }
        Ok(())
    }
}

/// Words can be programmed again as long as bits only go from 1 to 0.
impl MultiwriteNorFlash for InternalFlash {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_checks() {
        let flash = InternalFlash::new(0x0024_0000, 4 * PAGE_SIZE as u32);

        assert_eq!(flash.check(0, 8192, PAGE_SIZE), Ok(()));
        assert_eq!(flash.check(2048, 2048, PAGE_SIZE), Ok(()));
        assert_eq!(flash.check(1024, 2048, PAGE_SIZE), Err(FlashError::NotAligned));
        assert_eq!(flash.check(2048, 8192, PAGE_SIZE), Err(FlashError::OutOfBounds));

        assert_eq!(flash.check(0x290, 8, WORD_SIZE), Ok(()));
        assert_eq!(flash.check(0x291, 8, WORD_SIZE), Err(FlashError::NotAligned));
        assert_eq!(flash.check(0x290, 6, WORD_SIZE), Err(FlashError::NotAligned));
        assert_eq!(flash.check(8191, 1, 1), Ok(()));
        assert_eq!(flash.check(8191, 2, 1), Err(FlashError::OutOfBounds));
        assert_eq!(flash.check(u32::MAX, 2, 1), Err(FlashError::OutOfBounds));
    }
}

//! Call gate into the CC2538 boot ROM function table.

/// ROM function table, CC2538 user's guide SWRU319, "ROM API".
#[repr(C)]
pub struct ApiTable {
    /// CRC-32 over `byte_count` bytes, leaves the flash cache mode changed.
    pub crc32: unsafe extern "C" fn(data: *const u8, byte_count: u32) -> u32,
    pub get_flash_size: unsafe extern "C" fn() -> u32,
    pub get_chip_id: unsafe extern "C" fn() -> u32,
    pub page_erase: unsafe extern "C" fn(flash_addr: u32, size: u32) -> i32,
    /// Program `byte_count` bytes from word-aligned RAM, `byte_count` a multiple of 4.
    pub program_flash: unsafe extern "C" fn(ram_data: *const u32, flash_addr: u32, byte_count: u32) -> i32,
    pub reset_device: unsafe extern "C" fn() -> !,
}

/// Location of the table in the ROM.
const API_TABLE_ADDR: usize = 0x0000_0048;

pub fn api_table() -> &'static ApiTable {
    // Note(unsafe): the table is in ROM, it is always there and never changes.
    unsafe { &*(API_TABLE_ADDR as *const ApiTable) }
}

/// Non-zero status returned by a ROM flash routine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RomError(pub i32);

pub(crate) fn status(code: i32) -> Result<(), RomError> {
    match code {
        0 => Ok(()),
        code => Err(RomError(code)),
    }
}

/// Reset the chip through the ROM.
pub fn reset_device() -> ! {
    // Note(unsafe): the ROM routine takes no arguments and never returns.
    unsafe { (api_table().reset_device)() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_layout() {
        // Six function pointers, the CRC routine first at 0x48.
        assert_eq!(core::mem::size_of::<ApiTable>(), 6 * core::mem::size_of::<usize>());
        assert_eq!(core::mem::offset_of!(ApiTable, crc32), 0);
    }

    #[test]
    fn status_codes() {
        assert_eq!(status(0), Ok(()));
        assert_eq!(status(-1), Err(RomError(-1)));
    }
}

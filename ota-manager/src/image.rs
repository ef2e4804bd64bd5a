//! On-flash metadata blocks embedded in every image.
//!
//! Every image carries, at a build-determined offset, the CRC pair followed immediately
//! by the preamble. The first word of the preamble (the program length) is the program
//! size of the CRC control record, so the two overlap:
//!
//! ```text
//! crc_offset + 0   crc
//! crc_offset + 4   crc shadow
//! crc_offset + 8   program length    (preamble starts here)
//! crc_offset + 12  manufacturer id, image type
//! crc_offset + 16  image version
//! ```
//!
//! The program size counts from `crc_offset`, and the CRC covers everything after the pair.

use core::ops::Range;

/// Size of the CRC pair that precedes the preamble.
pub const CRC_PAIR_SIZE: usize = 8;

/// Size of [CrcControl] on flash.
pub const CRC_CONTROL_SIZE: usize = 12;

/// Size of [Preamble] on flash.
pub const PREAMBLE_SIZE: usize = 12;

fn word(data: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

fn half(data: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([data[at], data[at + 1]])
}

/// Decode a pair of consecutive little-endian words.
pub fn word_pair(data: [u8; 8]) -> [u32; 2] {
    [word(&data, 0), word(&data, 4)]
}

/// Where the metadata blocks live inside an image, relative to the image base.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ImageLayout {
    /// Offset of the [CrcControl] record.
    pub crc_offset: u32,
    /// Offset of the vector table, whose first two words are the initial stack pointer
    /// and the reset vector.
    pub vector_offset: u32,
}

impl ImageLayout {
    pub const fn preamble_offset(&self) -> u32 {
        self.crc_offset + CRC_PAIR_SIZE as u32
    }

    /// Range covered by the image CRC for a given program size.
    ///
    /// Yields `None` for program sizes too small to contain the CRC pair.
    pub fn crc_range(&self, program_size: u32) -> Option<Range<u32>> {
        let body = program_size.checked_sub(CRC_PAIR_SIZE as u32)?;
        let start = self.preamble_offset();
        Some(start..start.checked_add(body)?)
    }
}

/// CRC pair of an image together with its program size.
///
/// `crc[0]` is the expected CRC stamped at build time. `crc[1]`, the shadow, stays erased until
/// the image is verified on the device, and is then programmed with the computed CRC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CrcControl {
    pub crc: [u32; 2],
    pub program_size: u32,
}

impl CrcControl {
    pub fn from_bytes(data: [u8; CRC_CONTROL_SIZE]) -> Self {
        Self {
            crc: [word(&data, 0), word(&data, 4)],
            program_size: word(&data, 8),
        }
    }

    pub fn as_bytes(&self) -> [u8; CRC_CONTROL_SIZE] {
        let mut data = [0u8; CRC_CONTROL_SIZE];
        data[0..4].copy_from_slice(&self.crc[0].to_le_bytes());
        data[4..8].copy_from_slice(&self.crc[1].to_le_bytes());
        data[8..12].copy_from_slice(&self.program_size.to_le_bytes());
        data
    }

    /// Both words of the pair agree on a programmed CRC.
    pub fn is_verified(&self) -> bool {
        self.crc[0] == self.crc[1] && self.crc[0] != 0 && self.crc[0] != u32::MAX
    }
}

/// Device role an image was built for, encoded in the top bits of the image version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BuildVariant {
    EndDevice,
    Router,
    Coordinator,
    AllDevices,
}

/// Build metadata written once per image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Preamble {
    pub program_length: u32,
    pub manufacturer_id: u16,
    pub image_type: u16,
    pub image_version: u32,
}

impl Preamble {
    pub fn from_bytes(data: [u8; PREAMBLE_SIZE]) -> Self {
        Self {
            program_length: word(&data, 0),
            manufacturer_id: half(&data, 4),
            image_type: half(&data, 6),
            image_version: word(&data, 8),
        }
    }

    pub fn as_bytes(&self) -> [u8; PREAMBLE_SIZE] {
        let mut data = [0u8; PREAMBLE_SIZE];
        data[0..4].copy_from_slice(&self.program_length.to_le_bytes());
        data[4..6].copy_from_slice(&self.manufacturer_id.to_le_bytes());
        data[6..8].copy_from_slice(&self.image_type.to_le_bytes());
        data[8..12].copy_from_slice(&self.image_version.to_le_bytes());
        data
    }

    pub fn variant(&self) -> BuildVariant {
        match self.image_version >> 30 {
            0b00 => BuildVariant::EndDevice,
            0b01 => BuildVariant::Router,
            0b10 => BuildVariant::Coordinator,
            _ => BuildVariant::AllDevices,
        }
    }

    /// Image was linked to run from the second image area; such builds use odd versions.
    pub fn is_area_b(&self) -> bool {
        self.image_version & 1 == 1
    }
}

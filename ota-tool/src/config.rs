use std::ops::Range;
use std::path::Path;

use anyhow::Context;
use ota_ledger::entry::{ENTRY_SIZE, VectorBounds};
use ota_manager::image::ImageLayout;
use serde::Deserialize;

#[derive(Deserialize, Debug)]
pub struct Config {
    /// Placement of the metadata inside every image.
    pub image: ImageArgs,

    /// Geometry of the ledger page and the vector sanity bounds the boot manager applies.
    pub ledger: LedgerArgs,
}

#[derive(Deserialize, Debug)]
pub struct ImageArgs {
    /// Offset of the CRC control record from the image base.
    pub crc_offset: u32,
    /// Offset of the vector table from the image base.
    pub vector_offset: u32,
    /// Size of the download area, images larger than this are refused.
    pub capacity: u32,
    /// Link address of the image, the first byte of the flattened binary.
    pub base: u32,
}

#[derive(Deserialize, Debug)]
pub struct LedgerArgs {
    /// Size of the single erase page holding the ledger.
    pub page_size: usize,
    /// Valid initial stack pointers.
    pub stack_pointer: Range<u32>,
    /// Valid reset handler addresses.
    pub reset_vector: Range<u32>,
}

impl ImageArgs {
    pub fn layout(&self) -> ImageLayout {
        ImageLayout {
            crc_offset: self.crc_offset,
            vector_offset: self.vector_offset,
        }
    }
}

impl LedgerArgs {
    pub fn bounds(&self) -> VectorBounds {
        VectorBounds {
            stack_pointer: self.stack_pointer.clone(),
            reset_vector: self.reset_vector.clone(),
        }
    }
}

impl Config {
    pub fn read(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        Self::parse(&std::fs::read_to_string(path)?)
    }

    pub fn parse(text: &str) -> anyhow::Result<Self> {
        let config = toml::from_str::<Config>(text).context("Malformed configuration")?;

        if config.image.crc_offset % 4 != 0 {
            anyhow::bail!("image.crc_offset must be word aligned");
        }
        if config.ledger.page_size == 0 || config.ledger.page_size % ENTRY_SIZE != 0 {
            anyhow::bail!("ledger.page_size must be a non-zero multiple of {ENTRY_SIZE}");
        }

        Ok(config)
    }
}

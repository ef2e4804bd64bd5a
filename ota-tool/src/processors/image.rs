use std::fmt;

use anyhow::Context;
use ota_ledger::entry::{ERASED_WORD, VectorBounds};
use ota_manager::crc::IMAGE_CRC;
use ota_manager::image::{
    BuildVariant, CRC_CONTROL_SIZE, CRC_PAIR_SIZE, CrcControl, ImageLayout, PREAMBLE_SIZE, Preamble,
};

/// Flash programming granularity, images are padded to it.
const WORD_SIZE: usize = 4;

/// Build metadata written into the preamble by [stamp].
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity {
    pub manufacturer_id: Option<u16>,
    pub image_type: Option<u16>,
    pub image_version: Option<u32>,
}

fn block<const N: usize>(data: &[u8], offset: u32) -> anyhow::Result<[u8; N]> {
    let offset = offset as usize;
    data.get(offset..offset + N)
        .and_then(|slice| slice.try_into().ok())
        .with_context(|| format!("Image too short for {N} bytes at 0x{offset:x}"))
}

/// Program size and CRC pair an image gets for the given layout.
///
/// The program size counts from the CRC control record to the end of the image.
pub fn compute(data: &[u8], layout: &ImageLayout) -> anyhow::Result<CrcControl> {
    let program_size = data
        .len()
        .checked_sub(layout.crc_offset as usize)
        .filter(|size| *size >= CRC_CONTROL_SIZE)
        .context("Image ends before its CRC control record")?;
    let program_size = u32::try_from(program_size).context("Image too large")?;

    let range = layout
        .crc_range(program_size)
        .context("Program size does not cover the CRC pair")?;
    let crc = IMAGE_CRC.checksum(&data[range.start as usize..range.end as usize]);

    Ok(CrcControl {
        crc: [crc, crc],
        program_size,
    })
}

/// Write the program size and CRC into a raw image.
///
/// With `ota` the shadow CRC is left erased so the device verifies the image after download,
/// otherwise the image is marked verified already, as needed for images flashed in the factory.
pub fn stamp(mut data: Vec<u8>, layout: &ImageLayout, identity: Identity, ota: bool) -> anyhow::Result<Vec<u8>> {
    data.resize(data.len().next_multiple_of(WORD_SIZE), 0xff);

    // The preamble is covered by the CRC, so it has to be complete before computing.
    let preamble_offset = layout.preamble_offset() as usize;
    let mut preamble = Preamble::from_bytes(block(&data, layout.preamble_offset())?);
    preamble.program_length = compute(&data, layout)?.program_size;
    preamble.manufacturer_id = identity.manufacturer_id.unwrap_or(preamble.manufacturer_id);
    preamble.image_type = identity.image_type.unwrap_or(preamble.image_type);
    preamble.image_version = identity.image_version.unwrap_or(preamble.image_version);
    data[preamble_offset..preamble_offset + PREAMBLE_SIZE].copy_from_slice(&preamble.as_bytes());

    let mut control = compute(&data, layout)?;
    if ota {
        control.crc[1] = ERASED_WORD;
    }
    log::info!(
        "Stamped program size 0x{:x}, crc 0x{:08x}",
        control.program_size,
        control.crc[0]
    );

    let crc_offset = layout.crc_offset as usize;
    data[crc_offset..crc_offset + CRC_PAIR_SIZE].copy_from_slice(&control.as_bytes()[..CRC_PAIR_SIZE]);
    Ok(data)
}

/// What an image says about itself, and whether that holds up.
#[derive(Debug)]
pub struct Report {
    pub control: CrcControl,
    pub preamble: Preamble,
    /// CRC over the range the control record declares, `None` if that range is out of the image.
    pub computed: Option<u32>,
    pub nvic_jump: [u32; 2],
    pub vectors_valid: bool,
}

impl Report {
    pub fn crc_matches(&self) -> bool {
        self.computed == Some(self.control.crc[0])
    }
}

pub fn inspect(data: &[u8], layout: &ImageLayout, bounds: &VectorBounds) -> anyhow::Result<Report> {
    let control = CrcControl::from_bytes(block(data, layout.crc_offset)?);
    let preamble = Preamble::from_bytes(block(data, layout.preamble_offset())?);
    let nvic_jump = ota_manager::image::word_pair(block(data, layout.vector_offset)?);

    let computed = layout
        .crc_range(control.program_size)
        .and_then(|range| data.get(range.start as usize..range.end as usize))
        .map(|body| IMAGE_CRC.checksum(body));

    Ok(Report {
        control,
        preamble,
        computed,
        nvic_jump,
        vectors_valid: bounds.contains(nvic_jump),
    })
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let variant = match self.preamble.variant() {
            BuildVariant::EndDevice => "end device",
            BuildVariant::Router => "router",
            BuildVariant::Coordinator => "coordinator",
            BuildVariant::AllDevices => "all devices",
        };

        writeln!(f, "program size:    0x{:x}", self.control.program_size)?;
        writeln!(f, "crc:             0x{:08x}", self.control.crc[0])?;
        writeln!(f, "crc shadow:      0x{:08x}", self.control.crc[1])?;
        match self.computed {
            Some(crc) => writeln!(
                f,
                "computed crc:    0x{crc:08x} ({})",
                if self.crc_matches() { "match" } else { "MISMATCH" }
            )?,
            None => writeln!(f, "computed crc:    program size exceeds image")?,
        }
        writeln!(f, "manufacturer id: 0x{:04x}", self.preamble.manufacturer_id)?;
        writeln!(f, "image type:      0x{:04x}", self.preamble.image_type)?;
        writeln!(
            f,
            "image version:   0x{:08x} ({variant}, area {})",
            self.preamble.image_version,
            if self.preamble.is_area_b() { "B" } else { "A" }
        )?;
        write!(
            f,
            "vectors:         sp 0x{:08x} reset 0x{:08x} ({})",
            self.nvic_jump[0],
            self.nvic_jump[1],
            if self.vectors_valid { "valid" } else { "INVALID" }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LAYOUT: ImageLayout = ImageLayout {
        crc_offset: 0x20,
        vector_offset: 0,
    };

    fn raw_image(len: usize) -> Vec<u8> {
        let mut data: Vec<u8> = (0..len).map(|i| i as u8).collect();
        data[0..4].copy_from_slice(&0x2000_8000u32.to_le_bytes());
        data[4..8].copy_from_slice(&0x0020_2101u32.to_le_bytes());
        data
    }

    fn bounds() -> VectorBounds {
        VectorBounds {
            stack_pointer: 0x2000_4001..0x2700_7fff,
            reset_vector: 0x0020_0001..0x0027_efff,
        }
    }

    #[test]
    fn stamp_then_inspect() {
        let identity = Identity {
            manufacturer_id: Some(0x1234),
            image_type: None,
            image_version: Some(0x4000_0001),
        };
        let data = stamp(raw_image(0x81), &LAYOUT, identity, false).unwrap();
        assert_eq!(data.len(), 0x84);
        assert_eq!(&data[0x81..], &[0xff; 3]);

        let report = inspect(&data, &LAYOUT, &bounds()).unwrap();
        assert_eq!(report.control.program_size, 0x64);
        assert_eq!(report.preamble.program_length, 0x64);
        assert_eq!(report.preamble.manufacturer_id, 0x1234);
        assert_eq!(report.preamble.variant(), BuildVariant::Router);
        assert!(report.preamble.is_area_b());
        assert!(report.control.is_verified());
        assert!(report.crc_matches());
        assert!(report.vectors_valid);
    }

    #[test]
    fn ota_images_leave_shadow_erased() {
        let data = stamp(raw_image(0x80), &LAYOUT, Identity::default(), true).unwrap();
        let report = inspect(&data, &LAYOUT, &bounds()).unwrap();

        assert_eq!(report.control.crc[1], ERASED_WORD);
        assert!(!report.control.is_verified());
        assert!(report.crc_matches());
    }

    #[test]
    fn corruption_is_reported() {
        let mut data = stamp(raw_image(0x80), &LAYOUT, Identity::default(), false).unwrap();
        data[0x70] ^= 1;
        assert!(!inspect(&data, &LAYOUT, &bounds()).unwrap().crc_matches());

        // Bytes before the CRC pair are not covered.
        let mut data = stamp(raw_image(0x80), &LAYOUT, Identity::default(), false).unwrap();
        data[0x10] ^= 1;
        assert!(inspect(&data, &LAYOUT, &bounds()).unwrap().crc_matches());
    }

    #[test]
    fn short_images_are_refused() {
        assert!(stamp(raw_image(0x28), &LAYOUT, Identity::default(), false).is_err());
        assert!(compute(&raw_image(0x10), &LAYOUT).is_err());
    }
}

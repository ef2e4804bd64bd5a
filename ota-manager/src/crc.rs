use core::ops::Range;

use embedded_storage_async::nor_flash::ReadNorFlash;

/// Algorithm used for image CRCs, the standard zlib CRC-32.
pub const IMAGE_CRC: crc::Crc<u32> = crc::Crc::<u32>::new(&crc::CRC_32_ISO_HDLC);

/// Engine computing the CRC32 of a part of an image.
#[allow(async_fn_in_trait)]
pub trait ImageCrc<F: ReadNorFlash> {
    /// Compute the [IMAGE_CRC] of the bytes in `range` of `image`.
    async fn crc32(&mut self, image: &mut F, range: Range<u32>) -> Result<u32, F::Error>;
}

/// Computes the CRC in software, reading the image in blocks of `BLOCK_SIZE` bytes.
///
/// `BLOCK_SIZE` needs to be a non-zero multiple of the read size of the flash.
#[derive(Debug, Default, Clone, Copy)]
pub struct SoftwareCrc<const BLOCK_SIZE: usize = 256>;

impl<F: ReadNorFlash, const BLOCK_SIZE: usize> ImageCrc<F> for SoftwareCrc<BLOCK_SIZE> {
    async fn crc32(&mut self, image: &mut F, range: Range<u32>) -> Result<u32, F::Error> {
        defmt_or_log::assert!(BLOCK_SIZE >= F::READ_SIZE);
        defmt_or_log::assert!(BLOCK_SIZE.is_multiple_of(F::READ_SIZE));

        let align = F::READ_SIZE as u32;
        // Reads have to be aligned, so widen the range and cut the excess out of each block.
        let start = range.start - range.start % align;
        let end = range.end.next_multiple_of(align);

        let mut buf = [0u8; BLOCK_SIZE];
        let mut digest = IMAGE_CRC.digest();

        let mut address = start;
        while address < end {
            let block_end = end.min(address + BLOCK_SIZE as u32);
            let block = &mut buf[..(block_end - address) as usize];
            image.read(address, block).await?;

            let from = range.start.saturating_sub(address) as usize;
            let to = (range.end.min(block_end) - address) as usize;
            if from < to {
                digest.update(&block[from..to]);
            }

            address = block_end;
        }

        Ok(digest.finalize())
    }
}

#[cfg(test)]
mod tests {
    use ota_ledger::flash::mock::MockFlashBase;

    use super::*;

    #[test]
    fn known_value() {
        assert_eq!(IMAGE_CRC.checksum(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn unaligned_ranges_match_oneshot() {
        let mut mock: MockFlashBase<2, 4, 64> = MockFlashBase::default();
        for (i, b) in mock.as_bytes_mut().iter_mut().enumerate() {
            *b = (i * 7 + 3) as u8;
        }
        let data = mock.as_bytes().to_vec();

        embassy_futures::block_on(async {
            for range in [0..512, 3..501, 8..8, 17..18, 255..257, 100..400] {
                let expected = IMAGE_CRC.checksum(&data[range.start..range.end]);

                let range = range.start as u32..range.end as u32;
                assert_eq!(SoftwareCrc::<16>.crc32(&mut mock, range.clone()).await.unwrap(), expected);
                assert_eq!(SoftwareCrc::<256>.crc32(&mut mock, range).await.unwrap(), expected);
            }
        });
    }
}

//! Over-the-air update bookkeeping: verifying downloaded images and recording which image
//! the boot manager runs next in the [Ledger].
#![cfg_attr(not(test), no_std)]

pub mod crc;
pub mod image;

use defmt_or_log::{debug, info, warn};
use embedded_storage_async::nor_flash::NorFlash;
use ota_ledger::entry::{Entry, ERASED_WORD};
use ota_ledger::flash::{Cursor, Error, Ledger};

use crate::crc::ImageCrc;
use crate::image::{word_pair, CrcControl, ImageLayout, Preamble, CRC_CONTROL_SIZE, CRC_PAIR_SIZE, PREAMBLE_SIZE};

/// One of the two image regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ImageArea {
    /// The image the device is currently running.
    Running,
    /// Where the OTA transport stores the incoming image.
    Download,
}

/// Reasons for rejecting a downloaded image.
#[derive(Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum VerifyError<E> {
    /// Program size is zero, too small to contain the CRC pair, or does not fit the download area.
    InvalidSize,
    /// The expected CRC is zero or erased, the image was never stamped.
    Unprogrammed,
    /// The shadow was already programmed with a CRC that did not match.
    ///
    /// A failed verification is final until the download area is rewritten.
    PreviouslyFailed,
    /// The computed CRC does not match, or did not read back from flash.
    Mismatch,
    /// The underlying storage medium yielded an error.
    Other(E),
}

impl<E> From<E> for VerifyError<E> {
    fn from(value: E) -> Self {
        VerifyError::Other(value)
    }
}

/// Word-aligned staging buffer for programming the CRC shadow.
#[repr(C, align(4))]
struct Aligned([u8; CRC_PAIR_SIZE]);

/// OTA manager owning the ledger page, both image regions and a CRC engine.
pub struct Ota<L, I, C> {
    ledger: Ledger<L>,
    running: I,
    download: I,
    crc: C,
    layout: ImageLayout,
}

impl<L, I, C> Ota<L, I, C>
where
    L: NorFlash,
    I: NorFlash<Error = L::Error>,
    C: ImageCrc<I>,
{
    pub fn new(ledger: Ledger<L>, running: I, download: I, crc: C, layout: ImageLayout) -> Self {
        Self {
            ledger,
            running,
            download,
            crc,
            layout,
        }
    }

    pub fn layout(&self) -> &ImageLayout {
        &self.layout
    }

    /// Give a mutable reference to the [Ledger].
    pub fn ledger(&mut self) -> &mut Ledger<L> {
        &mut self.ledger
    }

    fn image(&mut self, area: ImageArea) -> &mut I {
        match area {
            ImageArea::Running => &mut self.running,
            ImageArea::Download => &mut self.download,
        }
    }

    /// Space available for a downloaded image.
    pub fn available(&self) -> u32 {
        self.download.capacity() as u32
    }

    /// Read from an image region, `offset` being relative to its base.
    pub async fn read(&mut self, area: ImageArea, offset: u32, buf: &mut [u8]) -> Result<(), L::Error> {
        self.image(area).read(offset, buf).await
    }

    /// Store a chunk of the incoming image.
    ///
    /// A chunk starting on an erase page boundary erases that page first, anywhere else the
    /// target must already be erased. `buf` has to satisfy the write granularity of the driver.
    pub async fn write_download(&mut self, offset: u32, buf: &[u8]) -> Result<(), L::Error> {
        let page = I::ERASE_SIZE as u32;
        if offset.is_multiple_of(page) {
            debug!("Erasing download page at {:#x}", offset);
            self.download.erase(offset, offset.saturating_add(page)).await?;
        }

        self.download.write(offset, buf).await
    }

    pub async fn crc_control(&mut self, area: ImageArea) -> Result<CrcControl, L::Error> {
        let mut buf = [0u8; CRC_CONTROL_SIZE];
        let offset = self.layout.crc_offset;
        self.read(area, offset, &mut buf).await?;
        Ok(CrcControl::from_bytes(buf))
    }

    pub async fn preamble(&mut self, area: ImageArea) -> Result<Preamble, L::Error> {
        let mut buf = [0u8; PREAMBLE_SIZE];
        let offset = self.layout.preamble_offset();
        self.read(area, offset, &mut buf).await?;
        Ok(Preamble::from_bytes(buf))
    }

    /// Ledger entry describing the image in `area`: its CRC pair and vector pair.
    pub async fn image_entry(&mut self, area: ImageArea) -> Result<Entry, L::Error> {
        let mut crc = [0u8; 8];
        let mut vectors = [0u8; 8];
        let (crc_offset, vector_offset) = (self.layout.crc_offset, self.layout.vector_offset);
        self.read(area, crc_offset, &mut crc).await?;
        self.read(area, vector_offset, &mut vectors).await?;
        Ok(Entry::new(word_pair(crc), word_pair(vectors)))
    }

    /// Check the downloaded image against its stamped CRC, recording a match by programming the shadow.
    ///
    /// Calling this again after a success does not touch the flash.
    pub async fn verify_downloaded_image(&mut self) -> Result<(), VerifyError<L::Error>> {
        let control = self.crc_control(ImageArea::Download).await?;
        let [expected, shadow] = control.crc;

        let range = match self.layout.crc_range(control.program_size) {
            Some(range) if control.program_size <= self.available() && range.end <= self.available() => range,
            _ => {
                warn!("Downloaded image has invalid program size {}", control.program_size);
                return Err(VerifyError::InvalidSize);
            }
        };

        if expected == 0 || expected == ERASED_WORD {
            warn!("Downloaded image carries no CRC");
            return Err(VerifyError::Unprogrammed);
        }

        if expected == shadow {
            debug!("Downloaded image already verified");
            return Ok(());
        }

        if shadow != ERASED_WORD {
            warn!("Downloaded image failed verification before");
            return Err(VerifyError::PreviouslyFailed);
        }

        let computed = self.crc.crc32(&mut self.download, range).await?;

        let mut buf = Aligned([0xff; CRC_PAIR_SIZE]);
        buf.0[4..].copy_from_slice(&computed.to_le_bytes());
        self.download.write(self.layout.crc_offset, &buf.0).await?;

        let control = self.crc_control(ImageArea::Download).await?;
        if control.is_verified() {
            info!("Downloaded image verified, crc {:#x}", computed);
            Ok(())
        } else {
            warn!("Downloaded image crc mismatch, expected {:#x} computed {:#x}", expected, computed);
            Err(VerifyError::Mismatch)
        }
    }

    /// At boot, make sure the ledger records an image, recording the running one if it does not.
    pub async fn init(&mut self) -> Result<(), Error<L::Error>> {
        match self.ledger.find_current().await? {
            Cursor::Current { slot, entry } => {
                debug!("Ledger slot {} holds {:?}", slot, entry);
                Ok(())
            }
            Cursor::Vacant { .. } => {
                let entry = self.image_entry(ImageArea::Running).await?;
                info!("No image in ledger, recording running image {:?}", entry);
                self.ledger.set(&entry).await
            }
        }
    }

    /// Hand over to the downloaded image: the boot manager runs it from the next boot on.
    ///
    /// Yields [Error::InvalidEntry] when the downloaded image has not been verified.
    pub async fn invalidate_running_image(&mut self) -> Result<(), Error<L::Error>> {
        let entry = self.image_entry(ImageArea::Download).await?;
        info!("Switching ledger to downloaded image {:?}", entry);
        self.ledger.set(&entry).await
    }
}

#[cfg(any(test, feature = "_test"))]
pub mod mock;

use defmt_or_log::{debug, error, warn};
use embedded_storage_async::nor_flash::NorFlash;

use crate::entry::{Entry, ParseResult, VectorBounds, ENTRY_SIZE};

/// Upper bound on find-append-invalidate rounds in a single [Ledger::set].
const MAX_COMMIT_ROUNDS: usize = 8;

/// Upper bound on erase-and-sign attempts in a single page reset.
const MAX_SIGNATURE_ATTEMPTS: usize = 3;

#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error<E> {
    /// The storage medium passed is not exactly one erase page, or that page cannot hold
    /// the signature and at least one entry in whole write units.
    PageGeometry,

    /// The entry passed to [Ledger::set] could never be selected as current.
    InvalidEntry,

    /// After writing, a readback does not yield what was written, even after retrying.
    ///
    /// This indicates that something went wrong in the writing process, either on the bus
    /// or in the storage medium itself.
    ReadbackFailed,

    /// The underlying storage medium yielded an error.
    Other(E),
}

impl<E> From<E> for Error<E> {
    fn from(value: E) -> Self {
        Error::Other(value)
    }
}

/// Outcome of scanning the ledger page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Cursor {
    /// `slot` holds the lowest current entry.
    Current { slot: usize, entry: Entry },
    /// No current entry exists; `slot` is the first never-written slot.
    Vacant { slot: usize },
}

impl Cursor {
    pub fn entry(&self) -> Option<&Entry> {
        match self {
            Cursor::Current { entry, .. } => Some(entry),
            Cursor::Vacant { .. } => None,
        }
    }

    pub fn slot(&self) -> usize {
        match self {
            Cursor::Current { slot, .. } | Cursor::Vacant { slot } => *slot,
        }
    }
}

/// Word-aligned staging buffer, flash controllers may refuse unaligned sources.
#[repr(C, align(4))]
struct Aligned([u8; ENTRY_SIZE]);

/// Append-only record of which image is current, kept in a single NOR flash page.
///
/// Slot 0 holds [Entry::SIGNATURE], the remaining slots hold entries in the order they were
/// committed. The lowest current entry is the one in effect. Entries are only ever programmed
/// in the erased slot following the current one, and retired by clearing their first CRC word,
/// so that at every moment of a commit either the old or the new entry reads as current.
/// The exception is a page reset: between its erase and the completion of the following
/// commit, the page holds no current entry.
pub struct Ledger<T> {
    /// Inner flash storage, exactly one erase page.
    inner: T,
    /// Reset vector sanity ranges every current entry must satisfy.
    bounds: VectorBounds,
}

impl<T: NorFlash> Ledger<T> {
    const PAGE_SIZE: usize = T::ERASE_SIZE;
    const SLOT_COUNT: usize = Self::PAGE_SIZE / ENTRY_SIZE;

    /// Construct the Ledger given a storage partition spanning exactly one erase page.
    ///
    /// Does not touch the flash, the page is validated lazily on the first scan.
    pub fn new(inner: T, bounds: VectorBounds) -> Result<Self, Error<T::Error>> {
        if inner.capacity() != Self::PAGE_SIZE
            || !Self::PAGE_SIZE.is_multiple_of(ENTRY_SIZE)
            || Self::SLOT_COUNT < 2
            || !ENTRY_SIZE.is_multiple_of(T::WRITE_SIZE)
            || !ENTRY_SIZE.is_multiple_of(T::READ_SIZE)
        {
            return Err(Error::PageGeometry);
        }

        Ok(Self { inner, bounds })
    }

    /// Number of slots in the page, the signature slot included.
    pub fn slot_count(&self) -> usize {
        Self::SLOT_COUNT
    }

    pub fn bounds(&self) -> &VectorBounds {
        &self.bounds
    }

    pub fn into_inner(self) -> T {
        self.inner
    }

    fn slot_address(slot: usize) -> u32 {
        (slot * ENTRY_SIZE) as u32
    }

    async fn read_slot(&mut self, slot: usize) -> Result<Entry, T::Error> {
        let mut buf = Aligned([0u8; ENTRY_SIZE]);
        self.inner.read(Self::slot_address(slot), &mut buf.0).await?;
        Ok(Entry::from_bytes(buf.0))
    }

    async fn program_slot(&mut self, slot: usize, entry: &Entry) -> Result<(), T::Error> {
        let buf = Aligned(entry.as_bytes());
        self.inner.write(Self::slot_address(slot), &buf.0).await
    }

    /// Erase the page and write the signature, until the signature reads back.
    async fn reset_page(&mut self) -> Result<(), Error<T::Error>> {
        for _ in 0..MAX_SIGNATURE_ATTEMPTS {
            self.inner.erase(0, Self::PAGE_SIZE as u32).await?;
            self.program_slot(0, &Entry::SIGNATURE).await?;

            if self.read_slot(0).await? == Entry::SIGNATURE {
                debug!("Ledger page reset");
                return Ok(());
            }
        }

        error!("Ledger signature does not read back after {} attempts", MAX_SIGNATURE_ATTEMPTS);
        Err(Error::ReadbackFailed)
    }

    /// Scan the page for the lowest current entry.
    ///
    /// A page without signature, or one in which every slot was written without any being
    /// current, is reset and reported as [Cursor::Vacant] at slot 1.
    pub async fn find_current(&mut self) -> Result<Cursor, Error<T::Error>> {
        if self.read_slot(0).await? == Entry::SIGNATURE {
            for slot in 1..Self::SLOT_COUNT {
                match self.read_slot(slot).await?.parse(&self.bounds) {
                    Ok(entry) => return Ok(Cursor::Current { slot, entry }),
                    Err(ParseResult::Unset) => return Ok(Cursor::Vacant { slot }),
                    Err(ParseResult::Invalid) => {}
                }
            }
            warn!("Ledger page exhausted, resetting");
        } else {
            warn!("Ledger page signature missing, resetting");
        }

        self.reset_page().await?;
        Ok(Cursor::Vacant { slot: 1 })
    }

    /// The entry currently in effect, if any.
    pub async fn current(&mut self) -> Result<Option<Entry>, Error<T::Error>> {
        Ok(self.find_current().await?.entry().copied())
    }

    /// Program `new` into the erased `slot` in two passes, verifying each.
    ///
    /// Yields whether the slot now holds exactly `new`.
    async fn append(&mut self, slot: usize, new: &Entry) -> Result<bool, T::Error> {
        let provisional = new.provisional();
        self.program_slot(slot, &provisional).await?;
        if self.read_slot(slot).await? != provisional {
            warn!("Ledger slot {} provisional readback mismatch", slot);
            return Ok(false);
        }

        self.program_slot(slot, &new.shadow()).await?;
        Ok(self.read_slot(slot).await? == *new)
    }

    /// Retire `entry` in `slot`, which on NOR flash clears its first CRC word to zero.
    ///
    /// This is the only write ever applied to a committed entry.
    async fn invalidate(&mut self, slot: usize, entry: &Entry) -> Result<(), T::Error> {
        self.program_slot(slot, &entry.invalidation()).await
    }

    /// Make `new` the current entry.
    ///
    /// Does nothing when `new` already is current.
    pub async fn set(&mut self, new: &Entry) -> Result<(), Error<T::Error>> {
        if !new.is_current(&self.bounds) {
            return Err(Error::InvalidEntry);
        }

        for _ in 0..MAX_COMMIT_ROUNDS {
            let (target, previous) = match self.find_current().await? {
                Cursor::Current { entry, .. } if entry == *new => return Ok(()),
                Cursor::Current { slot, entry } => (slot + 1, Some((slot, entry))),
                Cursor::Vacant { slot } => (slot, None),
            };

            if target >= Self::SLOT_COUNT || !self.read_slot(target).await?.is_erased() {
                // No room after the current entry; the page reset drops it.
                warn!("Ledger slot {} unavailable, resetting", target);
                self.reset_page().await?;
                continue;
            }

            if self.append(target, new).await? {
                if let Some((slot, entry)) = previous {
                    self.invalidate(slot, &entry).await?;
                }
                debug!("Ledger entry committed to slot {}", target);
            }
        }

        error!("Ledger commit did not converge");
        Err(Error::ReadbackFailed)
    }
}

#[cfg(test)]
mod tests {
    use embedded_storage_async::nor_flash::{ErrorType, ReadNorFlash};

    use super::*;
    use crate::flash::mock::{MockFlashBase, MockFlashError, Operation};

    const BOUNDS: VectorBounds = VectorBounds {
        stack_pointer: 0x2000_4001..0x2700_7FFF,
        reset_vector: 0x0020_0001..0x0027_EFFF,
    };

    /// Realistic page: 2 kiB, 128 slots.
    type PageFlash = MockFlashBase<1, 4, 512>;
    /// Tiny page: the signature and three entries.
    type TinyFlash = MockFlashBase<1, 4, 16>;

    fn entry(crc: u32) -> Entry {
        Entry::new([crc, crc], [0x2000_8000, 0x0020_2000 + (crc & 0xfff0) + 1])
    }

    fn slot_bytes(flash: &[u8], slot: usize) -> &[u8] {
        &flash[slot * ENTRY_SIZE..(slot + 1) * ENTRY_SIZE]
    }

    #[test]
    fn first_commit_lands_in_slot_one() {
        let mut mock = PageFlash::default();
        embassy_futures::block_on(async {
            let mut ledger = Ledger::new(&mut mock, BOUNDS).unwrap();

            // Erased page gets signed.
            assert_eq!(ledger.find_current().await.unwrap(), Cursor::Vacant { slot: 1 });

            ledger.set(&entry(0x1234_5678)).await.unwrap();
            assert_eq!(
                ledger.find_current().await.unwrap(),
                Cursor::Current {
                    slot: 1,
                    entry: entry(0x1234_5678)
                }
            );
        });

        assert_eq!(slot_bytes(mock.as_bytes(), 0), Entry::SIGNATURE.as_bytes());
        assert_eq!(slot_bytes(mock.as_bytes(), 1), entry(0x1234_5678).as_bytes());
        assert!(slot_bytes(mock.as_bytes(), 2).iter().all(|b| *b == 0xff));
    }

    #[test]
    fn set_is_idempotent() {
        let mut mock = PageFlash::default();
        embassy_futures::block_on(async {
            let mut ledger = Ledger::new(&mut mock, BOUNDS).unwrap();
            ledger.set(&entry(1)).await.unwrap();
        });

        let writes = mock.write_count();
        let erases = mock.erase_count();

        embassy_futures::block_on(async {
            let mut ledger = Ledger::new(&mut mock, BOUNDS).unwrap();
            ledger.set(&entry(1)).await.unwrap();
            assert_eq!(ledger.current().await.unwrap(), Some(entry(1)));
        });

        assert_eq!(mock.write_count(), writes);
        assert_eq!(mock.erase_count(), erases);
    }

    #[test]
    fn commit_retires_predecessor() {
        let mut mock = PageFlash::default();
        embassy_futures::block_on(async {
            let mut ledger = Ledger::new(&mut mock, BOUNDS).unwrap();
            ledger.set(&entry(0xAAAA_0001)).await.unwrap();
            ledger.set(&entry(0xBBBB_0002)).await.unwrap();
            assert_eq!(
                ledger.find_current().await.unwrap(),
                Cursor::Current {
                    slot: 2,
                    entry: entry(0xBBBB_0002)
                }
            );
        });

        let retired = Entry::from_bytes(slot_bytes(mock.as_bytes(), 1).try_into().unwrap());
        assert_eq!(retired.image_crc(), [0, 0xAAAA_0001]);
        assert_eq!(retired.nvic_jump(), entry(0xAAAA_0001).nvic_jump());
    }

    #[test]
    fn lowest_current_entry_wins() {
        let mut mock = PageFlash::default();
        embassy_futures::block_on(async {
            let mut ledger = Ledger::new(&mut mock, BOUNDS).unwrap();
            ledger.set(&entry(1)).await.unwrap();
        });

        // Power lost right after the shadow of the successor was written.
        mock.as_bytes_mut()[2 * ENTRY_SIZE..3 * ENTRY_SIZE].copy_from_slice(&entry(2).as_bytes());

        embassy_futures::block_on(async {
            let mut ledger = Ledger::new(&mut mock, BOUNDS).unwrap();
            assert_eq!(ledger.current().await.unwrap(), Some(entry(1)));

            // Retrying the commit settles on a fresh page.
            ledger.set(&entry(2)).await.unwrap();
            assert_eq!(
                ledger.find_current().await.unwrap(),
                Cursor::Current { slot: 1, entry: entry(2) }
            );
        });
    }

    #[test]
    fn page_wraps_when_full() {
        let mut mock = TinyFlash::default();
        embassy_futures::block_on(async {
            for crc in 1..20 {
                // Re-init the ledger like every boot would.
                let mut ledger = Ledger::new(&mut mock, BOUNDS).unwrap();
                ledger.set(&entry(crc)).await.unwrap();
                assert_eq!(ledger.current().await.unwrap(), Some(entry(crc)));
            }
        });

        // Three entries per page, so 19 commits took six resets plus the initial signing.
        assert_eq!(mock.erase_count(), 7);
    }

    #[test]
    fn garbage_is_recovered() {
        let mut mock = TinyFlash::default();
        mock.as_bytes_mut().fill(0xaa);
        embassy_futures::block_on(async {
            let mut ledger = Ledger::new(&mut mock, BOUNDS).unwrap();
            assert_eq!(ledger.find_current().await.unwrap(), Cursor::Vacant { slot: 1 });
        });

        // Signed, but the slot following the last written entry holds junk.
        let mut mock = TinyFlash::default();
        embassy_futures::block_on(async {
            let mut ledger = Ledger::new(&mut mock, BOUNDS).unwrap();
            ledger.set(&entry(1)).await.unwrap();
        });
        mock.as_bytes_mut()[2 * ENTRY_SIZE + 8] = 0x00;
        embassy_futures::block_on(async {
            let mut ledger = Ledger::new(&mut mock, BOUNDS).unwrap();
            assert_eq!(ledger.current().await.unwrap(), Some(entry(1)));
            ledger.set(&entry(2)).await.unwrap();
            assert_eq!(
                ledger.find_current().await.unwrap(),
                Cursor::Current { slot: 1, entry: entry(2) }
            );
        });

        // Every slot written, none current.
        let mut mock = TinyFlash::default();
        mock.as_bytes_mut()[..ENTRY_SIZE].copy_from_slice(&Entry::SIGNATURE.as_bytes());
        mock.as_bytes_mut()[ENTRY_SIZE..].fill(0x00);
        embassy_futures::block_on(async {
            let mut ledger = Ledger::new(&mut mock, BOUNDS).unwrap();
            assert_eq!(ledger.find_current().await.unwrap(), Cursor::Vacant { slot: 1 });
        });
        assert!(mock.as_bytes()[ENTRY_SIZE..].iter().all(|b| *b == 0xff));
    }

    #[test]
    fn rejects_invalid_entries() {
        let mut mock = PageFlash::default();
        embassy_futures::block_on(async {
            let mut ledger = Ledger::new(&mut mock, BOUNDS).unwrap();
            for bad in [
                Entry::new([0, 0], entry(1).nvic_jump()),
                Entry::new([1, 2], entry(1).nvic_jump()),
                Entry::new([1, 1], [0x1000_0000, 0x0020_2001]),
                Entry::ERASED,
            ] {
                assert!(matches!(ledger.set(&bad).await, Err(Error::InvalidEntry)));
            }
        });
        assert_eq!(mock.write_count(), 0);
    }

    #[test]
    fn rejects_multi_page_partitions() {
        let mut mock = MockFlashBase::<2, 4, 512>::default();
        assert!(matches!(Ledger::new(&mut mock, BOUNDS), Err(Error::PageGeometry)));
    }

    /// Interrupt a regular commit at every programmed byte.
    #[test]
    fn power_loss_during_commit() {
        let old = entry(0x0BAD_CAFE);
        let new = entry(0x600D_F00D);

        let mut interrupted = 0;
        for fail_at in 0.. {
            let mut mock = PageFlash::default();
            embassy_futures::block_on(async {
                let mut ledger = Ledger::new(&mut mock, BOUNDS).unwrap();
                ledger.set(&old).await.unwrap();
            });

            mock.bytes_until_shutoff = Some(fail_at);
            let result = embassy_futures::block_on(async {
                let mut ledger = Ledger::new(&mut mock, BOUNDS).unwrap();
                ledger.set(&new).await
            });
            mock.remove_shutoff();

            let done = match result {
                Ok(()) => true,
                Err(Error::Other(MockFlashError::EarlyShutoff(_, Operation::Write))) => {
                    interrupted += 1;
                    false
                }
                Err(e) => panic!("Unexpected error {e:?}"),
            };

            embassy_futures::block_on(async {
                let mut ledger = Ledger::new(&mut mock, BOUNDS).unwrap();
                let current = ledger.current().await.unwrap();
                assert!(current == Some(old) || current == Some(new), "lost at {fail_at}: {current:?}");

                ledger.set(&new).await.unwrap();
                assert_eq!(ledger.current().await.unwrap(), Some(new));
            });

            if done {
                break;
            }
        }

        // Provisional pass, shadow pass and invalidation.
        assert_eq!(interrupted, 3 * ENTRY_SIZE);
    }

    /// Interrupt a commit that needs to reset the page, at every erased or programmed byte.
    #[test]
    fn power_loss_during_page_reset() {
        let entries = [entry(1), entry(2), entry(3)];
        let new = entry(4);

        for fail_at in 0.. {
            let mut mock = TinyFlash::default();
            embassy_futures::block_on(async {
                let mut ledger = Ledger::new(&mut mock, BOUNDS).unwrap();
                for e in &entries {
                    ledger.set(e).await.unwrap();
                }
            });
            let erases = mock.erase_count();

            mock.bytes_until_shutoff = Some(fail_at);
            let result = embassy_futures::block_on(async {
                let mut ledger = Ledger::new(&mut mock, BOUNDS).unwrap();
                ledger.set(&new).await
            });
            mock.remove_shutoff();
            let reset_started = mock.erase_count() > erases;

            embassy_futures::block_on(async {
                let mut ledger = Ledger::new(&mut mock, BOUNDS).unwrap();
                match ledger.current().await.unwrap() {
                    Some(e) if e == entries[2] || e == new => {}
                    None if reset_started => {}
                    other => panic!("lost at {fail_at}: {other:?}"),
                }

                ledger.set(&new).await.unwrap();
                assert_eq!(ledger.current().await.unwrap(), Some(new));
            });

            match result {
                Ok(()) => break,
                Err(Error::Other(MockFlashError::EarlyShutoff(_, _))) => {}
                Err(e) => panic!("Unexpected error {e:?}"),
            }
        }
    }

    /// Flash that silently ignores every write and erase.
    struct WriteProtected(TinyFlash);

    impl ErrorType for WriteProtected {
        type Error = MockFlashError;
    }

    impl ReadNorFlash for WriteProtected {
        const READ_SIZE: usize = TinyFlash::READ_SIZE;

        async fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
            self.0.read(offset, bytes).await
        }

        fn capacity(&self) -> usize {
            self.0.capacity()
        }
    }

    impl NorFlash for WriteProtected {
        const WRITE_SIZE: usize = TinyFlash::WRITE_SIZE;
        const ERASE_SIZE: usize = TinyFlash::ERASE_SIZE;

        async fn erase(&mut self, _from: u32, _to: u32) -> Result<(), Self::Error> {
            Ok(())
        }

        async fn write(&mut self, _offset: u32, _bytes: &[u8]) -> Result<(), Self::Error> {
            Ok(())
        }
    }

    #[test]
    fn readback_failure_is_bounded() {
        embassy_futures::block_on(async {
            let mut ledger = Ledger::new(WriteProtected(TinyFlash::default()), BOUNDS).unwrap();
            assert!(matches!(ledger.find_current().await, Err(Error::ReadbackFailed)));
            assert!(matches!(ledger.set(&entry(1)).await, Err(Error::ReadbackFailed)));
        });

        // Signed page whose slots cannot be programmed.
        let mut inner = TinyFlash::default();
        inner.as_bytes_mut()[..ENTRY_SIZE].copy_from_slice(&Entry::SIGNATURE.as_bytes());
        embassy_futures::block_on(async {
            let mut ledger = Ledger::new(WriteProtected(inner), BOUNDS).unwrap();
            assert!(matches!(ledger.set(&entry(1)).await, Err(Error::ReadbackFailed)));
        });
    }
}

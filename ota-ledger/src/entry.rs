use core::ops::Range;

/// Size in bytes of a single [Entry] slot in the ledger page.
pub const ENTRY_SIZE: usize = 16;

/// Value of a flash word that has been erased and not programmed since.
pub const ERASED_WORD: u32 = 0xFFFF_FFFF;

/// Address ranges a reset vector pair must fall in before the boot manager may jump to it.
///
/// Both ranges are half-open, as usual for [Range].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VectorBounds {
    /// Valid initial stack pointers, i.e. somewhere in RAM.
    pub stack_pointer: Range<u32>,
    /// Valid reset handler addresses, i.e. somewhere in the image area of the flash.
    pub reset_vector: Range<u32>,
}

impl VectorBounds {
    pub fn contains(&self, nvic_jump: [u32; 2]) -> bool {
        self.stack_pointer.contains(&nvic_jump[0]) && self.reset_vector.contains(&nvic_jump[1])
    }
}

#[derive(Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ParseResult {
    /// Nor flash entry yet to be written; nothing beyond this slot has been written either.
    Unset,
    /// Entry was written, but is not (or no longer) the current one.
    Invalid,
}

/// Ledger record as stored in the OTA ledger page.
///
/// On flash this is four little-endian words: the image CRC, its shadow, and the
/// initial stack pointer and reset vector of the image.
///
/// An entry is *current* when both CRC words are equal and non-zero, and the vectors
/// are sane. Since an erased slot reads as `0xffffffff` everywhere, the first CRC word
/// doubles as the end-of-ledger marker.
#[derive(PartialEq, Eq, Clone, Copy)]
pub struct Entry {
    image_crc: [u32; 2],
    nvic_jump: [u32; 2],
}

#[cfg(feature = "_test")]
impl arbitrary::Arbitrary<'_> for Entry {
    fn arbitrary(u: &mut arbitrary::Unstructured<'_>) -> arbitrary::Result<Self> {
        // Only generate entries that could become current, 0 and 0xffffffff excluded.
        let crc = u.int_in_range(1..=ERASED_WORD - 1)?;
        let stack_pointer = u.int_in_range(0..=ERASED_WORD - 1)?;
        let reset_vector = u.int_in_range(0..=ERASED_WORD - 1)?;
        Ok(Entry::new([crc, crc], [stack_pointer, reset_vector]))
    }
}

impl Entry {
    /// Fixed pattern in slot 0 that marks the page as an initialized ledger.
    pub const SIGNATURE: Entry = Entry::new([0x0123_4567, 0x89AB_CDEF], [0x0246_8ACE, 0x1357_9BDF]);

    /// A slot that was erased and never written.
    pub const ERASED: Entry = Entry::new([ERASED_WORD; 2], [ERASED_WORD; 2]);

    pub const fn new(image_crc: [u32; 2], nvic_jump: [u32; 2]) -> Self {
        Self { image_crc, nvic_jump }
    }

    pub fn from_bytes(data: [u8; ENTRY_SIZE]) -> Self {
        let word = |i: usize| u32::from_le_bytes([data[i * 4], data[i * 4 + 1], data[i * 4 + 2], data[i * 4 + 3]]);
        Self::new([word(0), word(1)], [word(2), word(3)])
    }

    pub fn as_bytes(&self) -> [u8; ENTRY_SIZE] {
        let mut data = [0u8; ENTRY_SIZE];
        let words = [self.image_crc[0], self.image_crc[1], self.nvic_jump[0], self.nvic_jump[1]];
        for (chunk, word) in data.chunks_exact_mut(4).zip(words) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        data
    }

    /// Image CRC and its shadow.
    pub fn image_crc(&self) -> [u32; 2] {
        self.image_crc
    }

    /// Initial stack pointer and reset vector, as found at the start of the image vector table.
    pub fn nvic_jump(&self) -> [u32; 2] {
        self.nvic_jump
    }

    pub fn stack_pointer(&self) -> u32 {
        self.nvic_jump[0]
    }

    pub fn reset_vector(&self) -> u32 {
        self.nvic_jump[1]
    }

    pub fn is_erased(&self) -> bool {
        *self == Self::ERASED
    }

    pub fn is_current(&self, bounds: &VectorBounds) -> bool {
        self.parse(bounds).is_ok()
    }

    /// Classify a slot read from the ledger page.
    pub fn parse(&self, bounds: &VectorBounds) -> Result<Self, ParseResult> {
        if self.image_crc[0] == ERASED_WORD {
            return Err(ParseResult::Unset);
        }

        if self.image_crc[0] == 0 || self.image_crc[0] != self.image_crc[1] {
            return Err(ParseResult::Invalid);
        }

        if !bounds.contains(self.nvic_jump) {
            return Err(ParseResult::Invalid);
        }

        Ok(*self)
    }

    /// First programming pass of a commit: everything except the CRC shadow.
    ///
    /// Until the shadow is written the slot can never be mistaken for a current entry.
    pub(crate) fn provisional(&self) -> Self {
        Self::new([self.image_crc[0], ERASED_WORD], self.nvic_jump)
    }

    /// Second programming pass of a commit: only the CRC shadow, all other words left erased.
    pub(crate) fn shadow(&self) -> Self {
        Self::new([ERASED_WORD, self.image_crc[1]], [ERASED_WORD; 2])
    }

    /// Pattern that, programmed over this entry, clears every set bit of its first CRC word.
    pub(crate) fn invalidation(&self) -> Self {
        Self::new([self.image_crc[0] ^ ERASED_WORD, ERASED_WORD], [ERASED_WORD; 2])
    }
}

impl core::fmt::Debug for Entry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Entry")
            .field("image_crc", &format_args!("[{:#010x}, {:#010x}]", self.image_crc[0], self.image_crc[1]))
            .field("nvic_jump", &format_args!("[{:#010x}, {:#010x}]", self.nvic_jump[0], self.nvic_jump[1]))
            .finish()
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Entry {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(
            f,
            "Entry {{ image_crc: [{=u32:#x}, {=u32:#x}], nvic_jump: [{=u32:#x}, {=u32:#x}] }}",
            self.image_crc[0],
            self.image_crc[1],
            self.nvic_jump[0],
            self.nvic_jump[1]
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOUNDS: VectorBounds = VectorBounds {
        stack_pointer: 0x2000_4001..0x2700_7FFF,
        reset_vector: 0x0020_0001..0x0027_EFFF,
    };

    const VALID: Entry = Entry::new([0x2012_0613, 0x2012_0613], [0x2000_8000, 0x0020_2101]);

    #[test]
    fn byte_layout_is_little_endian_words() {
        assert_eq!(
            Entry::SIGNATURE.as_bytes(),
            [
                0x67, 0x45, 0x23, 0x01, 0xEF, 0xCD, 0xAB, 0x89, 0xCE, 0x8A, 0x46, 0x02, 0xDF, 0x9B, 0x57, 0x13
            ]
        );
        assert_eq!(Entry::from_bytes(VALID.as_bytes()), VALID);
        assert_eq!(Entry::from_bytes([0xff; ENTRY_SIZE]), Entry::ERASED);
    }

    #[test]
    fn classification() {
        assert_eq!(VALID.parse(&BOUNDS), Ok(VALID));
        assert_eq!(Entry::ERASED.parse(&BOUNDS), Err(ParseResult::Unset));

        // Provisional write is never current.
        assert_eq!(VALID.provisional().parse(&BOUNDS), Err(ParseResult::Invalid));

        // Zero CRC, mismatched shadow.
        assert!(!Entry::new([0, 0], VALID.nvic_jump()).is_current(&BOUNDS));
        assert!(!Entry::new([1, 2], VALID.nvic_jump()).is_current(&BOUNDS));

        // Vectors outside their ranges, bounds are exclusive of 0x20004000.
        assert!(!Entry::new(VALID.image_crc(), [0x2000_4000, 0x0020_2101]).is_current(&BOUNDS));
        assert!(!Entry::new(VALID.image_crc(), [0x2000_8000, 0x0027_EFFF]).is_current(&BOUNDS));

        // Signature is not a plausible entry.
        assert!(!Entry::SIGNATURE.is_current(&BOUNDS));
    }

    /// Programming the commit passes on top of each other (NOR: bits only go 1 -> 0) yields the entry.
    #[test]
    fn passes_compose_on_nor() {
        let and = |a: [u8; ENTRY_SIZE], b: [u8; ENTRY_SIZE]| {
            let mut out = a;
            out.iter_mut().zip(b).for_each(|(o, b)| *o &= b);
            out
        };

        let erased = Entry::ERASED.as_bytes();
        let written = and(and(erased, VALID.provisional().as_bytes()), VALID.shadow().as_bytes());
        assert_eq!(Entry::from_bytes(written), VALID);

        let retired = Entry::from_bytes(and(written, VALID.invalidation().as_bytes()));
        assert_eq!(retired.image_crc(), [0, VALID.image_crc()[1]]);
        assert_eq!(retired.parse(&BOUNDS), Err(ParseResult::Invalid));
    }
}

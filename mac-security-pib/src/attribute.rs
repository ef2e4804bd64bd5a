//! Security attribute identifiers and the table driving the scalar ones.

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::{MAX_DEVICE_TABLE_ENTRIES, MAX_KEY_TABLE_ENTRIES, MAX_SECURITY_LEVEL_TABLE_ENTRIES};

/// MAC status for a successful get or set.
pub const SUCCESS: u8 = 0x00;

/// Security related PIB attributes, IEEE 802.15.4-2006 table 88 plus the per-entry accessors.
#[derive(Debug, PartialEq, Eq, Clone, Copy, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Attribute {
    KeyTableEntries = 0x71,
    DeviceTableEntries = 0x72,
    SecurityLevelTableEntries = 0x73,
    /// Managed by the MAC itself, neither readable nor writable.
    FrameCounter = 0x74,
    AutoRequestSecurityLevel = 0x75,
    AutoRequestKeyIdMode = 0x76,
    AutoRequestKeySource = 0x77,
    AutoRequestKeyIndex = 0x78,
    DefaultKeySource = 0x79,
    PanCoordExtendedAddress = 0x7A,
    PanCoordShortAddress = 0x7B,
    KeyTable = 0x7C,
    DeviceTable = 0x7D,
    SecurityLevelTable = 0x7E,
    KeyIdLookupEntry = 0xD0,
    KeyDeviceEntry = 0xD1,
    KeyUsageEntry = 0xD2,
    KeyEntry = 0xD3,
    DeviceEntry = 0xD4,
    SecurityLevelEntry = 0xD5,
}

/// Rejection of a get or set, carrying its MAC status code.
#[derive(Debug, PartialEq, Eq, Clone, Copy, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum PibError {
    InvalidParameter = 0xE8,
    UnsupportedAttribute = 0xF4,
    ReadOnly = 0xFB,
}

/// MAC status byte for the outcome of a get or set.
pub fn status(result: Result<(), PibError>) -> u8 {
    match result {
        Ok(()) => SUCCESS,
        Err(e) => e.into(),
    }
}

/// Placement and bounds of a scalar attribute in the scalar block.
///
/// `min` and `max` both zero means the value is not range checked. Equal and non-zero means
/// the attribute is read-only. Otherwise the first byte has to lie in `min..=max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Scalar {
    pub offset: u8,
    pub len: u8,
    pub min: u8,
    pub max: u8,
}

impl Scalar {
    const fn new(offset: u8, len: u8, min: u8, max: u8) -> Self {
        Self { offset, len, min, max }
    }

    pub fn range(&self) -> core::ops::Range<usize> {
        self.offset as usize..(self.offset + self.len) as usize
    }

    /// Validate a value about to be written.
    pub fn check(&self, value: &[u8]) -> Result<(), PibError> {
        if self.min != 0 || self.max != 0 {
            if self.min == self.max {
                return Err(PibError::ReadOnly);
            }

            match value.first() {
                Some(first) if (self.min..=self.max).contains(first) => {}
                _ => return Err(PibError::InvalidParameter),
            }
        }

        if value.len() != self.len as usize {
            return Err(PibError::InvalidParameter);
        }

        Ok(())
    }
}

/// Length of an extended address or key source.
pub const KEY_SOURCE_LEN: usize = 8;

pub(crate) mod offset {
    pub const KEY_TABLE_ENTRIES: u8 = 0;
    pub const DEVICE_TABLE_ENTRIES: u8 = 1;
    pub const SECURITY_LEVEL_TABLE_ENTRIES: u8 = 2;
    pub const AUTO_REQUEST_SECURITY_LEVEL: u8 = 3;
    pub const AUTO_REQUEST_KEY_ID_MODE: u8 = 4;
    pub const AUTO_REQUEST_KEY_SOURCE: u8 = 5;
    pub const AUTO_REQUEST_KEY_INDEX: u8 = 13;
    pub const DEFAULT_KEY_SOURCE: u8 = 14;
    pub const PAN_COORD_EXTENDED_ADDRESS: u8 = 22;
    pub const PAN_COORD_SHORT_ADDRESS: u8 = 30;
}

/// Size of the scalar block.
pub(crate) const SCALAR_BLOCK_SIZE: usize = 32;

const FIRST_SCALAR: u8 = Attribute::KeyTableEntries as u8;

const SCALARS: [Scalar; 11] = [
    Scalar::new(offset::KEY_TABLE_ENTRIES, 1, 0, MAX_KEY_TABLE_ENTRIES as u8),
    Scalar::new(offset::DEVICE_TABLE_ENTRIES, 1, 0, MAX_DEVICE_TABLE_ENTRIES as u8),
    Scalar::new(offset::SECURITY_LEVEL_TABLE_ENTRIES, 1, 0, MAX_SECURITY_LEVEL_TABLE_ENTRIES as u8),
    // Frame counter, handled before the table is consulted.
    Scalar::new(0, 0, 0, 0),
    Scalar::new(offset::AUTO_REQUEST_SECURITY_LEVEL, 1, 0, 7),
    Scalar::new(offset::AUTO_REQUEST_KEY_ID_MODE, 1, 0, 3),
    Scalar::new(offset::AUTO_REQUEST_KEY_SOURCE, KEY_SOURCE_LEN as u8, 0, 0),
    Scalar::new(offset::AUTO_REQUEST_KEY_INDEX, 1, 0x01, 0xFF),
    Scalar::new(offset::DEFAULT_KEY_SOURCE, KEY_SOURCE_LEN as u8, 0, 0),
    Scalar::new(offset::PAN_COORD_EXTENDED_ADDRESS, KEY_SOURCE_LEN as u8, 0, 0),
    Scalar::new(offset::PAN_COORD_SHORT_ADDRESS, 2, 0, 0),
];

impl Attribute {
    /// Table entry of a scalar attribute, `None` for composite ones.
    pub(crate) fn scalar(self) -> Option<&'static Scalar> {
        match self {
            Attribute::KeyTableEntries
            | Attribute::DeviceTableEntries
            | Attribute::SecurityLevelTableEntries
            | Attribute::AutoRequestSecurityLevel
            | Attribute::AutoRequestKeyIdMode
            | Attribute::AutoRequestKeySource
            | Attribute::AutoRequestKeyIndex
            | Attribute::DefaultKeySource
            | Attribute::PanCoordExtendedAddress
            | Attribute::PanCoordShortAddress => SCALARS.get((u8::from(self) - FIRST_SCALAR) as usize),
            _ => None,
        }
    }

    /// Size in bytes of a scalar attribute's value.
    pub fn scalar_len(self) -> Option<usize> {
        self.scalar().map(|s| s.len as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalars_tile_the_block() {
        let mut end = 0;
        for id in 0x71..=0x7Bu8 {
            let attribute = Attribute::try_from(id).unwrap();
            if attribute == Attribute::FrameCounter {
                assert!(attribute.scalar().is_none());
                continue;
            }

            let scalar = attribute.scalar().unwrap();
            assert_eq!(scalar.offset as usize, end, "{attribute:?}");
            end = scalar.range().end;
        }
        assert_eq!(end, SCALAR_BLOCK_SIZE);
    }

    #[test]
    fn id_space() {
        assert_eq!(Attribute::try_from(0x70).ok(), None);
        assert_eq!(Attribute::try_from(0x7F).ok(), None);
        assert_eq!(Attribute::try_from(0xCF).ok(), None);
        assert_eq!(Attribute::try_from(0xD6).ok(), None);
        assert_eq!(Attribute::try_from(0xD3).ok(), Some(Attribute::KeyEntry));
        assert!(Attribute::KeyTable.scalar().is_none());
        assert_eq!(Attribute::PanCoordShortAddress.scalar_len(), Some(2));
    }

    #[test]
    fn scalar_checks() {
        let level = Attribute::AutoRequestSecurityLevel.scalar().unwrap();
        assert_eq!(level.check(&[7]), Ok(()));
        assert_eq!(level.check(&[8]), Err(PibError::InvalidParameter));
        assert_eq!(level.check(&[]), Err(PibError::InvalidParameter));
        assert_eq!(level.check(&[1, 2]), Err(PibError::InvalidParameter));

        let index = Attribute::AutoRequestKeyIndex.scalar().unwrap();
        assert_eq!(index.check(&[0]), Err(PibError::InvalidParameter));
        assert_eq!(index.check(&[0xFF]), Ok(()));

        // Unchecked attributes only need the right length.
        let source = Attribute::DefaultKeySource.scalar().unwrap();
        assert_eq!(source.check(&[0; 8]), Ok(()));
        assert_eq!(source.check(&[0; 7]), Err(PibError::InvalidParameter));
    }

    #[test]
    fn equal_bounds_are_read_only() {
        for bound in 1..=u8::MAX {
            let scalar = Scalar::new(0, 1, bound, bound);
            for value in [0, bound, u8::MAX] {
                assert_eq!(scalar.check(&[value]), Err(PibError::ReadOnly));
            }
        }
    }

    #[test]
    fn status_codes() {
        assert_eq!(status(Ok(())), 0x00);
        assert_eq!(status(Err(PibError::UnsupportedAttribute)), 0xF4);
        assert_eq!(status(Err(PibError::InvalidParameter)), 0xE8);
        assert_eq!(status(Err(PibError::ReadOnly)), 0xFB);
    }
}

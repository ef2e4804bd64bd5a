use std::fmt;

use itertools::Itertools;
use ota_ledger::entry::{ENTRY_SIZE, Entry, ParseResult, VectorBounds};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Signature,
    /// Slot 0 holds something other than the signature, the device will reset the page.
    BadSignature,
    Current,
    Invalid,
    Erased,
}

#[derive(Debug)]
pub struct Slot {
    pub index: usize,
    pub entry: Entry,
    pub state: SlotState,
}

/// Decoded ledger page dump.
#[derive(Debug)]
pub struct Page {
    /// Slots up to and including the first erased one.
    pub slots: Vec<Slot>,
    /// Slot the boot manager would run from.
    pub current: Option<usize>,
}

/// Decode a ledger page the way the boot manager scans it.
pub fn decode(page: &[u8], bounds: &VectorBounds) -> anyhow::Result<Page> {
    if page.len() % ENTRY_SIZE != 0 || page.len() < 2 * ENTRY_SIZE {
        anyhow::bail!("Page dump of {} bytes is not a whole number of slots", page.len());
    }

    let mut slots = vec![];
    let mut current = None;
    let signed = page[..ENTRY_SIZE] == Entry::SIGNATURE.as_bytes();

    for (index, chunk) in page.chunks_exact(ENTRY_SIZE).enumerate() {
        let mut data = [0u8; ENTRY_SIZE];
        data.copy_from_slice(chunk);
        let entry = Entry::from_bytes(data);

        let state = match (index, entry.parse(bounds)) {
            (0, _) if signed => SlotState::Signature,
            (0, _) => SlotState::BadSignature,
            (_, Ok(_)) => SlotState::Current,
            (_, Err(ParseResult::Invalid)) => SlotState::Invalid,
            (_, Err(ParseResult::Unset)) => SlotState::Erased,
        };

        if signed && state == SlotState::Current && current.is_none() {
            current = Some(index);
        }

        slots.push(Slot { index, entry, state });
        if state == SlotState::Erased {
            break;
        }
    }

    Ok(Page { slots, current })
}

impl fmt::Display for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for slot in &self.slots {
            let words = slot
                .entry
                .as_bytes()
                .chunks_exact(4)
                .map(|w| format!("{:08x}", u32::from_le_bytes([w[0], w[1], w[2], w[3]])))
                .join(" ");
            let marker = if self.current == Some(slot.index) { " <- current" } else { "" };
            writeln!(f, "{:4}: {words} {:?}{marker}", slot.index, slot.state)?;
        }

        match self.current {
            Some(index) => write!(f, "boot manager runs the image of slot {index}"),
            None => write!(f, "no current entry, the device will rebuild the ledger"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bounds() -> VectorBounds {
        VectorBounds {
            stack_pointer: 0x2000_4001..0x2700_7fff,
            reset_vector: 0x0020_0001..0x0027_efff,
        }
    }

    fn page(entries: &[Entry]) -> Vec<u8> {
        let mut page = vec![0xff; 2048];
        for (chunk, entry) in page.chunks_exact_mut(ENTRY_SIZE).zip(entries) {
            chunk.copy_from_slice(&entry.as_bytes());
        }
        page
    }

    #[test]
    fn picks_lowest_current() {
        let retired = Entry::new([0, 0x1111], [0x2000_8000, 0x0020_2101]);
        let a = Entry::new([0x2222; 2], [0x2000_8000, 0x0020_2101]);
        let b = Entry::new([0x3333; 2], [0x2000_8000, 0x0024_0101]);

        let decoded = decode(&page(&[Entry::SIGNATURE, retired, a, b]), &bounds()).unwrap();
        assert_eq!(decoded.current, Some(2));
        assert_eq!(decoded.slots.len(), 5);
        assert_eq!(decoded.slots[1].state, SlotState::Invalid);
        assert_eq!(decoded.slots[3].state, SlotState::Current);
        assert_eq!(decoded.slots[4].state, SlotState::Erased);
    }

    #[test]
    fn unsigned_page_has_no_current() {
        let a = Entry::new([0x2222; 2], [0x2000_8000, 0x0020_2101]);
        let decoded = decode(&page(&[Entry::ERASED, a]), &bounds()).unwrap();

        assert_eq!(decoded.slots[0].state, SlotState::BadSignature);
        assert_eq!(decoded.current, None);
    }

    #[test]
    fn rejects_partial_pages() {
        assert!(decode(&[0xff; 24], &bounds()).is_err());
        assert!(decode(&[0xff; 16], &bounds()).is_err());
    }
}

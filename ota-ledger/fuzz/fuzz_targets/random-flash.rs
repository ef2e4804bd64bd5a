#![no_main]

extern crate libfuzzer_sys;
extern crate std;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use ota_ledger::{
    entry::{Entry, VectorBounds},
    flash::{mock::MockFlashBase, Cursor, Ledger},
};

fuzz_target!(|input: Input<'_>| fuzz(input.data, input.new_entry));

#[derive(Arbitrary, Debug)]
struct Input<'a> {
    pub data: &'a [u8],
    pub new_entry: Entry,
}

const WORD_SIZE: usize = 4;
const WORDS_PER_PAGE: usize = 32;

/// Accept any vector pair the arbitrary entries can produce.
const BOUNDS: VectorBounds = VectorBounds {
    stack_pointer: 0..u32::MAX,
    reset_vector: 0..u32::MAX,
};

/// Tests for 'any page content, with valid or invalid data, does not cause a crash'.
fn fuzz(random_data: &[u8], new_entry: Entry) {
    let mut flash = MockFlashBase::<1, WORD_SIZE, WORDS_PER_PAGE>::new(None, false);

    let len = random_data.len().min(flash.as_bytes().len());
    flash.as_bytes_mut()[..len].copy_from_slice(&random_data[..len]);

    futures::executor::block_on(async {
        let mut ledger = Ledger::new(&mut flash, BOUNDS).unwrap();

        // Scanning should never fail, whatever is on the page.
        let cursor = ledger.find_current().await.unwrap();
        if let Cursor::Current { slot, .. } = cursor {
            assert!(slot > 0 && slot < ledger.slot_count());
        }

        ledger.set(&new_entry).await.unwrap();
        assert_eq!(ledger.current().await.unwrap(), Some(new_entry));
    });
}

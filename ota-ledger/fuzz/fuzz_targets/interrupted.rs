#![no_main]

extern crate libfuzzer_sys;
extern crate std;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use ota_ledger::{
    entry::{Entry, VectorBounds},
    flash::{
        self,
        mock::{MockFlashBase, MockFlashError::EarlyShutoff},
        Ledger,
    },
};

fuzz_target!(|input: Input| fuzz(input.entries, input.fail_at));

#[derive(Debug)]
struct Input {
    /// Consecutive entries to commit.
    pub entries: Vec<Entry>,

    /// Byte number to fail at when doing flash operations.
    pub fail_at: usize,
}

impl<'a> Arbitrary<'a> for Input {
    fn arbitrary(u: &mut arbitrary::Unstructured<'a>) -> arbitrary::Result<Self> {
        let entries: Vec<Entry> = Arbitrary::arbitrary(u)?;
        let fail_at = u.int_in_range(0..=entries.len() * 48)?;
        Ok(Input { entries, fail_at })
    }
}

const WORD_SIZE: usize = 4;
const WORDS_PER_PAGE: usize = 16;

const BOUNDS: VectorBounds = VectorBounds {
    stack_pointer: 0..u32::MAX,
    reset_vector: 0..u32::MAX,
};

/// Tests for 'an interrupted commit keeps either the old or the new entry current',
/// unless the commit had to reset the page.
fn fuzz(entries: Vec<Entry>, fail_at: usize) {
    let mut flash = MockFlashBase::<1, WORD_SIZE, WORDS_PER_PAGE>::new(Some(fail_at as u32), false);
    let mut entries = entries.into_iter().peekable();

    futures::executor::block_on(async {
        let mut prev_entry = None;
        while let Some(new_entry) = entries.peek() {
            let erases = flash.erase_count();
            let mut ledger = Ledger::new(&mut flash, BOUNDS).unwrap();

            match ledger.set(new_entry).await {
                Ok(_) => {
                    assert_eq!(ledger.current().await.unwrap(), Some(*new_entry));
                }
                Err(flash::Error::Other(EarlyShutoff(_, _))) => {
                    drop(ledger);
                    flash.remove_shutoff();
                    let reset_started = flash.erase_count() > erases;

                    let mut ledger = Ledger::new(&mut flash, BOUNDS).unwrap();
                    let current = ledger.current().await.unwrap();

                    if current == prev_entry {
                        // Old entry was kept, even though the new one was not persisted.
                    } else if current.as_ref() == Some(new_entry) {
                        // New entry made it, the shutoff hit while retiring the old one.
                    } else if current.is_none() && reset_started {
                        // Page was being reset, nothing current until the next commit completes.
                    } else {
                        panic!("Entry not maintained or persisted");
                    }
                    break;
                }
                Err(e) => panic!("Unexpected error {:?}", e),
            }

            prev_entry = entries.next(); // Successfully persisted, drop the entry.
        }
    });
}

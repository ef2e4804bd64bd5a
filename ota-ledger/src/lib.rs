//! Power-loss tolerant OTA ledger recording which image in flash is current, see [flash::Ledger].
#![cfg_attr(not(feature = "_test"), no_std)]

#[cfg(test)]
#[macro_use]
extern crate std;

pub mod entry;
pub mod flash;

use crate::error::Error;
use crate::platform::Platform;
use crate::record::is_sentinel;
use crate::window::{FlashWindow, SlotOffset};
#[cfg(feature = "defmt")]
use defmt::debug;

/// Where the authoritative record lives and where the next one goes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ScanResult {
    /// The last slot, in increasing offset order, whose version byte is not a sentinel.
    pub current: Option<SlotOffset>,
    /// The slot following `current`, or the first slot if the unit holds no record.
    pub next: SlotOffset,
}

/// Single forward pass over all slots of the window. Slots are written in increasing offset order
/// after every erase, so the last non-sentinel slot seen is the most recently written one.
///
/// Only the version byte of each slot is inspected. Whether the record decodes is up to the caller.
pub fn scan<T: Platform>(window: &mut FlashWindow<T>) -> Result<ScanResult, Error> {
    let mut current = None;

    for slot in SlotOffset::all() {
        let version = window.read_version_byte(slot)?;
        if !is_sentinel(version) {
            current = Some(slot);
        }
    }

    let next = current.map_or(SlotOffset::FIRST, SlotOffset::next);

    #[cfg(feature = "defmt")]
    debug!("scan: current {:?}, next {:?}", current, next);

    #[cfg(feature = "debug-logs")]
    println!("  scan: current: {current:?}, next: {next:?}");

    Ok(ScanResult { current, next })
}

/// A slot is only writable if every byte of it is erased. A body left behind by an aborted write
/// still carries an erased version byte, so checking the version byte alone is not enough.
pub fn slot_is_erased<T: Platform>(
    window: &mut FlashWindow<T>,
    slot: SlotOffset,
) -> Result<bool, Error> {
    let raw = window.read_slot(slot)?;
    Ok(raw.iter().all(|&it| it == 0xFF))
}

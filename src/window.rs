use crate::error::Error;
use crate::platform::{AlignedOps, Platform};
use crate::{SLOT_SIZE, SLOTS_PER_UNIT, UNIT_SIZE};
#[cfg(feature = "defmt")]
use defmt::trace;

/// Offset of a slot relative to the start of the settings window. Always a multiple of
/// [`SLOT_SIZE`] and smaller than [`UNIT_SIZE`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SlotOffset(u32);

impl SlotOffset {
    pub const FIRST: SlotOffset = SlotOffset(0);

    /// Usage: `SlotOffset::nth(3)` is the slot at byte offset 768.
    pub const fn nth(index: usize) -> Self {
        assert!(index < SLOTS_PER_UNIT);
        Self((index * SLOT_SIZE) as u32)
    }

    pub const fn offset(self) -> u32 {
        self.0
    }

    pub const fn index(self) -> usize {
        self.0 as usize / SLOT_SIZE
    }

    /// The slot written after this one, wrapping to slot 0 at the end of the unit.
    pub const fn next(self) -> Self {
        Self((self.0 + SLOT_SIZE as u32) % UNIT_SIZE as u32)
    }

    pub(crate) fn all() -> impl Iterator<Item = SlotOffset> {
        (0..SLOTS_PER_UNIT).map(SlotOffset::nth)
    }
}

impl From<SlotOffset> for u32 {
    fn from(val: SlotOffset) -> Self {
        val.0
    }
}

/// Exclusive handle on the one erase unit that holds the settings slots. All offsets taken by
/// this type are relative to the window base.
///
/// `program` only clears bits. Callers must only program ranges that are erased (or rewrite
/// bytes with the value they already hold); `erase` is the only way back to `0xFF`.
pub struct FlashWindow<T: Platform> {
    hal: T,
    base: u32,
}

impl<T: Platform> FlashWindow<T> {
    /// Places the window at `base`, which has to be aligned to [`UNIT_SIZE`]. The unit has to be
    /// erasable with whole driver sectors and slots have to be readable and writable in whole
    /// driver words.
    pub fn new(hal: T, base: usize) -> Result<Self, Error> {
        if !base.is_multiple_of(UNIT_SIZE) {
            return Err(Error::InvalidWindowOffset);
        }

        if T::ERASE_SIZE == 0 || !UNIT_SIZE.is_multiple_of(T::ERASE_SIZE) {
            return Err(Error::InvalidWindowSize);
        }

        if T::READ_SIZE == 0
            || T::WRITE_SIZE == 0
            || !SLOT_SIZE.is_multiple_of(T::READ_SIZE)
            || !SLOT_SIZE.is_multiple_of(T::WRITE_SIZE)
        {
            return Err(Error::InvalidWindowSize);
        }

        let end = base.checked_add(UNIT_SIZE).ok_or(Error::InvalidWindowSize)?;
        if end > hal.capacity() || end > u32::MAX as usize {
            return Err(Error::InvalidWindowSize);
        }

        Ok(Self {
            hal,
            base: base as u32,
        })
    }

    /// Places the window on the last erase unit of the device.
    pub fn last_unit(hal: T) -> Result<Self, Error> {
        let base = hal
            .capacity()
            .checked_sub(UNIT_SIZE)
            .ok_or(Error::InvalidWindowSize)?;
        // devices whose capacity is not a multiple of the unit get their last aligned unit
        let base = base - base % UNIT_SIZE;
        Self::new(hal, base)
    }

    /// Absolute device address of the window.
    pub fn base(&self) -> u32 {
        self.base
    }

    pub fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Error> {
        check_range(offset, bytes.len())?;

        #[cfg(feature = "defmt")]
        trace!("read @{:#08x}: [{}]", self.base + offset, bytes.len());

        self.hal
            .read(self.base + offset, bytes)
            .map_err(|_| Error::FlashFault)
    }

    /// Programs at most one slot worth of bytes. The destination has to be erased.
    pub fn program(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Error> {
        if bytes.len() > SLOT_SIZE {
            return Err(Error::InvalidParameter);
        }
        check_range(offset, bytes.len())?;

        write_aligned(&mut self.hal, self.base + offset, bytes).map_err(|_| Error::FlashFault)
    }

    /// Resets the whole unit to `0xFF`. Blocks for as long as the device takes to erase a sector.
    pub fn erase(&mut self) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("erase @{:#08x}", self.base);

        #[cfg(feature = "debug-logs")]
        println!("  FlashWindow: erase {:#08x}", self.base);

        self.hal
            .erase(self.base, self.base + UNIT_SIZE as u32)
            .map_err(|_| Error::FlashFault)
    }

    pub(crate) fn read_slot(&mut self, slot: SlotOffset) -> Result<[u8; SLOT_SIZE], Error> {
        let mut buf = [0u8; SLOT_SIZE];
        self.read(slot.offset(), &mut buf)?;
        Ok(buf)
    }

    /// Reads only the smallest aligned chunk holding the version byte.
    pub(crate) fn read_version_byte(&mut self, slot: SlotOffset) -> Result<u8, Error> {
        let mut buf = [0u8; SLOT_SIZE];
        let len = T::align_read(1);
        self.read(slot.offset(), &mut buf[..len])?;
        Ok(buf[0])
    }

    pub(crate) fn release(self) -> T {
        self.hal
    }
}

/// `offset..offset + len` has to lie within the unit.
fn check_range(offset: u32, len: usize) -> Result<(), Error> {
    match (offset as usize).checked_add(len) {
        Some(end) if end <= UNIT_SIZE => Ok(()),
        _ => Err(Error::InvalidParameter),
    }
}

#[inline(always)]
pub(crate) fn write_aligned<T: Platform>(
    hal: &mut T,
    offset: u32,
    bytes: &[u8],
) -> Result<(), T::Error> {
    #[cfg(feature = "defmt")]
    trace!("write_aligned @{:#08x}: [{}]", offset, bytes.len());

    if bytes.len().is_multiple_of(T::WRITE_SIZE) {
        if bytes.is_empty() {
            return Ok(());
        }
        hal.write(offset, bytes)
    } else {
        let pivot = T::align_write_floor(bytes.len());
        let header = &bytes[..pivot];
        let trailer = &bytes[pivot..];
        if !header.is_empty() {
            hal.write(offset, header)?;
        }

        // the trailer can be skipped if it is all ones, that is what the erased flash holds anyway
        if trailer.iter().any(|&e| e != 0xFF) {
            let mut buf = [0xFFu8; SLOT_SIZE];
            let buf = &mut buf[..T::align_write_ceil(trailer.len())];
            buf[..trailer.len()].copy_from_slice(trailer);
            hal.write(offset + (pivot as u32), buf)?
        }

        Ok(())
    }
}

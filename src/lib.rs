#![doc = include_str!("../README.md")]
#![cfg_attr(not(target_arch = "x86_64"), no_std)]

pub mod error;
pub mod platform;
pub mod record;
pub mod scan;
pub mod window;

/// Every record occupies exactly one slot.
pub const SLOT_SIZE: usize = 256;
/// The settings window is one erase unit. It is erased as a whole once all slots are used.
pub const UNIT_SIZE: usize = 4096;
pub const SLOTS_PER_UNIT: usize = UNIT_SIZE / SLOT_SIZE;

const _: () = assert!(
    UNIT_SIZE % SLOT_SIZE == 0 && SLOTS_PER_UNIT == 16,
    "Erase unit must be split into 16 slots"
);

pub use error::Error;
pub use record::{DapInfoId, Label, Record, SchemaVersion, SettingsV2, TargetIdentity};
pub use scan::ScanResult;
pub use window::{FlashWindow, SlotOffset};

use crate::platform::{AlignedOps, Platform};
use crate::scan::{scan, slot_is_erased};
#[cfg(feature = "defmt")]
use defmt::{debug, warn};
use embedded_storage::ReadStorage;

/// Where the record cached by [`SettingsStore::load`] came from.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LoadOutcome {
    /// The authoritative slot already held a current record. Nothing was written.
    Current,
    /// The authoritative slot held an older schema; the upgraded record was written back.
    Migrated { from: SchemaVersion },
    /// Flash held nothing usable, the record was recovered from the legacy board ID storage.
    Legacy { from: SchemaVersion },
    /// Flash held nothing usable, the defaults were cached and written.
    Defaulted,
}

/// Result of [`SettingsStore::load`]. Loading always leaves the store with a usable record.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LoadReport {
    pub outcome: LoadOutcome,
    /// Flash error that was absorbed while loading. If set, the cached record is not (or not
    /// known to be) on flash.
    pub fault: Option<Error>,
}

struct Cache {
    slot: Option<SlotOffset>,
    image: [u8; SLOT_SIZE],
    record: Record,
}

impl Cache {
    fn unpersisted(record: Record) -> Self {
        Self {
            slot: None,
            image: record.encode(),
            record,
        }
    }
}

enum State {
    Uninitialized,
    Loaded(Cache),
}

/// The settings store owns the flash window and a RAM copy of the authoritative record.
///
/// Reads are served from RAM. Writes rotate through the slots of the window: each record goes
/// into the slot after the current one, and the window is only erased once the rotation wraps
/// around onto a slot that is not erased.
///
/// The store has no internal locking. Calls to `write` have to be serialized by the caller.
pub struct SettingsStore<T: Platform> {
    window: FlashWindow<T>,
    defaults: SettingsV2,
    state: State,
}

impl<T: Platform> SettingsStore<T> {
    /// Creates an unloaded store using [`SettingsV2::BUILTIN`] as defaults.
    pub fn new(window: FlashWindow<T>) -> Self {
        Self::with_defaults(window, SettingsV2::BUILTIN)
    }

    pub fn with_defaults(window: FlashWindow<T>, defaults: SettingsV2) -> Self {
        Self {
            window,
            defaults,
            state: State::Uninitialized,
        }
    }

    /// Reads the authoritative record into RAM. Has to be called before any other operation.
    ///
    /// 1. A current record is cached as is, without touching flash
    /// 2. An older record is migrated, written back and cached
    /// 3. Missing or undecodable records are replaced by the defaults, which are written
    ///
    /// If flash cannot be read at all, the defaults are cached but not written so that a
    /// transient read fault cannot destroy the stored record.
    pub fn load(&mut self) -> LoadReport {
        self.load_from(|_| false)
    }

    /// Same as [`SettingsStore::load`], but before falling back to the defaults a record is
    /// looked for at offset 0 of `legacy`, the board ID storage older probes kept their
    /// settings in. Errors of the legacy storage are treated as "no record".
    pub fn load_with_legacy<L: ReadStorage>(&mut self, legacy: &mut L) -> LoadReport {
        self.load_from(|buf| legacy.capacity() >= SLOT_SIZE && legacy.read(0, buf).is_ok())
    }

    fn load_from(&mut self, read_legacy: impl FnOnce(&mut [u8; SLOT_SIZE]) -> bool) -> LoadReport {
        let found = match self.find_current() {
            Ok(found) => found,
            Err(e) => {
                #[cfg(feature = "defmt")]
                warn!("load: flash unreadable ({}), using defaults", e);

                #[cfg(feature = "debug-logs")]
                println!("SettingsStore: load: flash unreadable: {e}");

                self.state = State::Loaded(Cache::unpersisted(Record::default_record(
                    &self.defaults,
                )));
                return LoadReport {
                    outcome: LoadOutcome::Defaulted,
                    fault: Some(e),
                };
            }
        };

        let (record, outcome) = match found {
            Some(cache) if cache.record.version() == SchemaVersion::CURRENT => {
                self.state = State::Loaded(cache);
                return LoadReport {
                    outcome: LoadOutcome::Current,
                    fault: None,
                };
            }
            Some(cache) => {
                let from = cache.record.version();
                (
                    cache.record.migrate(&self.defaults),
                    LoadOutcome::Migrated { from },
                )
            }
            None => {
                let mut raw = [0xFFu8; SLOT_SIZE];
                match read_legacy(&mut raw).then(|| Record::decode(&raw).ok()).flatten() {
                    Some(record) => (
                        record.migrate(&self.defaults),
                        LoadOutcome::Legacy {
                            from: record.version(),
                        },
                    ),
                    None => (
                        Record::default_record(&self.defaults),
                        LoadOutcome::Defaulted,
                    ),
                }
            }
        };

        #[cfg(feature = "defmt")]
        debug!("load: {}, writing back", outcome);

        #[cfg(feature = "debug-logs")]
        println!("SettingsStore: load: {outcome:?}, writing back");

        let fault = match self.persist(&record.encode()) {
            Ok(cache) => {
                self.state = State::Loaded(cache);
                None
            }
            Err(e) => {
                #[cfg(feature = "defmt")]
                warn!("load: write back failed ({})", e);

                self.state = State::Loaded(Cache::unpersisted(record));
                Some(e)
            }
        };

        LoadReport { outcome, fault }
    }

    /// `Ok(None)` if no slot is current or the current slot does not decode.
    fn find_current(&mut self) -> Result<Option<Cache>, Error> {
        let Some(slot) = scan(&mut self.window)?.current else {
            return Ok(None);
        };

        let image = self.window.read_slot(slot)?;
        match Record::decode(&image) {
            Ok(record) => Ok(Some(Cache {
                slot: Some(slot),
                image,
                record,
            })),
            Err(_e) => {
                #[cfg(feature = "defmt")]
                warn!("load: slot {:?} does not decode ({})", slot, _e);

                #[cfg(feature = "debug-logs")]
                println!("SettingsStore: load: slot {slot:?} does not decode: {_e}");

                Ok(None)
            }
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self.state, State::Loaded(_))
    }

    /// The cached record.
    pub fn get(&self) -> Result<&Record, Error> {
        Ok(&self.cache()?.record)
    }

    /// The cached slot image as stored on flash, including the reserved bytes.
    pub fn read_raw(&self) -> Result<&[u8; SLOT_SIZE], Error> {
        Ok(&self.cache()?.image)
    }

    /// The slot the cached record was read from, `None` if it could not be written at load.
    pub fn current_slot(&self) -> Result<Option<SlotOffset>, Error> {
        Ok(self.cache()?.slot)
    }

    pub fn defaults(&self) -> &SettingsV2 {
        &self.defaults
    }

    /// Persists a typed record. The full slot image is programmed, reserved bytes stay erased.
    pub fn write(&mut self, record: &Record) -> Result<(), Error> {
        self.write_raw(&record.encode())
    }

    /// Persists a schema-tagged settings buffer of at most [`SLOT_SIZE`] bytes, as received over
    /// the command channel. Bytes not covered by the buffer stay erased.
    ///
    /// The buffer has to decode to a known schema. On error, neither the cache nor the flash
    /// content is changed, except for a flash fault in the middle of the write.
    pub fn write_raw(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.cache()?;

        if bytes.is_empty() || bytes.len() > SLOT_SIZE {
            return Err(Error::InvalidParameter);
        }

        let mut image = [0xFFu8; SLOT_SIZE];
        image[..bytes.len()].copy_from_slice(bytes);
        Record::decode(&image)?;

        let cache = self.persist(bytes)?;
        self.state = State::Loaded(cache);
        Ok(())
    }

    /// Runs a fresh scan of the window.
    pub fn scan(&mut self) -> Result<ScanResult, Error> {
        scan(&mut self.window)
    }

    /// Hands the flash driver back.
    pub fn release(self) -> T {
        self.window.release()
    }

    fn cache(&self) -> Result<&Cache, Error> {
        match &self.state {
            State::Loaded(cache) => Ok(cache),
            State::Uninitialized => Err(Error::NotLoaded),
        }
    }

    /// Writes `bytes` into the next slot and returns what is on flash afterwards.
    ///
    /// The next slot is re-derived from a scan on every call. If the rotation has wrapped around
    /// or the next slot is not erased, the unit is erased and writing restarts at the first slot,
    /// which keeps slots ordered by age within the unit. Between the
    /// erase and the commit below the unit holds no record at all.
    fn persist(&mut self, bytes: &[u8]) -> Result<Cache, Error> {
        let ScanResult { current, next } = scan(&mut self.window)?;
        let wrapped = current.is_some() && next == SlotOffset::FIRST;

        let target = if !wrapped && slot_is_erased(&mut self.window, next)? {
            next
        } else {
            #[cfg(feature = "defmt")]
            debug!("persist: slot {:?} in use, erasing unit", next);

            #[cfg(feature = "debug-logs")]
            println!("SettingsStore: persist: slot {next:?} in use, erasing unit");

            self.window.erase()?;
            SlotOffset::FIRST
        };

        self.program_slot(target, bytes)?;

        let current = scan(&mut self.window)?.current;
        if current != Some(target) {
            return Err(Error::FlashFault);
        }

        let image = self.window.read_slot(target)?;
        let record = Record::decode(&image).map_err(|_| Error::FlashFault)?;

        Ok(Cache {
            slot: Some(target),
            image,
            record,
        })
    }

    /// Programs everything after the first write word, then commits the first word, which holds
    /// the version byte. Until the commit, the scanner skips the slot and the previous record
    /// stays authoritative. Every word is programmed exactly once.
    fn program_slot(&mut self, slot: SlotOffset, bytes: &[u8]) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        debug!("program_slot: {:?} [{}]", slot, bytes.len());

        #[cfg(feature = "debug-logs")]
        println!("SettingsStore: program_slot: {slot:?}, {} bytes", bytes.len());

        let commit = T::align_write_ceil(1).min(bytes.len());
        self.window
            .program(slot.offset() + commit as u32, &bytes[commit..])?;
        self.window.program(slot.offset(), &bytes[..commit])
    }
}

use thiserror::Error;

/// Errors that can occur while operating the settings store. Marked as non-exhaustive to allow
/// for future additions. Absent or corrupt flash content is never reported here by `load`, it is
/// replaced with defaults instead.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub enum Error {
    /// The window base has to be aligned to the size of the erase unit (4k)
    #[error("invalid window offset")]
    InvalidWindowOffset,

    /// The erase unit has to be a multiple of the driver erase size and fit into the device
    #[error("invalid window size")]
    InvalidWindowSize,

    /// Empty or oversized settings buffer, or a label that does not fit its field
    #[error("invalid parameter")]
    InvalidParameter,

    /// The version byte is a sentinel or not a known schema. Carries the offending byte.
    #[error("invalid schema version: {0:#04x}")]
    InvalidSchema(u8),

    /// The internal error value is returned from the provided `&mut impl NorFlash`
    #[error("flash fault")]
    FlashFault,

    /// `get` or `write` was called before `load`
    #[error("settings not loaded")]
    NotLoaded,
}

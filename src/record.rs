//! Byte layout of a settings slot and the versioned record it holds.
//!
//! ```text
//! offset  size  field
//!      0     1  version (0x01 = V1, 0x02 = V2, 0xFF and 0x00 are never valid)
//!      1    32  target device vendor  (NUL padded)
//!     33    32  target device name    (NUL padded)
//!     65    32  target board vendor   (NUL padded)
//!     97    32  target board name     (NUL padded)
//!    129     2  USB vendor ID, little endian   (V2 only)
//!    131     2  USB product ID, little endian  (V2 only)
//!    133   123  reserved, left erased
//! ```

use crate::SLOT_SIZE;
use crate::error::Error;
use core::fmt;

/// Version byte of a slot that has not been written since the last erase.
pub const ERASED_VERSION: u8 = 0xFF;
/// Version byte of a zeroed slot. Never written by the store, rejected all the same.
pub const ZEROED_VERSION: u8 = 0x00;

pub(crate) const LABEL_SIZE: usize = 32;
/// Leaves room for the NUL terminator C consumers of the fields rely on.
const MAX_LABEL_LENGTH: usize = LABEL_SIZE - 1;

const VERSION_OFFSET: usize = 0;
const DEVICE_VENDOR_OFFSET: usize = VERSION_OFFSET + 1;
const DEVICE_NAME_OFFSET: usize = DEVICE_VENDOR_OFFSET + LABEL_SIZE;
const BOARD_VENDOR_OFFSET: usize = DEVICE_NAME_OFFSET + LABEL_SIZE;
const BOARD_NAME_OFFSET: usize = BOARD_VENDOR_OFFSET + LABEL_SIZE;
const USB_VID_OFFSET: usize = BOARD_NAME_OFFSET + LABEL_SIZE;
const USB_PID_OFFSET: usize = USB_VID_OFFSET + 2;

/// Number of bytes populated by a V1 record.
pub const V1_LENGTH: usize = USB_VID_OFFSET;
/// Number of bytes populated by a V2 record.
pub const V2_LENGTH: usize = USB_PID_OFFSET + 2;

const _: () = assert!(V1_LENGTH == 129, "V1 layout must end at byte 128");
const _: () = assert!(V2_LENGTH <= SLOT_SIZE, "V2 layout must fit into one slot");

pub const DEFAULT_USB_VID: u16 = 0x2E8A;
pub const DEFAULT_USB_PID: u16 = 0x000C;

pub const fn is_sentinel(version: u8) -> bool {
    version == ERASED_VERSION || version == ZEROED_VERSION
}

#[derive(strum::FromRepr, Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum SchemaVersion {
    V1 = 0x01,
    V2 = 0x02,
}

impl SchemaVersion {
    pub const CURRENT: SchemaVersion = SchemaVersion::V2;
}

/// A 32-byte, NUL-padded text field of a settings record.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Label([u8; LABEL_SIZE]);

impl Label {
    pub const EMPTY: Label = Label([0u8; LABEL_SIZE]);

    /// Creates a NUL-padded label with up to 31 bytes of text.
    ///
    /// Tip: use a const context if possible to ensure that the label is built at compile time:
    ///   `let vendor = const { Label::from_str("Arm") };`
    pub const fn from_str(s: &str) -> Self {
        let src = s.as_bytes();
        assert!(src.len() <= MAX_LABEL_LENGTH);
        let mut dst = [0u8; LABEL_SIZE];
        let mut i = 0;
        while i < src.len() {
            dst[i] = src[i];
            i += 1;
        }
        Self(dst)
    }

    /// Fallible variant of [`Label::from_str`] for text that is only known at runtime.
    pub fn new(s: &str) -> Result<Self, Error> {
        if s.len() > MAX_LABEL_LENGTH || s.as_bytes().contains(&0) {
            return Err(Error::InvalidParameter);
        }
        Ok(Self::from_str(s))
    }

    pub const fn from_raw(raw: [u8; LABEL_SIZE]) -> Self {
        Self(raw)
    }

    /// The field exactly as stored, padding included.
    pub const fn as_raw(&self) -> &[u8; LABEL_SIZE] {
        &self.0
    }

    /// The text up to the first NUL, or the whole field if it is not terminated.
    pub fn as_bytes(&self) -> &[u8] {
        match self.0.iter().position(|&e| e == 0x00) {
            None => &self.0,
            Some(idx) => &self.0[..idx],
        }
    }

    /// `None` if the field is not valid UTF-8, e.g. a field that was never programmed.
    pub fn as_str(&self) -> Option<&str> {
        core::str::from_utf8(self.as_bytes()).ok()
    }

    fn read(raw: &[u8; SLOT_SIZE], offset: usize) -> Self {
        let mut dst = [0u8; LABEL_SIZE];
        dst.copy_from_slice(&raw[offset..offset + LABEL_SIZE]);
        Self(dst)
    }
}

impl Default for Label {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl fmt::Debug for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Label(b\"")?;
        for &byte in self.as_bytes() {
            write!(f, "{}", core::ascii::escape_default(byte))?;
        }
        write!(f, "\")")
    }
}

/// CMSIS-DAP `DAP_Info` IDs answered from the stored target identity.
#[derive(strum::FromRepr, Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum DapInfoId {
    TargetDeviceVendor = 0x05,
    TargetDeviceName = 0x06,
    TargetBoardVendor = 0x07,
    TargetBoardName = 0x08,
}

/// The V1 payload: what the probe reports about the target it is attached to.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TargetIdentity {
    pub device_vendor: Label,
    pub device_name: Label,
    pub board_vendor: Label,
    pub board_name: Label,
}

impl TargetIdentity {
    pub const fn info(&self, id: DapInfoId) -> &Label {
        match id {
            DapInfoId::TargetDeviceVendor => &self.device_vendor,
            DapInfoId::TargetDeviceName => &self.device_name,
            DapInfoId::TargetBoardVendor => &self.board_vendor,
            DapInfoId::TargetBoardName => &self.board_name,
        }
    }

    fn read(raw: &[u8; SLOT_SIZE]) -> Self {
        Self {
            device_vendor: Label::read(raw, DEVICE_VENDOR_OFFSET),
            device_name: Label::read(raw, DEVICE_NAME_OFFSET),
            board_vendor: Label::read(raw, BOARD_VENDOR_OFFSET),
            board_name: Label::read(raw, BOARD_NAME_OFFSET),
        }
    }

    fn write(&self, raw: &mut [u8; SLOT_SIZE]) {
        for (offset, label) in [
            (DEVICE_VENDOR_OFFSET, &self.device_vendor),
            (DEVICE_NAME_OFFSET, &self.device_name),
            (BOARD_VENDOR_OFFSET, &self.board_vendor),
            (BOARD_NAME_OFFSET, &self.board_name),
        ] {
            raw[offset..offset + LABEL_SIZE].copy_from_slice(label.as_raw());
        }
    }
}

/// The V2 payload: the target identity plus the USB IDs the probe enumerates with.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SettingsV2 {
    pub identity: TargetIdentity,
    pub usb_vid: u16,
    pub usb_pid: u16,
}

impl SettingsV2 {
    /// Compiled-in identity used when no record can be recovered from flash.
    pub const BUILTIN: SettingsV2 = SettingsV2 {
        identity: TargetIdentity {
            device_vendor: Label::from_str("Arm"),
            device_name: Label::from_str("cortex_m"),
            board_vendor: Label::from_str("Raspberry Pi"),
            board_name: Label::from_str("Module"),
        },
        usb_vid: DEFAULT_USB_VID,
        usb_pid: DEFAULT_USB_PID,
    };

    /// `(vid, pid)`, to be applied before the USB device descriptor is finalized.
    pub const fn usb_ids(&self) -> (u16, u16) {
        (self.usb_vid, self.usb_pid)
    }
}

impl Default for SettingsV2 {
    fn default() -> Self {
        Self::BUILTIN
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Record {
    V1(TargetIdentity),
    V2(SettingsV2),
}

impl Record {
    /// The record stored when flash holds nothing usable.
    pub const fn default_record(defaults: &SettingsV2) -> Record {
        Record::V2(*defaults)
    }

    pub const fn version(&self) -> SchemaVersion {
        match self {
            Record::V1(_) => SchemaVersion::V1,
            Record::V2(_) => SchemaVersion::V2,
        }
    }

    pub const fn identity(&self) -> &TargetIdentity {
        match self {
            Record::V1(identity) => identity,
            Record::V2(settings) => &settings.identity,
        }
    }

    /// `None` for V1 records, which predate configurable USB IDs.
    pub const fn usb_ids(&self) -> Option<(u16, u16)> {
        match self {
            Record::V1(_) => None,
            Record::V2(settings) => Some(settings.usb_ids()),
        }
    }

    /// Number of bytes of the slot populated by this record.
    pub const fn encoded_len(&self) -> usize {
        match self {
            Record::V1(_) => V1_LENGTH,
            Record::V2(_) => V2_LENGTH,
        }
    }

    /// Interprets a slot image. Sentinels and unknown versions yield `InvalidSchema`.
    pub fn decode(raw: &[u8; SLOT_SIZE]) -> Result<Record, Error> {
        let version = raw[VERSION_OFFSET];
        match SchemaVersion::from_repr(version) {
            Some(SchemaVersion::V1) => Ok(Record::V1(TargetIdentity::read(raw))),
            Some(SchemaVersion::V2) => Ok(Record::V2(SettingsV2 {
                identity: TargetIdentity::read(raw),
                usb_vid: u16::from_le_bytes([raw[USB_VID_OFFSET], raw[USB_VID_OFFSET + 1]]),
                usb_pid: u16::from_le_bytes([raw[USB_PID_OFFSET], raw[USB_PID_OFFSET + 1]]),
            })),
            None => Err(Error::InvalidSchema(version)),
        }
    }

    /// Full slot image of this record. Bytes past [`Record::encoded_len`] stay erased.
    pub fn encode(&self) -> [u8; SLOT_SIZE] {
        let mut raw = [0xFFu8; SLOT_SIZE];
        raw[VERSION_OFFSET] = self.version() as u8;
        self.identity().write(&mut raw);
        if let Record::V2(settings) = self {
            raw[USB_VID_OFFSET..USB_VID_OFFSET + 2].copy_from_slice(&settings.usb_vid.to_le_bytes());
            raw[USB_PID_OFFSET..USB_PID_OFFSET + 2].copy_from_slice(&settings.usb_pid.to_le_bytes());
        }
        raw
    }

    /// Upgrades to the current schema. V1 keeps its labels and gets the USB IDs of `defaults`;
    /// V2 is returned unchanged.
    pub const fn migrate(self, defaults: &SettingsV2) -> Record {
        match self {
            Record::V1(identity) => Record::V2(SettingsV2 {
                identity,
                usb_vid: defaults.usb_vid,
                usb_pid: defaults.usb_pid,
            }),
            Record::V2(_) => self,
        }
    }
}

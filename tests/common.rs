#![allow(dead_code)]

// filename according to https://doc.rust-lang.org/book/ch11-03-test-organization.html
use embedded_storage::ReadStorage;
use embedded_storage::nor_flash::{
    ErrorType, NorFlash, NorFlashError, NorFlashErrorKind, ReadNorFlash,
};
use probe_settings::{FlashWindow, Label, Record, SLOT_SIZE, SettingsV2, TargetIdentity, UNIT_SIZE};

pub const FLASH_SECTOR_SIZE: usize = 4096;
pub const WORD_SIZE: usize = 4;

#[derive(Default)]
pub struct Flash {
    pub buf: Vec<u8>,
    pub fail_after_operation: usize,
    /// `(operation, bytes)`: that write only lands `bytes` bytes before faulting, like a power
    /// loss in the middle of programming.
    pub tear_operation: Option<(usize, usize)>,
    pub operations: Vec<Operation>,
    /// Words programmed since their last erase. NOR flash does not allow programming a word
    /// twice without erasing it in between.
    pub programmed: Vec<bool>,
}

#[derive(Debug, PartialEq, Clone)]
pub enum Operation {
    Read { offset: u32, len: usize },
    Write { offset: u32, len: usize },
    Erase { offset: u32, len: usize },
}

impl Flash {
    pub fn new(sectors: usize) -> Self {
        Self {
            buf: vec![0xffu8; FLASH_SECTOR_SIZE * sectors],
            fail_after_operation: usize::MAX,
            programmed: vec![false; FLASH_SECTOR_SIZE * sectors / WORD_SIZE],
            ..Default::default()
        }
    }

    pub fn new_with_fault(sectors: usize, fail_after_operation: usize) -> Self {
        Self {
            buf: vec![0xffu8; FLASH_SECTOR_SIZE * sectors],
            fail_after_operation,
            programmed: vec![false; FLASH_SECTOR_SIZE * sectors / WORD_SIZE],
            ..Default::default()
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn disable_faults(&mut self) {
        self.fail_after_operation = usize::MAX;
        self.tear_operation = None;
    }

    /// Fails every operation issued after `count` more operations.
    pub fn fail_after(&mut self, count: usize) {
        self.fail_after_operation = self.operations.len() + count;
    }

    /// Tears the write issued after `count` more operations after `landed` bytes.
    pub fn tear_after(&mut self, count: usize, landed: usize) {
        self.tear_operation = Some((self.operations.len() + count, landed));
    }

    pub fn erases(&self) -> usize {
        self.operations
            .iter()
            .filter(|op| matches!(op, Operation::Erase { .. }))
            .count()
    }

    pub fn writes(&self) -> Vec<Operation> {
        self.operations
            .iter()
            .filter(|op| !matches!(op, Operation::Read { .. }))
            .cloned()
            .collect()
    }

    pub fn slot(&self, base: usize, index: usize) -> &[u8] {
        let start = base + index * SLOT_SIZE;
        &self.buf[start..start + SLOT_SIZE]
    }

    pub fn slot_mut(&mut self, base: usize, index: usize) -> &mut [u8] {
        let start = base + index * SLOT_SIZE;
        &mut self.buf[start..start + SLOT_SIZE]
    }

    pub fn dump_operations(&self) {
        println!("Operations:");
        for op in &self.operations {
            println!("  {:?}", op);
        }
    }
}

#[derive(Debug)]
pub struct FlashError;

impl NorFlashError for FlashError {
    fn kind(&self) -> NorFlashErrorKind {
        NorFlashErrorKind::Other
    }
}

impl ErrorType for Flash {
    type Error = FlashError;
}

impl ReadNorFlash for Flash {
    const READ_SIZE: usize = WORD_SIZE;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        assert!(offset.is_multiple_of(Self::READ_SIZE as _));
        assert!(bytes.len().is_multiple_of(Self::READ_SIZE));

        if self.operations.len() >= self.fail_after_operation {
            println!("    flash: FAULT");
            return Err(FlashError);
        }
        self.operations.push(Operation::Read {
            offset,
            len: bytes.len(),
        });

        let offset = offset as usize;
        bytes.copy_from_slice(&self.buf[offset..offset + bytes.len()]);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.buf.len()
    }
}

impl NorFlash for Flash {
    const WRITE_SIZE: usize = WORD_SIZE;

    const ERASE_SIZE: usize = FLASH_SECTOR_SIZE;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        assert!(from.is_multiple_of(Self::ERASE_SIZE as _));
        assert!(to.is_multiple_of(Self::ERASE_SIZE as _));

        println!(
            "    flash: erase: {from:04X} - {to:04X} #{:>2}",
            self.operations.len()
        );

        if self.operations.len() >= self.fail_after_operation {
            println!("    flash: FAULT");
            return Err(FlashError);
        }

        self.operations.push(Operation::Erase {
            offset: from,
            len: (to - from) as usize,
        });

        for addr in from..to {
            self.buf[addr as usize] = 0xff;
        }
        self.programmed[from as usize / WORD_SIZE..to as usize / WORD_SIZE].fill(false);
        Ok(())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        assert!(offset.is_multiple_of(Self::WRITE_SIZE as _));
        assert!(bytes.len().is_multiple_of(Self::WRITE_SIZE));
        assert!(!bytes.is_empty());

        println!(
            "    flash: write: 0x{offset:04X}[0x{:04X}] #{:>2}",
            bytes.len(),
            self.operations.len()
        );

        if self.operations.len() >= self.fail_after_operation {
            println!("    flash: FAULT");
            return Err(FlashError);
        }

        let landed = match self.tear_operation {
            Some((at, n)) if at == self.operations.len() => n.min(bytes.len()),
            _ => bytes.len(),
        };

        self.operations.push(Operation::Write {
            offset,
            len: bytes.len(),
        });

        let offset = offset as usize;
        let words = offset / WORD_SIZE..(offset + bytes.len()) / WORD_SIZE;
        if let Some(word) = words.clone().find(|&w| self.programmed[w]) {
            panic!(
                "word 0x{:04X} programmed twice without an erase",
                word * WORD_SIZE
            );
        }
        // a torn write still leaves its words partially programmed
        self.programmed[words].fill(true);

        for (i, &val) in bytes[..landed].iter().enumerate() {
            // NOR flash can only flip bits from 1 to 0
            self.buf[offset + i] &= val;
        }

        if landed < bytes.len() {
            println!("    flash: TORN after {landed} bytes");
            return Err(FlashError);
        }
        Ok(())
    }
}

/// Stand-in for the board ID EEPROM older probes stored their settings in.
pub struct BoardId {
    pub buf: Vec<u8>,
    pub present: bool,
}

impl BoardId {
    pub fn with_record(record: &Record) -> Self {
        Self {
            buf: record.encode().to_vec(),
            present: true,
        }
    }

    pub fn absent() -> Self {
        Self {
            buf: vec![0xff; SLOT_SIZE],
            present: false,
        }
    }
}

impl ReadStorage for BoardId {
    type Error = FlashError;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        if !self.present {
            return Err(FlashError);
        }
        let offset = offset as usize;
        bytes.copy_from_slice(&self.buf[offset..offset + bytes.len()]);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.buf.len()
    }
}

/// Window on the last sector of a flash with `sectors` sectors.
pub fn window(flash: &mut Flash) -> FlashWindow<&mut Flash> {
    FlashWindow::last_unit(flash).unwrap()
}

pub fn window_base(flash: &Flash) -> usize {
    flash.len() - UNIT_SIZE
}

pub fn settings(board_name: &str, usb_pid: u16) -> Record {
    Record::V2(SettingsV2 {
        identity: TargetIdentity {
            device_vendor: Label::from_str("Infineon"),
            device_name: Label::from_str("CYW20820"),
            board_vendor: Label::from_str("Ezurio"),
            board_name: Label::new(board_name).unwrap(),
        },
        usb_vid: 0x2E8A,
        usb_pid,
    })
}

pub fn v1_settings(board_name: &str) -> Record {
    Record::V1(TargetIdentity {
        device_vendor: Label::from_str("Infineon"),
        device_name: Label::from_str("CYW20820"),
        board_vendor: Label::from_str("Ezurio"),
        board_name: Label::new(board_name).unwrap(),
    })
}

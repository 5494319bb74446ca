#![allow(dead_code)]

// filename according to https://doc.rust-lang.org/book/ch11-03-test-organization.html
use embedded_storage::nor_flash::{
    ErrorType, NorFlash, NorFlashError, NorFlashErrorKind, ReadNorFlash,
};
use journal_store::error::Error;
use journal_store::{ItemDef, ItemId, Layout, Schema, Store, StoreConfig, Value};

/// Byte addressable EEPROM as found on the reference board.
pub type Eeprom = Memory<1, 1>;
/// NOR flash with word sized writes and 4 KiB sectors.
pub type Flash = Memory<4, FLASH_SECTOR_SIZE>;

pub const EEPROM_SIZE: usize = 0x2000;
pub const FLASH_SECTOR_SIZE: usize = 4096;

/// Both banks after the first sector.
pub const FLASH_CONFIG: StoreConfig = StoreConfig {
    first_bank_offset: FLASH_SECTOR_SIZE,
    bank_size: FLASH_SECTOR_SIZE,
};

#[derive(Debug, PartialEq, Clone)]
pub enum Operation {
    Read { offset: u32, len: usize },
    Write { offset: u32, len: usize },
    Erase { offset: u32, len: usize },
}

/// In-memory fake of a non-volatile memory. Programming can only clear bits, like on NOR flash.
#[derive(Clone, Default)]
pub struct Memory<const WRITE: usize, const ERASE: usize> {
    pub buf: Vec<u8>,
    pub fail_after_operation: usize,
    /// Bytes of the failing write that still reach the memory, simulating a write torn by a
    /// power loss.
    pub torn_write_len: usize,
    pub operations: Vec<Operation>,
}

impl<const WRITE: usize, const ERASE: usize> Memory<WRITE, ERASE> {
    pub fn new(size: usize) -> Self {
        Self {
            buf: vec![0xffu8; size],
            fail_after_operation: usize::MAX,
            ..Default::default()
        }
    }

    pub fn new_with_fault(size: usize, fail_after_operation: usize) -> Self {
        Self {
            buf: vec![0xffu8; size],
            fail_after_operation,
            ..Default::default()
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Copy of the memory with a fresh operation log that faults after `fail_after_operation`.
    pub fn fork_with_fault(&self, fail_after_operation: usize, torn_write_len: usize) -> Self {
        Self {
            buf: self.buf.clone(),
            fail_after_operation,
            torn_write_len,
            operations: Vec::new(),
        }
    }

    pub fn disable_faults(&mut self) {
        self.fail_after_operation = usize::MAX;
    }

    pub fn erases(&self) -> usize {
        self.operations
            .iter()
            .filter(|op| matches!(op, Operation::Erase { .. }))
            .count()
    }

    pub fn writes(&self) -> usize {
        self.operations
            .iter()
            .filter(|op| matches!(op, Operation::Write { .. }))
            .count()
    }

    pub fn dump_operations(&self) {
        println!("Operations:");
        for op in &self.operations {
            println!("  {:?}", op);
        }
    }

    fn faulted(&self) -> bool {
        if self.operations.len() >= self.fail_after_operation {
            println!("    memory: FAULT");
            return true;
        }
        false
    }
}

#[derive(Debug)]
pub struct MemoryError;

impl NorFlashError for MemoryError {
    fn kind(&self) -> NorFlashErrorKind {
        NorFlashErrorKind::Other
    }
}

impl<const WRITE: usize, const ERASE: usize> ErrorType for Memory<WRITE, ERASE> {
    type Error = MemoryError;
}

impl<const WRITE: usize, const ERASE: usize> ReadNorFlash for Memory<WRITE, ERASE> {
    const READ_SIZE: usize = WRITE;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        assert!(offset.is_multiple_of(Self::READ_SIZE as _));
        assert!(bytes.len().is_multiple_of(Self::READ_SIZE));

        println!(
            "    memory: read:  0x{offset:04X}[0x{:04X}] #{:>2}",
            bytes.len(),
            self.operations.len()
        );
        if self.faulted() {
            return Err(MemoryError);
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

impl<const WRITE: usize, const ERASE: usize> NorFlash for Memory<WRITE, ERASE> {
    const WRITE_SIZE: usize = WRITE;

    const ERASE_SIZE: usize = ERASE;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        assert!(from.is_multiple_of(Self::ERASE_SIZE as _));
        assert!(to.is_multiple_of(Self::ERASE_SIZE as _));
        assert!(from <= to && to as usize <= self.buf.len());

        println!(
            "    memory: erase: {from:04X} - {to:04X} #{:>2}",
            self.operations.len()
        );
        if self.faulted() {
            return Err(MemoryError);
        }

        self.operations.push(Operation::Erase {
            offset: from,
            len: (to - from) as usize,
        });

        self.buf[from as usize..to as usize].fill(0xff);
        Ok(())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        assert!(offset.is_multiple_of(Self::WRITE_SIZE as _));
        assert!(bytes.len().is_multiple_of(Self::WRITE_SIZE));
        assert!(!bytes.is_empty());

        println!(
            "    memory: write: 0x{offset:04X}[0x{:04X}] #{:>2}",
            bytes.len(),
            self.operations.len()
        );

        let offset = offset as usize;
        let len = if self.faulted() {
            bytes.len().min(self.torn_write_len)
        } else {
            bytes.len()
        };

        for (i, &val) in bytes[..len].iter().enumerate() {
            // the store never programs a byte twice, apart from 0xFF padding of aligned writes
            assert!(
                val == 0xff || self.buf[offset + i] == 0xff,
                "programming 0x{:04X} which is not erased",
                offset + i
            );
            self.buf[offset + i] &= val;
        }

        if len < bytes.len() {
            return Err(MemoryError);
        }
        self.operations.push(Operation::Write {
            offset: offset as u32,
            len: bytes.len(),
        });
        Ok(())
    }
}

impl<const WRITE: usize, const ERASE: usize> journal_store::platform::Crc for Memory<WRITE, ERASE> {
    fn crc32(init: u32, data: &[u8]) -> u32 {
        unsafe { libz_sys::crc32(init as u64, data.as_ptr(), data.len() as u32) as u32 }
    }
}

pub const RUN_SELFTEST: &str = "Run Selftest";
pub const FSENSOR_ENABLED: &str = "FSensor Enabled";
pub const NOZZLE_TEMP: &str = "Nozzle Temp";
pub const PRINTER_NAME: &str = "Printer Name";
pub const SERIAL: &str = "Serial";

pub fn id(name: &str) -> ItemId {
    ItemId::from_name(name)
}

pub fn printer_items() -> Vec<ItemDef> {
    vec![
        ItemDef::new(RUN_SELFTEST, Layout::Bool, Value::Bool(true)).unwrap(),
        ItemDef::new(FSENSOR_ENABLED, Layout::Bool, Value::Bool(false)).unwrap(),
        ItemDef::new(NOZZLE_TEMP, Layout::U16, Value::U16(215)).unwrap(),
        ItemDef::new(PRINTER_NAME, Layout::Str(16), Value::Str("Printer".into())).unwrap(),
        ItemDef::new(SERIAL, Layout::Bytes(20), Value::Bytes(vec![0; 20])).unwrap(),
    ]
}

pub fn printer_schema() -> Schema {
    Schema::new(1, printer_items()).unwrap()
}

/// Encoded size of a snapshot of `printer_schema`: five record headers, the payloads and a CRC.
pub const PRINTER_SNAPSHOT_SIZE: usize = 5 * 3 + (1 + 1 + 2 + 16 + 20) + 4;
/// Bank header with CRC.
pub const BANK_HEADER_SIZE: usize = 10;

pub fn open<const W: usize, const E: usize>(
    memory: &mut Memory<W, E>,
) -> Result<Store<&mut Memory<W, E>>, Error> {
    Store::new(StoreConfig::default(), printer_schema(), memory)
}

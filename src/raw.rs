use crate::ItemId;
use crate::error::Error;
use crate::platform::{AlignedOps, FnCrc32, Platform};
use crate::u24::u24;
use alloc::vec;
use alloc::vec::Vec;
use core::fmt::{Debug, Formatter};
#[cfg(feature = "defmt")]
use defmt::trace;

pub(crate) const ITEM_HEADER_SIZE: usize = 3;
pub(crate) const CRC_SIZE: usize = 4;
pub(crate) const BANK_HEADER_SIZE: usize = 6;
pub(crate) const BANK_HEADER_SIZE_WITH_CRC: usize = BANK_HEADER_SIZE + CRC_SIZE;
/// Smallest possible transaction: one empty record and its CRC.
pub(crate) const MIN_TRANSACTION_SIZE: usize = ITEM_HEADER_SIZE + CRC_SIZE;

/// Upper bound of the 9-bit length field of a record header.
pub const MAX_ITEM_SIZE: usize = 0x1FF;

/// Id of the end-of-journal marker of older layouts. Never assigned to an item.
pub(crate) const LAST_ITEM_ID: ItemId = ItemId::new(0x000F);
/// All ones, indistinguishable from erased memory.
pub(crate) const ERASED_ID: ItemId = ItemId::new(ItemId::MAX);
pub(crate) const RESERVED_IDS: [ItemId; 2] = [LAST_ITEM_ID, ERASED_ID];

/// Reference memory map: the journal starts at 0x500 of an 8 KiB EEPROM.
pub const DEFAULT_FIRST_BANK_OFFSET: usize = 0x500;
pub const DEFAULT_STORAGE_SIZE: usize = 0x2000;

const ERASED: u8 = 0xFF;

/// Header of a single record inside a transaction.
///
/// On disk this is a little-endian 24-bit word: bit 0 is the last item flag, bits 1..15 the id
/// and bits 15..24 the payload length, i.e.
///
/// ```text
/// byte 0: [id 6..0 | last_item]
/// byte 1: [len 0  | id 13..7  ]
/// byte 2: [len 8..1           ]
/// ```
#[derive(Copy, Clone, PartialEq, Eq)]
pub(crate) struct ItemHeader {
    pub(crate) last_item: bool,
    pub(crate) id: ItemId,
    pub(crate) len: u16,
}

const LAST_ITEM_MASK: u32 = 0x1;
const ID_SHIFT: u32 = 1;
const ID_MASK: u32 = ItemId::MAX as u32;
const LEN_SHIFT: u32 = 15;
const LEN_MASK: u32 = MAX_ITEM_SIZE as u32;

impl ItemHeader {
    pub(crate) fn to_bytes(self) -> [u8; ITEM_HEADER_SIZE] {
        let word = (self.last_item as u32)
            | ((self.id.get() as u32 & ID_MASK) << ID_SHIFT)
            | ((self.len as u32 & LEN_MASK) << LEN_SHIFT);
        u24::from_u32(word).to_le_bytes()
    }

    pub(crate) fn from_bytes(raw: [u8; ITEM_HEADER_SIZE]) -> Self {
        let word = u24::from_le_bytes(raw).to_u32();
        Self {
            last_item: word & LAST_ITEM_MASK != 0,
            id: ItemId::new_masked(((word >> ID_SHIFT) & ID_MASK) as u16),
            len: ((word >> LEN_SHIFT) & LEN_MASK) as u16,
        }
    }

    /// A header that was never programmed.
    pub(crate) fn is_erased(raw: &[u8]) -> bool {
        raw.iter().all(|&b| b == ERASED)
    }
}

impl Debug for ItemHeader {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        let last_item = self.last_item;
        let id = self.id;
        let len = self.len;
        f.write_fmt(format_args!(
            "ItemHeader {{ id: {id:?}, len: {len:>3}, last_item: {last_item} }}"
        ))
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) struct BankHeader {
    pub(crate) sequence_id: u32,
    pub(crate) version: u16,
}

impl BankHeader {
    /// Sequence id, version and the CRC-32 over both, all little-endian.
    pub(crate) fn to_bytes(self, crc32: FnCrc32) -> [u8; BANK_HEADER_SIZE_WITH_CRC] {
        let mut buf = [0u8; BANK_HEADER_SIZE_WITH_CRC];
        buf[..4].copy_from_slice(&self.sequence_id.to_le_bytes());
        buf[4..6].copy_from_slice(&self.version.to_le_bytes());
        let crc = crc32(0, &buf[..BANK_HEADER_SIZE]);
        buf[BANK_HEADER_SIZE..].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Sequence id of a programmed header, whether its CRC matches or not.
    pub(crate) fn sequence_hint(raw: &[u8]) -> Option<u32> {
        if raw.len() < 4 || raw.iter().all(|&b| b == ERASED) {
            return None;
        }
        Some(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    /// Returns `None` unless the stored CRC matches.
    pub(crate) fn from_bytes(raw: &[u8], crc32: FnCrc32) -> Option<Self> {
        if raw.len() < BANK_HEADER_SIZE_WITH_CRC {
            return None;
        }
        let stored = u32::from_le_bytes([raw[6], raw[7], raw[8], raw[9]]);
        if stored != crc32(0, &raw[..BANK_HEADER_SIZE]) {
            return None;
        }
        Some(Self {
            sequence_id: u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]),
            version: u16::from_le_bytes([raw[4], raw[5]]),
        })
    }
}

#[derive(strum::Display, Debug, PartialEq, Eq, Copy, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BankSelector {
    First,
    Second,
}

impl BankSelector {
    pub(crate) fn other(self) -> Self {
        match self {
            BankSelector::First => BankSelector::Second,
            BankSelector::Second => BankSelector::First,
        }
    }
}

/// Physical placement of the two banks. Owns no state besides the constants of the memory map.
#[derive(Copy, Clone, Debug, PartialEq)]
pub(crate) struct BankLayout {
    pub(crate) first_bank_offset: usize,
    pub(crate) bank_size: usize,
}

impl BankLayout {
    pub(crate) fn new<T: Platform>(
        first_bank_offset: usize,
        bank_size: usize,
        capacity: usize,
    ) -> Result<Self, Error> {
        if !first_bank_offset.is_multiple_of(T::ERASE_SIZE) {
            return Err(Error::InvalidBankOffset);
        }

        if !bank_size.is_multiple_of(T::ERASE_SIZE)
            || bank_size < BANK_HEADER_SIZE_WITH_CRC + MIN_TRANSACTION_SIZE
        {
            return Err(Error::InvalidBankSize);
        }

        let end = bank_size
            .checked_mul(2)
            .and_then(|banks| banks.checked_add(first_bank_offset))
            .ok_or(Error::InvalidBankSize)?;
        if end > capacity || end > u32::MAX as usize {
            return Err(Error::InvalidBankSize);
        }

        Ok(Self {
            first_bank_offset,
            bank_size,
        })
    }

    pub(crate) fn bank_address(&self, bank: BankSelector) -> usize {
        match bank {
            BankSelector::First => self.first_bank_offset,
            BankSelector::Second => self.first_bank_offset + self.bank_size,
        }
    }

    /// Offset of the first transaction relative to the bank start.
    pub(crate) const fn transactions_offset(&self) -> usize {
        BANK_HEADER_SIZE_WITH_CRC
    }

    /// Bytes available for transactions in an empty bank.
    pub(crate) const fn transaction_capacity(&self) -> usize {
        self.bank_size - BANK_HEADER_SIZE_WITH_CRC
    }
}

/// Programs `bytes` at an arbitrary offset. The write is widened to the `WRITE_SIZE` aligned
/// window and padded with 0xFF, which leaves the neighbouring bytes untouched since programming
/// can only clear bits.
pub(crate) fn write_aligned<T: Platform>(
    hal: &mut T,
    offset: usize,
    bytes: &[u8],
) -> Result<(), T::Error> {
    #[cfg(feature = "defmt")]
    trace!("write_aligned @{:#08x}: [{}]", offset, bytes.len());

    if bytes.is_empty() {
        return Ok(());
    }

    let start = T::align_write_floor(offset);
    let end = T::align_write_ceil(offset + bytes.len());

    if start == offset && end == offset + bytes.len() {
        return hal.write(offset as u32, bytes);
    }

    let mut buf = vec![ERASED; end - start];
    buf[offset - start..offset - start + bytes.len()].copy_from_slice(bytes);

    // no need to write anything if the data is all ones - this the default state of the flash
    if buf.iter().all(|&b| b == ERASED) {
        return Ok(());
    }

    hal.write(start as u32, &buf)
}

/// Reads `len` bytes at an arbitrary offset through a `READ_SIZE` aligned window.
pub(crate) fn read_aligned<T: Platform>(
    hal: &mut T,
    offset: usize,
    len: usize,
) -> Result<Vec<u8>, T::Error> {
    #[cfg(feature = "defmt")]
    trace!("read_aligned @{:#08x}: [{}]", offset, len);

    let start = T::align_read_floor(offset);
    let end = T::align_read_ceil(offset + len);

    let mut buf = vec![0u8; end - start];
    hal.read(start as u32, &mut buf)?;

    if start != offset || end != offset + len {
        buf.drain(..offset - start);
        buf.truncate(len);
    }
    Ok(buf)
}

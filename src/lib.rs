#![doc = include_str ! ("../README.md")]
#![cfg_attr(not(target_arch = "x86_64"), no_std)]

pub mod codec;
pub mod crc;
pub mod error;
mod get;
pub mod hash;
mod internal;
mod journal;
pub mod migration;
pub mod platform;
mod raw;
mod recovery;
pub mod schema;
mod set;
mod u24;

pub use codec::{Layout, Value};
pub use get::Get;
pub use journal::Transaction;
pub use migration::{Migration, MigrationContext};
pub use raw::{BankSelector, DEFAULT_FIRST_BANK_OFFSET, DEFAULT_STORAGE_SIZE, MAX_ITEM_SIZE};
pub use schema::{ItemDef, Schema};
pub use set::Set;

extern crate alloc;

use crate::error::Error;
use crate::platform::Platform;
use crate::raw::{BankHeader, BankLayout};
use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use core::fmt;

/// 14-bit item identifier, the on-disk key of an item.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ItemId(u16);

impl ItemId {
    pub const MAX: u16 = 0x3FFF;

    /// Usage: `const { ItemId::new(0x1A2B) }`
    pub const fn new(id: u16) -> Self {
        assert!(id <= Self::MAX);
        Self(id)
    }

    pub(crate) const fn new_masked(raw: u16) -> Self {
        Self(raw & Self::MAX)
    }

    /// Derives the id from a human readable item name, see [`hash::item_id`].
    pub fn from_name(name: &str) -> Self {
        hash::item_id(name)
    }

    pub const fn get(self) -> u16 {
        self.0
    }
}

impl fmt::Debug for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ItemId({:#06x})", self.0)
    }
}

/// Placement of the two banks in the non-volatile memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreConfig {
    /// Offset of the first bank, the second one follows immediately.
    pub first_bank_offset: usize,
    pub bank_size: usize,
}

impl StoreConfig {
    /// Splits everything from `first_bank_offset` to `total_size` into two equally sized banks.
    pub const fn from_region(first_bank_offset: usize, total_size: usize) -> Self {
        Self {
            first_bank_offset,
            bank_size: total_size.saturating_sub(first_bank_offset) / 2,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::from_region(DEFAULT_FIRST_BANK_OFFSET, DEFAULT_STORAGE_SIZE)
    }
}

/// What was found in the memory while opening the store.
#[derive(strum::Display, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BootState {
    /// Neither bank had a valid header. Every item starts with its default.
    ColdStart,
    /// The journal was intact up to erased memory.
    ValidStart,
    /// A torn or corrupted transaction was dropped from the end of the journal.
    TruncatedTail,
    /// Not a single transaction of the newest bank was intact. The state was recovered from the
    /// other bank.
    CorruptedBank,
    /// The stored data was written by an older schema version or contained deprecated items.
    Migrated,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoreStatistics {
    pub active_bank: BankSelector,
    pub sequence_id: u32,
    pub version: u16,
    /// Committed transactions in the active bank.
    pub transactions: usize,
    /// Bytes used in the active bank, bank header included.
    pub used_bytes: usize,
    pub free_bytes: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct ActiveBank {
    pub(crate) bank: BankSelector,
    pub(crate) header: BankHeader,
    /// Where the next transaction goes, relative to the bank start.
    pub(crate) cursor: usize,
    pub(crate) transactions: usize,
}

/// The Store keeps a RAM mirror of every item that has been written. Reads are served from this
/// mirror, writes are appended to the active bank and only reflected in the mirror once they
/// reached the memory.
///
/// All mutating operations take `&mut self`, which serializes writers; there is at most one
/// transaction in flight at any time.
pub struct Store<T: Platform> {
    pub(crate) hal: T,
    pub(crate) layout: BankLayout,
    pub(crate) schema: Schema,
    pub(crate) faulted: bool,
    /// Highest sequence id seen in either bank. The next compaction continues from here.
    pub(crate) highest_sequence_id: u32,

    // set after calling self.load()
    pub(crate) active: ActiveBank,
    pub(crate) boot_state: BootState,
    pub(crate) table: BTreeMap<ItemId, Vec<u8>>,
    pub(crate) deprecated: BTreeMap<ItemId, Vec<u8>>,
}

impl<T: Platform> Store<T> {
    /// Opens the store:
    /// 1. Selects the valid bank with the highest sequence id
    /// 2. Replays its committed transactions into the RAM mirror
    /// 3. Drops a torn or corrupted tail of the journal, falls back to the other bank if nothing
    ///    of the newest one is intact
    /// 4. Compacts into the other bank if the tail was dirty or the schema version changed
    ///
    /// If no valid bank exists, a fresh bank holding all defaults is written.
    pub fn new(config: StoreConfig, schema: Schema, hal: T) -> Result<Store<T>, Error> {
        Self::with_migrations(config, schema, hal, &[])
    }

    /// Like `new`, additionally running `migrations` if deprecated items are found. Migrations
    /// are ordered oldest to newest, see [`Migration`].
    pub fn with_migrations(
        config: StoreConfig,
        schema: Schema,
        hal: T,
        migrations: &[Migration<'_>],
    ) -> Result<Store<T>, Error> {
        let layout = BankLayout::new::<T>(config.first_bank_offset, config.bank_size, hal.capacity())?;

        let mut store: Store<T> = Self {
            hal,
            layout,
            schema,
            faulted: false,
            highest_sequence_id: 0,
            active: ActiveBank {
                bank: BankSelector::First,
                header: BankHeader {
                    sequence_id: 0,
                    version: 0,
                },
                cursor: 0,
                transactions: 0,
            },
            boot_state: BootState::ColdStart,
            table: BTreeMap::new(),
            deprecated: BTreeMap::new(),
        };

        store.load(migrations)?;
        Ok(store)
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn boot_state(&self) -> BootState {
        self.boot_state
    }

    /// Current bytes of an item, or its default if it was never written.
    pub fn get_raw(&self, id: ItemId) -> Result<&[u8], Error> {
        let item = self.schema.live(id).ok_or(Error::UnknownItem(id))?;
        Ok(self
            .table
            .get(&id)
            .map_or(item.default_bytes(), |data| data.as_slice()))
    }

    /// Get a typed value.
    ///
    /// Supported types are bool, signed and unsigned integers up to 64-bit width, f32, f64,
    /// String, Vec<u8> and [u8; N]. The type has to match the width the item was declared with.
    pub fn get<R>(&self, id: ItemId) -> Result<R, Error>
    where
        Store<T>: Get<R>,
    {
        Get::get(self, id)
    }

    /// Get a value decoded according to the item layout.
    pub fn get_value(&self, id: ItemId) -> Result<Value, Error> {
        let item = self.schema.live(id).ok_or(Error::UnknownItem(id))?;
        codec::decode(item.layout(), self.get_raw(id)?)
    }

    /// Value of a deprecated item found while opening the store. Never written back.
    pub fn deprecated_raw(&self, id: ItemId) -> Option<&[u8]> {
        self.deprecated.get(&id).map(|data| data.as_slice())
    }

    /// Write a single item as its own transaction.
    pub fn set_raw(&mut self, id: ItemId, data: &[u8]) -> Result<(), Error> {
        self.set_many(&[(id, data)])
    }

    /// Set a typed value and write it to the memory.
    ///
    /// Type support:
    ///  * bool, signed and unsigned integers, f32, f64: little-endian, must match the item width
    ///  * &str: NUL-filled up to the item width
    ///  * &[u8], [u8; N]: must match the item width
    pub fn set<R>(&mut self, id: ItemId, value: R) -> Result<(), Error>
    where
        Store<T>: Set<R>,
    {
        let data = self.encode_for(id, value)?;
        self.set_raw(id, &data)
    }

    /// Set a value encoded according to the item layout.
    pub fn set_value(&mut self, id: ItemId, value: &Value) -> Result<(), Error> {
        let data = self.encode_value(id, value)?;
        self.set_raw(id, &data)
    }

    /// Writes all items as one atomic transaction: after a power loss either all or none of them
    /// are visible.
    pub fn set_many<D: AsRef<[u8]>>(&mut self, items: &[(ItemId, D)]) -> Result<(), Error> {
        if self.faulted {
            return Err(Error::FlashError);
        }

        match self.write_transaction(items) {
            Err(Error::FlashError) => {
                self.faulted = true;
                Err(Error::FlashError)
            }
            other => other,
        }
    }

    /// Starts collecting writes for a single atomic transaction.
    pub fn transaction(&mut self) -> Transaction<'_, T> {
        Transaction::new(self)
    }

    /// Writes a fresh snapshot of every item into the standby bank and makes it the active one.
    pub fn compact(&mut self) -> Result<(), Error> {
        if self.faulted {
            return Err(Error::FlashError);
        }

        match self.compact_with::<&[u8]>(&[]) {
            Err(Error::FlashError) => {
                self.faulted = true;
                Err(Error::FlashError)
            }
            other => other,
        }
    }

    /// Starts over with defaults. A snapshot of the defaults is written into the standby bank
    /// before the active bank is erased, so a power loss leaves either the old or the new state.
    pub fn reset(&mut self) -> Result<(), Error> {
        if self.faulted {
            return Err(Error::FlashError);
        }

        match self.erase_all() {
            Err(Error::FlashError) => {
                self.faulted = true;
                Err(Error::FlashError)
            }
            other => other,
        }
    }

    pub fn statistics(&self) -> StoreStatistics {
        StoreStatistics {
            active_bank: self.active.bank,
            sequence_id: self.active.header.sequence_id,
            version: self.active.header.version,
            transactions: self.active.transactions,
            used_bytes: self.active.cursor,
            free_bytes: self.layout.bank_size - self.active.cursor,
        }
    }
}

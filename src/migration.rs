//! Migrations move values out of deprecated items into their replacements.
//!
//! Deprecated items stay in the schema so that their records are still recognized while the store
//! is opened. Their values are kept aside and handed to the migrations, which write the live
//! items. The compaction that follows drops the deprecated records from the memory for good.
//!
//! Migrations are passed oldest first. The oldest migration that lists a deprecated id found in
//! the memory runs, followed by every newer one, so a device that skipped several firmware
//! releases walks the whole chain.

use crate::ItemId;
use crate::codec::{self, Value};
use crate::error::Error;
use crate::schema::Schema;
use alloc::collections::BTreeMap;
use alloc::vec::Vec;
#[cfg(feature = "defmt")]
use defmt::trace;

pub type MigrateFn = fn(&mut MigrationContext<'_>) -> Result<(), Error>;

#[derive(Clone, Copy)]
pub struct Migration<'a> {
    /// Items deprecated by this migration. Finding any of them triggers it.
    pub deprecated_ids: &'a [ItemId],
    pub migrate: MigrateFn,
}

/// View of the store while migrations run. Writes only touch the RAM mirror; they are persisted
/// by the compaction after the last migration.
pub struct MigrationContext<'a> {
    schema: &'a Schema,
    table: &'a mut BTreeMap<ItemId, Vec<u8>>,
    deprecated: &'a BTreeMap<ItemId, Vec<u8>>,
}

impl MigrationContext<'_> {
    /// Stored bytes of a deprecated item, if it was found in the memory.
    pub fn deprecated_raw(&self, id: ItemId) -> Option<&[u8]> {
        self.deprecated.get(&id).map(|data| data.as_slice())
    }

    /// Stored value of a deprecated item decoded with its declared layout.
    pub fn deprecated_value(&self, id: ItemId) -> Result<Option<Value>, Error> {
        let Some(raw) = self.deprecated_raw(id) else {
            return Ok(None);
        };
        let item = self.schema.get(id).ok_or(Error::UnknownItem(id))?;
        codec::decode(item.layout(), raw).map(Some)
    }

    pub fn get_raw(&self, id: ItemId) -> Result<&[u8], Error> {
        let item = self.schema.live(id).ok_or(Error::UnknownItem(id))?;
        Ok(self
            .table
            .get(&id)
            .map_or(item.default_bytes(), |data| data.as_slice()))
    }

    pub fn set_raw(&mut self, id: ItemId, data: &[u8]) -> Result<(), Error> {
        let item = self.schema.live(id).ok_or(Error::UnknownItem(id))?;
        if item.width() != data.len() {
            return Err(Error::LengthMismatch {
                id,
                expected: item.width(),
                actual: data.len(),
            });
        }
        self.table.insert(id, data.to_vec());
        Ok(())
    }

    pub fn set_value(&mut self, id: ItemId, value: &Value) -> Result<(), Error> {
        let item = self.schema.live(id).ok_or(Error::UnknownItem(id))?;
        let data = codec::encode(item.layout(), value)?;
        self.set_raw(id, &data)
    }
}

/// Runs the applicable migrations. Returns whether any of them ran.
pub(crate) fn run(
    migrations: &[Migration<'_>],
    schema: &Schema,
    table: &mut BTreeMap<ItemId, Vec<u8>>,
    deprecated: &BTreeMap<ItemId, Vec<u8>>,
) -> Result<bool, Error> {
    let Some(oldest) = migrations.iter().position(|migration| {
        migration
            .deprecated_ids
            .iter()
            .any(|id| deprecated.contains_key(id))
    }) else {
        return Ok(false);
    };

    let mut context = MigrationContext {
        schema,
        table,
        deprecated,
    };
    for (_position, migration) in migrations.iter().enumerate().skip(oldest) {
        #[cfg(feature = "defmt")]
        trace!("running migration {}", _position);

        #[cfg(feature = "debug-logs")]
        println!("migration: running migration {_position}");

        (migration.migrate)(&mut context)?;
    }

    Ok(true)
}

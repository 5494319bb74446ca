//! The closed set of items a firmware image knows about.
//!
//! A schema is produced once per build (usually by generated code) and never changes at runtime.
//! Items that are no longer used are not removed but marked as deprecated, so the store can
//! still recognize and migrate their old records.

use crate::codec::{self, Layout, Value};
use crate::error::Error;
use crate::raw::{MAX_ITEM_SIZE, RESERVED_IDS};
use crate::{ItemId, hash};
use alloc::collections::BTreeMap;
use alloc::vec::Vec;

#[derive(Debug, Clone, PartialEq)]
pub struct ItemDef {
    name: &'static str,
    id: ItemId,
    layout: Layout,
    default: Vec<u8>,
    deprecated: bool,
}

impl ItemDef {
    /// Declares an item whose id is derived from its name.
    pub fn new(name: &'static str, layout: Layout, default: Value) -> Result<Self, Error> {
        let default = codec::encode(&layout, &default)?;
        Self::from_parts(name, hash::item_id(name), layout, default)
    }

    /// Declares an item from pre-computed parts, e.g. emitted by a code generator. The default
    /// has to be encoded already.
    pub fn from_parts(
        name: &'static str,
        id: ItemId,
        layout: Layout,
        default: Vec<u8>,
    ) -> Result<Self, Error> {
        if layout.width() > MAX_ITEM_SIZE {
            return Err(Error::ValueTooLong);
        }
        if default.len() != layout.width() {
            return Err(Error::LengthMismatch {
                id,
                expected: layout.width(),
                actual: default.len(),
            });
        }

        Ok(Self {
            name,
            id,
            layout,
            default,
            deprecated: false,
        })
    }

    /// Marks the item as deprecated. Its records are still recognized while loading, but the
    /// values are only kept aside for migrations and dropped on the next compaction.
    pub fn deprecated(mut self) -> Self {
        self.deprecated = true;
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn id(&self) -> ItemId {
        self.id
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn width(&self) -> usize {
        self.layout.width()
    }

    pub fn default_bytes(&self) -> &[u8] {
        &self.default
    }

    pub fn is_deprecated(&self) -> bool {
        self.deprecated
    }
}

#[derive(Debug, Clone)]
pub struct Schema {
    version: u16,
    items: Vec<ItemDef>,
    index: BTreeMap<ItemId, usize>,
}

impl Schema {
    /// Validates the item list. Collisions and reserved ids are build defects and are reported
    /// instead of silently merging two items.
    pub fn new(version: u16, items: Vec<ItemDef>) -> Result<Self, Error> {
        let mut index = BTreeMap::new();
        for (position, item) in items.iter().enumerate() {
            if RESERVED_IDS.contains(&item.id) {
                return Err(Error::ReservedId(item.id));
            }
            if index.insert(item.id, position).is_some() {
                return Err(Error::IdCollision(item.id));
            }
        }

        Ok(Self {
            version,
            items,
            index,
        })
    }

    /// Written into every bank header. Bump it whenever items get deprecated.
    pub fn version(&self) -> u16 {
        self.version
    }

    pub fn get(&self, id: ItemId) -> Option<&ItemDef> {
        self.index.get(&id).map(|&position| &self.items[position])
    }

    /// Like `get` but only for items that are still in use.
    pub fn live(&self, id: ItemId) -> Option<&ItemDef> {
        self.get(id).filter(|item| !item.deprecated)
    }

    /// All items in declaration order, deprecated ones included.
    pub fn items(&self) -> &[ItemDef] {
        &self.items
    }

    pub fn live_items(&self) -> impl Iterator<Item = &ItemDef> {
        self.items.iter().filter(|item| !item.deprecated)
    }
}

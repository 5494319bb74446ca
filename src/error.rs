use crate::ItemId;
use thiserror::Error;

/// Errors that can occur during store operations. Storage level inconsistencies (torn writes,
/// CRC mismatches, stale banks) are repaired silently while opening the store and never show up
/// here. What remains are driver failures and defects of the firmware build itself, e.g. a schema
/// that doesn't fit into a bank or a payload that doesn't match the declared width of an item.
#[derive(Error, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub enum Error {
    /// The bank offset has to be aligned to the erase size of the underlying memory
    #[error("invalid bank offset")]
    InvalidBankOffset,

    /// The bank size has to be a multiple of the erase size, hold at least a bank header and a
    /// minimal transaction, and both banks have to fit into the device
    #[error("invalid bank size")]
    InvalidBankSize,

    /// The internal error value is returned from the provided `&mut impl NorFlash`
    #[error("internal flash error")]
    FlashError,

    /// The id is not part of the schema the store was opened with.
    #[error("unknown item {0:?}")]
    UnknownItem(ItemId),

    /// The payload length doesn't match the fixed width declared by the schema.
    #[error("length mismatch for {id:?}: expected {expected} bytes, got {actual}")]
    LengthMismatch {
        id: ItemId,
        expected: usize,
        actual: usize,
    },

    /// Items are limited to `MAX_ITEM_SIZE` bytes by the 9-bit length field of the record header.
    #[error("value too long")]
    ValueTooLong,

    /// A typed value doesn't match the layout it is encoded with.
    #[error("value does not match item layout")]
    ValueMismatch,

    /// Two schema items hash to the same id.
    #[error("item id collision {0:?}")]
    IdCollision(ItemId),

    /// The id is reserved by the on-disk format.
    #[error("reserved item id {0:?}")]
    ReservedId(ItemId),

    /// A transaction needs at least one item.
    #[error("empty transaction")]
    EmptyTransaction,

    /// A full snapshot of the schema doesn't fit into a single bank.
    #[error("bank overflow")]
    BankOverflow,

    /// A single transaction is larger than an empty bank.
    #[error("transaction too large")]
    TransactionTooLarge,

    /// String payload is not valid UTF-8.
    #[error("corrupted data")]
    CorruptedData,

    /// The bank sequence id can't be incremented any further.
    #[error("sequence id exhausted")]
    SequenceExhausted,
}

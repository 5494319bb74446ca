//! Transaction encoding and the write-side of the journal.
//!
//! ```text
//!  +------------+              +-------------+
//!  | ItemHeader |              | Transaction |
//!  +------------+              +-------------+
//!  | LastItem   |              |   Records   |
//!  | Id         |              |     .       |
//!  | DataLen    |              |     .       |
//!  +------------+              |  LastItem   | <- last_item flag set
//!  | Data       |              +-------------+
//!  +------------+              | CRC32       |
//!                              +-------------+
//! ```

use crate::codec::Value;
use crate::error::Error;
use crate::platform::{FnCrc32, Platform};
use crate::raw::{CRC_SIZE, ITEM_HEADER_SIZE, ItemHeader, MAX_ITEM_SIZE, write_aligned};
use crate::set::Set;
use crate::{ItemId, Store};
use alloc::vec::Vec;
#[cfg(feature = "defmt")]
use defmt::trace;

/// Encoded size of a transaction holding payloads of the given lengths.
pub(crate) fn transaction_size(lengths: impl IntoIterator<Item = usize>) -> usize {
    lengths
        .into_iter()
        .map(|len| ITEM_HEADER_SIZE + len)
        .sum::<usize>()
        + CRC_SIZE
}

/// Builds the on-disk bytes of one transaction: every record in order, the last one flagged, followed
/// by the little-endian CRC-32 over all record bytes.
pub(crate) fn encode_transaction<I: AsRef<[u8]>>(
    items: &[(ItemId, I)],
    crc32: FnCrc32,
) -> Result<Vec<u8>, Error> {
    if items.is_empty() {
        return Err(Error::EmptyTransaction);
    }

    let mut buf = Vec::with_capacity(transaction_size(
        items.iter().map(|(_, data)| data.as_ref().len()),
    ));

    for (position, (id, data)) in items.iter().enumerate() {
        let data = data.as_ref();
        if data.len() > MAX_ITEM_SIZE {
            return Err(Error::ValueTooLong);
        }
        let header = ItemHeader {
            last_item: position == items.len() - 1,
            id: *id,
            len: data.len() as u16,
        };
        buf.extend_from_slice(&header.to_bytes());
        buf.extend_from_slice(data);
    }

    let crc = crc32(0, &buf);
    buf.extend_from_slice(&crc.to_le_bytes());

    Ok(buf)
}

/// Programs an encoded transaction at `address`. Everything but the first record header goes
/// first, the header last: until it is programmed the location still reads as erased memory and
/// a reboot sees the end of the journal instead of a half written transaction.
pub(crate) fn program_transaction<T: Platform>(
    hal: &mut T,
    address: usize,
    bytes: &[u8],
) -> Result<(), Error> {
    #[cfg(feature = "defmt")]
    trace!("program_transaction: @{:#08x}[{}]", address, bytes.len());

    #[cfg(feature = "debug-logs")]
    println!("  journal: program_transaction @{address:#06x}[{}]", bytes.len());

    let (head, body) = bytes.split_at(ITEM_HEADER_SIZE.min(bytes.len()));
    write_aligned(hal, address + head.len(), body).map_err(|_| Error::FlashError)?;
    write_aligned(hal, address, head).map_err(|_| Error::FlashError)
}

/// Collects several writes that are committed as one atomic transaction. Nothing touches the
/// memory before `commit`; dropping the transaction discards it.
///
/// ```ignore
/// let mut tx = store.transaction();
/// tx.set(min_id, 10u16)?;
/// tx.set(max_id, 250u16)?;
/// tx.commit()?;
/// ```
#[must_use = "a transaction does nothing unless committed"]
pub struct Transaction<'a, T: Platform> {
    pub(crate) store: &'a mut Store<T>,
    pub(crate) items: Vec<(ItemId, Vec<u8>)>,
}

impl<'a, T: Platform> Transaction<'a, T> {
    pub(crate) fn new(store: &'a mut Store<T>) -> Self {
        Self {
            store,
            items: Vec::new(),
        }
    }

    /// Stages raw bytes. A later write of the same id within this transaction replaces the
    /// earlier one.
    pub fn set_raw(&mut self, id: ItemId, data: &[u8]) -> Result<(), Error> {
        self.store.check_width(id, data.len())?;

        match self.items.iter_mut().find(|(staged, _)| *staged == id) {
            Some((_, staged)) => {
                staged.clear();
                staged.extend_from_slice(data);
            }
            None => self.items.push((id, data.to_vec())),
        }
        Ok(())
    }

    /// Stages a typed value, see [`Store::set`].
    pub fn set<R>(&mut self, id: ItemId, value: R) -> Result<(), Error>
    where
        Store<T>: Set<R>,
    {
        let data = self.store.encode_for(id, value)?;
        self.set_raw(id, &data)
    }

    /// Stages a value encoded according to the item layout.
    pub fn set_value(&mut self, id: ItemId, value: &Value) -> Result<(), Error> {
        let data = self.store.encode_value(id, value)?;
        self.set_raw(id, &data)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Writes all staged items. An empty transaction is a no-op.
    pub fn commit(self) -> Result<(), Error> {
        if self.items.is_empty() {
            return Ok(());
        }
        self.store.set_many(&self.items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crc::crc32;
    use alloc::vec;
    use pretty_assertions::assert_eq;

    #[test]
    fn single_record() {
        let raw = encode_transaction(&[(ItemId::new(1), [0xAAu8])], crc32).unwrap();
        let header = ItemHeader {
            last_item: true,
            id: ItemId::new(1),
            len: 1,
        }
        .to_bytes();

        assert_eq!(raw.len(), transaction_size([1]));
        assert_eq!(&raw[..3], &header);
        assert_eq!(raw[3], 0xAA);
        assert_eq!(&raw[4..], &crc32(0, &raw[..4]).to_le_bytes());
    }

    #[test]
    fn only_last_record_is_flagged() {
        let items = [
            (ItemId::new(0x10), vec![1u8, 2]),
            (ItemId::new(0x20), vec![]),
            (ItemId::new(0x30), vec![3u8; 5]),
        ];
        let raw = encode_transaction(&items, crc32).unwrap();
        assert_eq!(raw.len(), 3 * ITEM_HEADER_SIZE + 7 + CRC_SIZE);

        let first = ItemHeader::from_bytes([raw[0], raw[1], raw[2]]);
        assert_eq!(first.id, ItemId::new(0x10));
        assert_eq!(first.len, 2);
        assert!(!first.last_item);

        let second = ItemHeader::from_bytes([raw[5], raw[6], raw[7]]);
        assert_eq!(second.len, 0);
        assert!(!second.last_item);

        let third = ItemHeader::from_bytes([raw[8], raw[9], raw[10]]);
        assert_eq!(third.id, ItemId::new(0x30));
        assert!(third.last_item);

        let crc_offset = raw.len() - CRC_SIZE;
        assert_eq!(
            &raw[crc_offset..],
            &crc32(0, &raw[..crc_offset]).to_le_bytes()
        );
    }

    #[test]
    fn empty_transaction() {
        let items: [(ItemId, &[u8]); 0] = [];
        assert_eq!(
            encode_transaction(&items, crc32),
            Err(Error::EmptyTransaction)
        );
    }

    #[test]
    fn oversized_record() {
        let data = vec![0u8; MAX_ITEM_SIZE + 1];
        assert_eq!(
            encode_transaction(&[(ItemId::new(1), data)], crc32),
            Err(Error::ValueTooLong)
        );
    }
}
